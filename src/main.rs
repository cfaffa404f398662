use anyhow::{Context, Result};
use clap::Parser;
use fraudwatch::alerts::{ChannelEvent, WebSocketConnector};
use fraudwatch::config::MonitorConfig;
use fraudwatch::presenter::{CallView, Dashboard, DashboardFilter, PresenterHandle};
use fraudwatch::{init_logging, MonitorClient};
use std::io::Write;
use tokio::task::JoinHandle;

#[derive(Parser)]
#[command(name = "fraudwatch")]
#[command(about = "Real-time fraud alerts for live voice calls")]
struct Args {
    /// Nur diesen Anruf anzeigen (sonst Dashboard)
    call_sid: Option<String>,

    /// Event-Endpoint (überschreibt die Konfiguration)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Dashboard-Filter: all, active, safe, fraud
    #[arg(short, long)]
    filter: Option<DashboardFilter>,

    /// Mikrofon an den Audio-Endpoint streamen
    #[cfg(feature = "capture")]
    #[arg(long)]
    capture: bool,
}

enum View {
    Dashboard(PresenterHandle<Dashboard>),
    /// Einzelansicht plus Log der Events dieses Anrufs
    Call(PresenterHandle<CallView>, JoinHandle<()>),
}

impl View {
    async fn shutdown(self) {
        match self {
            View::Dashboard(handle) => {
                handle.shutdown().await;
            }
            View::Call(handle, event_log) => {
                event_log.abort();
                handle.shutdown().await;
            }
        }
    }
}

/// Zeichnet die Ansicht neu (Bildschirm löschen, Zeilen ausgeben)
fn draw(lines: Vec<String>) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "\x1B[2J\x1B[H{}", lines.join("\n"));
    let _ = stdout.flush();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let mut config = MonitorConfig::load().context("Failed to load configuration")?;
    if let Some(endpoint) = args.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(filter) = args.filter {
        config.dashboard_filter = filter;
    }

    let client =
        MonitorClient::start(config, WebSocketConnector).context("Failed to start fraud monitor")?;

    let view = match args.call_sid {
        Some(call_sid) => {
            tracing::info!("Watching call {}", call_sid);
            let mut events = client.channel().subscribe_call(call_sid.clone());
            let event_log = tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if let ChannelEvent::Call(event) = event {
                        tracing::info!("{} for {}", event.kind(), event.call_sid());
                    }
                }
            });
            View::Call(client.call_view(call_sid, draw), event_log)
        }
        None => View::Dashboard(client.dashboard(draw)),
    };

    #[cfg(feature = "capture")]
    let audio = if args.capture {
        let (producer, uplink) = client
            .audio_pipeline(WebSocketConnector)
            .context("Invalid audio endpoint")?;
        let capture = fraudwatch::audio::AudioCapture::start(producer, client.config().sample_rate)
            .context("Failed to start audio capture")?;
        Some((capture, uplink))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Ctrl-C received");

    #[cfg(feature = "capture")]
    if let Some((mut capture, mut uplink)) = audio {
        capture.stop();
        uplink.shutdown().await;
    }

    view.shutdown().await;
    client.shutdown().await;
    Ok(())
}
