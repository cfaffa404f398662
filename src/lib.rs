//! Fraudwatch - Echtzeit Fraud-Alerts für laufende Telefonate
//!
//! Client-Seite eines Fraud-Detection-Systems mit:
//! - AlertChannel: persistente Verbindung zum Service mit Auto-Reconnect
//! - CallStateStore: ein Eintrag pro Anruf, idempotent fortgeschrieben
//! - Presentern für Einzelansicht und Dashboard
//! - Audio-Aggregation und Uplink für die Analyse

pub mod alerts;
pub mod audio;
pub mod call_state;
pub mod config;
pub mod presenter;

use alerts::{AlertChannel, AlertChannelError, ClientNotification, Connector};
use audio::{
    chunk_handoff, AudioUplink, ChunkProducer, FrameAggregator, DEFAULT_HANDOFF_CAPACITY,
    DEFAULT_POLL_INTERVAL,
};
use call_state::{CallMonitor, CallStateStore};
use config::{ConfigError, MonitorConfig};
use once_cell::sync::OnceCell;
use presenter::{CallView, Dashboard, Presenter, PresenterHandle};

// ============================================================================
// LOGGING
// ============================================================================

static LOGGING: OnceCell<()> = OnceCell::new();

/// Initialisiert das Logging (einmal pro Prozess, weitere Aufrufe sind no-ops)
pub fn init_logging() {
    LOGGING.get_or_init(|| {
        let mut filter = tracing_subscriber::EnvFilter::from_default_env();
        for directive in ["fraudwatch=debug", "tungstenite=warn"] {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }

        // Schlägt fehl, wenn bereits ein globaler Subscriber gesetzt ist
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

// ============================================================================
// MONITOR CLIENT
// ============================================================================

/// Verdrahtet Kanal, Store und Presenter
///
/// Besitzt den AlertChannel und den CallMonitor. `shutdown` stoppt den
/// Reconnect-Loop, schließt den Transport und beendet alle Timer.
pub struct MonitorClient {
    config: MonitorConfig,
    channel: AlertChannel,
    monitor: CallMonitor,
}

impl MonitorClient {
    /// Startet den Client gegen den konfigurierten Endpoint
    pub fn start<C: Connector>(config: MonitorConfig, connector: C) -> Result<Self, ConfigError> {
        config.validate()?;
        let endpoint = config.endpoint_url()?;

        tracing::info!("Starting fraud monitor for {}", endpoint);

        let mut channel = AlertChannel::new(endpoint, config.reconnect_delay());
        let monitor = CallMonitor::spawn(
            CallStateStore::new(config.flag_policy, config.grace_period()),
            channel.store_feed(),
            config.sweep_interval(),
        );
        channel.connect(connector);

        Ok(Self {
            config,
            channel,
            monitor,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn channel(&self) -> &AlertChannel {
        &self.channel
    }

    pub fn monitor(&self) -> &CallMonitor {
        &self.monitor
    }

    /// Hängt einen Presenter an; `sink` bekommt jede gerenderte Ansicht
    pub fn attach<P, F>(&self, presenter: P, sink: F) -> PresenterHandle<P>
    where
        P: Presenter,
        F: FnMut(Vec<String>) + Send + 'static,
    {
        PresenterHandle::spawn(
            presenter,
            &self.monitor,
            self.channel.subscribe(),
            self.channel.status(),
            self.config.tick_interval(),
            sink,
        )
    }

    /// Dashboard mit dem konfigurierten Filter
    pub fn dashboard<F>(&self, sink: F) -> PresenterHandle<Dashboard>
    where
        F: FnMut(Vec<String>) + Send + 'static,
    {
        self.attach(Dashboard::new(self.config.dashboard_filter), sink)
    }

    pub fn call_view<F>(&self, call_sid: impl Into<String>, sink: F) -> PresenterHandle<CallView>
    where
        F: FnMut(Vec<String>) + Send + 'static,
    {
        self.attach(CallView::new(call_sid), sink)
    }

    /// Sendet eine Benachrichtigung an den Service
    pub fn notify(&self, notification: &ClientNotification) -> Result<(), AlertChannelError> {
        self.channel.notify(notification)
    }

    /// Baut Aggregator, Handoff und Uplink zum Audio-Endpoint
    ///
    /// Der Producer gehört in den Audio-Callback.
    pub fn audio_pipeline<C: Connector>(
        &self,
        connector: C,
    ) -> Result<(ChunkProducer, AudioUplink), ConfigError> {
        let endpoint = self.config.audio_endpoint_url()?;
        let aggregator = FrameAggregator::new(self.config.flush_threshold, self.config.block_len);
        let (producer, consumer) = chunk_handoff(aggregator, DEFAULT_HANDOFF_CAPACITY);

        let uplink = AudioUplink::spawn(
            endpoint,
            connector,
            consumer,
            DEFAULT_POLL_INTERVAL,
            self.config.reconnect_delay(),
        );
        Ok((producer, uplink))
    }

    /// Stoppt Monitor und Kanal
    pub async fn shutdown(mut self) {
        tracing::info!("Shutting down fraud monitor");
        self.monitor.shutdown();
        self.channel.shutdown().await;
    }
}

impl std::fmt::Debug for MonitorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorClient")
            .field("endpoint", &self.config.endpoint)
            .field("channel", &self.channel)
            .field("monitor", &self.monitor)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
