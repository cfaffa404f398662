//! Transport-Schicht für persistente Message-Kanäle
//!
//! Eine `Connection` ist ein Paar aus Eingangs- und Ausgangs-Channel.
//! Der WebSocket-Connector startet dafür einen Read- und einen Write-Task,
//! der Loopback-Connector verbindet die Channels direkt mit einer Gegenstelle
//! im selben Prozess (Tests, Einbettung).

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Puffergröße der Channels einer Verbindung
const CHANNEL_CAPACITY: usize = 100;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Connection closed")]
    Closed,
}

// ============================================================================
// FRAMES
// ============================================================================

/// Vom Transport empfangene Nachricht
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
    /// Verbindung beendet (mit optionalem Grund)
    Closed(Option<String>),
}

/// An den Transport zu sendende Nachricht
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
}

// ============================================================================
// CONNECTION
// ============================================================================

/// Eine offene Verbindung
///
/// Beim Drop wird der Read-Task abgebrochen und der Ausgangs-Channel
/// geschlossen, woraufhin der Write-Task die Verbindung sauber schließt.
pub struct Connection {
    pub incoming: mpsc::Receiver<Inbound>,
    pub outgoing: mpsc::Sender<Outbound>,
    reader: Option<JoinHandle<()>>,
}

impl Connection {
    pub fn new(incoming: mpsc::Receiver<Inbound>, outgoing: mpsc::Sender<Outbound>) -> Self {
        Self {
            incoming,
            outgoing,
            reader: None,
        }
    }

    fn with_reader(mut self, reader: JoinHandle<()>) -> Self {
        self.reader = Some(reader);
        self
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("outgoing_closed", &self.outgoing.is_closed())
            .finish()
    }
}

// ============================================================================
// CONNECTOR
// ============================================================================

/// Baut neue Verbindungen zu einem Endpoint auf
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, endpoint: &Url) -> BoxFuture<'static, Result<Connection, TransportError>>;
}

/// WebSocket Connector (tokio-tungstenite)
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect(&self, endpoint: &Url) -> BoxFuture<'static, Result<Connection, TransportError>> {
        let endpoint = endpoint.to_string();

        Box::pin(async move {
            tracing::debug!("Opening WebSocket: {}", endpoint);

            let (ws_stream, _) = connect_async(endpoint.as_str())
                .await
                .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

            let (mut write, mut read) = ws_stream.split();
            let (in_tx, in_rx) = mpsc::channel::<Inbound>(CHANNEL_CAPACITY);
            let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(CHANNEL_CAPACITY);

            // Read-Task starten
            let reader = tokio::spawn(async move {
                let reason = loop {
                    let frame = match read.next().await {
                        Some(Ok(Message::Text(text))) => Inbound::Text(text),
                        Some(Ok(Message::Binary(bytes))) => Inbound::Binary(bytes),
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!("WebSocket closed by server");
                            break frame.map(|f| f.reason.to_string());
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            tracing::warn!("WebSocket error: {}", e);
                            break Some(e.to_string());
                        }
                        None => break None,
                    };

                    if in_tx.send(frame).await.is_err() {
                        return;
                    }
                };

                let _ = in_tx.send(Inbound::Closed(reason)).await;
            });

            // Write-Task starten
            tokio::spawn(async move {
                while let Some(frame) = out_rx.recv().await {
                    let msg = match frame {
                        Outbound::Text(text) => Message::Text(text),
                        Outbound::Binary(bytes) => Message::Binary(bytes),
                    };
                    if let Err(e) = write.send(msg).await {
                        tracing::error!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                let _ = write.close().await;
            });

            Ok(Connection::new(in_rx, out_tx).with_reader(reader))
        })
    }
}

// ============================================================================
// LOOPBACK CONNECTOR
// ============================================================================

/// Gegenstelle einer Loopback-Verbindung
#[derive(Debug)]
pub struct LoopbackPeer {
    /// Nachrichten an den Client
    pub to_client: mpsc::Sender<Inbound>,
    /// Nachrichten vom Client
    pub from_client: mpsc::Receiver<Outbound>,
}

impl LoopbackPeer {
    /// Sendet eine Text-Nachricht an den Client
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.to_client
            .send(Inbound::Text(text.into()))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Schließt die Verbindung aus Sicht des Servers
    pub async fn close(self) {
        let _ = self.to_client.send(Inbound::Closed(None)).await;
    }
}

/// In-Process Connector: jede Verbindung erzeugt einen `LoopbackPeer`
///
/// Ist `refuse` gesetzt, schlägt jeder Verbindungsaufbau fehl.
#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    peers: mpsc::UnboundedSender<LoopbackPeer>,
    refuse: bool,
}

impl LoopbackConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoopbackPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                refuse: false,
            },
            rx,
        )
    }

    /// Connector, der jeden Verbindungsversuch ablehnt und nur zählt
    pub fn refusing() -> (Self, mpsc::UnboundedReceiver<LoopbackPeer>) {
        let (mut connector, rx) = Self::new();
        connector.refuse = true;
        (connector, rx)
    }
}

impl Connector for LoopbackConnector {
    fn connect(&self, endpoint: &Url) -> BoxFuture<'static, Result<Connection, TransportError>> {
        let peers = self.peers.clone();
        let refuse = self.refuse;
        let endpoint = endpoint.to_string();

        Box::pin(async move {
            if refuse {
                return Err(TransportError::ConnectFailed(format!(
                    "connection refused: {}",
                    endpoint
                )));
            }

            let (to_client, incoming) = mpsc::channel(CHANNEL_CAPACITY);
            let (outgoing, from_client) = mpsc::channel(CHANNEL_CAPACITY);

            peers
                .send(LoopbackPeer {
                    to_client,
                    from_client,
                })
                .map_err(|_| TransportError::ConnectFailed("loopback peer gone".to_string()))?;

            Ok(Connection::new(incoming, outgoing))
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
