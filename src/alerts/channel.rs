//! Alert Channel - wiederverbindender Event-Stream
//!
//! Hält einen logischen Event-Stream über einzelne Verbindungen hinweg:
//! - Genau eine aktive Verbindung zur Zeit
//! - Feste Reconnect-Verzögerung, unbegrenzte Versuche
//! - Ungültige Nachrichten werden verworfen und gezählt
//! - Reihenfolge wie vom Transport geliefert, ohne Deduplizierung
//! - Der Store-Feed ist verlustfrei: ist er voll, wartet der Transport-Reader

use super::messages::{CallEvent, ClientNotification};
use super::transport::{Connector, Inbound, Outbound};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use url::Url;

/// Standard-Verzögerung bis zum nächsten Verbindungsversuch
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

const EVENT_CAPACITY: usize = 256;

/// Puffergröße des Store-Feeds (voll = Rückstau auf den Transport)
const STORE_FEED_CAPACITY: usize = 256;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum AlertChannelError {
    #[error("Not connected to alert service")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Failed to encode message: {0}")]
    Encode(String),
}

// ============================================================================
// CHANNEL EVENTS
// ============================================================================

/// Verbindungsstatus des Kanals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Open,
}

impl ConnectionStatus {
    pub fn is_open(self) -> bool {
        self == ConnectionStatus::Open
    }
}

/// Events die vom AlertChannel ausgelöst werden
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Verbindungsstatus hat sich geändert
    Status(ConnectionStatus),

    /// Gültiges Event vom Service
    Call(CallEvent),
}

// ============================================================================
// SUBSCRIPTION
// ============================================================================

/// Empfänger für Channel-Events, optional auf einen Anruf gefiltert
///
/// Status-Events werden immer zugestellt.
pub struct EventSubscription {
    rx: broadcast::Receiver<ChannelEvent>,
    call_filter: Option<String>,
}

impl EventSubscription {
    /// Wartet auf das nächste passende Event; `None` wenn der Kanal weg ist
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Alert subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn call_filter(&self) -> Option<&str> {
        self.call_filter.as_deref()
    }

    fn accepts(&self, event: &ChannelEvent) -> bool {
        match (event, &self.call_filter) {
            (ChannelEvent::Call(call), Some(filter)) => call.call_sid() == filter,
            _ => true,
        }
    }
}

// ============================================================================
// SHARED STATE
// ============================================================================

struct ChannelShared {
    endpoint: Url,
    reconnect_delay: Duration,
    status: RwLock<ConnectionStatus>,
    outbound: RwLock<Option<mpsc::Sender<Outbound>>>,
    event_tx: broadcast::Sender<ChannelEvent>,
    store_feed: RwLock<Option<mpsc::Sender<CallEvent>>>,
    dropped_payloads: AtomicU64,
    connect_attempts: AtomicU64,
}

impl ChannelShared {
    fn set_status(&self, status: ConnectionStatus) {
        {
            let mut current = self.status.write();
            if *current == status {
                return;
            }
            *current = status;
        }
        let _ = self.event_tx.send(ChannelEvent::Status(status));
    }

    /// Leitet Nachrichten einer Verbindung weiter bis sie endet
    async fn pump(&self, incoming: &mut mpsc::Receiver<Inbound>) -> Option<String> {
        while let Some(frame) = incoming.recv().await {
            match frame {
                Inbound::Text(text) => match CallEvent::parse(&text) {
                    Ok(event) => {
                        tracing::debug!("Received {} for {}", event.kind(), event.call_sid());
                        self.feed_store(&event).await;
                        let _ = self.event_tx.send(ChannelEvent::Call(event));
                    }
                    Err(e) => {
                        self.dropped_payloads.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!("Dropping malformed payload: {}", e);
                    }
                },
                Inbound::Binary(bytes) => {
                    self.dropped_payloads.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Dropping unexpected binary payload ({} bytes)", bytes.len());
                }
                Inbound::Closed(reason) => return reason,
            }
        }
        None
    }

    /// Übergibt ein Event an den Store-Feed und wartet, falls dieser voll ist
    async fn feed_store(&self, event: &CallEvent) {
        let Some(feed) = self.store_feed.read().clone() else {
            return;
        };
        if feed.send(event.clone()).await.is_err() {
            tracing::debug!("Store feed closed, detaching");
            let mut slot = self.store_feed.write();
            if slot.as_ref().is_some_and(|current| current.same_channel(&feed)) {
                slot.take();
            }
        }
    }

    async fn run<C: Connector>(self: Arc<Self>, connector: C, mut shutdown: watch::Receiver<bool>) {
        loop {
            self.set_status(ConnectionStatus::Connecting);
            self.connect_attempts.fetch_add(1, Ordering::Relaxed);
            tracing::info!("Connecting to alert service: {}", self.endpoint);

            let connected = tokio::select! {
                biased;
                _ = stopped(&mut shutdown) => break,
                result = connector.connect(&self.endpoint) => result,
            };

            match connected {
                Ok(mut connection) => {
                    *self.outbound.write() = Some(connection.outgoing.clone());
                    self.set_status(ConnectionStatus::Open);
                    tracing::info!("Alert channel open");

                    let closed = tokio::select! {
                        biased;
                        _ = stopped(&mut shutdown) => None,
                        reason = self.pump(&mut connection.incoming) => Some(reason),
                    };

                    self.outbound.write().take();
                    drop(connection);

                    match closed {
                        None => break,
                        Some(reason) => tracing::info!(
                            "Alert channel closed ({}), reconnecting in {:?}",
                            reason.as_deref().unwrap_or("no reason"),
                            self.reconnect_delay
                        ),
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Alert service unreachable: {}, retrying in {:?}",
                        e,
                        self.reconnect_delay
                    );
                }
            }

            self.set_status(ConnectionStatus::Disconnected);

            tokio::select! {
                biased;
                _ = stopped(&mut shutdown) => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.outbound.write().take();
        self.set_status(ConnectionStatus::Disconnected);
        tracing::info!("Alert channel stopped");
    }
}

/// Wartet bis Shutdown angefordert wurde (oder der Sender weg ist)
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

// ============================================================================
// ALERT CHANNEL
// ============================================================================

/// Wiederverbindender Client für den Fraud-Alert-Service
pub struct AlertChannel {
    shared: Arc<ChannelShared>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl AlertChannel {
    /// Erstellt einen neuen (noch nicht verbundenen) AlertChannel
    pub fn new(endpoint: Url, reconnect_delay: Duration) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            shared: Arc::new(ChannelShared {
                endpoint,
                reconnect_delay,
                status: RwLock::new(ConnectionStatus::Disconnected),
                outbound: RwLock::new(None),
                event_tx,
                store_feed: RwLock::new(None),
                dropped_payloads: AtomicU64::new(0),
                connect_attempts: AtomicU64::new(0),
            }),
            shutdown_tx,
            task: None,
        }
    }

    /// Startet die Verbindungsschleife
    ///
    /// Ein zweiter Aufruf während die Schleife läuft ist ein No-Op.
    pub fn connect<C: Connector>(&mut self, connector: C) {
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            tracing::debug!("Alert channel already running");
            return;
        }

        self.shutdown_tx.send_replace(false);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let shared = Arc::clone(&self.shared);
        self.task = Some(tokio::spawn(shared.run(connector, shutdown_rx)));
    }

    /// Verlustfreier Event-Strom für den einzigen Schreiber des Stores
    ///
    /// Anders als `subscribe` wird hier nichts übersprungen: ist der Feed
    /// voll, liest der Kanal nicht weiter vom Transport. Ein neuer Aufruf
    /// ersetzt den vorherigen Feed.
    pub fn store_feed(&self) -> mpsc::Receiver<CallEvent> {
        let (tx, rx) = mpsc::channel(STORE_FEED_CAPACITY);
        *self.shared.store_feed.write() = Some(tx);
        rx
    }

    /// Alle Events (Dashboard)
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.shared.event_tx.subscribe(),
            call_filter: None,
        }
    }

    /// Nur Events eines Anrufs (Einzelansicht)
    pub fn subscribe_call(&self, call_sid: impl Into<String>) -> EventSubscription {
        EventSubscription {
            rx: self.shared.event_tx.subscribe(),
            call_filter: Some(call_sid.into()),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.read()
    }

    pub fn endpoint(&self) -> &Url {
        &self.shared.endpoint
    }

    /// Anzahl verworfener, ungültiger Nachrichten
    pub fn dropped_payloads(&self) -> u64 {
        self.shared.dropped_payloads.load(Ordering::Relaxed)
    }

    /// Anzahl bisheriger Verbindungsversuche
    pub fn connect_attempts(&self) -> u64 {
        self.shared.connect_attempts.load(Ordering::Relaxed)
    }

    /// Sendet eine Benachrichtigung über die offene Verbindung (non-blocking)
    pub fn notify(&self, notification: &ClientNotification) -> Result<(), AlertChannelError> {
        let tx = self
            .shared
            .outbound
            .read()
            .clone()
            .ok_or(AlertChannelError::NotConnected)?;

        let payload = serde_json::to_string(notification)
            .map_err(|e| AlertChannelError::Encode(e.to_string()))?;

        tx.try_send(Outbound::Text(payload))
            .map_err(|e| AlertChannelError::SendFailed(e.to_string()))
    }

    /// Stoppt Reconnects und schließt die offene Verbindung
    pub async fn shutdown(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for AlertChannel {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for AlertChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertChannel")
            .field("endpoint", &self.shared.endpoint.as_str())
            .field("status", &self.status())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
