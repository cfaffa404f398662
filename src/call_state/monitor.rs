//! Call Monitor - Laufzeit um den CallStateStore
//!
//! Startet zwei Tasks, die beide dem Monitor gehören:
//! - Event-Pump: verlustfreier Store-Feed des AlertChannel → `CallStateStore::apply`
//! - Expiry-Sweep: entfernt beendete Anrufe nach der Grace Period
//!
//! Der Store hat genau einen Schreiber (die Pump bzw. den Sweep, serialisiert
//! über den Mutex); Leser bekommen nur Snapshots.

use super::record::CallRecord;
use super::store::{CallStateStore, StoreChange};
use crate::alerts::CallEvent;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Standard-Intervall des Expiry-Sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct CallMonitor {
    store: Arc<Mutex<CallStateStore>>,
    change_tx: broadcast::Sender<StoreChange>,
    clock: MonitorClock,
    tasks: Vec<JoinHandle<()>>,
}

impl CallMonitor {
    /// Startet Pump und Sweep für den gegebenen Store
    ///
    /// `events` kommt aus `AlertChannel::store_feed`.
    pub fn spawn(
        store: CallStateStore,
        mut events: mpsc::Receiver<CallEvent>,
        sweep_interval: Duration,
    ) -> Self {
        let change_tx = store.change_sender();
        let store = Arc::new(Mutex::new(store));
        let clock = MonitorClock::start();

        // Event-Pump starten
        let pump_store = Arc::clone(&store);
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                pump_store.lock().apply_at(event, clock.now());
            }
            tracing::info!("Event pump stopped");
        });

        // Expiry-Sweep starten
        let sweep_store = Arc::clone(&store);
        let sweep_interval = sweep_interval.max(Duration::from_millis(1));
        let sweep = tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                interval.tick().await;
                sweep_store.lock().sweep_expired(clock.now());
            }
        });

        Self {
            store,
            change_tx,
            clock,
            tasks: vec![pump, sweep],
        }
    }

    /// Aktuelle Zeit aus Sicht des Monitors (für Laufzeit-Anzeigen)
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock(&self) -> MonitorClock {
        self.clock
    }

    /// Gibt einen Änderungs-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.change_tx.subscribe()
    }

    pub fn get(&self, call_sid: &str) -> Option<CallRecord> {
        self.store.lock().get(call_sid)
    }

    /// Alle Anrufe, neueste zuerst
    pub fn records(&self) -> Vec<CallRecord> {
        self.store.lock().records()
    }

    pub fn active_count(&self) -> usize {
        self.store.lock().active_count()
    }

    /// Lesezugriff für Presenter, die nach verpassten Änderungen neu synchronisieren
    pub(crate) fn shared_store(&self) -> Arc<Mutex<CallStateStore>> {
        Arc::clone(&self.store)
    }

    /// Stoppt Pump und Sweep
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for CallMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CallMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallMonitor")
            .field("store", &*self.store.lock())
            .field("running", &!self.tasks.is_empty())
            .finish()
    }
}

// ============================================================================
// CLOCK
// ============================================================================

/// Wanduhr-Zeit, fortgeschrieben über die monotone tokio-Uhr
///
/// Sprünge der Systemzeit verschieben so weder Laufzeiten noch Expiry.
#[derive(Debug, Clone, Copy)]
pub struct MonitorClock {
    wall: DateTime<Utc>,
    started: Instant,
}

impl MonitorClock {
    pub fn start() -> Self {
        Self {
            wall: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed()).unwrap_or_default();
        self.wall + elapsed
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{
        AlertChannel, Connection, Connector, Inbound, LoopbackConnector, Outbound, TransportError,
    };
    use futures::future::BoxFuture;
    use crate::call_state::{CallStatus, ChangeKind, DEFAULT_GRACE_PERIOD, FlagPolicy};
    use url::Url;

    async fn next_change(rx: &mut broadcast::Receiver<StoreChange>) -> StoreChange {
        rx.recv().await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_applies_events_and_expires() {
        let (connector, mut peers) = LoopbackConnector::new();
        let mut channel = AlertChannel::new(
            Url::parse("ws://localhost:5000/client").unwrap(),
            Duration::from_secs(3),
        );
        let mut monitor = CallMonitor::spawn(
            CallStateStore::new(FlagPolicy::LatestUpdate, DEFAULT_GRACE_PERIOD),
            channel.store_feed(),
            DEFAULT_SWEEP_INTERVAL,
        );
        let mut changes = monitor.subscribe();

        channel.connect(connector);
        let peer = peers.recv().await.unwrap();

        peer.send_text(r#"{"event":"call_started","call_sid":"A","caller":"+15550001"}"#)
            .await
            .unwrap();
        let change = next_change(&mut changes).await;
        assert_eq!(change.kind, ChangeKind::Created);
        assert_eq!(monitor.active_count(), 1);

        peer.send_text(r#"{"event":"call_ended","call_sid":"A"}"#)
            .await
            .unwrap();
        let change = next_change(&mut changes).await;
        assert_eq!(change.kind, ChangeKind::Ended);
        assert_eq!(monitor.get("A").unwrap().status, CallStatus::Ended);

        let change = next_change(&mut changes).await;
        assert_eq!(change.kind, ChangeKind::Expired);
        assert!(monitor.get("A").is_none());
        assert!(monitor.records().is_empty());

        monitor.shutdown();
        channel.shutdown().await;
    }

    /// Liefert beim ersten Verbinden einen vorab gefüllten Burst, danach nichts mehr
    struct BurstConnector {
        frames: Mutex<Option<mpsc::Receiver<Inbound>>>,
    }

    impl BurstConnector {
        /// Gibt zusätzlich den Sender zurück, damit die Verbindung offen bleibt
        fn new(sids: usize) -> (Self, mpsc::Sender<Inbound>) {
            let (tx, rx) = mpsc::channel(sids + 1);
            for i in 0..sids {
                let payload = format!(r#"{{"event":"call_started","call_sid":"CA{:05}"}}"#, i);
                tx.try_send(Inbound::Text(payload)).unwrap();
            }
            let connector = Self {
                frames: Mutex::new(Some(rx)),
            };
            (connector, tx)
        }
    }

    impl Connector for BurstConnector {
        fn connect(&self, _endpoint: &Url) -> BoxFuture<'static, Result<Connection, TransportError>> {
            let frames = self.frames.lock().take();
            Box::pin(async move {
                let incoming = frames.ok_or(TransportError::Closed)?;
                let (outgoing, _) = mpsc::channel::<Outbound>(1);
                Ok(Connection::new(incoming, outgoing))
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_burst_larger_than_event_buffer_reaches_store() {
        const BURST: usize = 20_000;

        let (connector, _keep_open) = BurstConnector::new(BURST);
        let mut channel = AlertChannel::new(
            Url::parse("ws://localhost:5000/client").unwrap(),
            Duration::from_secs(3),
        );
        let mut monitor = CallMonitor::spawn(
            CallStateStore::new(FlagPolicy::LatestUpdate, DEFAULT_GRACE_PERIOD),
            channel.store_feed(),
            DEFAULT_SWEEP_INTERVAL,
        );
        // Ein Presenter-Abo, das nie liest, darf den Store nicht bremsen
        let _idle = channel.subscribe();

        channel.connect(connector);

        // Der Feed ist geordnet: ist der letzte Anruf da, sind es alle davor auch
        let last = format!("CA{:05}", BURST - 1);
        let deadline = Instant::now() + Duration::from_secs(30);
        while monitor.get(&last).is_none() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(monitor.get(&last).is_some(), "burst did not finish");
        assert_eq!(monitor.records().len(), BURST);
        assert_eq!(monitor.active_count(), BURST);

        monitor.shutdown();
        channel.shutdown().await;
    }
}
