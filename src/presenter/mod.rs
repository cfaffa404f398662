//! Presenter Module - Anzeige des Anrufzustands
//!
//! Presenter sind reine Leser: sie bekommen Änderungen aus dem Store und
//! den Verbindungsstatus des Kanals und rendern daraus Textzeilen.
//! Der Tick-Timer gehört dem `PresenterHandle` und endet mit ihm.

mod call_view;
mod dashboard;

pub use call_view::CallView;
pub use dashboard::{Dashboard, DashboardFilter};

use crate::alerts::{ChannelEvent, ConnectionStatus, EventSubscription};
use crate::call_state::{CallMonitor, CallRecord, CallStateStore, StoreChange};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Standard-Intervall für das Aktualisieren der Laufzeit-Anzeigen
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Leseseite auf den Anrufzustand
pub trait Presenter: Send + 'static {
    /// Ersetzt den bekannten Zustand durch einen vollständigen Snapshot
    fn on_snapshot(&mut self, records: &[CallRecord]);

    fn on_change(&mut self, change: &StoreChange);

    fn on_connection(&mut self, status: ConnectionStatus);

    /// Rendert die aktuelle Ansicht
    fn render(&self, now: DateTime<Utc>) -> Vec<String>;
}

// ============================================================================
// PRESENTER HANDLE
// ============================================================================

/// Besitzt den Task eines Presenters
///
/// Der Task rendert bei jeder Änderung, jedem Statuswechsel und jedem Tick
/// in die übergebene Senke. Beim Drop werden Task und Tick-Timer beendet.
pub struct PresenterHandle<P: Presenter> {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<P>>,
}

impl<P: Presenter> PresenterHandle<P> {
    /// Startet einen Presenter auf dem Zustand des Monitors
    pub fn spawn<F>(
        mut presenter: P,
        monitor: &CallMonitor,
        events: EventSubscription,
        initial_status: ConnectionStatus,
        tick_interval: Duration,
        sink: F,
    ) -> Self
    where
        F: FnMut(Vec<String>) + Send + 'static,
    {
        // Erst abonnieren, dann Snapshot: keine Änderung geht verloren
        let changes = monitor.subscribe();
        presenter.on_snapshot(&monitor.records());
        presenter.on_connection(initial_status);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_presenter(
            presenter,
            PresenterInputs {
                changes,
                events: Some(events),
                store: monitor.shared_store(),
                clock: monitor.clock(),
                tick_interval: tick_interval.max(Duration::from_millis(1)),
                shutdown: shutdown_rx,
            },
            sink,
        ));

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Beendet den Task und gibt den Presenter zurück
    pub async fn shutdown(mut self) -> Option<P> {
        self.shutdown_tx.send_replace(true);
        match self.task.take() {
            Some(task) => task.await.ok(),
            None => None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl<P: Presenter> Drop for PresenterHandle<P> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<P: Presenter> std::fmt::Debug for PresenterHandle<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenterHandle")
            .field("running", &self.is_running())
            .finish()
    }
}

struct PresenterInputs {
    changes: broadcast::Receiver<StoreChange>,
    events: Option<EventSubscription>,
    store: Arc<Mutex<CallStateStore>>,
    clock: crate::call_state::MonitorClock,
    tick_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

async fn next_status(events: &mut Option<EventSubscription>) -> Option<ChannelEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn run_presenter<P, F>(mut presenter: P, mut inputs: PresenterInputs, mut sink: F) -> P
where
    P: Presenter,
    F: FnMut(Vec<String>) + Send + 'static,
{
    let mut tick = tokio::time::interval(inputs.tick_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = inputs.shutdown.wait_for(|stop| *stop) => break,
            change = inputs.changes.recv() => match change {
                Ok(change) => presenter.on_change(&change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Presenter lagged by {} changes, resyncing", skipped);
                    let records = inputs.store.lock().records();
                    presenter.on_snapshot(&records);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            event = next_status(&mut inputs.events) => match event {
                Some(ChannelEvent::Status(status)) => presenter.on_connection(status),
                Some(ChannelEvent::Call(_)) => continue,
                None => {
                    inputs.events = None;
                    continue;
                }
            },
            _ = tick.tick() => {}
        }

        sink(presenter.render(inputs.clock.now()));
    }

    tracing::debug!("Presenter stopped");
    presenter
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertChannel, LoopbackConnector};
    use crate::call_state::{FlagPolicy, DEFAULT_GRACE_PERIOD, DEFAULT_SWEEP_INTERVAL};
    use url::Url;

    #[derive(Default)]
    struct Recorder {
        changes: Vec<String>,
        statuses: Vec<ConnectionStatus>,
    }

    impl Presenter for Recorder {
        fn on_snapshot(&mut self, records: &[CallRecord]) {
            self.changes = records.iter().map(|r| r.call_sid.clone()).collect();
        }

        fn on_change(&mut self, change: &StoreChange) {
            self.changes
                .push(format!("{}:{:?}", change.call_sid, change.kind));
        }

        fn on_connection(&mut self, status: ConnectionStatus) {
            self.statuses.push(status);
        }

        fn render(&self, _now: DateTime<Utc>) -> Vec<String> {
            self.changes.clone()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_feeds_presenter_and_ticks() {
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

        let renders = Arc::new(Mutex::new(Vec::<Vec<String>>::new()));
        let sink_renders = Arc::clone(&renders);
        let handle = PresenterHandle::spawn(
            Recorder::default(),
            &monitor,
            channel.subscribe(),
            channel.status(),
            DEFAULT_TICK_INTERVAL,
            move |lines| sink_renders.lock().push(lines),
        );

        channel.connect(connector);
        let peer = peers.recv().await.unwrap();
        peer.send_text(r#"{"event":"call_started","call_sid":"A"}"#)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(3_500)).await;

        let presenter = handle.shutdown().await.unwrap();
        assert_eq!(presenter.changes, vec!["A:Created".to_string()]);
        assert_eq!(
            presenter.statuses,
            vec![
                ConnectionStatus::Disconnected,
                ConnectionStatus::Connecting,
                ConnectionStatus::Open
            ]
        );

        // Ticks rendern auch ohne Änderungen weiter
        let count = renders.lock().len();
        assert!(count >= 5, "only {} renders", count);

        monitor.shutdown();
        channel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_rendering() {
        let channel = AlertChannel::new(
            Url::parse("ws://localhost:5000/client").unwrap(),
            Duration::from_secs(3),
        );
        let monitor = CallMonitor::spawn(
            CallStateStore::default(),
            channel.store_feed(),
            DEFAULT_SWEEP_INTERVAL,
        );

        let renders = Arc::new(Mutex::new(0usize));
        let sink_renders = Arc::clone(&renders);
        let handle = PresenterHandle::spawn(
            Recorder::default(),
            &monitor,
            channel.subscribe(),
            channel.status(),
            DEFAULT_TICK_INTERVAL,
            move |_| *sink_renders.lock() += 1,
        );

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        drop(handle);
        tokio::task::yield_now().await;
        let after_drop = *renders.lock();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(*renders.lock(), after_drop);
    }
}
