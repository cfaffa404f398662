//! Audio Uplink - sendet Chunks als Binary-Frames
//!
//! Holt fertige Chunks aus dem Handoff und sendet sie als Little-Endian
//! PCM über einen Connector. Bei Verbindungsverlust wird nach fester
//! Verzögerung neu verbunden; zwischenzeitlich angefallene Chunks sind
//! veraltet und werden verworfen.

use super::handoff::ChunkConsumer;
use crate::alerts::{Connector, Inbound, Outbound};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use url::Url;

/// Wie oft der Handoff geleert wird
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Default)]
struct UplinkStats {
    sent: AtomicU64,
    discarded: AtomicU64,
}

/// Hintergrund-Task, der Audio-Chunks an einen Endpoint schickt
pub struct AudioUplink {
    endpoint: Url,
    stats: Arc<UplinkStats>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl AudioUplink {
    /// Startet den Uplink-Task
    pub fn spawn<C: Connector>(
        endpoint: Url,
        connector: C,
        consumer: ChunkConsumer,
        poll_interval: Duration,
        reconnect_delay: Duration,
    ) -> Self {
        let stats = Arc::new(UplinkStats::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_uplink(
            endpoint.clone(),
            connector,
            consumer,
            poll_interval.max(Duration::from_millis(1)),
            reconnect_delay,
            Arc::clone(&stats),
            shutdown_rx,
        ));

        Self {
            endpoint,
            stats,
            shutdown_tx,
            task: Some(task),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Anzahl gesendeter Chunks
    pub fn sent_chunks(&self) -> u64 {
        self.stats.sent.load(Ordering::Relaxed)
    }

    /// Anzahl verworfener Chunks (ohne Verbindung angefallen)
    pub fn discarded_chunks(&self) -> u64 {
        self.stats.discarded.load(Ordering::Relaxed)
    }

    /// Sendet noch wartende Chunks und schließt die Verbindung
    pub async fn shutdown(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for AudioUplink {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for AudioUplink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioUplink")
            .field("endpoint", &self.endpoint.as_str())
            .field("sent", &self.sent_chunks())
            .field("discarded", &self.discarded_chunks())
            .finish()
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Leert den Handoff; `false` wenn die Verbindung weg ist
async fn drain(
    consumer: &mut ChunkConsumer,
    outgoing: &mpsc::Sender<Outbound>,
    stats: &UplinkStats,
) -> bool {
    while let Some(chunk) = consumer.try_next() {
        let frame = Outbound::Binary(chunk.to_le_bytes());
        consumer.recycle(chunk);
        if outgoing.send(frame).await.is_err() {
            stats.discarded.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        stats.sent.fetch_add(1, Ordering::Relaxed);
    }
    true
}

async fn run_uplink<C: Connector>(
    endpoint: Url,
    connector: C,
    mut consumer: ChunkConsumer,
    poll_interval: Duration,
    reconnect_delay: Duration,
    stats: Arc<UplinkStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tracing::info!("Connecting audio uplink: {}", endpoint);

        let connected = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            result = connector.connect(&endpoint) => result,
        };

        match connected {
            Ok(mut connection) => {
                tracing::info!("Audio uplink connected");

                let mut interval = tokio::time::interval(poll_interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

                let finished = loop {
                    tokio::select! {
                        biased;
                        _ = stopped(&mut shutdown) => {
                            drain(&mut consumer, &connection.outgoing, &stats).await;
                            break true;
                        }
                        frame = connection.incoming.recv() => match frame {
                            Some(Inbound::Text(text)) => {
                                tracing::debug!("Audio endpoint message: {}", text);
                            }
                            Some(Inbound::Binary(_)) => {}
                            Some(Inbound::Closed(_)) | None => break false,
                        },
                        _ = interval.tick() => {
                            if !drain(&mut consumer, &connection.outgoing, &stats).await {
                                break false;
                            }
                        }
                    }
                };

                drop(connection);
                if finished {
                    break;
                }
                tracing::warn!(
                    "Audio uplink lost, reconnecting in {:?}",
                    reconnect_delay
                );
            }
            Err(e) => {
                tracing::warn!(
                    "Audio endpoint unreachable: {}, retrying in {:?}",
                    e,
                    reconnect_delay
                );
            }
        }

        tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }

        // Veraltete Chunks nicht nachsenden
        let mut stale = 0;
        while let Some(chunk) = consumer.try_next() {
            consumer.recycle(chunk);
            stale += 1;
        }
        if stale > 0 {
            stats.discarded.fetch_add(stale, Ordering::Relaxed);
            tracing::debug!("Discarded {} stale audio chunks", stale);
        }
    }

    tracing::info!(
        "Audio uplink stopped ({} handoff overruns)",
        consumer.overruns()
    );
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::LoopbackConnector;
    use crate::audio::{chunk_handoff, FrameAggregator};

    fn endpoint() -> Url {
        Url::parse("ws://localhost:5005").unwrap()
    }

    #[tokio::test]
    async fn test_chunks_are_sent_as_pcm_frames() {
        let (connector, mut peers) = LoopbackConnector::new();
        let (mut producer, consumer) = chunk_handoff(FrameAggregator::new(20, Some(128)), 4);

        let mut uplink = AudioUplink::spawn(
            endpoint(),
            connector,
            consumer,
            DEFAULT_POLL_INTERVAL,
            Duration::from_secs(3),
        );
        let mut peer = peers.recv().await.unwrap();

        let block = [0.5f32; 128];
        for _ in 0..40 {
            producer.push_block(&block);
        }

        for _ in 0..2 {
            match peer.from_client.recv().await {
                Some(Outbound::Binary(bytes)) => assert_eq!(bytes.len(), 20 * 128 * 2),
                other => panic!("unexpected frame: {:?}", other),
            }
        }

        // Beide gesendeten Puffer sind wieder im Pool des Aggregators
        producer.push_block(&block);
        assert_eq!(producer.aggregator().spare_buffers(), 2);

        producer.finish();
        uplink.shutdown().await;

        match peer.from_client.recv().await {
            Some(Outbound::Binary(bytes)) => {
                assert_eq!(bytes.len(), 128 * 2);
                assert_eq!(&bytes[..2], &16383i16.to_le_bytes());
            }
            other => panic!("unexpected frame: {:?}", other),
        }
        assert!(peer.from_client.recv().await.is_none());
        assert_eq!(uplink.sent_chunks(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_without_connection_are_discarded() {
        let (connector, _peers) = LoopbackConnector::refusing();
        let (mut producer, consumer) = chunk_handoff(FrameAggregator::new(1, None), 8);

        let mut uplink = AudioUplink::spawn(
            endpoint(),
            connector,
            consumer,
            DEFAULT_POLL_INTERVAL,
            Duration::from_secs(3),
        );

        producer.push_block(&[0.1; 4]);
        producer.push_block(&[0.2; 4]);
        tokio::time::sleep(Duration::from_millis(3_500)).await;

        assert_eq!(uplink.discarded_chunks(), 2);
        assert_eq!(uplink.sent_chunks(), 0);
        uplink.shutdown().await;
    }
}
