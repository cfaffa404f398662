//! Chunk Handoff - Real-Time Callback → Netzwerk-Task
//!
//! Lock-freier SPSC Ring-Buffer zwischen Audio-Callback und Uplink.
//! Der Producer-Teil besitzt den FrameAggregator und blockiert nie:
//! ist der Ring voll, wird der Chunk verworfen und gezählt.
//! Ein zweiter Ring bringt gesendete Puffer zurück in den Pool des Aggregators.

use super::aggregator::{AudioChunk, FrameAggregator, MAX_SPARE_BUFFERS};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Standard-Kapazität in Chunks (~1.6s bei 160ms pro Chunk)
pub const DEFAULT_HANDOFF_CAPACITY: usize = 10;

/// Erstellt ein verbundenes Producer/Consumer-Paar
pub fn chunk_handoff(aggregator: FrameAggregator, capacity: usize) -> (ChunkProducer, ChunkConsumer) {
    let capacity = capacity.max(1);
    let (producer, consumer) = HeapRb::<AudioChunk>::new(capacity).split();
    let (returned_tx, returned_rx) = HeapRb::<Vec<i16>>::new(capacity).split();
    let overruns = Arc::new(AtomicU64::new(0));
    let chunk_capacity = aggregator.chunk_capacity();

    (
        ChunkProducer {
            aggregator,
            producer,
            returned: returned_rx,
            overruns: Arc::clone(&overruns),
        },
        ChunkConsumer {
            consumer,
            returned: returned_tx,
            chunk_capacity,
            overruns,
        },
    )
}

// ============================================================================
// PRODUCER (REAL-TIME SIDE)
// ============================================================================

/// Real-Time Seite: nimmt Sample-Blöcke entgegen
pub struct ChunkProducer {
    aggregator: FrameAggregator,
    producer: HeapProd<AudioChunk>,
    returned: HeapCons<Vec<i16>>,
    overruns: Arc<AtomicU64>,
}

impl ChunkProducer {
    /// Verarbeitet einen Block; ein fertiger Chunk wird non-blocking übergeben
    pub fn push_block(&mut self, block: &[f32]) {
        self.reclaim();
        if let Some(chunk) = self.aggregator.on_samples(block) {
            self.hand_off(chunk);
        }
    }

    /// Übergibt den angefangenen Rest (beim Stoppen der Aufnahme)
    pub fn finish(&mut self) {
        if let Some(chunk) = self.aggregator.flush() {
            self.hand_off(chunk);
        }
    }

    pub fn aggregator(&self) -> &FrameAggregator {
        &self.aggregator
    }

    /// Holt zurückgegebene Puffer, solange im Pool Platz ist
    fn reclaim(&mut self) {
        while self.aggregator.spare_buffers() < MAX_SPARE_BUFFERS {
            match self.returned.try_pop() {
                Some(buffer) => {
                    self.aggregator.recycle(buffer);
                }
                None => break,
            }
        }
    }

    fn hand_off(&mut self, chunk: AudioChunk) {
        if self.producer.try_push(chunk).is_err() {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ============================================================================
// CONSUMER (NETWORK SIDE)
// ============================================================================

/// Netzwerk-Seite: holt fertige Chunks ab
pub struct ChunkConsumer {
    consumer: HeapCons<AudioChunk>,
    returned: HeapProd<Vec<i16>>,
    chunk_capacity: usize,
    overruns: Arc<AtomicU64>,
}

impl ChunkConsumer {
    pub fn try_next(&mut self) -> Option<AudioChunk> {
        self.consumer.try_pop()
    }

    /// Gibt den Puffer eines verarbeiteten Chunks an den Producer zurück
    ///
    /// Passt er nicht in den Pool, wird er hier freigegeben und nicht
    /// im Audio-Callback.
    pub fn recycle(&mut self, chunk: AudioChunk) {
        let samples = chunk.into_samples();
        if samples.capacity() < self.chunk_capacity {
            return;
        }
        let _ = self.returned.try_push(samples);
    }

    /// Anzahl wartender Chunks
    pub fn queued(&self) -> usize {
        self.consumer.occupied_len()
    }

    /// Anzahl verworfener Chunks wegen vollem Ring
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ChunkConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkConsumer")
            .field("queued", &self.queued())
            .field("overruns", &self.overruns())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_arrive_in_order() {
        let (mut producer, mut consumer) = chunk_handoff(FrameAggregator::new(2, None), 4);

        for value in [0.1f32, 0.2, 0.3, 0.4] {
            producer.push_block(&[value]);
        }

        let first = consumer.try_next().unwrap();
        let second = consumer.try_next().unwrap();
        assert_eq!(first.samples(), &[3276, 6553]);
        assert_eq!(second.len(), 2);
        assert!(consumer.try_next().is_none());
    }

    #[test]
    fn test_full_ring_counts_overruns() {
        let (mut producer, mut consumer) = chunk_handoff(FrameAggregator::new(1, None), 2);

        for _ in 0..5 {
            producer.push_block(&[0.0; 8]);
        }

        assert_eq!(consumer.queued(), 2);
        assert_eq!(consumer.overruns(), 3);
        assert!(consumer.try_next().is_some());
    }

    #[test]
    fn test_finish_hands_off_tail() {
        let (mut producer, mut consumer) = chunk_handoff(FrameAggregator::new(20, None), 2);

        producer.push_block(&[0.5; 16]);
        assert!(consumer.try_next().is_none());

        producer.finish();
        let tail = consumer.try_next().unwrap();
        assert_eq!(tail.len(), 16);
        assert_eq!(producer.aggregator().pending_blocks(), 0);
    }

    #[test]
    fn test_recycled_chunks_return_to_the_producer() {
        let (mut producer, mut consumer) = chunk_handoff(FrameAggregator::new(1, Some(4)), 4);
        let mut buffers = Vec::new();

        for _ in 0..20 {
            producer.push_block(&[0.25; 4]);
            let chunk = consumer.try_next().unwrap();
            assert_eq!(chunk.samples(), &[8191; 4]);
            if !buffers.contains(&chunk.samples().as_ptr()) {
                buffers.push(chunk.samples().as_ptr());
            }
            consumer.recycle(chunk);
        }

        // Nach dem Warm-up zirkuliert ein fester Satz Puffer
        assert!(buffers.len() <= 4, "{} distinct buffers", buffers.len());
        assert_eq!(consumer.overruns(), 0);
    }

    #[test]
    fn test_undersized_buffers_are_not_returned() {
        let (mut producer, mut consumer) = chunk_handoff(FrameAggregator::new(2, None), 2);
        let spare = producer.aggregator().spare_buffers();

        // Ohne Blocklänge gilt DEFAULT_BLOCK_LEN; ein kleiner Fremdpuffer passt nicht
        let mut aggregator = FrameAggregator::new(1, Some(1));
        let small = aggregator.on_samples(&[0.0]).unwrap();
        consumer.recycle(small);

        producer.push_block(&[0.0; 4]);
        assert_eq!(producer.aggregator().spare_buffers(), spare);
    }
}
