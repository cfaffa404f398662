//! Frame Aggregator - Float-Samples zu 16-bit PCM Chunks
//!
//! Läuft im Real-Time Audio-Callback:
//! - Quantisierung f32 [-1, 1] → i16 (asymmetrisch skaliert)
//! - Sammelt Blöcke bis zum Flush-Threshold
//! - Gibt einen zusammenhängenden Chunk zurück
//!
//! Kein Logging, kein I/O, keine unbegrenzte Allokation im Hot Path.
//! Ausgegebene Puffer kommen über `recycle` zurück; nach dem Warm-up
//! allokiert der Callback nicht mehr.

use std::time::Duration;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Standard-Threshold: 20 Blöcke pro Chunk (~160ms bei 128 Samples @ 16kHz)
pub const DEFAULT_FLUSH_THRESHOLD: usize = 20;

/// Typische Blockgröße eines Audio-Render-Quantums
pub const DEFAULT_BLOCK_LEN: usize = 128;

/// Ziel-Sample-Rate für die Übertragung
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Maximale Anzahl zurückgegebener Puffer im Pool
pub const MAX_SPARE_BUFFERS: usize = 16;

/// Vorab allokierte Puffer
const INITIAL_SPARE_BUFFERS: usize = 2;

// ============================================================================
// QUANTIZATION
// ============================================================================

/// Wandelt ein Float-Sample in einen 16-bit Wert um
///
/// Negative Werte werden mit 32768 skaliert, nicht-negative mit 32767,
/// sodass -1.0 → -32768 und 1.0 → 32767 ohne Overflow.
#[inline]
pub fn quantize_sample(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

// ============================================================================
// AUDIO CHUNK
// ============================================================================

/// Ein fertiger Chunk quantisierter Samples, bereit für den Transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    samples: Vec<i16>,
    blocks: usize,
}

impl AudioChunk {
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Anzahl der Eingangsblöcke in diesem Chunk
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    /// Abspieldauer bei gegebener Sample-Rate
    pub fn duration(&self, sample_rate: u32) -> Duration {
        if sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(sample_rate))
    }

    /// Serialisiert den Chunk als Little-Endian PCM Buffer
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }
}

// ============================================================================
// FRAME AGGREGATOR
// ============================================================================

/// Sammelt Sample-Blöcke und gibt alle `flush_threshold` Blöcke einen Chunk aus
#[derive(Debug)]
pub struct FrameAggregator {
    flush_threshold: usize,
    expected_block_len: Option<usize>,
    chunk_capacity: usize,
    pending: Vec<i16>,
    spare: Vec<Vec<i16>>,
    pending_blocks: usize,
    rejected_blocks: u64,
}

impl FrameAggregator {
    /// Erstellt einen Aggregator mit gegebenem Threshold (mindestens 1 Block)
    ///
    /// Mit `expected_block_len` werden Blöcke anderer Länge verworfen,
    /// ohne Angabe wird jeder nicht-leere Block akzeptiert.
    pub fn new(flush_threshold: usize, expected_block_len: Option<usize>) -> Self {
        let flush_threshold = flush_threshold.max(1);
        let block_len = expected_block_len.unwrap_or(DEFAULT_BLOCK_LEN);
        let chunk_capacity = flush_threshold * block_len;

        let mut spare = Vec::with_capacity(MAX_SPARE_BUFFERS);
        spare.extend((0..INITIAL_SPARE_BUFFERS).map(|_| Vec::with_capacity(chunk_capacity)));

        Self {
            flush_threshold,
            expected_block_len,
            chunk_capacity,
            pending: Vec::with_capacity(chunk_capacity),
            spare,
            pending_blocks: 0,
            rejected_blocks: 0,
        }
    }

    /// Verarbeitet einen Block aus dem Audio-Callback
    ///
    /// Gibt genau dann einen Chunk zurück, wenn der Threshold erreicht ist.
    /// Leere oder falsch dimensionierte Blöcke sind ein No-Op.
    pub fn on_samples(&mut self, block: &[f32]) -> Option<AudioChunk> {
        if block.is_empty() {
            self.rejected_blocks += 1;
            return None;
        }
        if let Some(expected) = self.expected_block_len {
            if block.len() != expected {
                self.rejected_blocks += 1;
                return None;
            }
        }

        self.pending
            .extend(block.iter().map(|&sample| quantize_sample(sample)));
        self.pending_blocks += 1;

        if self.pending_blocks < self.flush_threshold {
            return None;
        }

        Some(self.take_chunk())
    }

    /// Gibt den angefangenen Rest als Chunk zurück (z.B. beim Stoppen)
    pub fn flush(&mut self) -> Option<AudioChunk> {
        if self.pending_blocks == 0 {
            return None;
        }
        Some(self.take_chunk())
    }

    pub fn flush_threshold(&self) -> usize {
        self.flush_threshold
    }

    /// Anzahl gepufferter, noch nicht ausgegebener Blöcke
    pub fn pending_blocks(&self) -> usize {
        self.pending_blocks
    }

    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    /// Anzahl verworfener Blöcke (leer oder falsche Länge)
    pub fn rejected_blocks(&self) -> u64 {
        self.rejected_blocks
    }

    /// Kapazität eines vollen Chunks in Samples
    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    /// Anzahl freier Puffer im Pool
    pub fn spare_buffers(&self) -> usize {
        self.spare.len()
    }

    /// Nimmt einen ausgegebenen Puffer zurück in den Pool
    ///
    /// Zu kleine Puffer und Puffer über `MAX_SPARE_BUFFERS` hinaus werden
    /// verworfen. Gibt `false` zurück, wenn der Puffer nicht übernommen wurde.
    pub fn recycle(&mut self, mut buffer: Vec<i16>) -> bool {
        if buffer.capacity() < self.chunk_capacity || self.spare.len() >= MAX_SPARE_BUFFERS {
            return false;
        }
        buffer.clear();
        self.spare.push(buffer);
        true
    }

    fn take_chunk(&mut self) -> AudioChunk {
        // Allokiert nur, solange noch kein Puffer zurückgekommen ist
        let next = self
            .spare
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.chunk_capacity));
        let samples = std::mem::replace(&mut self.pending, next);
        let blocks = std::mem::take(&mut self.pending_blocks);
        AudioChunk { samples, blocks }
    }
}

impl Default for FrameAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_THRESHOLD, None)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantization_boundaries() {
        assert_eq!(quantize_sample(1.0), 32767);
        assert_eq!(quantize_sample(-1.0), -32768);
        assert_eq!(quantize_sample(0.0), 0);
    }

    #[test]
    fn test_quantization_clamps_out_of_range() {
        assert_eq!(quantize_sample(1.5), 32767);
        assert_eq!(quantize_sample(-7.0), -32768);
        assert_eq!(quantize_sample(f32::NAN), 0);
    }

    #[test]
    fn test_quantization_is_asymmetric() {
        assert_eq!(quantize_sample(0.5), 16383);
        assert_eq!(quantize_sample(-0.5), -16384);
    }

    #[test]
    fn test_chunk_count_and_length() {
        let threshold = 20;
        let block_len = 128;
        let blocks = 47;
        let mut aggregator = FrameAggregator::new(threshold, None);
        let block = vec![0.25f32; block_len];

        let chunks: Vec<AudioChunk> = (0..blocks)
            .filter_map(|_| aggregator.on_samples(&block))
            .collect();

        assert_eq!(chunks.len(), blocks / threshold);
        for chunk in &chunks {
            assert_eq!(chunk.len(), threshold * block_len);
            assert_eq!(chunk.blocks(), threshold);
        }
        assert_eq!(aggregator.pending_blocks(), blocks % threshold);
        assert_eq!(aggregator.pending_samples(), (blocks % threshold) * block_len);
    }

    #[test]
    fn test_samples_keep_arrival_order_across_chunks() {
        let mut aggregator = FrameAggregator::new(2, None);
        let mut emitted = Vec::new();

        for i in 0..6 {
            let value = i as f32 / 10.0;
            if let Some(chunk) = aggregator.on_samples(&[value, -value]) {
                emitted.extend_from_slice(chunk.samples());
            }
        }

        let expected: Vec<i16> = (0..6)
            .flat_map(|i| {
                let value = i as f32 / 10.0;
                [quantize_sample(value), quantize_sample(-value)]
            })
            .collect();
        assert_eq!(emitted, expected);
        assert_eq!(aggregator.pending_blocks(), 0);
    }

    #[test]
    fn test_variable_block_sizes_are_summed() {
        let mut aggregator = FrameAggregator::new(3, None);
        assert!(aggregator.on_samples(&[0.1; 10]).is_none());
        assert!(aggregator.on_samples(&[0.1; 5]).is_none());
        let chunk = aggregator.on_samples(&[0.1; 7]).unwrap();
        assert_eq!(chunk.len(), 22);
    }

    #[test]
    fn test_invalid_blocks_are_noops() {
        let mut aggregator = FrameAggregator::new(2, Some(4));

        assert!(aggregator.on_samples(&[]).is_none());
        assert!(aggregator.on_samples(&[0.5; 3]).is_none());
        assert_eq!(aggregator.pending_blocks(), 0);
        assert_eq!(aggregator.rejected_blocks(), 2);

        assert!(aggregator.on_samples(&[0.5; 4]).is_none());
        let chunk = aggregator.on_samples(&[0.5; 4]).unwrap();
        assert_eq!(chunk.len(), 8);
    }

    #[test]
    fn test_flush_returns_partial_tail() {
        let mut aggregator = FrameAggregator::new(20, None);
        assert!(aggregator.flush().is_none());

        aggregator.on_samples(&[1.0; 4]);
        aggregator.on_samples(&[-1.0; 4]);

        let chunk = aggregator.flush().unwrap();
        assert_eq!(chunk.blocks(), 2);
        assert_eq!(&chunk.samples()[..4], &[32767; 4]);
        assert_eq!(&chunk.samples()[4..], &[-32768; 4]);
        assert!(aggregator.flush().is_none());
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        let mut aggregator = FrameAggregator::new(0, None);
        assert_eq!(aggregator.flush_threshold(), 1);
        assert!(aggregator.on_samples(&[0.0; 2]).is_some());
    }

    #[test]
    fn test_chunk_bytes_and_duration() {
        let mut aggregator = FrameAggregator::new(1, None);
        let chunk = aggregator.on_samples(&[1.0, -1.0]).unwrap();

        assert_eq!(chunk.to_le_bytes(), vec![0xFF, 0x7F, 0x00, 0x80]);

        let mut aggregator = FrameAggregator::new(20, Some(128));
        let block = [0.0f32; 128];
        let chunk = (0..20)
            .filter_map(|_| aggregator.on_samples(&block))
            .next()
            .unwrap();
        assert_eq!(chunk.duration(16_000), Duration::from_millis(160));
    }

    #[test]
    fn test_recycled_buffers_are_reused() {
        let mut aggregator = FrameAggregator::new(2, Some(4));
        assert_eq!(aggregator.spare_buffers(), INITIAL_SPARE_BUFFERS);

        aggregator.on_samples(&[0.1; 4]);
        let first = aggregator.on_samples(&[0.1; 4]).unwrap().into_samples();
        let first_ptr = first.as_ptr();
        assert_eq!(aggregator.spare_buffers(), INITIAL_SPARE_BUFFERS - 1);

        assert!(aggregator.recycle(first));
        assert_eq!(aggregator.spare_buffers(), INITIAL_SPARE_BUFFERS);

        // Der zurückgegebene Puffer wird als nächster Pending-Puffer genutzt
        aggregator.on_samples(&[0.2; 4]);
        aggregator.on_samples(&[0.2; 4]);
        aggregator.on_samples(&[0.3; 4]);
        let third = aggregator.on_samples(&[0.3; 4]).unwrap();
        assert_eq!(third.samples().as_ptr(), first_ptr);
        assert_eq!(third.samples(), &[quantize_sample(0.3); 8]);
    }

    #[test]
    fn test_steady_state_emission_needs_no_new_buffers() {
        let mut aggregator = FrameAggregator::new(4, Some(8));
        let mut seen = Vec::new();

        for _ in 0..50 {
            for _ in 0..3 {
                assert!(aggregator.on_samples(&[0.5; 8]).is_none());
            }
            let chunk = aggregator.on_samples(&[0.5; 8]).unwrap();
            let samples = chunk.into_samples();
            if !seen.contains(&samples.as_ptr()) {
                seen.push(samples.as_ptr());
            }
            assert!(aggregator.recycle(samples));
        }

        // Pending-Puffer plus Vorrat, keine weiteren Allokationen
        assert!(seen.len() <= INITIAL_SPARE_BUFFERS + 1, "{} buffers", seen.len());
    }

    #[test]
    fn test_recycle_rejects_small_and_surplus_buffers() {
        let mut aggregator = FrameAggregator::new(2, Some(4));
        assert!(!aggregator.recycle(Vec::with_capacity(3)));

        while aggregator.spare_buffers() < MAX_SPARE_BUFFERS {
            assert!(aggregator.recycle(Vec::with_capacity(8)));
        }
        assert!(!aggregator.recycle(Vec::with_capacity(8)));
        assert_eq!(aggregator.spare_buffers(), MAX_SPARE_BUFFERS);
    }
}
