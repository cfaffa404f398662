//! Audio Module - Aufnahme und Aufbereitung für den Transport
//!
//! Dieses Modul verwaltet:
//! - Quantisierung und Bündelung von Samples (FrameAggregator)
//! - Übergabe fertiger Chunks aus dem Real-Time Callback
//! - Versand der Chunks als Binary-Frames
//! - Mikrofon-Capture (Feature "capture")

mod aggregator;
#[cfg(feature = "capture")]
mod capture;
mod convert;
mod handoff;
mod uplink;

pub use aggregator::{
    quantize_sample, AudioChunk, FrameAggregator, DEFAULT_BLOCK_LEN, DEFAULT_FLUSH_THRESHOLD,
    DEFAULT_SAMPLE_RATE, MAX_SPARE_BUFFERS,
};
#[cfg(feature = "capture")]
pub use capture::{AudioCapture, AudioError};
pub use convert::{downmix_into, resample_into};
pub use handoff::{chunk_handoff, ChunkConsumer, ChunkProducer, DEFAULT_HANDOFF_CAPACITY};
pub use uplink::{AudioUplink, DEFAULT_POLL_INTERVAL};
