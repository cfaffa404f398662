//! Mikrofon-Capture über cpal
//!
//! Der Input-Callback mischt auf Mono, resampled auf die Ziel-Rate und
//! reicht jeden Block an den `ChunkProducer` weiter. Kein Netzwerk-I/O
//! im Callback.

use super::convert::{downmix_into, resample_into};
use super::handoff::ChunkProducer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio input device found")]
    NoInputDevice,

    #[error("Unsupported audio configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),
}

// ============================================================================
// AUDIO CAPTURE
// ============================================================================

/// Laufende Mikrofon-Aufnahme
///
/// `cpal::Stream` ist nicht `Send`; die Aufnahme bleibt auf dem Thread,
/// der sie gestartet hat.
pub struct AudioCapture {
    stream: Option<Stream>,
    producer: Arc<Mutex<ChunkProducer>>,
    /// RMS des letzten Blocks als f32-Bits
    input_level: Arc<AtomicU32>,
    source_rate: u32,
    target_rate: u32,
}

/// Wiederverwendete Puffer des Callbacks
struct Scratch {
    converted: Vec<f32>,
    mono: Vec<f32>,
    resampled: Vec<f32>,
}

impl Scratch {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            converted: Vec::with_capacity(capacity),
            mono: Vec::with_capacity(capacity),
            resampled: Vec::with_capacity(capacity),
        }
    }
}

impl AudioCapture {
    /// Startet die Aufnahme vom Standard-Eingabegerät
    pub fn start(producer: ChunkProducer, target_rate: u32) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(AudioError::NoInputDevice)?;

        let (config, format) = find_input_config(&device, target_rate)?;
        let source_rate = config.sample_rate.0;
        let channels = config.channels as usize;

        tracing::info!(
            "Starting audio capture: {} Hz, {} channel(s), {:?} → {} Hz mono",
            source_rate,
            channels,
            format,
            target_rate
        );

        let producer = Arc::new(Mutex::new(producer));
        let input_level = Arc::new(AtomicU32::new(0));

        let mut processor = BlockProcessor {
            producer: Arc::clone(&producer),
            input_level: Arc::clone(&input_level),
            channels,
            source_rate,
            target_rate,
            scratch: Scratch::with_capacity(4096),
        };

        let stream = match format {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    processor.process(data.iter().copied())
                },
                |err| tracing::error!("Audio capture error: {}", err),
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    processor.process(data.iter().map(|s| *s as f32 / 32768.0))
                },
                |err| tracing::error!("Audio capture error: {}", err),
                None,
            ),
            other => {
                return Err(AudioError::UnsupportedConfig(format!(
                    "sample format {:?}",
                    other
                )))
            }
        }
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

        Ok(Self {
            stream: Some(stream),
            producer,
            input_level,
            source_rate,
            target_rate,
        })
    }

    /// Stoppt die Aufnahme und übergibt den angefangenen Chunk
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            self.producer.lock().finish();
            tracing::info!("Audio capture stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    /// Pegel (RMS, 0.0 - 1.0) des letzten Blocks
    pub fn input_level(&self) -> f32 {
        f32::from_bits(self.input_level.load(Ordering::Relaxed))
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Callback-Körper: konvertieren → Mono → Resampling → Producer
struct BlockProcessor {
    producer: Arc<Mutex<ChunkProducer>>,
    input_level: Arc<AtomicU32>,
    channels: usize,
    source_rate: u32,
    target_rate: u32,
    scratch: Scratch,
}

impl BlockProcessor {
    fn process(&mut self, samples: impl Iterator<Item = f32>) {
        let Scratch {
            converted,
            mono,
            resampled,
        } = &mut self.scratch;

        converted.clear();
        converted.extend(samples);
        if converted.is_empty() {
            return;
        }

        downmix_into(converted, self.channels, mono);
        resample_into(mono, self.source_rate, self.target_rate, resampled);

        let rms = (mono.iter().map(|s| s * s).sum::<f32>() / mono.len().max(1) as f32).sqrt();
        self.input_level
            .store(rms.min(1.0).to_bits(), Ordering::Relaxed);

        // Nur während stop() umkämpft; dann wird der Block ausgelassen
        if let Some(mut producer) = self.producer.try_lock() {
            producer.push_block(resampled);
        }
    }
}

fn find_input_config(
    device: &Device,
    target_rate: u32,
) -> Result<(StreamConfig, SampleFormat), AudioError> {
    let configs = device
        .supported_input_configs()
        .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;

    select_best_config(configs.collect(), target_rate)
}

/// Wählt die beste Konfiguration
///
/// Priorität: Ziel-Rate direkt unterstützt, dann F32 vor I16.
fn select_best_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Result<(StreamConfig, SampleFormat), AudioError> {
    let target = cpal::SampleRate(target_rate);
    let supports_target =
        |c: &SupportedStreamConfigRange| c.min_sample_rate() <= target && c.max_sample_rate() >= target;

    for format in [SampleFormat::F32, SampleFormat::I16] {
        if let Some(config) = configs
            .iter()
            .find(|c| c.sample_format() == format && supports_target(c))
        {
            return Ok((config.clone().with_sample_rate(target).into(), format));
        }
    }

    // Fallback: höchste Rate, wird im Callback heruntergerechnet
    for format in [SampleFormat::F32, SampleFormat::I16] {
        if let Some(config) = configs.iter().find(|c| c.sample_format() == format) {
            return Ok((config.clone().with_max_sample_rate().into(), format));
        }
    }

    Err(AudioError::UnsupportedConfig(
        "No F32 or I16 input configuration found".to_string(),
    ))
}
