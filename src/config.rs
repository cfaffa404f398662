//! Monitor-Konfiguration
//!
//! Reihenfolge: Defaults → JSON-Datei → Umgebungsvariablen → Validierung.
//! Die Datei kommt aus `FRAUDWATCH_CONFIG` oder, falls vorhanden, aus dem
//! Config-Verzeichnis der Anwendung (`config.json`).

use crate::alerts::DEFAULT_RECONNECT_DELAY;
use crate::audio::{DEFAULT_FLUSH_THRESHOLD, DEFAULT_SAMPLE_RATE};
use crate::call_state::{FlagPolicy, DEFAULT_GRACE_PERIOD, DEFAULT_SWEEP_INTERVAL};
use crate::presenter::{DashboardFilter, DEFAULT_TICK_INTERVAL};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Umgebungsvariable mit dem Pfad zur Konfigurationsdatei
pub const CONFIG_PATH_ENV: &str = "FRAUDWATCH_CONFIG";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// MONITOR CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Event-Endpoint des Fraud-Detection-Service
    pub endpoint: String,
    pub reconnect_delay_ms: u64,
    /// Wie lange beendete Anrufe sichtbar bleiben
    pub grace_period_ms: u64,
    pub sweep_interval_ms: u64,
    /// Aktualisierung der Laufzeit-Anzeigen
    pub tick_interval_ms: u64,
    /// Blöcke pro Audio-Chunk
    pub flush_threshold: usize,
    /// Erwartete Blockgröße; `None` akzeptiert jede nicht-leere Größe
    pub block_len: Option<usize>,
    pub sample_rate: u32,
    /// Endpoint für den Audio-Uplink
    pub audio_endpoint: String,
    pub flag_policy: FlagPolicy,
    pub dashboard_filter: DashboardFilter,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:5000/client".to_string(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY.as_millis() as u64,
            grace_period_ms: DEFAULT_GRACE_PERIOD.as_millis() as u64,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL.as_millis() as u64,
            tick_interval_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            block_len: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            audio_endpoint: "ws://localhost:5005".to_string(),
            flag_policy: FlagPolicy::default(),
            dashboard_filter: DashboardFilter::default(),
        }
    }
}

impl MonitorConfig {
    /// Lädt die Konfiguration aus Datei und Umgebung
    pub fn load() -> Result<Self, ConfigError> {
        let path = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::default_path().filter(|path| path.exists()),
        };

        let mut config = match path {
            Some(path) => {
                tracing::info!("Loading config from {}", path.display());
                Self::from_file(&path)?
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Standard-Pfad der Konfigurationsdatei
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "fraudwatch", "fraudwatch")
            .map(|dirs| dirs.config_dir().join("config.json"))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Überschreibt Felder aus `FRAUDWATCH_*` Variablen
    ///
    /// `lookup` liefert den Wert einer Variable; in Tests eine Map statt der
    /// Prozess-Umgebung.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("FRAUDWATCH_ENDPOINT") {
            self.endpoint = value;
        }
        if let Some(value) = lookup("FRAUDWATCH_AUDIO_ENDPOINT") {
            self.audio_endpoint = value;
        }
        if let Some(value) = lookup("FRAUDWATCH_RECONNECT_DELAY_MS") {
            self.reconnect_delay_ms = parse_number("reconnect_delay_ms", &value)?;
        }
        if let Some(value) = lookup("FRAUDWATCH_GRACE_PERIOD_MS") {
            self.grace_period_ms = parse_number("grace_period_ms", &value)?;
        }
        if let Some(value) = lookup("FRAUDWATCH_SWEEP_INTERVAL_MS") {
            self.sweep_interval_ms = parse_number("sweep_interval_ms", &value)?;
        }
        if let Some(value) = lookup("FRAUDWATCH_TICK_INTERVAL_MS") {
            self.tick_interval_ms = parse_number("tick_interval_ms", &value)?;
        }
        if let Some(value) = lookup("FRAUDWATCH_FLUSH_THRESHOLD") {
            self.flush_threshold = parse_number("flush_threshold", &value)?;
        }
        if let Some(value) = lookup("FRAUDWATCH_BLOCK_LEN") {
            self.block_len = match value.trim() {
                "" | "any" => None,
                number => Some(parse_number("block_len", number)?),
            };
        }
        if let Some(value) = lookup("FRAUDWATCH_SAMPLE_RATE") {
            self.sample_rate = parse_number("sample_rate", &value)?;
        }
        if let Some(value) = lookup("FRAUDWATCH_FLAG_POLICY") {
            self.flag_policy = parse_variant("flag_policy", &value)?;
        }
        if let Some(value) = lookup("FRAUDWATCH_FILTER") {
            self.dashboard_filter = parse_variant("dashboard_filter", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_ws_url("endpoint", &self.endpoint)?;
        parse_ws_url("audio_endpoint", &self.audio_endpoint)?;

        let positive = [
            ("reconnect_delay_ms", self.reconnect_delay_ms),
            ("grace_period_ms", self.grace_period_ms),
            ("sweep_interval_ms", self.sweep_interval_ms),
            ("tick_interval_ms", self.tick_interval_ms),
            ("flush_threshold", self.flush_threshold as u64),
            ("sample_rate", u64::from(self.sample_rate)),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than 0"));
            }
        }

        if self.block_len == Some(0) {
            return Err(ConfigError::invalid("block_len", "must be greater than 0"));
        }

        let max_grace_ms = chrono::Duration::MAX.num_milliseconds().unsigned_abs();
        if self.grace_period_ms > max_grace_ms {
            return Err(ConfigError::invalid(
                "grace_period_ms",
                format!("must be at most {}", max_grace_ms),
            ));
        }
        Ok(())
    }

    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        parse_ws_url("endpoint", &self.endpoint)
    }

    pub fn audio_endpoint_url(&self) -> Result<Url, ConfigError> {
        parse_ws_url("audio_endpoint", &self.audio_endpoint)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

fn parse_ws_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::invalid(field, e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::invalid(
            field,
            format!("unsupported scheme '{}', expected ws or wss", other),
        )),
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(field, format!("'{}' is not a number", value)))
}

/// Parst einen snake_case Enum-Wert über seine serde-Darstellung
fn parse_variant<T: DeserializeOwned>(field: &'static str, value: &str) -> Result<T, ConfigError> {
    let normalized = value.trim().to_ascii_lowercase();
    serde_json::from_value(serde_json::Value::String(normalized))
        .map_err(|_| ConfigError::invalid(field, format!("unknown value '{}'", value)))
}

// ============================================================================
// TESTS
// ============================================================================
