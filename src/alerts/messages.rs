//! Message Types für das Fraud-Alert-Protokoll
//!
//! Eingehend: `{"event": "call_started" | "fraud_update" | "call_ended", "call_sid": ...}`
//! Ausgehend: `{"action": "call_started" | "call_ended", "call_sid": ...}`

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// CONFIDENCE
// ============================================================================

/// Grobe Einstufung einer Fraud-Bewertung
///
/// Unbekannte Werte bleiben als `Other` erhalten, damit ein einzelnes
/// unerwartetes Feld nicht die ganze Nachricht ungültig macht.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Confidence {
    #[default]
    Low,
    Medium,
    High,
    Other(String),
}

impl Confidence {
    pub fn as_str(&self) -> &str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
            Confidence::Other(value) => value,
        }
    }
}

impl From<String> for Confidence {
    fn from(value: String) -> Self {
        match value.as_str() {
            "low" => Confidence::Low,
            "medium" => Confidence::Medium,
            "high" => Confidence::High,
            _ => Confidence::Other(value),
        }
    }
}

impl From<&str> for Confidence {
    fn from(value: &str) -> Self {
        Confidence::from(value.to_string())
    }
}

impl From<Confidence> for String {
    fn from(value: Confidence) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// FRAUD TYPE
// ============================================================================

/// Art des erkannten Fraud-Signals
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FraudType {
    /// Gesprächsinhalt (Dringlichkeit, Abfrage sensibler Daten, ...)
    Content,
    /// Stimm-Anomalien (Deepfake, monotone Sprache, ...)
    Vocal,
    Both,
    #[default]
    None,
    Other(String),
}

impl FraudType {
    pub fn as_str(&self) -> &str {
        match self {
            FraudType::Content => "content",
            FraudType::Vocal => "vocal",
            FraudType::Both => "both",
            FraudType::None => "none",
            FraudType::Other(value) => value,
        }
    }

    /// Anzeigetext für Badges und Alerts
    pub fn label(&self) -> &'static str {
        match self {
            FraudType::Content => "Suspicious Content",
            FraudType::Vocal => "Suspicious Voice",
            FraudType::Both => "High Risk (Content + Voice)",
            FraudType::None => "None",
            FraudType::Other(_) => "Suspicious",
        }
    }
}

impl From<String> for FraudType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "content" => FraudType::Content,
            "vocal" => FraudType::Vocal,
            "both" => FraudType::Both,
            "none" => FraudType::None,
            _ => FraudType::Other(value),
        }
    }
}

impl From<FraudType> for String {
    fn from(value: FraudType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for FraudType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SERVER → CLIENT EVENTS
// ============================================================================

/// Alle möglichen Events vom Fraud-Detection-Service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CallEvent {
    /// Neuer Anruf beobachtet
    CallStarted {
        call_sid: String,
        #[serde(default)]
        caller: Option<String>,
        /// ISO-8601 Zeitstempel, wird tolerant geparst
        #[serde(default)]
        start_time: Option<String>,
    },

    /// Neue Fraud-Bewertung für einen Anruf
    FraudUpdate {
        call_sid: String,
        #[serde(default)]
        reasoning: String,
        #[serde(default)]
        confidence: Confidence,
        #[serde(default)]
        is_fraudulent: bool,
        #[serde(default)]
        fraud_type: FraudType,
        #[serde(default)]
        timestamp: Option<String>,
    },

    /// Anruf beendet
    CallEnded { call_sid: String },
}

impl CallEvent {
    /// Parst eine eingehende JSON-Nachricht
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    pub fn call_sid(&self) -> &str {
        match self {
            CallEvent::CallStarted { call_sid, .. }
            | CallEvent::FraudUpdate { call_sid, .. }
            | CallEvent::CallEnded { call_sid } => call_sid,
        }
    }

    /// Name des Event-Diskriminators
    pub fn kind(&self) -> &'static str {
        match self {
            CallEvent::CallStarted { .. } => "call_started",
            CallEvent::FraudUpdate { .. } => "fraud_update",
            CallEvent::CallEnded { .. } => "call_ended",
        }
    }
}

/// Parst Zeitstempel als RFC 3339 oder als naive ISO-8601 Zeit (UTC)
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

// ============================================================================
// CLIENT → SERVER NOTIFICATIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    CallStarted,
    CallEnded,
}

/// Informative Nachricht an den Service ("dieser Client beobachtet Anruf X")
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientNotification {
    pub action: NotificationAction,
    pub call_sid: String,
}

impl ClientNotification {
    pub fn call_started(call_sid: impl Into<String>) -> Self {
        Self {
            action: NotificationAction::CallStarted,
            call_sid: call_sid.into(),
        }
    }

    pub fn call_ended(call_sid: impl Into<String>) -> Self {
        Self {
            action: NotificationAction::CallEnded,
            call_sid: call_sid.into(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
