//! Call Record - Zustand eines beobachteten Anrufs

use super::risk::RiskDescriptor;
use crate::alerts::{Confidence, FraudType};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

// ============================================================================
// CALL STATUS
// ============================================================================

/// Abgeleiteter Status eines Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Beobachtet, aber noch keine Bewertung
    Connecting,
    /// Letzte Bewertung unauffällig
    Active,
    /// Fraud erkannt
    FraudFlagged,
    /// Anruf beendet (absorbierend)
    Ended,
}

impl CallStatus {
    pub fn label(self) -> &'static str {
        match self {
            CallStatus::Connecting => "Connecting...",
            CallStatus::Active => "In Progress",
            CallStatus::FraudFlagged => "Fraud Detected!",
            CallStatus::Ended => "Call Ended",
        }
    }
}

// ============================================================================
// TRANSCRIPT
// ============================================================================

/// Ein Eintrag im Analyse-Verlauf
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub at: DateTime<Utc>,
    pub reasoning: String,
    pub confidence: Confidence,
}

// ============================================================================
// CALL RECORD
// ============================================================================

/// Snapshot eines Anrufs, wie er an Presenter geht
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallRecord {
    pub call_sid: String,
    pub status: CallStatus,
    pub caller: Option<String>,
    pub start_time: DateTime<Utc>,
    pub latest_reasoning: Option<String>,
    pub latest_confidence: Option<Confidence>,
    pub is_fraudulent: bool,
    pub fraud_type: Option<FraudType>,
    /// Älteste Einträge zuerst, wird nur erweitert
    pub transcript: Vec<TranscriptEntry>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallRecord {
    pub(crate) fn new(call_sid: String, caller: Option<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            call_sid,
            status: CallStatus::Connecting,
            caller,
            start_time,
            latest_reasoning: None,
            latest_confidence: None,
            is_fraudulent: false,
            fraud_type: None,
            transcript: Vec::new(),
            ended_at: None,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.status == CallStatus::Ended
    }

    /// Risiko der letzten Bewertung; `None` solange noch analysiert wird
    pub fn risk(&self) -> Option<RiskDescriptor> {
        self.latest_confidence
            .as_ref()
            .map(|confidence| RiskDescriptor::describe(confidence, self.is_fraudulent))
    }

    /// Laufzeit des Anrufs, eingefroren beim Ende
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        let until = self.ended_at.unwrap_or(now);
        (until - self.start_time).to_std().unwrap_or(Duration::ZERO)
    }

    /// Transkript, neueste Einträge zuerst
    pub fn transcript_newest_first(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.transcript.iter().rev()
    }

    pub fn caller_display(&self) -> &str {
        self.caller.as_deref().unwrap_or("Unknown caller")
    }
}

/// Formatiert eine Dauer als `MM:SS`
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!("{:02}:{:02}", total / 60, total % 60)
}
