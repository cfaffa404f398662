//! Call View - Detailansicht eines einzelnen Anrufs

use super::Presenter;
use crate::alerts::{ConnectionStatus, FraudType};
use crate::call_state::{format_elapsed, CallRecord, CallStatus, ChangeKind, StoreChange};
use chrono::{DateTime, Utc};

/// Detailansicht für genau eine `call_sid`
#[derive(Debug)]
pub struct CallView {
    call_sid: String,
    record: Option<CallRecord>,
    connection: ConnectionStatus,
}

impl CallView {
    pub fn new(call_sid: impl Into<String>) -> Self {
        Self {
            call_sid: call_sid.into(),
            record: None,
            connection: ConnectionStatus::Disconnected,
        }
    }

    pub fn call_sid(&self) -> &str {
        &self.call_sid
    }

    pub fn record(&self) -> Option<&CallRecord> {
        self.record.as_ref()
    }

    pub fn connection_badge(&self) -> &'static str {
        if self.connection.is_open() {
            "Live"
        } else {
            "Disconnected"
        }
    }

    /// Status-Badge des Anrufs
    ///
    /// Ohne Bewertung zeigt der Badge den Verbindungsstatus.
    pub fn status_badge(&self) -> String {
        let Some(record) = &self.record else {
            return self.connection_badge().to_string();
        };

        match record.status {
            CallStatus::Ended => "Call Ended".to_string(),
            CallStatus::FraudFlagged => {
                let label = match &record.fraud_type {
                    Some(FraudType::None) | None => FraudType::Other(String::new()).label(),
                    Some(fraud_type) => fraud_type.label(),
                };
                format!("FRAUD: {}", label)
            }
            CallStatus::Active => "Safe".to_string(),
            CallStatus::Connecting => self.connection_badge().to_string(),
        }
    }

    /// Letzte Begründung mit Confidence, z.B. `Caller asks for PIN [high]`
    pub fn reasoning_line(&self) -> Option<String> {
        let record = self.record.as_ref()?;
        let reasoning = record.latest_reasoning.as_deref()?;
        let confidence = record.latest_confidence.as_ref()?;
        Some(format!("{} [{}]", reasoning, confidence))
    }

    /// Verlauf, neueste Einträge zuerst
    pub fn transcript_lines(&self) -> Vec<String> {
        self.record
            .iter()
            .flat_map(|record| record.transcript_newest_first())
            .map(|entry| format!("[{}] {}", entry.at.format("%H:%M:%S"), entry.reasoning))
            .collect()
    }
}

impl Presenter for CallView {
    fn on_snapshot(&mut self, records: &[CallRecord]) {
        self.record = records
            .iter()
            .find(|record| record.call_sid == self.call_sid)
            .cloned();
    }

    fn on_change(&mut self, change: &StoreChange) {
        if change.call_sid != self.call_sid {
            return;
        }
        match change.kind {
            // Die Ansicht bleibt auf dem Endzustand stehen
            ChangeKind::Expired | ChangeKind::Unchanged => {}
            _ => self.record = Some(change.record.clone()),
        }
    }

    fn on_connection(&mut self, status: ConnectionStatus) {
        self.connection = status;
    }

    fn render(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut lines = vec![format!(
            "Call {}  [{}]  ({})",
            self.call_sid,
            self.status_badge(),
            self.connection_badge()
        )];

        let Some(record) = &self.record else {
            lines.push("Waiting for call...".to_string());
            return lines;
        };

        lines.push(format!(
            "Caller: {}  Started: {}  Duration: {}",
            record.caller_display(),
            record.start_time.format("%H:%M:%S"),
            format_elapsed(record.elapsed(now))
        ));
        lines.push(format!("Status: {}", record.status.label()));

        match record.risk() {
            Some(risk) => lines.push(format!(
                "Risk: {} ({}%, {})",
                risk.label,
                risk.severity,
                risk.color.as_str()
            )),
            None => lines.push("Risk: Analyzing...".to_string()),
        }

        if let Some(reasoning) = self.reasoning_line() {
            lines.push(format!("Analysis: {}", reasoning));
        }
        if record.status == CallStatus::FraudFlagged {
            if let Some(reasoning) = &record.latest_reasoning {
                lines.push(format!("!! ALERT: {}", reasoning));
            }
        }

        lines.extend(self.transcript_lines());
        lines
    }
}
