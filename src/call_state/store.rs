//! Call State Store - idempotente Reduktion des Event-Streams
//!
//! Ein Eintrag pro `call_sid`, erstellt beim ersten Event das ihn nennt,
//! entfernt nur durch den Expiry-Sweep nach Ablauf der Grace Period.
//! Änderungen werden als Snapshot an alle Abonnenten verteilt.

use super::record::{CallRecord, CallStatus, TranscriptEntry};
use crate::alerts::{parse_timestamp, CallEvent};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;

/// Standard-Aufbewahrung beendeter Anrufe
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

const CHANGE_CAPACITY: usize = 256;

// ============================================================================
// POLICY
// ============================================================================

/// Wie eine unauffällige Bewertung nach einer Fraud-Bewertung wirkt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagPolicy {
    /// Status folgt immer der letzten Bewertung (fraud_flagged ⇄ active)
    #[default]
    LatestUpdate,
    /// Einmal markiert bleibt markiert bis zum Ende des Anrufs
    Sticky,
}

// ============================================================================
// CHANGES
// ============================================================================

/// Art der Änderung durch ein Event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Ended,
    /// Event hatte keine sichtbare Wirkung (Duplikat oder nach Ende)
    Unchanged,
    /// Eintrag nach der Grace Period entfernt
    Expired,
}

impl ChangeKind {
    pub fn is_visible(self) -> bool {
        self != ChangeKind::Unchanged
    }
}

/// Benachrichtigung an Abonnenten
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    pub call_sid: String,
    pub kind: ChangeKind,
    pub record: CallRecord,
    /// Anzahl nicht beendeter Anrufe nach der Änderung
    pub active_calls: usize,
}

// ============================================================================
// STORE
// ============================================================================

/// Registry aller beobachteten Anrufe
pub struct CallStateStore {
    records: HashMap<String, CallRecord>,
    policy: FlagPolicy,
    grace_period: chrono::Duration,
    change_tx: broadcast::Sender<StoreChange>,
}

impl CallStateStore {
    pub fn new(policy: FlagPolicy, grace_period: Duration) -> Self {
        let (change_tx, _) = broadcast::channel(CHANGE_CAPACITY);

        Self {
            records: HashMap::new(),
            policy,
            // Zu große Werte werden auf das Maximum begrenzt, nie auf den Default
            grace_period: chrono::Duration::from_std(grace_period)
                .unwrap_or(chrono::Duration::MAX),
            change_tx,
        }
    }

    /// Gibt einen Änderungs-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.change_tx.subscribe()
    }

    pub(crate) fn change_sender(&self) -> broadcast::Sender<StoreChange> {
        self.change_tx.clone()
    }

    pub fn policy(&self) -> FlagPolicy {
        self.policy
    }

    /// Wendet ein Event mit der aktuellen Zeit an
    pub fn apply(&mut self, event: CallEvent) -> (CallRecord, ChangeKind) {
        self.apply_at(event, Utc::now())
    }

    /// Wendet ein Event zu einem gegebenen Zeitpunkt an
    pub fn apply_at(&mut self, event: CallEvent, now: DateTime<Utc>) -> (CallRecord, ChangeKind) {
        let call_sid = event.call_sid().to_string();
        let kind = match event {
            CallEvent::CallStarted {
                call_sid,
                caller,
                start_time,
            } => self.apply_started(call_sid, caller, start_time, now),

            CallEvent::FraudUpdate {
                call_sid,
                reasoning,
                confidence,
                is_fraudulent,
                fraud_type,
                timestamp,
            } => {
                let created = !self.records.contains_key(&call_sid);
                let policy = self.policy;
                let record = self
                    .records
                    .entry(call_sid.clone())
                    .or_insert_with(|| CallRecord::new(call_sid, None, now));

                if record.is_ended() {
                    ChangeKind::Unchanged
                } else {
                    let at = timestamp.as_deref().and_then(parse_timestamp).unwrap_or(now);
                    record.transcript.push(TranscriptEntry {
                        at,
                        reasoning: reasoning.clone(),
                        confidence: confidence.clone(),
                    });
                    record.latest_reasoning = Some(reasoning);
                    record.latest_confidence = Some(confidence);
                    record.is_fraudulent = is_fraudulent;
                    record.fraud_type = Some(fraud_type);
                    record.status = next_status(policy, record.status, is_fraudulent);

                    if created {
                        ChangeKind::Created
                    } else {
                        ChangeKind::Updated
                    }
                }
            }

            CallEvent::CallEnded { call_sid } => {
                let record = self
                    .records
                    .entry(call_sid.clone())
                    .or_insert_with(|| CallRecord::new(call_sid, None, now));

                if record.is_ended() {
                    ChangeKind::Unchanged
                } else {
                    record.status = CallStatus::Ended;
                    record.ended_at = Some(now);
                    ChangeKind::Ended
                }
            }
        };

        let record = self
            .records
            .get(&call_sid)
            .cloned()
            .unwrap_or_else(|| CallRecord::new(call_sid.clone(), None, now));

        tracing::debug!("Applied event to {}: {:?} -> {:?}", call_sid, kind, record.status);

        if kind.is_visible() {
            self.publish(call_sid, kind, record.clone());
        }

        (record, kind)
    }

    fn apply_started(
        &mut self,
        call_sid: String,
        caller: Option<String>,
        start_time: Option<String>,
        now: DateTime<Utc>,
    ) -> ChangeKind {
        match self.records.get_mut(&call_sid) {
            Some(record) => {
                // Erster Schreiber gewinnt; nur ein noch fehlender Caller wird ergänzt
                if record.is_ended() || record.caller.is_some() || caller.is_none() {
                    ChangeKind::Unchanged
                } else {
                    record.caller = caller;
                    ChangeKind::Updated
                }
            }
            None => {
                let start = start_time.as_deref().and_then(parse_timestamp).unwrap_or(now);
                tracing::info!("Observing new call {}", call_sid);
                self.records
                    .insert(call_sid.clone(), CallRecord::new(call_sid, caller, start));
                ChangeKind::Created
            }
        }
    }

    /// Entfernt beendete Anrufe deren Grace Period abgelaufen ist
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<CallRecord> {
        let grace = self.grace_period;
        let expired: Vec<String> = self
            .records
            .values()
            .filter(|record| {
                record
                    .ended_at
                    .is_some_and(|ended_at| now - ended_at >= grace)
            })
            .map(|record| record.call_sid.clone())
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for call_sid in expired {
            if let Some(record) = self.records.remove(&call_sid) {
                tracing::info!("Expired ended call {}", call_sid);
                self.publish(call_sid, ChangeKind::Expired, record.clone());
                removed.push(record);
            }
        }
        removed
    }

    /// Snapshot eines Anrufs
    pub fn get(&self, call_sid: &str) -> Option<CallRecord> {
        self.records.get(call_sid).cloned()
    }

    /// Alle Anrufe, neueste zuerst
    pub fn records(&self) -> Vec<CallRecord> {
        let mut records: Vec<CallRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| {
            b.start_time
                .cmp(&a.start_time)
                .then_with(|| a.call_sid.cmp(&b.call_sid))
        });
        records
    }

    /// Anzahl nicht beendeter Anrufe
    pub fn active_count(&self) -> usize {
        self.records.values().filter(|r| !r.is_ended()).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn publish(&self, call_sid: String, kind: ChangeKind, record: CallRecord) {
        let _ = self.change_tx.send(StoreChange {
            call_sid,
            kind,
            record,
            active_calls: self.active_count(),
        });
    }
}

impl Default for CallStateStore {
    fn default() -> Self {
        Self::new(FlagPolicy::default(), DEFAULT_GRACE_PERIOD)
    }
}

impl std::fmt::Debug for CallStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallStateStore")
            .field("calls", &self.records.len())
            .field("active", &self.active_count())
            .field("policy", &self.policy)
            .finish()
    }
}

/// Status-Übergang für eine neue Bewertung (nie nach `Ended`)
fn next_status(policy: FlagPolicy, current: CallStatus, is_fraudulent: bool) -> CallStatus {
    match (policy, current, is_fraudulent) {
        (_, CallStatus::Ended, _) => CallStatus::Ended,
        (_, _, true) => CallStatus::FraudFlagged,
        (FlagPolicy::Sticky, CallStatus::FraudFlagged, false) => CallStatus::FraudFlagged,
        (_, _, false) => CallStatus::Active,
    }
}

// ============================================================================
// TESTS
// ============================================================================
