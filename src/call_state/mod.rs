//! Call State Module - Zustand aller beobachteten Anrufe
//!
//! Dieses Modul verwaltet:
//! - Einen Eintrag pro Anruf (Status, Risiko, Verlauf, Laufzeit)
//! - Idempotente Anwendung eingehender Events
//! - Ablauf beendeter Anrufe nach der Grace Period

mod monitor;
mod record;
mod risk;
mod store;

pub use monitor::{CallMonitor, MonitorClock, DEFAULT_SWEEP_INTERVAL};
pub use record::{format_elapsed, CallRecord, CallStatus, TranscriptEntry};
pub use risk::{RiskColor, RiskDescriptor};
pub use store::{CallStateStore, ChangeKind, FlagPolicy, StoreChange, DEFAULT_GRACE_PERIOD};
