//! Dashboard - Übersicht aller beobachteten Anrufe

use super::Presenter;
use crate::alerts::ConnectionStatus;
use crate::call_state::{format_elapsed, CallRecord, CallStatus, ChangeKind, StoreChange};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;

// ============================================================================
// FILTER
// ============================================================================

/// Welche Karten das Dashboard zeigt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DashboardFilter {
    #[default]
    All,
    /// Nicht beendete Anrufe
    Active,
    /// Letzte Bewertung unauffällig
    Safe,
    Fraud,
}

impl DashboardFilter {
    pub fn matches(self, record: &CallRecord) -> bool {
        match self {
            DashboardFilter::All => true,
            DashboardFilter::Active => !record.is_ended(),
            DashboardFilter::Safe => record.status == CallStatus::Active,
            DashboardFilter::Fraud => record.status == CallStatus::FraudFlagged,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DashboardFilter::All => "all",
            DashboardFilter::Active => "active",
            DashboardFilter::Safe => "safe",
            DashboardFilter::Fraud => "fraud",
        }
    }
}

impl FromStr for DashboardFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(DashboardFilter::All),
            "active" => Ok(DashboardFilter::Active),
            "safe" => Ok(DashboardFilter::Safe),
            "fraud" => Ok(DashboardFilter::Fraud),
            other => Err(format!("unknown dashboard filter '{}'", other)),
        }
    }
}

// ============================================================================
// DASHBOARD
// ============================================================================

/// Multi-Call Übersicht
///
/// Hält eine Karte pro Anruf, bis der Store den Eintrag nach der Grace
/// Period entfernt.
#[derive(Debug, Default)]
pub struct Dashboard {
    cards: HashMap<String, CallRecord>,
    filter: DashboardFilter,
    connection: ConnectionStatus,
}

impl Dashboard {
    pub fn new(filter: DashboardFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn filter(&self) -> DashboardFilter {
        self.filter
    }

    pub fn set_filter(&mut self, filter: DashboardFilter) {
        self.filter = filter;
    }

    /// Anzahl aller Karten, unabhängig vom Filter
    pub fn call_count(&self) -> usize {
        self.cards.len()
    }

    pub fn connection_badge(&self) -> &'static str {
        if self.connection.is_open() {
            "Live"
        } else {
            "Disconnected - Reconnecting..."
        }
    }

    /// Sichtbare Karten, neueste zuerst
    pub fn visible_cards(&self) -> Vec<&CallRecord> {
        let mut cards: Vec<&CallRecord> = self
            .cards
            .values()
            .filter(|record| self.filter.matches(record))
            .collect();
        cards.sort_by(|a, b| {
            b.start_time
                .cmp(&a.start_time)
                .then_with(|| a.call_sid.cmp(&b.call_sid))
        });
        cards
    }

    fn render_card(record: &CallRecord, now: DateTime<Utc>) -> [String; 2] {
        let risk = match record.risk() {
            Some(risk) => format!("{} ({}%)", risk.label, risk.severity),
            None => "Analyzing...".to_string(),
        };
        let update = record
            .latest_reasoning
            .as_deref()
            .unwrap_or("Waiting for analysis...");

        [
            format!(
                "{:<16} {:<16} {:<18} {}  ID: {}",
                record.status.label(),
                record.caller_display(),
                risk,
                format_elapsed(record.elapsed(now)),
                record.call_sid
            ),
            format!("    {}", update),
        ]
    }
}

impl Presenter for Dashboard {
    fn on_snapshot(&mut self, records: &[CallRecord]) {
        self.cards = records
            .iter()
            .map(|record| (record.call_sid.clone(), record.clone()))
            .collect();
    }

    fn on_change(&mut self, change: &StoreChange) {
        match change.kind {
            ChangeKind::Expired => {
                self.cards.remove(&change.call_sid);
            }
            ChangeKind::Unchanged => {}
            _ => {
                self.cards
                    .insert(change.call_sid.clone(), change.record.clone());
            }
        }
    }

    fn on_connection(&mut self, status: ConnectionStatus) {
        self.connection = status;
    }

    fn render(&self, now: DateTime<Utc>) -> Vec<String> {
        let cards = self.visible_cards();
        let mut lines = Vec::with_capacity(2 + cards.len() * 2);

        lines.push(format!(
            "Fraud Monitor [{}]  calls: {}  filter: {}",
            self.connection_badge(),
            self.call_count(),
            self.filter.as_str()
        ));

        if cards.is_empty() {
            lines.push("No active calls".to_string());
        }
        for record in cards {
            lines.extend(Self::render_card(record, now));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::CallEvent;
    use crate::call_state::{CallStateStore, FlagPolicy};
    use chrono::TimeZone;
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn change(store: &mut CallStateStore, payload: &str, at: DateTime<Utc>) -> StoreChange {
        let event = CallEvent::parse(payload).unwrap();
        let (record, kind) = store.apply_at(event, at);
        StoreChange {
            call_sid: record.call_sid.clone(),
            kind,
            active_calls: store.active_count(),
            record,
        }
    }

    /// A: fraud, B: safe, C: beendet
    fn populated() -> Dashboard {
        let mut store = CallStateStore::new(FlagPolicy::LatestUpdate, Duration::from_secs(5));
        let mut dashboard = Dashboard::default();

        let payloads = [
            r#"{"event":"call_started","call_sid":"A","caller":"+1555000"}"#,
            r#"{"event":"call_started","call_sid":"B"}"#,
            r#"{"event":"call_started","call_sid":"C"}"#,
            r#"{"event":"fraud_update","call_sid":"A","reasoning":"gift cards","confidence":"high","is_fraudulent":true,"fraud_type":"content"}"#,
            r#"{"event":"fraud_update","call_sid":"B","reasoning":"routine","confidence":"low","is_fraudulent":false}"#,
            r#"{"event":"call_ended","call_sid":"C"}"#,
        ];
        for (i, payload) in payloads.iter().enumerate() {
            let at = t0() + chrono::Duration::seconds(i as i64);
            dashboard.on_change(&change(&mut store, payload, at));
        }
        dashboard
    }

    fn sids(dashboard: &Dashboard) -> Vec<&str> {
        dashboard
            .visible_cards()
            .into_iter()
            .map(|r| r.call_sid.as_str())
            .collect()
    }

    #[test]
    fn test_cards_newest_first() {
        let dashboard = populated();
        assert_eq!(dashboard.call_count(), 3);
        assert_eq!(sids(&dashboard), vec!["C", "B", "A"]);
    }

    #[test]
    fn test_filters() {
        let mut dashboard = populated();

        dashboard.set_filter(DashboardFilter::Active);
        assert_eq!(sids(&dashboard), vec!["B", "A"]);

        dashboard.set_filter(DashboardFilter::Safe);
        assert_eq!(sids(&dashboard), vec!["B"]);

        dashboard.set_filter(DashboardFilter::Fraud);
        assert_eq!(sids(&dashboard), vec!["A"]);

        // Filter ändert die Gesamtzahl nicht
        assert_eq!(dashboard.call_count(), 3);
    }

    #[test]
    fn test_filter_from_str() {
        assert_eq!("Fraud".parse::<DashboardFilter>(), Ok(DashboardFilter::Fraud));
        assert_eq!(" all ".parse::<DashboardFilter>(), Ok(DashboardFilter::All));
        assert!("ended".parse::<DashboardFilter>().is_err());
    }

    #[test]
    fn test_expired_card_is_removed() {
        let mut store = CallStateStore::new(FlagPolicy::LatestUpdate, Duration::from_secs(5));
        let mut dashboard = Dashboard::default();
        let mut changes = store.subscribe();

        store.apply_at(
            CallEvent::parse(r#"{"event":"call_started","call_sid":"X"}"#).unwrap(),
            t0(),
        );
        store.apply_at(
            CallEvent::parse(r#"{"event":"call_ended","call_sid":"X"}"#).unwrap(),
            t0(),
        );
        store.sweep_expired(t0() + chrono::Duration::seconds(5));

        while let Ok(change) = changes.try_recv() {
            dashboard.on_change(&change);
        }
        assert_eq!(dashboard.call_count(), 0);
        assert_eq!(
            dashboard.render(t0()),
            vec![
                "Fraud Monitor [Disconnected - Reconnecting...]  calls: 0  filter: all".to_string(),
                "No active calls".to_string(),
            ]
        );
    }

    #[test]
    fn test_render_card_contents() {
        let mut dashboard = populated();
        dashboard.on_connection(ConnectionStatus::Open);
        dashboard.set_filter(DashboardFilter::Fraud);

        let lines = dashboard.render(t0() + chrono::Duration::seconds(65));
        assert!(lines[0].starts_with("Fraud Monitor [Live]  calls: 3"));
        assert!(lines[1].starts_with("Fraud Detected!"));
        assert!(lines[1].contains("+1555000"));
        assert!(lines[1].contains("HIGH RISK (100%)"));
        assert!(lines[1].contains("01:05"));
        assert!(lines[1].ends_with("ID: A"));
        assert_eq!(lines[2], "    gift cards");
    }

    #[test]
    fn test_unassessed_call_is_analyzing() {
        let mut dashboard = populated();
        dashboard.set_filter(DashboardFilter::All);
        let lines = dashboard.render(t0());

        let c_card = lines.iter().position(|l| l.ends_with("ID: C")).unwrap();
        assert!(lines[c_card].starts_with("Call Ended"));
        assert!(lines[c_card].contains("Analyzing..."));
        assert_eq!(lines[c_card + 1], "    Waiting for analysis...");
    }
}
