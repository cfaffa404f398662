//! Risk Descriptor - reine Abbildung einer Bewertung auf Anzeige-Werte

use crate::alerts::Confidence;
use serde::Serialize;

/// Farbklasse eines Risiko-Balkens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskColor {
    Green,
    Yellow,
    Orange,
    Red,
}

impl RiskColor {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskColor::Green => "green",
            RiskColor::Yellow => "yellow",
            RiskColor::Orange => "orange",
            RiskColor::Red => "red",
        }
    }
}

/// Anzeige-Werte für eine Fraud-Bewertung (Label, Schwere 0-100, Farbe)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RiskDescriptor {
    pub label: &'static str,
    pub severity: u8,
    pub color: RiskColor,
}

const LOW: RiskDescriptor = RiskDescriptor {
    label: "Low Risk",
    severity: 30,
    color: RiskColor::Green,
};

const MEDIUM: RiskDescriptor = RiskDescriptor {
    label: "Medium Risk",
    severity: 60,
    color: RiskColor::Yellow,
};

const HIGH: RiskDescriptor = RiskDescriptor {
    label: "High Risk",
    severity: 90,
    color: RiskColor::Orange,
};

const FRAUD: RiskDescriptor = RiskDescriptor {
    label: "HIGH RISK",
    severity: 100,
    color: RiskColor::Red,
};

impl RiskDescriptor {
    /// Deterministische Abbildung von (confidence, is_fraudulent)
    ///
    /// Unbekannte Confidence-Werte werden wie `medium` behandelt.
    pub fn describe(confidence: &Confidence, is_fraudulent: bool) -> Self {
        if is_fraudulent {
            return FRAUD;
        }
        match confidence {
            Confidence::Low => LOW,
            Confidence::High => HIGH,
            Confidence::Medium | Confidence::Other(_) => MEDIUM,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_mapping() {
        assert_eq!(RiskDescriptor::describe(&Confidence::Low, false).severity, 30);
        assert_eq!(RiskDescriptor::describe(&Confidence::Medium, false).severity, 60);
        assert_eq!(RiskDescriptor::describe(&Confidence::High, false).severity, 90);
    }

    #[test]
    fn test_unknown_confidence_defaults_to_medium() {
        let unknown = Confidence::from("unknown-value");
        assert_eq!(
            RiskDescriptor::describe(&unknown, false),
            RiskDescriptor::describe(&Confidence::Medium, false)
        );
        assert_eq!(
            RiskDescriptor::describe(&unknown, true),
            RiskDescriptor::describe(&Confidence::Medium, true)
        );
    }

    #[test]
    fn test_fraudulent_overrides_confidence() {
        let risk = RiskDescriptor::describe(&Confidence::Low, true);
        assert_eq!(risk.label, "HIGH RISK");
        assert_eq!(risk.severity, 100);
        assert_eq!(risk.color, RiskColor::Red);
    }
}
