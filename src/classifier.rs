//! Severity classification
//!
//! High-risk counterparties alert at a lower threshold than everyone else.
//! An amount that clears both bars is urgent.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::config::AssetConfig;
use crate::entity::EntityEntry;

/// Alert tier, ordered from quietest to loudest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Normal,
    HighRisk,
    Urgent,
}

impl Severity {
    pub fn is_alert(&self) -> bool {
        *self != Severity::None
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::None => "none",
            Severity::Normal => "normal",
            Severity::HighRisk => "high_risk",
            Severity::Urgent => "urgent",
        };
        f.write_str(s)
    }
}

/// Thresholds for one asset; comparisons are inclusive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub normal: f64,
    pub high_risk: f64,
}

impl Thresholds {
    pub fn classify(&self, amount: f64, high_risk_counterparty: bool) -> Severity {
        let normal_hit = amount >= self.normal;
        let high_risk_hit = high_risk_counterparty && amount >= self.high_risk;

        match (normal_hit, high_risk_hit) {
            (true, true) => Severity::Urgent,
            (false, true) => Severity::HighRisk,
            (true, false) => Severity::Normal,
            (false, false) => Severity::None,
        }
    }
}

/// Per-asset threshold table, fixed at startup
#[derive(Debug, Clone, Default)]
pub struct ThresholdClassifier {
    thresholds: BTreeMap<String, Thresholds>,
}

impl ThresholdClassifier {
    pub fn new(thresholds: BTreeMap<String, Thresholds>) -> Self {
        Self { thresholds }
    }

    pub fn from_assets(assets: &BTreeMap<String, AssetConfig>) -> Self {
        let thresholds = assets
            .iter()
            .map(|(symbol, asset)| {
                (
                    symbol.to_uppercase(),
                    Thresholds {
                        normal: asset.normal_threshold,
                        high_risk: asset.high_risk_threshold,
                    },
                )
            })
            .collect();
        Self { thresholds }
    }

    pub fn thresholds(&self, asset: &str) -> Option<&Thresholds> {
        self.thresholds.get(&asset.to_uppercase())
    }

    /// Classify a movement of `amount` given the resolved counterparties.
    /// Assets without configured thresholds never alert.
    pub fn classify(&self, asset: &str, amount: f64, counterparties: &[&EntityEntry]) -> Severity {
        let Some(thresholds) = self.thresholds(asset) else {
            return Severity::None;
        };
        let high_risk = counterparties.iter().any(|e| e.is_high_risk());
        thresholds.classify(amount, high_risk)
    }
}
