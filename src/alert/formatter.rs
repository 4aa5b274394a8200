//! Alert text rendering
//!
//! Rendering is a pure function of the event: the timestamp comes from the
//! event itself, never from the clock.

use std::collections::BTreeMap;

use super::{AlertEvent, Direction};
use crate::chain::truncate_address;
use crate::classifier::Severity;
use crate::config::AssetConfig;
use crate::entity::Resolution;

const URGENT_MARKER: &str = "🚨 URGENT ALERT 🚨";
const HIGH_RISK_MARKER: &str = "⚠️ HIGH-RISK ALERT ⚠️";
const DEFAULT_DECIMALS: usize = 2;
const TX_PREFIX_LEN: usize = 8;

/// Format an amount with thousands separators and fixed precision
pub fn format_amount(amount: f64, decimals: usize) -> String {
    let fixed = format!("{:.*}", decimals, amount.abs());
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (fixed.as_str(), None),
    };

    let digits = int_part.as_bytes();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + decimals + 2);
    if amount < 0.0 && fixed.bytes().any(|b| b.is_ascii_digit() && b != b'0') {
        grouped.push('-');
    }
    for (i, digit) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(*digit as char);
    }
    if let Some(frac) = frac_part {
        grouped.push('.');
        grouped.push_str(frac);
    }
    grouped
}

/// Known entities render as hashtags, unknown addresses in truncated form
fn label(resolution: &Resolution) -> String {
    match resolution {
        Resolution::Known { entity, .. } => {
            let tag: String = entity
                .name
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if !tag.is_empty() {
                return format!("#{}", tag);
            }
            // Nothing hashtag-able left, show the name as written
            let name = entity.name.trim();
            if !name.is_empty() {
                return name.to_string();
            }
            entity
                .addresses
                .iter()
                .next()
                .map(|a| truncate_address(a))
                .unwrap_or_else(|| "unknown".to_string())
        }
        Resolution::Unknown { display } => display.clone(),
    }
}

fn short_hash(hash: &str) -> String {
    let prefix: String = hash.chars().take(TX_PREFIX_LEN).collect();
    if prefix.len() < hash.len() {
        format!("{}…", prefix)
    } else {
        prefix
    }
}

/// Renders alert events into post text
#[derive(Debug, Clone, Default)]
pub struct AlertFormatter {
    decimals: BTreeMap<String, usize>,
}

impl AlertFormatter {
    pub fn new(decimals: BTreeMap<String, usize>) -> Self {
        Self { decimals }
    }

    pub fn from_assets(assets: &BTreeMap<String, AssetConfig>) -> Self {
        Self::new(
            assets
                .iter()
                .map(|(symbol, a)| (symbol.to_uppercase(), a.display_decimals))
                .collect(),
        )
    }

    fn decimals(&self, asset: &str) -> usize {
        self.decimals
            .get(&asset.to_uppercase())
            .copied()
            .unwrap_or(DEFAULT_DECIMALS)
    }

    pub fn format(&self, event: &AlertEvent) -> String {
        let mut lines = Vec::with_capacity(5);

        match event.severity {
            Severity::Urgent => lines.push(URGENT_MARKER.to_string()),
            Severity::HighRisk => lines.push(HIGH_RISK_MARKER.to_string()),
            Severity::Normal | Severity::None => {}
        }

        let amount = format!(
            "{} #{}",
            format_amount(event.amount, self.decimals(&event.asset)),
            event.asset.to_uppercase()
        );
        let headline = match event.direction {
            Direction::Sent | Direction::Received => format!(
                "🐋 {} transferred from {} to {}",
                amount,
                label(&event.from),
                label(&event.to)
            ),
            Direction::Mint => format!("🐋 {} minted at {}", amount, label(&event.to)),
            Direction::Burn => format!("🔥 {} burned at {}", amount, label(&event.from)),
        };
        lines.push(headline);
        lines.push(format!("Chain: {}", event.chain));
        lines.push(format!("Hash: {}", short_hash(&event.tx_hash)));
        lines.push(event.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string());

        lines.join("\n")
    }
}
