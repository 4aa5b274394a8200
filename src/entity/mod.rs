//! Known-entity attribution
//!
//! Entity tables are loaded once at startup into an immutable
//! [`EntityRegistry`], which the [`EntityResolver`] queries per address.

pub mod registry;
pub mod resolver;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub use registry::{ConflictPolicy, EntityRegistry, PatternRule};
pub use resolver::{EntityResolver, MatchKind, Resolution};

/// Organizational category of a known entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    Exchange,
    Institution,
    Defi,
    MiningPool,
    SeizedAsset,
    MarketMaker,
    Unknown,
}

impl EntityCategory {
    /// Parse a category label, accepting the legacy labels found in older
    /// address tables. Returns `None` for labels we do not recognise.
    pub fn parse(label: &str) -> Option<Self> {
        let category = match label.trim().to_ascii_lowercase().as_str() {
            "exchange" => EntityCategory::Exchange,
            "institution" | "bank" | "stablecoin_issuer" => EntityCategory::Institution,
            "defi" => EntityCategory::Defi,
            "mining_pool" | "mining_pools" => EntityCategory::MiningPool,
            "seized_asset" | "seized_assets" | "seized" | "bankruptcy" => {
                EntityCategory::SeizedAsset
            }
            "market_maker" | "trading" => EntityCategory::MarketMaker,
            "unknown" => EntityCategory::Unknown,
            _ => return None,
        };
        Some(category)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityCategory::Exchange => "exchange",
            EntityCategory::Institution => "institution",
            EntityCategory::Defi => "defi",
            EntityCategory::MiningPool => "mining_pool",
            EntityCategory::SeizedAsset => "seized_asset",
            EntityCategory::MarketMaker => "market_maker",
            EntityCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EntityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk tier; high-risk counterparties alert at lower thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    #[default]
    Normal,
    HighRisk,
}

/// A known entity with its normalized address set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityEntry {
    /// Display name, e.g. "Binance"
    pub name: String,
    pub category: EntityCategory,
    /// Normalized addresses (see [`crate::chain::normalize_address`])
    pub addresses: BTreeSet<String>,
    pub risk_tier: RiskTier,
}

impl EntityEntry {
    pub fn is_high_risk(&self) -> bool {
        self.risk_tier == RiskTier::HighRisk
    }

    /// Lookup key for the entity name
    pub fn key(&self) -> String {
        entity_key(&self.name)
    }
}

/// Case-insensitive key used to merge entity definitions across tables
pub fn entity_key(name: &str) -> String {
    name.trim().to_lowercase().replace([' ', '-'], "_")
}

/// Turn a table key like `doj_seized` into `Doj Seized`.
/// Names that already carry uppercase letters are kept as written.
pub fn display_name(name: &str) -> String {
    let name = name.trim();
    if name.chars().any(|c| c.is_uppercase()) {
        return name.to_string();
    }
    name.split(|c: char| c == '_' || c == ' ')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
