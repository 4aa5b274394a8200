//! Address → entity resolution
//!
//! Exact membership in an entity's address set always wins; chain-specific
//! pattern rules are only consulted when no exact match exists.

use std::sync::Arc;

use super::{EntityCategory, EntityEntry, EntityRegistry, RiskTier};
use crate::chain::{truncate_address, Chain};

/// How an address was attributed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Pattern,
}

/// Attribution of a single address, ready for display
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Known {
        entity: EntityEntry,
        matched_by: MatchKind,
    },
    Unknown {
        /// `first6…last4` form of the address
        display: String,
    },
}

impl Resolution {
    pub fn entity(&self) -> Option<&EntityEntry> {
        match self {
            Resolution::Known { entity, .. } => Some(entity),
            Resolution::Unknown { .. } => None,
        }
    }

    /// Label shown in alerts
    pub fn label(&self) -> &str {
        match self {
            Resolution::Known { entity, .. } => &entity.name,
            Resolution::Unknown { display } => display,
        }
    }

    pub fn category(&self) -> EntityCategory {
        self.entity()
            .map(|e| e.category)
            .unwrap_or(EntityCategory::Unknown)
    }

    pub fn risk_tier(&self) -> RiskTier {
        self.entity().map(|e| e.risk_tier).unwrap_or_default()
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Resolution::Known { .. })
    }
}

/// Resolves addresses against the shared registry
#[derive(Debug, Clone)]
pub struct EntityResolver {
    registry: Arc<EntityRegistry>,
}

impl EntityResolver {
    pub fn new(registry: Arc<EntityRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Resolve using exact matches and chain-agnostic patterns
    pub fn resolve(&self, address: &str) -> Option<&EntityEntry> {
        self.lookup(None, address).map(|(entity, _)| entity)
    }

    /// Resolve with chain-specific patterns enabled
    pub fn resolve_on(&self, chain: Chain, address: &str) -> Option<&EntityEntry> {
        self.lookup(Some(chain), address).map(|(entity, _)| entity)
    }

    /// Full attribution including the unresolved display form
    pub fn describe(&self, chain: Option<Chain>, address: &str) -> Resolution {
        match self.lookup(chain, address) {
            Some((entity, matched_by)) => Resolution::Known {
                entity: entity.clone(),
                matched_by,
            },
            None => Resolution::Unknown {
                display: truncate_address(address),
            },
        }
    }

    fn lookup(&self, chain: Option<Chain>, address: &str) -> Option<(&EntityEntry, MatchKind)> {
        if let Some(entity) = self.registry.exact(address) {
            return Some((entity, MatchKind::Exact));
        }
        self.registry
            .pattern_match(chain, address)
            .map(|entity| (entity, MatchKind::Pattern))
    }
}
