//! Entity registry loading
//!
//! Address tables come in several shapes (plain lists, typed objects,
//! labelled wallet maps) and from several files. They are normalized here
//! into one immutable registry with an inverted address index, so lookups
//! never branch on the source shape.

use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

use super::{display_name, entity_key, EntityCategory, EntityEntry, RiskTier};
use crate::chain::{normalize_address, Chain};
use crate::config::EntitiesConfig;
use crate::error::RegistryError;

type Result<T> = std::result::Result<T, RegistryError>;

/// What to do when two entities claim the same address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Keep the first definition (source order, then entity name order) and warn
    #[default]
    FirstWins,
    /// Refuse to start
    Reject,
}

/// Prefix/pattern fallback rule
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub regex: Regex,
    /// Restrict the rule to one chain; `None` applies everywhere
    pub chain: Option<Chain>,
    entity: usize,
}

impl PatternRule {
    fn applies(&self, chain: Option<Chain>, address: &str) -> bool {
        let chain_ok = match (self.chain, chain) {
            (None, _) => true,
            (Some(rule_chain), Some(chain)) => rule_chain == chain,
            (Some(_), None) => false,
        };
        chain_ok && self.regex.is_match(address)
    }
}

#[derive(Debug, Deserialize)]
struct RawRegistry {
    #[serde(default)]
    default_category: Option<String>,
    #[serde(default)]
    entities: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    patterns: Vec<RawPattern>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawPattern {
    pattern: String,
    entity: String,
    #[serde(default)]
    chain: Option<Chain>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEntity {
    /// `"binance": ["addr", ...]`
    List(Vec<String>),
    /// `"binance": { "category": "exchange", "addresses": [...] }`
    Typed(TypedEntity),
    /// `"Kraken": { "hot_wallet": "addr", "cold_wallet": "addr" }`
    Labeled(BTreeMap<String, String>),
}

#[derive(Debug, Deserialize)]
struct TypedEntity {
    #[serde(default, alias = "type")]
    category: Option<String>,
    addresses: Vec<String>,
    #[serde(default)]
    risk_tier: Option<RiskTier>,
    #[serde(default)]
    display_name: Option<String>,
}

/// Immutable address → entity index, built once at startup
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: Vec<EntityEntry>,
    by_name: HashMap<String, usize>,
    by_address: HashMap<String, usize>,
    patterns: Vec<PatternRule>,
    warnings: Vec<String>,
}

impl EntityRegistry {
    /// Load every configured source file in order
    pub fn load(config: &EntitiesConfig) -> Result<Self> {
        let mut builder = RegistryBuilder::new(config.conflict_policy);

        for path in &config.sources {
            let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Read {
                path: path.clone(),
                source,
            })?;
            let raw: RawRegistry =
                serde_json::from_str(&content).map_err(|source| RegistryError::Parse {
                    path: path.clone(),
                    source,
                })?;
            let origin = Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone());
            builder.add_source(&origin, raw)?;
        }

        if config.sources.is_empty() {
            warn!("No entity sources configured, every address will resolve as unknown");
        }

        let registry = builder.build(&config.high_risk)?;
        info!(
            "Entity registry loaded: {} entities, {} addresses, {} patterns, {} warnings",
            registry.entities.len(),
            registry.by_address.len(),
            registry.patterns.len(),
            registry.warnings.len()
        );
        Ok(registry)
    }

    /// Build from in-memory JSON documents, `(origin, json)` in priority order
    pub fn from_json_sources<'a, I>(
        sources: I,
        policy: ConflictPolicy,
        high_risk: &[String],
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut builder = RegistryBuilder::new(policy);
        for (origin, json) in sources {
            let raw: RawRegistry =
                serde_json::from_str(json).map_err(|source| RegistryError::Parse {
                    path: origin.to_string(),
                    source,
                })?;
            builder.add_source(origin, raw)?;
        }
        builder.build(high_risk)
    }

    /// Entity owning exactly this address
    pub fn exact(&self, address: &str) -> Option<&EntityEntry> {
        self.by_address
            .get(&normalize_address(address))
            .map(|&idx| &self.entities[idx])
    }

    /// First pattern rule matching the address
    pub fn pattern_match(&self, chain: Option<Chain>, address: &str) -> Option<&EntityEntry> {
        let normalized = normalize_address(address);
        self.patterns
            .iter()
            .find(|rule| rule.applies(chain, &normalized))
            .map(|rule| &self.entities[rule.entity])
    }

    /// Look up an entity by name (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&EntityEntry> {
        self.by_name.get(&entity_key(name)).map(|&idx| &self.entities[idx])
    }

    pub fn entities(&self) -> &[EntityEntry] {
        &self.entities
    }

    pub fn address_count(&self) -> usize {
        self.by_address.len()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Loader warnings (conflicts, unknown categories, dangling names)
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

struct RegistryBuilder {
    policy: ConflictPolicy,
    entities: Vec<EntityEntry>,
    by_name: HashMap<String, usize>,
    by_address: HashMap<String, usize>,
    raw_patterns: Vec<RawPattern>,
    warnings: Vec<String>,
}

impl RegistryBuilder {
    fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            entities: Vec::new(),
            by_name: HashMap::new(),
            by_address: HashMap::new(),
            raw_patterns: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }

    fn parse_category(&mut self, origin: &str, entity: &str, label: &str) -> EntityCategory {
        EntityCategory::parse(label).unwrap_or_else(|| {
            self.warn(format!(
                "{}: entity '{}' has unknown category '{}', loading as unknown",
                origin, entity, label
            ));
            EntityCategory::Unknown
        })
    }

    fn add_source(&mut self, origin: &str, raw: RawRegistry) -> Result<()> {
        let default_category = match raw.default_category.as_deref() {
            Some(label) => self.parse_category(origin, "<default>", label),
            None => EntityCategory::Unknown,
        };

        for (name, value) in raw.entities {
            let parsed: RawEntity =
                serde_json::from_value(value).map_err(|e| RegistryError::Schema {
                    entity: name.clone(),
                    detail: e.to_string(),
                })?;

            let (category, addresses, risk_tier, shown) = match parsed {
                RawEntity::List(addresses) => (default_category, addresses, None, None),
                RawEntity::Labeled(wallets) => {
                    (default_category, wallets.into_values().collect(), None, None)
                }
                RawEntity::Typed(typed) => {
                    let category = match typed.category.as_deref() {
                        Some(label) => self.parse_category(origin, &name, label),
                        None => default_category,
                    };
                    (category, typed.addresses, typed.risk_tier, typed.display_name)
                }
            };

            self.merge(origin, &name, shown, category, risk_tier, addresses)?;
        }

        self.raw_patterns.extend(raw.patterns);
        debug!("Merged entity source {}", origin);
        Ok(())
    }

    fn merge(
        &mut self,
        origin: &str,
        name: &str,
        shown: Option<String>,
        category: EntityCategory,
        risk_tier: Option<RiskTier>,
        addresses: Vec<String>,
    ) -> Result<()> {
        let key = entity_key(name);
        let idx = match self.by_name.get(&key).copied() {
            Some(idx) => {
                let existing = self.entities[idx].category;
                if existing == EntityCategory::Unknown {
                    self.entities[idx].category = category;
                } else if category != EntityCategory::Unknown && category != existing {
                    self.warn(format!(
                        "{}: entity '{}' redefined as {} (keeping {})",
                        origin, name, category, existing
                    ));
                }
                if risk_tier == Some(RiskTier::HighRisk) {
                    self.entities[idx].risk_tier = RiskTier::HighRisk;
                }
                idx
            }
            None => {
                self.entities.push(EntityEntry {
                    name: shown.unwrap_or_else(|| display_name(name)),
                    category,
                    addresses: BTreeSet::new(),
                    risk_tier: risk_tier.unwrap_or_default(),
                });
                let idx = self.entities.len() - 1;
                self.by_name.insert(key, idx);
                idx
            }
        };

        for address in addresses {
            let normalized = normalize_address(&address);
            if normalized.is_empty() {
                continue;
            }
            match self.by_address.get(&normalized).copied() {
                Some(owner) if owner == idx => {}
                Some(owner) => {
                    let existing = self.entities[owner].name.clone();
                    let incoming = self.entities[idx].name.clone();
                    match self.policy {
                        ConflictPolicy::Reject => {
                            return Err(RegistryError::Conflict {
                                address: normalized,
                                existing,
                                incoming,
                            })
                        }
                        ConflictPolicy::FirstWins => self.warn(format!(
                            "{}: address {} claimed by '{}' but already assigned to '{}', keeping '{}'",
                            origin, normalized, incoming, existing, existing
                        )),
                    }
                }
                None => {
                    self.by_address.insert(normalized.clone(), idx);
                    self.entities[idx].addresses.insert(normalized);
                }
            }
        }

        Ok(())
    }

    fn build(mut self, high_risk: &[String]) -> Result<EntityRegistry> {
        for name in high_risk {
            match self.by_name.get(&entity_key(name)).copied() {
                Some(idx) => self.entities[idx].risk_tier = RiskTier::HighRisk,
                None => self.warn(format!("high-risk entity '{}' is not defined in any source", name)),
            }
        }

        let mut patterns = Vec::with_capacity(self.raw_patterns.len());
        for raw in std::mem::take(&mut self.raw_patterns) {
            let regex = Regex::new(&raw.pattern).map_err(|e| RegistryError::InvalidPattern {
                pattern: raw.pattern.clone(),
                reason: e.to_string(),
            })?;
            let entity = self.by_name.get(&entity_key(&raw.entity)).copied().ok_or_else(|| {
                RegistryError::UnknownPatternEntity {
                    pattern: raw.pattern.clone(),
                    entity: raw.entity.clone(),
                }
            })?;
            patterns.push(PatternRule {
                regex,
                chain: raw.chain,
                entity,
            });
        }

        Ok(EntityRegistry {
            entities: self.entities,
            by_name: self.by_name,
            by_address: self.by_address,
            patterns,
            warnings: self.warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXCHANGES: &str = r#"{
        "default_category": "exchange",
        "entities": {
            "binance": [
                "1FzWLkAahHooV3kzTgyx6qsswXJ6sCXkSR",
                "0x28C6c06298d514Db089934071355E5743bf21d60"
            ],
            "Kraken": {
                "hot_wallet": "3FupZp77ySr7jwoLYEJ9mwzJpvoNBXsBnE",
                "cold_wallet": "3H5JTt42K7RmZtromfTSefcMEFMMe18pMD"
            },
            "lazarus_group": {
                "type": "unknown",
                "addresses": ["bc1qlazarus0000000000000000000000000000"],
                "risk_tier": "high_risk",
                "display_name": "Lazarus Group"
            }
        },
        "patterns": [
            { "pattern": "^bnb1", "entity": "binance" }
        ]
    }"#;

    fn load(sources: &[(&str, &str)], policy: ConflictPolicy) -> Result<EntityRegistry> {
        EntityRegistry::from_json_sources(sources.iter().copied(), policy, &[])
    }

    #[test]
    fn test_heterogeneous_shapes_normalize() {
        let registry = load(&[("exchanges.json", EXCHANGES)], ConflictPolicy::Reject).unwrap();

        let binance = registry.exact("1FzWLkAahHooV3kzTgyx6qsswXJ6sCXkSR").unwrap();
        assert_eq!(binance.name, "Binance");
        assert_eq!(binance.category, EntityCategory::Exchange);

        let kraken = registry.exact("3H5JTt42K7RmZtromfTSefcMEFMMe18pMD").unwrap();
        assert_eq!(kraken.name, "Kraken");
        assert_eq!(kraken.addresses.len(), 2);

        let lazarus = registry.get("Lazarus Group").unwrap();
        assert!(lazarus.is_high_risk());
        assert_eq!(lazarus.category, EntityCategory::Unknown);
        assert_eq!(registry.pattern_count(), 1);
    }

    #[test]
    fn test_evm_lookup_ignores_case() {
        let registry = load(&[("exchanges.json", EXCHANGES)], ConflictPolicy::Reject).unwrap();
        assert!(registry
            .exact("0x28c6c06298d514db089934071355e5743bf21d60")
            .is_some());
    }

    #[test]
    fn test_same_entity_across_sources_merges() {
        let extra = r#"{ "entities": { "Binance": { "category": "exchange", "addresses": ["bc1qbinancereserve"] } } }"#;
        let registry = load(
            &[("exchanges.json", EXCHANGES), ("extra.json", extra)],
            ConflictPolicy::Reject,
        )
        .unwrap();

        let binance = registry.get("binance").unwrap();
        assert_eq!(binance.addresses.len(), 3);
        assert!(registry.warnings().is_empty());
    }

    #[test]
    fn test_conflict_first_wins() {
        let other = r#"{ "entities": { "huobi": ["1FzWLkAahHooV3kzTgyx6qsswXJ6sCXkSR", "1HckjUpRGcrrRAtFaaCAUaGjsPx9oYmLaZ"] } }"#;
        let registry = load(
            &[("exchanges.json", EXCHANGES), ("other.json", other)],
            ConflictPolicy::FirstWins,
        )
        .unwrap();

        let owner = registry.exact("1FzWLkAahHooV3kzTgyx6qsswXJ6sCXkSR").unwrap();
        assert_eq!(owner.name, "Binance");
        assert_eq!(registry.get("huobi").unwrap().addresses.len(), 1);
        assert_eq!(registry.warnings().len(), 1);
    }

    #[test]
    fn test_conflict_reject() {
        let other = r#"{ "entities": { "huobi": ["1FzWLkAahHooV3kzTgyx6qsswXJ6sCXkSR"] } }"#;
        let err = load(
            &[("exchanges.json", EXCHANGES), ("other.json", other)],
            ConflictPolicy::Reject,
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict { .. }));
    }

    #[test]
    fn test_schema_mismatch_is_flagged() {
        let broken = r#"{ "entities": { "binance": 42 } }"#;
        let err = load(&[("broken.json", broken)], ConflictPolicy::FirstWins).unwrap_err();
        assert!(matches!(err, RegistryError::Schema { ref entity, .. } if entity == "binance"));
    }

    #[test]
    fn test_unknown_category_warns() {
        let source = r#"{ "entities": { "casino": { "type": "casino", "addresses": ["1Casino"] } } }"#;
        let registry = load(&[("s.json", source)], ConflictPolicy::FirstWins).unwrap();
        assert_eq!(registry.get("casino").unwrap().category, EntityCategory::Unknown);
        assert_eq!(registry.warnings().len(), 1);
    }

    #[test]
    fn test_pattern_errors() {
        let dangling = r#"{ "patterns": [ { "pattern": "^bnb1", "entity": "nobody" } ] }"#;
        let err = load(&[("p.json", dangling)], ConflictPolicy::FirstWins).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownPatternEntity { .. }));

        let invalid = r#"{ "entities": { "a": ["x1"] }, "patterns": [ { "pattern": "([", "entity": "a" } ] }"#;
        let err = load(&[("p.json", invalid)], ConflictPolicy::FirstWins).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidPattern { .. }));
    }

    #[test]
    fn test_high_risk_override() {
        let source = r#"{ "entities": { "exchangex": ["1ExchangeX"] } }"#;
        let registry = EntityRegistry::from_json_sources(
            [("s.json", source)],
            ConflictPolicy::FirstWins,
            &["ExchangeX".to_string(), "stolen_funds".to_string()],
        )
        .unwrap();
        assert!(registry.get("exchangex").unwrap().is_high_risk());
        // stolen_funds is not defined anywhere
        assert_eq!(registry.warnings().len(), 1);
    }

    #[test]
    fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exchanges.json");
        std::fs::write(&path, EXCHANGES).unwrap();

        let config = EntitiesConfig {
            sources: vec![path.to_string_lossy().into_owned()],
            conflict_policy: ConflictPolicy::Reject,
            high_risk: vec![],
        };
        let registry = EntityRegistry::load(&config).unwrap();
        assert_eq!(registry.entities().len(), 3);
        assert_eq!(registry.address_count(), 5);
    }

    #[test]
    fn test_missing_file() {
        let config = EntitiesConfig {
            sources: vec!["/nonexistent/entities.json".to_string()],
            conflict_policy: ConflictPolicy::FirstWins,
            high_risk: vec![],
        };
        assert!(matches!(
            EntityRegistry::load(&config),
            Err(RegistryError::Read { .. })
        ));
    }
}
