//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::chain::{Chain, MAX_DELTA_SCALE};
use crate::entity::ConflictPolicy;

/// Environment variable holding the posting channel token
pub const POSTING_TOKEN_ENV: &str = "WHALEWATCH_POSTING_TOKEN";

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub entities: EntitiesConfig,
    /// Asset symbol (upper-case after load) → thresholds
    #[serde(default = "default_assets")]
    pub assets: BTreeMap<String, AssetConfig>,
    #[serde(default)]
    pub watch: Vec<WatchEntry>,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub posting: PostingConfig,
    #[serde(default)]
    pub price: PriceConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Which backend serves each chain
    #[serde(default = "default_backends")]
    pub backends: BTreeMap<Chain, Backend>,
    #[serde(default = "default_blockchain_info_url")]
    pub blockchain_info_url: String,
    #[serde(default = "default_blockcypher_url")]
    pub blockcypher_url: String,
    #[serde(default)]
    pub blockcypher_token: String,
    /// Token transfer logs for ERC-20 assets
    #[serde(default = "default_etherscan_url")]
    pub etherscan_url: String,
    #[serde(default)]
    pub etherscan_api_key: String,
}

/// Chain-data backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Backend {
    #[serde(rename = "blockchain_info")]
    BlockchainInfo,
    #[serde(rename = "blockcypher")]
    BlockCypher,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntitiesConfig {
    /// Registry files, merged in order
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    /// Entity names forced into the high-risk tier
    #[serde(default)]
    pub high_risk: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssetConfig {
    pub chain: Chain,
    pub normal_threshold: f64,
    pub high_risk_threshold: f64,
    #[serde(default = "default_display_decimals")]
    pub display_decimals: usize,
    /// CoinGecko coin id used by price tasks
    #[serde(default)]
    pub price_id: Option<String>,
    /// ERC-20 contract; set for tokens tracked through transfer logs
    #[serde(default)]
    pub token_contract: Option<String>,
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u32,
}

impl AssetConfig {
    pub fn is_token(&self) -> bool {
        self.token_contract.is_some()
    }

    /// Units per whole coin that movements are rounded to
    pub fn delta_scale(&self) -> f64 {
        if self.is_token() {
            10f64.powi(self.token_decimals as i32).min(MAX_DELTA_SCALE)
        } else {
            self.chain.delta_scale()
        }
    }
}

/// A monitored address
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WatchEntry {
    pub asset: String,
    pub address: String,
    /// Must agree with the asset's chain when given
    #[serde(default)]
    pub chain: Option<Chain>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_base_backoff_secs")]
    pub base_backoff_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub spacing: SpacingConfig,
}

/// Minimum seconds between two posts of the same category
#[derive(Debug, Clone, Deserialize)]
pub struct SpacingConfig {
    #[serde(default = "default_whale_alert_spacing")]
    pub whale_alert: u64,
    #[serde(default)]
    pub price_update: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostingConfig {
    #[serde(default = "default_posting_endpoint")]
    pub endpoint: String,
    /// Bearer token; normally supplied through the environment
    #[serde(default)]
    pub token: String,
    /// Log messages instead of posting them
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceConfig {
    #[serde(default = "default_price_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_failure_backoff_secs")]
    pub failure_backoff_secs: u64,
    /// Evaluated in this order on every tick
    #[serde(default = "default_tasks")]
    pub tasks: Vec<TaskConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    pub kind: TaskKind,
    /// Asset symbol, required for price tasks
    #[serde(default)]
    pub asset: Option<String>,
    pub interval_secs: u64,
    #[serde(default)]
    pub cool_down_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Price,
    WhaleScan,
}

// Default value functions
fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_backends() -> BTreeMap<Chain, Backend> {
    Chain::ALL
        .iter()
        .map(|chain| {
            let backend = match chain {
                Chain::Bitcoin => Backend::BlockchainInfo,
                _ => Backend::BlockCypher,
            };
            (*chain, backend)
        })
        .collect()
}

fn default_blockchain_info_url() -> String {
    "https://blockchain.info".to_string()
}

fn default_blockcypher_url() -> String {
    "https://api.blockcypher.com/v1".to_string()
}

fn default_ledger_path() -> String {
    "address_history.json".to_string()
}

fn default_etherscan_url() -> String {
    "https://api.etherscan.io/api".to_string()
}

fn default_display_decimals() -> usize {
    2
}

fn default_token_decimals() -> u32 {
    18
}

fn default_assets() -> BTreeMap<String, AssetConfig> {
    let asset = |chain: Chain, normal: f64, decimals: usize, price_id: &str| AssetConfig {
        chain,
        normal_threshold: normal,
        high_risk_threshold: normal / 10.0,
        display_decimals: decimals,
        price_id: Some(price_id.to_string()),
        token_contract: None,
        token_decimals: default_token_decimals(),
    };
    let stablecoin = |contract: &str, price_id: &str| AssetConfig {
        chain: Chain::Ethereum,
        normal_threshold: 10_000_000.0,
        high_risk_threshold: 1_000_000.0,
        display_decimals: 2,
        price_id: Some(price_id.to_string()),
        token_contract: Some(contract.to_string()),
        token_decimals: 6,
    };
    BTreeMap::from([
        ("BTC".to_string(), asset(Chain::Bitcoin, 500.0, 8, "bitcoin")),
        ("ETH".to_string(), asset(Chain::Ethereum, 1_000.0, 2, "ethereum")),
        ("LTC".to_string(), asset(Chain::Litecoin, 5_000.0, 2, "litecoin")),
        ("DOGE".to_string(), asset(Chain::Dogecoin, 1_000_000.0, 2, "dogecoin")),
        (
            "USDT".to_string(),
            stablecoin("0xdac17f958d2ee523a2206206994597c13d831ec7", "tether"),
        ),
        (
            "USDC".to_string(),
            stablecoin("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", "usd-coin"),
        ),
    ])
}

fn default_base_backoff_secs() -> u64 {
    60
}

fn default_whale_alert_spacing() -> u64 {
    30
}

fn default_posting_endpoint() -> String {
    "https://api.twitter.com/2/tweets".to_string()
}

fn default_price_endpoint() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}

fn default_tick_secs() -> u64 {
    15
}

fn default_failure_backoff_secs() -> u64 {
    30
}

fn default_tasks() -> Vec<TaskConfig> {
    vec![
        TaskConfig {
            name: "btc_price".to_string(),
            kind: TaskKind::Price,
            asset: Some("BTC".to_string()),
            interval_secs: 900,
            cool_down_secs: 120,
        },
        TaskConfig {
            name: "eth_price".to_string(),
            kind: TaskKind::Price,
            asset: Some("ETH".to_string()),
            interval_secs: 900,
            cool_down_secs: 180,
        },
        TaskConfig {
            name: "whale_alert".to_string(),
            kind: TaskKind::WhaleScan,
            asset: None,
            interval_secs: 300,
            cool_down_secs: 30,
        },
    ]
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            backends: default_backends(),
            blockchain_info_url: default_blockchain_info_url(),
            blockcypher_url: default_blockcypher_url(),
            blockcypher_token: String::new(),
            etherscan_url: default_etherscan_url(),
            etherscan_api_key: String::new(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            base_backoff_secs: default_base_backoff_secs(),
            max_attempts: default_max_attempts(),
            spacing: SpacingConfig::default(),
        }
    }
}

impl Default for SpacingConfig {
    fn default() -> Self {
        Self {
            whale_alert: default_whale_alert_spacing(),
            price_update: 0,
        }
    }
}

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_posting_endpoint(),
            token: String::new(),
            dry_run: false,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_price_endpoint(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            failure_backoff_secs: default_failure_backoff_secs(),
            tasks: default_tasks(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            ledger: LedgerConfig::default(),
            entities: EntitiesConfig::default(),
            assets: default_assets(),
            watch: vec![],
            dispatcher: DispatcherConfig::default(),
            posting: PostingConfig::default(),
            price: PriceConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (WHALEWATCH_SECTION__KEY)
            .add_source(
                config::Environment::with_prefix("WHALEWATCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let mut config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if config.posting.token.is_empty() {
            if let Ok(token) = std::env::var(POSTING_TOKEN_ENV) {
                config.posting.token = token;
            }
        }

        config.normalize();
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML document without touching files or the environment
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .context("Failed to build configuration")?;

        let mut config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Keys are case-folded by the config loader; symbols are shown upper-case
    fn normalize(&mut self) {
        self.assets = std::mem::take(&mut self.assets)
            .into_iter()
            .map(|(symbol, asset)| (symbol.to_uppercase(), asset))
            .collect();
        for entry in &mut self.watch {
            entry.asset = entry.asset.to_uppercase();
        }
        for task in &mut self.scheduler.tasks {
            if let Some(asset) = task.asset.as_mut() {
                *asset = asset.to_uppercase();
            }
        }
    }

    /// Look up an asset by symbol, case-insensitively
    pub fn asset(&self, symbol: &str) -> Option<&AssetConfig> {
        self.assets.get(&symbol.to_uppercase())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        for (symbol, asset) in &self.assets {
            if asset.normal_threshold <= 0.0 || asset.high_risk_threshold <= 0.0 {
                anyhow::bail!("Thresholds for {} must be positive", symbol);
            }
            if let Some(contract) = &asset.token_contract {
                if asset.chain != Chain::Ethereum {
                    anyhow::bail!("Token asset {} must be on ethereum", symbol);
                }
                if !contract.starts_with("0x") || contract.len() != 42 {
                    anyhow::bail!("Token asset {} has a malformed contract {}", symbol, contract);
                }
                if asset.token_decimals > 36 {
                    anyhow::bail!("Token asset {} has too many decimals", symbol);
                }
            }
            if asset.high_risk_threshold >= asset.normal_threshold {
                anyhow::bail!(
                    "high_risk_threshold for {} ({}) must be below normal_threshold ({})",
                    symbol,
                    asset.high_risk_threshold,
                    asset.normal_threshold
                );
            }
        }

        if self.provider.max_attempts == 0 {
            anyhow::bail!("provider.max_attempts must be at least 1");
        }

        if self.dispatcher.max_attempts == 0 {
            anyhow::bail!("dispatcher.max_attempts must be at least 1");
        }

        for entry in &self.watch {
            let asset = self.asset(&entry.asset).with_context(|| {
                format!(
                    "Watch entry {} refers to unconfigured asset {}",
                    entry.address, entry.asset
                )
            })?;
            if let Some(chain) = entry.chain {
                if chain != asset.chain {
                    anyhow::bail!(
                        "Watch entry {} is on {} but asset {} is on {}",
                        entry.address,
                        chain,
                        entry.asset,
                        asset.chain
                    );
                }
            }
            if entry.address.trim().is_empty() {
                anyhow::bail!("Watch entry for {} has an empty address", entry.asset);
            }
        }

        if self.scheduler.tick_secs == 0 {
            anyhow::bail!("scheduler.tick_secs must be positive");
        }

        let mut names = HashSet::new();
        let mut whale_scans = 0;
        for task in &self.scheduler.tasks {
            if !names.insert(task.name.as_str()) {
                anyhow::bail!("Duplicate scheduler task name: {}", task.name);
            }
            if task.interval_secs == 0 {
                anyhow::bail!("Task {} must have a positive interval", task.name);
            }
            match task.kind {
                TaskKind::WhaleScan => whale_scans += 1,
                TaskKind::Price => {
                    let symbol = task
                        .asset
                        .as_deref()
                        .with_context(|| format!("Price task {} needs an asset", task.name))?;
                    if self.asset(symbol).is_none() {
                        anyhow::bail!(
                            "Price task {} refers to unconfigured asset {}",
                            task.name,
                            symbol
                        );
                    }
                }
            }
        }
        if whale_scans > 1 {
            anyhow::bail!("At most one whale_scan task is allowed, got {}", whale_scans);
        }

        if whale_scans == 1 && self.watch.is_empty() {
            tracing::warn!("A whale_scan task is scheduled but no addresses are watched");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let assets = self
            .assets
            .iter()
            .map(|(symbol, a)| {
                format!(
                    "    {}: chain={} normal={} high_risk={} decimals={}{}",
                    symbol,
                    a.chain,
                    a.normal_threshold,
                    a.high_risk_threshold,
                    a.display_decimals,
                    a.token_contract
                        .as_deref()
                        .map(|c| format!(" token={}", c))
                        .unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let tasks = self
            .scheduler
            .tasks
            .iter()
            .map(|t| {
                format!(
                    "    {}: kind={:?} every {}s, cool-down {}s",
                    t.name, t.kind, t.interval_secs, t.cool_down_secs
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"Configuration:
  Provider:
    timeout: {}ms
    attempts: {} (delay {}ms)
    backends: {:?}
    blockcypher_token: {}
    etherscan: {} (key {})
  Ledger:
    path: {}
  Entities:
    sources: {:?}
    conflict_policy: {:?}
    high_risk: {:?}
  Assets:
{}
  Watch: {} addresses
  Dispatcher:
    base_backoff: {}s
    max_attempts: {}
    spacing: whale_alert={}s price_update={}s
  Posting:
    endpoint: {}
    token: {}
    dry_run: {}
  Scheduler:
    tick: {}s
    failure_backoff: {}s
{}
"#,
            self.provider.timeout_ms,
            self.provider.max_attempts,
            self.provider.retry_delay_ms,
            self.provider.backends,
            mask_secret(&self.provider.blockcypher_token),
            mask_url(&self.provider.etherscan_url),
            mask_secret(&self.provider.etherscan_api_key),
            self.ledger.path,
            self.entities.sources,
            self.entities.conflict_policy,
            self.entities.high_risk,
            assets,
            self.watch.len(),
            self.dispatcher.base_backoff_secs,
            self.dispatcher.max_attempts,
            self.dispatcher.spacing.whale_alert,
            self.dispatcher.spacing.price_update,
            mask_url(&self.posting.endpoint),
            mask_secret(&self.posting.token),
            self.posting.dry_run,
            self.scheduler.tick_secs,
            self.scheduler.failure_backoff_secs,
            tasks,
        )
    }
}

fn mask_secret(secret: &str) -> &'static str {
    if secret.is_empty() {
        "(not set)"
    } else {
        "***"
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}
