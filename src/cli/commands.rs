//! CLI command implementations

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::alert::{
    AlertDispatcher, AlertFormatter, HttpPostingChannel, LogChannel, PostingChannel,
    SharedDispatcher,
};
use crate::chain::Chain;
use crate::classifier::ThresholdClassifier;
use crate::config::{Config, TaskKind, POSTING_TOKEN_ENV};
use crate::engine::{WatchTarget, WhaleScanner};
use crate::entity::{EntityRegistry, EntityResolver, Resolution};
use crate::ledger::AddressLedger;
use crate::price::{CoinGeckoSource, PriceSource};
use crate::provider::{token_source_from_config, ChainDataProvider, ProviderRouter};
use crate::scheduler::Scheduler;
use crate::tasks::{PriceUpdateTask, WhaleScanTask};

/// Run the scheduler until interrupted
pub async fn start(config: &Config, dry_run: bool) -> Result<()> {
    if dry_run || config.posting.dry_run {
        warn!("Running in DRY-RUN mode - alerts are logged, not posted");
    }

    let mut scheduler = build_scheduler(config, dry_run).await?;
    if scheduler.is_empty() {
        anyhow::bail!("No scheduler tasks configured");
    }

    info!("Whale watcher running, press Ctrl+C to stop");
    tokio::select! {
        _ = scheduler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }

    for stats in scheduler.stats() {
        info!(
            "{}: {} runs, {} failures, {} alerts posted",
            stats.name, stats.runs, stats.failures, stats.alerts_posted
        );
    }
    Ok(())
}

/// Run a single whale scan cycle
pub async fn scan(config: &Config, dry_run: bool) -> Result<()> {
    let dispatcher = build_dispatcher(config, dry_run)?;
    let mut scanner = build_scanner(config, dispatcher).await?;
    let report = scanner.scan().await;

    println!("\n=== WHALE SCAN ===\n");
    println!("Addresses scanned: {}", report.scanned);
    println!("Skipped (provider errors): {}", report.skipped);
    println!("Seeded baselines: {}", report.seeded);
    println!("Anomalies: {}", report.anomalies);
    println!("Alerts: {} ({} posted, {} dropped)", report.events.len(), report.posted, report.dropped);
    println!("Ledger persisted: {}", report.persisted);
    for event in &report.events {
        println!(
            "  [{}] {} {} {} {} -> {}",
            event.severity,
            event.amount,
            event.asset,
            event.direction,
            event.from.label(),
            event.to.label()
        );
    }
    Ok(())
}

/// Print how an address resolves against the entity registry
pub fn resolve(config: &Config, address: &str, chain: Option<Chain>) -> Result<()> {
    let resolver = load_resolver(config)?;
    match resolver.describe(chain, address) {
        Resolution::Known { entity, matched_by } => {
            println!("Address:   {}", address);
            println!("Entity:    {}", entity.name);
            println!("Category:  {}", entity.category);
            println!("Risk tier: {:?}", entity.risk_tier);
            println!("Match:     {:?}", matched_by);
        }
        Resolution::Unknown { display } => {
            println!("Address:   {}", address);
            println!("Entity:    unknown ({})", display);
        }
    }
    Ok(())
}

/// Print the persisted address baselines
pub async fn ledger(config: &Config) -> Result<()> {
    let ledger = AddressLedger::load(&config.ledger.path)
        .await
        .with_context(|| format!("Failed to load ledger {}", config.ledger.path))?;

    println!("\n=== ADDRESS LEDGER ({}) ===\n", config.ledger.path);
    if ledger.is_empty() {
        println!("No baselines recorded yet.");
        return Ok(());
    }
    for record in ledger.records() {
        println!(
            "{:<64} balance={:<18} received={:<18} sent={:<18} n_tx={}",
            record.address, record.balance, record.total_received, record.total_sent, record.tx_count
        );
    }
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Assemble every configured task in order
pub async fn build_scheduler(config: &Config, dry_run: bool) -> Result<Scheduler> {
    let dispatcher = build_dispatcher(config, dry_run)?;
    let mut scheduler = Scheduler::new(
        Duration::from_secs(config.scheduler.tick_secs),
        Duration::from_secs(config.scheduler.failure_backoff_secs),
    );

    let mut price_source: Option<Arc<dyn PriceSource>> = None;

    for task in &config.scheduler.tasks {
        let interval = Duration::from_secs(task.interval_secs);
        let cool_down = Duration::from_secs(task.cool_down_secs);

        match task.kind {
            TaskKind::WhaleScan => {
                let scanner = build_scanner(config, dispatcher.clone()).await?;
                scheduler.add_task(
                    Box::new(WhaleScanTask::new(&task.name, scanner)),
                    interval,
                    cool_down,
                );
            }
            TaskKind::Price => {
                let symbol = task
                    .asset
                    .as_deref()
                    .with_context(|| format!("Price task {} needs an asset", task.name))?;
                let asset = config
                    .asset(symbol)
                    .with_context(|| format!("Unknown asset {}", symbol))?;
                let price_id = asset
                    .price_id
                    .clone()
                    .unwrap_or_else(|| asset.chain.to_string().to_lowercase());

                let source = match &price_source {
                    Some(source) => source.clone(),
                    None => {
                        let source: Arc<dyn PriceSource> = Arc::new(CoinGeckoSource::new(
                            &config.price.endpoint,
                            Duration::from_millis(config.price.timeout_ms),
                        )?);
                        price_source = Some(source.clone());
                        source
                    }
                };

                scheduler.add_task(
                    Box::new(PriceUpdateTask::new(
                        &task.name,
                        symbol,
                        price_id,
                        source,
                        dispatcher.clone(),
                    )),
                    interval,
                    cool_down,
                );
            }
        }
        info!(
            "Scheduled {} every {}s (cool-down {}s)",
            task.name, task.interval_secs, task.cool_down_secs
        );
    }

    Ok(scheduler)
}

fn build_dispatcher(config: &Config, dry_run: bool) -> Result<SharedDispatcher> {
    let channel: Arc<dyn PostingChannel> = if dry_run || config.posting.dry_run {
        Arc::new(LogChannel::new())
    } else {
        if config.posting.token.is_empty() {
            anyhow::bail!(
                "Posting token not set; export {} or use --dry-run",
                POSTING_TOKEN_ENV
            );
        }
        Arc::new(HttpPostingChannel::new(
            &config.posting.endpoint,
            &config.posting.token,
            Duration::from_millis(config.posting.timeout_ms),
        )?)
    };
    info!("Posting via {} channel", channel.name());

    Ok(Arc::new(Mutex::new(AlertDispatcher::from_config(
        channel,
        &config.dispatcher,
    ))))
}

fn load_resolver(config: &Config) -> Result<EntityResolver> {
    let registry = EntityRegistry::load(&config.entities).context("Failed to load entity registry")?;
    for warning in registry.warnings() {
        warn!("Entity registry: {}", warning);
    }
    Ok(EntityResolver::new(Arc::new(registry)))
}

async fn build_scanner(config: &Config, dispatcher: SharedDispatcher) -> Result<WhaleScanner> {
    let provider: Arc<dyn ChainDataProvider> = Arc::new(ProviderRouter::from_config(&config.provider)?);
    let ledger = AddressLedger::load(&config.ledger.path)
        .await
        .with_context(|| format!("Failed to load ledger {}", config.ledger.path))?;
    let targets = WatchTarget::from_config(config);
    info!("Watching {} addresses", targets.len());

    let needs_tokens = targets.iter().any(|t| t.token.is_some());

    let scanner = WhaleScanner::new(
        provider,
        ledger,
        load_resolver(config)?,
        ThresholdClassifier::from_assets(&config.assets),
        AlertFormatter::from_assets(&config.assets),
        dispatcher,
        targets,
    );
    if !needs_tokens {
        return Ok(scanner);
    }
    if config.provider.etherscan_api_key.is_empty() {
        warn!("No etherscan_api_key set, token transfer lookups will be heavily rate limited");
    }
    Ok(scanner.with_token_source(token_source_from_config(&config.provider)?))
}
