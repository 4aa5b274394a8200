//! Whale scan cycle
//!
//! For every watched address: fetch totals, diff them against the ledger,
//! attribute the counterparty of the latest transaction, classify, render
//! and post. The ledger is flushed once at the end of the cycle.
//!
//! Token targets have no running totals upstream. Their transfer log is read
//! from the block after the stored cursor and folded onto the previous
//! totals, so the same ledger diff applies.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::alert::{AlertCategory, AlertEvent, AlertFormatter, Direction, SharedDispatcher};
use crate::chain::{is_zero_address, normalize_address, Chain};
use crate::classifier::ThresholdClassifier;
use crate::config::Config;
use crate::entity::{EntityCategory, EntityEntry, EntityResolver, MatchKind, Resolution};
use crate::error::ProviderError;
use crate::ledger::{AddressLedger, AddressRecord, Flow};
use crate::provider::{
    AddressStats, ChainDataProvider, TokenContract, TokenTransfer, TokenTransferSource,
    TransactionDetail,
};

/// One monitored address
#[derive(Debug, Clone, PartialEq)]
pub struct WatchTarget {
    pub chain: Chain,
    pub asset: String,
    pub address: String,
    /// Operator-supplied name used when the registry does not know the address
    pub label: Option<String>,
    /// Set for ERC-20 assets
    pub token: Option<TokenContract>,
    /// Units per whole coin that deltas are rounded to
    pub scale: f64,
}

impl WatchTarget {
    /// Targets for every configured watch entry with a known asset
    pub fn from_config(config: &Config) -> Vec<Self> {
        config
            .watch
            .iter()
            .filter_map(|entry| {
                let asset = config.asset(&entry.asset)?;
                Some(WatchTarget {
                    chain: asset.chain,
                    asset: entry.asset.to_uppercase(),
                    address: normalize_address(&entry.address),
                    label: entry.label.clone(),
                    token: asset.token_contract.as_deref().map(|contract| TokenContract {
                        address: normalize_address(contract),
                        decimals: asset.token_decimals,
                    }),
                    scale: asset.delta_scale(),
                })
            })
            .collect()
    }

    /// Ledger key: the address itself, or `address:SYMBOL` for tokens
    pub fn ledger_key(&self) -> String {
        match self.token {
            Some(_) => format!("{}:{}", self.address, self.asset),
            None => self.address.clone(),
        }
    }
}

/// Fold transfers (newest first) onto the previous totals of `address`
fn fold_transfers(
    previous: Option<&AddressRecord>,
    address: &str,
    transfers: &[TokenTransfer],
) -> AddressStats {
    let mut total_received = previous.map_or(0.0, |r| r.total_received);
    let mut total_sent = previous.map_or(0.0, |r| r.total_sent);
    for t in transfers {
        if t.from == address {
            total_sent += t.amount;
        }
        if t.to == address {
            total_received += t.amount;
        }
    }

    let latest = transfers.first();
    AddressStats {
        balance: total_received - total_sent,
        total_received,
        total_sent,
        tx_count: previous.map_or(0, |r| r.tx_count) + transfers.len() as u64,
        latest_tx_hash: latest
            .map(|t| t.hash.clone())
            .or_else(|| previous.and_then(|r| r.last_tx_hash.clone())),
        latest_block: transfers
            .iter()
            .map(|t| t.block_number)
            .max()
            .or_else(|| previous.and_then(|r| r.last_block)),
    }
}

/// Summary of one scan cycle
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub scanned: usize,
    pub skipped: usize,
    pub seeded: usize,
    pub anomalies: usize,
    pub events: Vec<AlertEvent>,
    pub posted: usize,
    pub dropped: usize,
    pub persisted: bool,
}

pub struct WhaleScanner {
    provider: Arc<dyn ChainDataProvider>,
    tokens: Option<Arc<dyn TokenTransferSource>>,
    ledger: AddressLedger,
    resolver: EntityResolver,
    classifier: ThresholdClassifier,
    formatter: AlertFormatter,
    dispatcher: SharedDispatcher,
    targets: Vec<WatchTarget>,
}

impl WhaleScanner {
    pub fn new(
        provider: Arc<dyn ChainDataProvider>,
        ledger: AddressLedger,
        resolver: EntityResolver,
        classifier: ThresholdClassifier,
        formatter: AlertFormatter,
        dispatcher: SharedDispatcher,
        targets: Vec<WatchTarget>,
    ) -> Self {
        Self {
            provider,
            tokens: None,
            ledger,
            resolver,
            classifier,
            formatter,
            dispatcher,
            targets,
        }
    }

    /// Source for token targets; without one they are skipped
    pub fn with_token_source(mut self, tokens: Arc<dyn TokenTransferSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn ledger(&self) -> &AddressLedger {
        &self.ledger
    }

    pub fn targets(&self) -> &[WatchTarget] {
        &self.targets
    }

    /// Run one full cycle over every target
    pub async fn scan(&mut self) -> ScanReport {
        let mut report = ScanReport::default();
        let targets = self.targets.clone();

        for target in &targets {
            report.scanned += 1;
            self.scan_target(target, &mut report).await;
        }

        match self.ledger.flush().await {
            Ok(()) => report.persisted = true,
            Err(e) => error!("Ledger flush failed, will retry next cycle: {}", e),
        }

        info!(
            scanned = report.scanned,
            skipped = report.skipped,
            events = report.events.len(),
            posted = report.posted,
            dropped = report.dropped,
            "Whale scan complete"
        );
        report
    }

    async fn scan_target(&mut self, target: &WatchTarget, report: &mut ScanReport) {
        let (stats, latest_detail) = match self.observe(target).await {
            Ok(observed) => observed,
            Err(e) => {
                warn!(address = %target.address, chain = %target.chain, asset = %target.asset, "Skipping address this cycle: {}", e);
                report.skipped += 1;
                return;
            }
        };

        let Some(delta) = self
            .ledger
            .record_observation(&target.ledger_key(), &stats, target.scale)
        else {
            report.seeded += 1;
            return;
        };
        if delta.is_anomalous() {
            report.anomalies += 1;
            return;
        }
        let movements = delta.movements();
        if movements.is_empty() {
            return;
        }

        let Some(tx_hash) = stats.latest_tx_hash.clone() else {
            warn!(address = %target.address, "Movement without a transaction reference, not alerting");
            return;
        };

        let monitored = self.monitored_resolution(target);
        let detail = match latest_detail {
            Some(detail) => Ok(detail),
            None => self.provider.transaction_detail(target.chain, &tx_hash).await,
        };
        let counterparty = match detail {
            Ok(detail) => self.counterparty_of(target, &detail),
            Err(e) => {
                warn!(%tx_hash, "Counterparty lookup failed, alerting without it: {}", e);
                None
            }
        };
        let counterparty_resolution = match &counterparty {
            Some(address) => self.resolver.describe(Some(target.chain), address),
            None => Resolution::Unknown {
                display: "unknown".to_string(),
            },
        };
        let to_null = counterparty.as_deref().is_some_and(is_zero_address);

        for (flow, amount) in movements {
            let (direction, from, to) = match flow {
                Flow::Sent => (
                    if to_null { Direction::Burn } else { Direction::Sent },
                    monitored.clone(),
                    counterparty_resolution.clone(),
                ),
                Flow::Received => (
                    if to_null { Direction::Mint } else { Direction::Received },
                    counterparty_resolution.clone(),
                    monitored.clone(),
                ),
            };

            let entities: Vec<&EntityEntry> =
                from.entity().into_iter().chain(to.entity()).collect();
            let severity = self.classifier.classify(&target.asset, amount, &entities);
            if !severity.is_alert() {
                debug!(
                    address = %target.address,
                    amount,
                    %direction,
                    "Movement below threshold"
                );
                continue;
            }

            let event = AlertEvent {
                chain: target.chain,
                asset: target.asset.clone(),
                amount,
                direction,
                from,
                to,
                severity,
                timestamp: Utc::now(),
                tx_hash: tx_hash.clone(),
            };
            let text = self.formatter.format(&event);
            info!(
                address = %target.address,
                amount,
                %direction,
                %severity,
                "Whale movement detected"
            );

            let result = self
                .dispatcher
                .lock()
                .await
                .post(AlertCategory::WhaleAlert, &text)
                .await;
            match result {
                Ok(_) => report.posted += 1,
                Err(_) => report.dropped += 1,
            }
            report.events.push(event);
        }
    }

    /// Current totals for a target. Token targets also return the latest
    /// transfer, which already names the counterparty.
    async fn observe(
        &self,
        target: &WatchTarget,
    ) -> Result<(AddressStats, Option<TransactionDetail>), ProviderError> {
        let Some(token) = &target.token else {
            let stats = self
                .provider
                .address_stats(target.chain, &target.address)
                .await?;
            return Ok((stats, None));
        };
        let source = self
            .tokens
            .as_ref()
            .ok_or(ProviderError::Unsupported(target.chain))?;

        let previous = self.ledger.get(&target.ledger_key());
        let start_block = previous.and_then(|r| r.last_block).map_or(0, |b| b + 1);
        let transfers = source
            .token_transfers(token, &target.address, start_block)
            .await?;
        debug!(
            address = %target.address,
            asset = %target.asset,
            start_block,
            transfers = transfers.len(),
            "Fetched token transfers"
        );

        let stats = fold_transfers(previous, &target.address, &transfers);
        Ok((stats, transfers.first().map(TokenTransfer::detail)))
    }

    /// Registry attribution, falling back to the configured label
    fn monitored_resolution(&self, target: &WatchTarget) -> Resolution {
        let resolution = self.resolver.describe(Some(target.chain), &target.address);
        match (&resolution, &target.label) {
            (Resolution::Unknown { .. }, Some(label)) => Resolution::Known {
                entity: EntityEntry {
                    name: label.clone(),
                    category: EntityCategory::Unknown,
                    addresses: BTreeSet::from([target.address.clone()]),
                    risk_tier: Default::default(),
                },
                matched_by: MatchKind::Exact,
            },
            _ => resolution,
        }
    }

    fn counterparty_of(&self, target: &WatchTarget, detail: &TransactionDetail) -> Option<String> {
        let (side, other) = detail.counterparty(&target.address);
        debug!(tx = %detail.hash, ?side, counterparty = ?other, "Resolved transaction side");
        other.map(str::to_string)
    }
}
