//! Address ledger
//!
//! Persisted last-known statistics per monitored address. Each new snapshot
//! is compared against the stored baseline to find movement, then becomes
//! the new baseline. The file is rewritten atomically (temp file + rename),
//! so on disk it is always either the previous or the fully updated version.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::chain::{normalize_address, round_to_scale};
use crate::error::{Error, Result};
use crate::provider::AddressStats;

/// Durable baseline for one address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressRecord {
    /// Map key in the ledger file, not repeated in the value
    #[serde(skip)]
    pub address: String,
    pub balance: f64,
    pub total_received: f64,
    pub total_sent: f64,
    #[serde(rename = "n_tx")]
    pub tx_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_tx_hash: Option<String>,
    /// Token-transfer cursor: newest block already folded into the totals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_block: Option<u64>,
}

impl AddressRecord {
    fn from_stats(address: &str, stats: &AddressStats) -> Self {
        Self {
            address: address.to_string(),
            balance: stats.balance,
            total_received: stats.total_received,
            total_sent: stats.total_sent,
            tx_count: stats.tx_count,
            last_tx_hash: stats.latest_tx_hash.clone(),
            last_block: stats.latest_block,
        }
    }
}

/// Direction of a detected movement relative to the monitored address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Sent,
    Received,
}

/// Change between two consecutive observations of one address
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub address: String,
    pub sent_delta: f64,
    pub received_delta: f64,
    pub previous: AddressRecord,
    pub current: AddressRecord,
}

impl Delta {
    /// Deltas are snapped to `1 / scale` so whole base-unit movements
    /// compare exactly against thresholds
    fn between(previous: AddressRecord, current: AddressRecord, scale: f64) -> Self {
        Self {
            address: current.address.clone(),
            sent_delta: round_to_scale(current.total_sent - previous.total_sent, scale),
            received_delta: round_to_scale(
                current.total_received - previous.total_received,
                scale,
            ),
            previous,
            current,
        }
    }

    /// Totals went backwards: reorg or provider double-count
    pub fn is_anomalous(&self) -> bool {
        self.sent_delta < 0.0 || self.received_delta < 0.0
    }

    pub fn is_zero(&self) -> bool {
        self.sent_delta == 0.0 && self.received_delta == 0.0
    }

    /// Positive movements worth evaluating. Anomalous deltas yield none.
    pub fn movements(&self) -> Vec<(Flow, f64)> {
        if self.is_anomalous() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(2);
        if self.sent_delta > 0.0 {
            out.push((Flow::Sent, self.sent_delta));
        }
        if self.received_delta > 0.0 {
            out.push((Flow::Received, self.received_delta));
        }
        out
    }
}

/// Persisted address → baseline map
pub struct AddressLedger {
    path: PathBuf,
    records: BTreeMap<String, AddressRecord>,
    dirty: bool,
}

impl AddressLedger {
    /// Load the ledger file; a missing file starts an empty ledger
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut records: BTreeMap<String, AddressRecord> = if path.exists() {
            let data = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Persistence(format!("{}: {}", path.display(), e)))?;
            serde_json::from_str(&data)
                .map_err(|e| Error::Persistence(format!("{}: {}", path.display(), e)))?
        } else {
            BTreeMap::new()
        };

        for (address, record) in records.iter_mut() {
            record.address = address.clone();
        }

        info!("Loaded {} address baselines from {}", records.len(), path.display());

        Ok(Self {
            path,
            records,
            dirty: false,
        })
    }

    /// Compare a fresh snapshot with the stored baseline.
    ///
    /// The first observation of an address only seeds the baseline and
    /// returns `None`. Otherwise the delta is returned and the baseline is
    /// replaced unconditionally, so an anomaly is reported once rather than
    /// every cycle. `scale` is the asset's base units per whole coin.
    pub fn record_observation(
        &mut self,
        address: &str,
        stats: &AddressStats,
        scale: f64,
    ) -> Option<Delta> {
        let key = normalize_address(address);
        let current = AddressRecord::from_stats(&key, stats);
        self.dirty = true;

        let Some(previous) = self.records.insert(key.clone(), current.clone()) else {
            info!(address = %key, "Seeded baseline, no alert for first observation");
            return None;
        };

        let delta = Delta::between(previous, current, scale);
        if delta.is_anomalous() {
            warn!(
                address = %key,
                sent_delta = delta.sent_delta,
                received_delta = delta.received_delta,
                "Totals decreased between observations, ignoring (reorg or provider inconsistency)"
            );
        } else if !delta.is_zero() {
            debug!(
                address = %key,
                sent_delta = delta.sent_delta,
                received_delta = delta.received_delta,
                "Movement detected"
            );
        }
        Some(delta)
    }

    pub fn get(&self, address: &str) -> Option<&AddressRecord> {
        self.records.get(&normalize_address(address))
    }

    pub fn records(&self) -> impl Iterator<Item = &AddressRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether in-memory state is ahead of the file
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the ledger atomically. A failed flush keeps the ledger dirty
    /// so the next flush retries with the full state.
    pub async fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let data = serde_json::to_string_pretty(&self.records)?;
        let tmp = tmp_path(&self.path);

        if let Err(e) = write_and_sync(&tmp, data.as_bytes()).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Persistence(format!("{}: {}", tmp.display(), e)));
        }

        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Persistence(format!("{}: {}", self.path.display(), e)));
        }

        self.dirty = false;
        debug!("Saved {} address baselines to {}", self.records.len(), self.path.display());
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "ledger".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Open, write, fsync; the handle is closed on every exit path when it drops
async fn write_and_sync(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}
