//! Alert events, rendering and delivery

pub mod channel;
pub mod dispatcher;
pub mod formatter;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::chain::Chain;
use crate::classifier::Severity;
use crate::entity::Resolution;

pub use channel::{HttpPostingChannel, LogChannel, PostId, PostingChannel};
pub use dispatcher::{AlertDispatcher, DispatchStats, Posted};
pub use formatter::{format_amount, AlertFormatter};

/// The dispatcher is shared by every posting task; holding the lock for a
/// whole post keeps a single message in flight.
pub type SharedDispatcher = Arc<Mutex<AlertDispatcher>>;

/// Movement direction from the monitored address's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Sent,
    Received,
    /// Received from the EVM null address
    Mint,
    /// Sent to the EVM null address
    Burn,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Sent => "sent",
            Direction::Received => "received",
            Direction::Mint => "mint",
            Direction::Burn => "burn",
        };
        f.write_str(s)
    }
}

/// Posts are spaced per category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    WhaleAlert,
    PriceUpdate,
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertCategory::WhaleAlert => f.write_str("whale_alert"),
            AlertCategory::PriceUpdate => f.write_str("price_update"),
        }
    }
}

/// One alert-worthy movement, consumed by the formatter and never persisted
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub chain: Chain,
    /// Asset symbol, e.g. "BTC"
    pub asset: String,
    pub amount: f64,
    pub direction: Direction,
    pub from: Resolution,
    pub to: Resolution,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub tx_hash: String,
}

impl AlertEvent {
    /// Resolved entities on either side
    pub fn counterparties(&self) -> impl Iterator<Item = &crate::entity::EntityEntry> {
        self.from.entity().into_iter().chain(self.to.entity())
    }
}
