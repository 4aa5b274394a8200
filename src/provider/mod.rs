//! Chain-data providers
//!
//! Every backend answers the same two questions: what are an address's
//! running totals, and who took part in a given transaction. Amounts are
//! converted to whole coins before they leave this module.

pub mod blockchain_info;
pub mod blockcypher;
pub mod etherscan;
pub mod retry;
pub mod router;

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::chain::{normalize_address, Chain};
use crate::error::ProviderError;

pub use blockchain_info::BlockchainInfoProvider;
pub use blockcypher::BlockCypherProvider;
pub use etherscan::EtherscanProvider;
pub use retry::{CappedConstantBackoff, RetryingProvider};
pub use router::{token_source_from_config, ProviderRouter};

/// Current totals for one address, in whole coins
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AddressStats {
    pub balance: f64,
    pub total_received: f64,
    pub total_sent: f64,
    pub tx_count: u64,
    pub latest_tx_hash: Option<String>,
    /// Block of the latest transaction, when the backend reports one
    pub latest_block: Option<u64>,
}

/// Participants of one transaction
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransactionDetail {
    pub hash: String,
    /// Input addresses in payload order, normalized
    pub inputs: Vec<String>,
    /// Output addresses in payload order, normalized
    pub outputs: Vec<String>,
    pub fee: f64,
}

/// Which side of a transaction the monitored address was on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Sender,
    Receiver,
}

impl TransactionDetail {
    /// Find the other party relative to `address`.
    ///
    /// If the address is among the inputs it sent the funds and the
    /// counterparty is the first output that is not itself; otherwise the
    /// counterparty is the first foreign input.
    pub fn counterparty(&self, address: &str) -> (Side, Option<&str>) {
        fn first_other<'a>(addrs: &'a [String], own: &str) -> Option<&'a str> {
            addrs.iter().map(String::as_str).find(|a| *a != own)
        }

        let own = normalize_address(address);
        if self.inputs.iter().any(|a| *a == own) {
            (Side::Sender, first_other(&self.outputs, &own))
        } else {
            (Side::Receiver, first_other(&self.inputs, &own))
        }
    }
}

/// Source of address totals and transaction participants
#[async_trait]
pub trait ChainDataProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &'static str;

    async fn address_stats(&self, chain: Chain, address: &str)
        -> Result<AddressStats, ProviderError>;

    async fn transaction_detail(
        &self,
        chain: Chain,
        tx_hash: &str,
    ) -> Result<TransactionDetail, ProviderError>;
}

/// An ERC-20 token contract
#[derive(Debug, Clone, PartialEq)]
pub struct TokenContract {
    /// Normalized contract address
    pub address: String,
    pub decimals: u32,
}

/// One token transfer log entry, amount in whole tokens
#[derive(Debug, Clone, PartialEq)]
pub struct TokenTransfer {
    pub hash: String,
    pub block_number: u64,
    pub from: String,
    pub to: String,
    pub amount: f64,
}

impl TokenTransfer {
    /// A transfer has exactly one sender and one receiver
    pub fn detail(&self) -> TransactionDetail {
        TransactionDetail {
            hash: self.hash.clone(),
            inputs: vec![self.from.clone()],
            outputs: vec![self.to.clone()],
            fee: 0.0,
        }
    }
}

/// Source of token transfer logs for a holder
#[async_trait]
pub trait TokenTransferSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Transfers of `token` touching `address` from `start_block` on,
    /// newest first
    async fn token_transfers(
        &self,
        token: &TokenContract,
        address: &str,
        start_block: u64,
    ) -> Result<Vec<TokenTransfer>, ProviderError>;
}

/// Build the HTTP client shared by the REST backends
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("whalewatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProviderError::Transport(e.to_string()))
}

/// GET a URL and return the body, mapping non-2xx to `BadStatus`
pub(crate) async fn get_body(client: &reqwest::Client, url: &str) -> Result<String, ProviderError> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(ProviderError::BadStatus(status.as_u16()));
    }
    Ok(resp.text().await?)
}

pub(crate) fn parse_json<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T, ProviderError> {
    serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))
}

/// Normalize payload addresses in order, dropping missing ones
pub(crate) fn collect_addresses<'a, I>(addrs: I) -> Vec<String>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    addrs
        .into_iter()
        .flatten()
        .filter(|a| !a.is_empty())
        .map(normalize_address)
        .collect()
}
