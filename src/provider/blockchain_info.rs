//! blockchain.info backend (Bitcoin only)

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{collect_addresses, get_body, http_client, parse_json};
use super::{AddressStats, ChainDataProvider, TransactionDetail};
use crate::chain::Chain;
use crate::error::ProviderError;

#[derive(Debug, Deserialize)]
struct RawAddress {
    final_balance: f64,
    total_received: f64,
    total_sent: f64,
    n_tx: u64,
    #[serde(default)]
    txs: Vec<RawTxRef>,
}

#[derive(Debug, Deserialize)]
struct RawTxRef {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct RawTx {
    hash: String,
    #[serde(default)]
    inputs: Vec<RawInput>,
    #[serde(default)]
    out: Vec<RawOutput>,
    #[serde(default)]
    fee: f64,
}

#[derive(Debug, Deserialize)]
struct RawInput {
    prev_out: Option<RawOutput>,
}

#[derive(Debug, Deserialize)]
struct RawOutput {
    addr: Option<String>,
}

/// Decode `/address/{a}?format=json`; amounts are satoshis
pub fn parse_address_stats(body: &str) -> Result<AddressStats, ProviderError> {
    let raw: RawAddress = parse_json(body)?;
    let chain = Chain::Bitcoin;
    Ok(AddressStats {
        balance: chain.from_base_units(raw.final_balance),
        total_received: chain.from_base_units(raw.total_received),
        total_sent: chain.from_base_units(raw.total_sent),
        tx_count: raw.n_tx,
        latest_tx_hash: raw.txs.into_iter().next().map(|tx| tx.hash),
        latest_block: None,
    })
}

/// Decode `/rawtx/{hash}`
pub fn parse_transaction(body: &str) -> Result<TransactionDetail, ProviderError> {
    let raw: RawTx = parse_json(body)?;
    let inputs = collect_addresses(
        raw.inputs
            .iter()
            .map(|i| i.prev_out.as_ref().and_then(|o| o.addr.as_deref())),
    );
    let outputs = collect_addresses(raw.out.iter().map(|o| o.addr.as_deref()));
    Ok(TransactionDetail {
        hash: raw.hash,
        inputs,
        outputs,
        fee: Chain::Bitcoin.from_base_units(raw.fee),
    })
}

pub struct BlockchainInfoProvider {
    client: reqwest::Client,
    base_url: String,
}

impl BlockchainInfoProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn ensure_bitcoin(chain: Chain) -> Result<(), ProviderError> {
        if chain == Chain::Bitcoin {
            Ok(())
        } else {
            Err(ProviderError::Unsupported(chain))
        }
    }
}

#[async_trait]
impl ChainDataProvider for BlockchainInfoProvider {
    fn name(&self) -> &'static str {
        "blockchain_info"
    }

    async fn address_stats(
        &self,
        chain: Chain,
        address: &str,
    ) -> Result<AddressStats, ProviderError> {
        Self::ensure_bitcoin(chain)?;
        let url = format!("{}/address/{}?format=json&limit=1", self.base_url, address);
        debug!(%address, "Fetching address stats from blockchain.info");
        let body = get_body(&self.client, &url).await?;
        parse_address_stats(&body)
    }

    async fn transaction_detail(
        &self,
        chain: Chain,
        tx_hash: &str,
    ) -> Result<TransactionDetail, ProviderError> {
        Self::ensure_bitcoin(chain)?;
        let url = format!("{}/rawtx/{}", self.base_url, tx_hash);
        let body = get_body(&self.client, &url).await?;
        parse_transaction(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: &str = r#"{
        "hash160": "a0b0d60e5991578ed37cbda2b17d8b2ce23ab295",
        "address": "1FzWLkAahHooV3kzTgyx6qsswXJ6sCXkSR",
        "n_tx": 42,
        "total_received": 2000000000000,
        "total_sent": 1500000000000,
        "final_balance": 500000000000,
        "txs": [
            { "hash": "3a1b9e330d32fef1ee42f8e86420d2be978bbe0dc5862f17da9027cf9e11f8c4" },
            { "hash": "older" }
        ]
    }"#;

    const RAWTX: &str = r#"{
        "hash": "3a1b9e330d32fef1ee42f8e86420d2be978bbe0dc5862f17da9027cf9e11f8c4",
        "fee": 12000,
        "inputs": [
            { "prev_out": { "addr": "1FzWLkAahHooV3kzTgyx6qsswXJ6sCXkSR", "value": 150000000000 } },
            { "prev_out": { "value": 1 } }
        ],
        "out": [
            { "addr": "3FupZp77ySr7jwoLYEJ9mwzJpvoNBXsBnE", "value": 149999988000 },
            { "script": "6a", "value": 0 }
        ]
    }"#;

    #[test]
    fn test_parse_address_stats() {
        let stats = parse_address_stats(ADDRESS).unwrap();
        assert_eq!(stats.total_received, 20_000.0);
        assert_eq!(stats.total_sent, 15_000.0);
        assert_eq!(stats.balance, 5_000.0);
        assert_eq!(stats.tx_count, 42);
        assert_eq!(
            stats.latest_tx_hash.as_deref(),
            Some("3a1b9e330d32fef1ee42f8e86420d2be978bbe0dc5862f17da9027cf9e11f8c4")
        );
    }

    #[test]
    fn test_parse_address_without_txs() {
        let stats = parse_address_stats(
            r#"{"n_tx": 0, "total_received": 0, "total_sent": 0, "final_balance": 0}"#,
        )
        .unwrap();
        assert!(stats.latest_tx_hash.is_none());
    }

    #[test]
    fn test_parse_transaction_skips_missing_addresses() {
        let tx = parse_transaction(RAWTX).unwrap();
        assert_eq!(tx.inputs, vec!["1FzWLkAahHooV3kzTgyx6qsswXJ6sCXkSR"]);
        assert_eq!(tx.outputs, vec!["3FupZp77ySr7jwoLYEJ9mwzJpvoNBXsBnE"]);
        assert_eq!(tx.fee, 0.00012);
    }

    #[test]
    fn test_malformed_payload_is_parse_error() {
        let err = parse_address_stats(r#"{"error": "Rate limited"}"#).unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
        assert!(!err.is_retryable());
    }
}
