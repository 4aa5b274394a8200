//! BlockCypher backend (BTC, LTC, DOGE, ETH)

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
    txrefs: Vec<RawTxRef>,
}

#[derive(Debug, Deserialize)]
struct RawTxRef {
    tx_hash: String,
}

#[derive(Debug, Deserialize)]
struct RawTx {
    hash: String,
    #[serde(default)]
    inputs: Vec<RawIo>,
    #[serde(default)]
    outputs: Vec<RawIo>,
    #[serde(default)]
    fees: f64,
}

#[derive(Debug, Deserialize)]
struct RawIo {
    #[serde(default)]
    addresses: Option<Vec<String>>,
}

/// URL path segment for a chain
fn coin_path(chain: Chain) -> &'static str {
    match chain {
        Chain::Bitcoin => "btc",
        Chain::Ethereum => "eth",
        Chain::Litecoin => "ltc",
        Chain::Dogecoin => "doge",
    }
}

/// BlockCypher reports Ethereum addresses and hashes without the `0x` prefix
fn with_hex_prefix(chain: Chain, value: &str) -> String {
    if chain.is_evm() && !value.starts_with("0x") {
        format!("0x{}", value)
    } else {
        value.to_string()
    }
}

/// Decode `/v1/{coin}/main/addrs/{a}`
pub fn parse_address_stats(chain: Chain, body: &str) -> Result<AddressStats, ProviderError> {
    let raw: RawAddress = parse_json(body)?;
    Ok(AddressStats {
        balance: chain.from_base_units(raw.final_balance),
        total_received: chain.from_base_units(raw.total_received),
        total_sent: chain.from_base_units(raw.total_sent),
        tx_count: raw.n_tx,
        latest_tx_hash: raw
            .txrefs
            .into_iter()
            .next()
            .map(|r| with_hex_prefix(chain, &r.tx_hash)),
        latest_block: None,
    })
}

/// Decode `/v1/{coin}/main/txs/{hash}`
pub fn parse_transaction(chain: Chain, body: &str) -> Result<TransactionDetail, ProviderError> {
    let raw: RawTx = parse_json(body)?;
    let flatten = |ios: &[RawIo]| -> Vec<String> {
        let prefixed: Vec<String> = ios
            .iter()
            .flat_map(|io| io.addresses.iter().flatten())
            .map(|a| with_hex_prefix(chain, a))
            .collect();
        collect_addresses(prefixed.iter().map(|a| Some(a.as_str())))
    };
    Ok(TransactionDetail {
        hash: with_hex_prefix(chain, &raw.hash),
        inputs: flatten(&raw.inputs),
        outputs: flatten(&raw.outputs),
        fee: chain.from_base_units(raw.fees),
    })
}

pub struct BlockCypherProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BlockCypherProvider {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    fn url(&self, chain: Chain, path: &str) -> String {
        let mut url = format!("{}/{}/main/{}", self.base_url, coin_path(chain), path);
        if let Some(token) = &self.token {
            let sep = if url.contains('?') { '&' } else { '?' };
            url.push(sep);
            url.push_str("token=");
            url.push_str(token);
        }
        url
    }
}

#[async_trait]
impl ChainDataProvider for BlockCypherProvider {
    fn name(&self) -> &'static str {
        "blockcypher"
    }

    async fn address_stats(
        &self,
        chain: Chain,
        address: &str,
    ) -> Result<AddressStats, ProviderError> {
        let url = self.url(chain, &format!("addrs/{}?limit=1", address));
        debug!(%address, %chain, "Fetching address stats from BlockCypher");
        let body = get_body(&self.client, &url).await?;
        parse_address_stats(chain, &body)
    }

    async fn transaction_detail(
        &self,
        chain: Chain,
        tx_hash: &str,
    ) -> Result<TransactionDetail, ProviderError> {
        let hash = if chain.is_evm() {
            tx_hash.trim_start_matches("0x")
        } else {
            tx_hash
        };
        let url = self.url(chain, &format!("txs/{}", hash));
        let body = get_body(&self.client, &url).await?;
        parse_transaction(chain, &body)
    }
}
