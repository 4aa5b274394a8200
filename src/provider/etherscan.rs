//! Etherscan backend for ERC-20 transfer logs

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{get_body, http_client, parse_json};
use super::{TokenContract, TokenTransfer, TokenTransferSource};
use crate::chain::normalize_address;
use crate::error::ProviderError;

/// Transfers fetched per request; older ones are not paged in
const PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    message: String,
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransfer {
    block_number: String,
    hash: String,
    from: String,
    to: String,
    value: String,
}

/// Convert an integer base-unit string into whole tokens
fn token_amount(raw: &str, decimals: u32) -> Result<f64, ProviderError> {
    let bad = |e: String| ProviderError::Parse(format!("token value {:?}: {}", raw, e));
    match (raw.parse::<u128>(), 10u128.checked_pow(decimals)) {
        (Ok(value), Some(unit)) => Ok((value / unit) as f64 + (value % unit) as f64 / unit as f64),
        _ => raw
            .parse::<f64>()
            .map(|v| v / 10f64.powi(decimals as i32))
            .map_err(|e| bad(e.to_string())),
    }
}

/// Decode `?module=account&action=tokentx`
pub fn parse_token_transfers(body: &str, decimals: u32) -> Result<Vec<TokenTransfer>, ProviderError> {
    let raw: RawResponse = parse_json(body)?;

    let entries: Vec<RawTransfer> = match raw.result {
        value @ serde_json::Value::Array(_) => {
            serde_json::from_value(value).map_err(|e| ProviderError::Parse(e.to_string()))?
        }
        serde_json::Value::String(reason) => {
            // Errors come back as 200 with a string result
            if reason.to_lowercase().contains("rate limit") {
                return Err(ProviderError::BadStatus(429));
            }
            return Err(ProviderError::Parse(format!("{}: {}", raw.message, reason)));
        }
        other => return Err(ProviderError::Parse(format!("unexpected result {}", other))),
    };

    entries
        .into_iter()
        .map(|t| {
            Ok(TokenTransfer {
                block_number: t
                    .block_number
                    .parse()
                    .map_err(|_| ProviderError::Parse(format!("block {:?}", t.block_number)))?,
                amount: token_amount(&t.value, decimals)?,
                hash: t.hash,
                from: normalize_address(&t.from),
                to: normalize_address(&t.to),
            })
        })
        .collect()
}

pub struct EtherscanProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl EtherscanProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    fn url(&self, token: &TokenContract, address: &str, start_block: u64) -> String {
        let mut url = format!(
            "{}?module=account&action=tokentx&contractaddress={}&address={}&startblock={}&endblock=99999999&page=1&offset={}&sort=desc",
            self.base_url, token.address, address, start_block, PAGE_SIZE
        );
        if let Some(key) = &self.api_key {
            url.push_str("&apikey=");
            url.push_str(key);
        }
        url
    }
}

#[async_trait]
impl TokenTransferSource for EtherscanProvider {
    fn name(&self) -> &'static str {
        "etherscan"
    }

    async fn token_transfers(
        &self,
        token: &TokenContract,
        address: &str,
        start_block: u64,
    ) -> Result<Vec<TokenTransfer>, ProviderError> {
        debug!(%address, contract = %token.address, start_block, "Fetching token transfers");
        let body = get_body(&self.client, &self.url(token, address, start_block)).await?;
        parse_token_transfers(&body, token.decimals)
    }
}
