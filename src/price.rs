//! Spot price quotes for periodic price posts

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::alert::format_amount;
use crate::error::ProviderError;
use crate::provider::{get_body, http_client, parse_json};

#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    pub symbol: String,
    pub usd: f64,
    pub change_24h: Option<f64>,
}

impl PriceQuote {
    /// Short status line, e.g. `$BTC $67,012.34 (+1.25% 24h)`
    pub fn render(&self) -> String {
        let mut line = format!("${} ${}", self.symbol.to_uppercase(), format_amount(self.usd, 2));
        if let Some(change) = self.change_24h {
            line.push_str(&format!(" ({:+.2}% 24h)", change));
        }
        line
    }
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Quote `symbol` using the source-specific coin id
    async fn quote(&self, symbol: &str, price_id: &str) -> Result<PriceQuote, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct RawQuote {
    usd: f64,
    #[serde(default)]
    usd_24h_change: Option<f64>,
}

/// Decode `/simple/price?ids=...&vs_currencies=usd&include_24hr_change=true`
pub fn parse_simple_price(
    body: &str,
    symbol: &str,
    price_id: &str,
) -> Result<PriceQuote, ProviderError> {
    let mut raw: HashMap<String, RawQuote> = parse_json(body)?;
    let quote = raw
        .remove(price_id)
        .ok_or_else(|| ProviderError::Parse(format!("no quote for {}", price_id)))?;
    Ok(PriceQuote {
        symbol: symbol.to_uppercase(),
        usd: quote.usd,
        change_24h: quote.usd_24h_change,
    })
}

pub struct CoinGeckoSource {
    client: reqwest::Client,
    base_url: String,
}

impl CoinGeckoSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    async fn quote(&self, symbol: &str, price_id: &str) -> Result<PriceQuote, ProviderError> {
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd&include_24hr_change=true",
            self.base_url, price_id
        );
        let body = get_body(&self.client, &url).await?;
        parse_simple_price(&body, symbol, price_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_render() {
        let quote = parse_simple_price(
            r#"{"bitcoin": {"usd": 67012.34, "usd_24h_change": 1.2534}}"#,
            "btc",
            "bitcoin",
        )
        .unwrap();
        assert_eq!(quote.render(), "$BTC $67,012.34 (+1.25% 24h)");
    }

    #[test]
    fn test_render_negative_change() {
        let quote = PriceQuote {
            symbol: "ETH".to_string(),
            usd: 3120.5,
            change_24h: Some(-0.8),
        };
        assert_eq!(quote.render(), "$ETH $3,120.50 (-0.80% 24h)");
    }

    #[test]
    fn test_missing_coin() {
        let err = parse_simple_price(r#"{}"#, "BTC", "bitcoin").unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
    }
}
