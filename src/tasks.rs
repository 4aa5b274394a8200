//! Scheduled task implementations

use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::alert::{AlertCategory, SharedDispatcher};
use crate::engine::WhaleScanner;
use crate::price::PriceSource;
use crate::scheduler::{ScheduledTask, TaskOutcome};

/// Periodic whale scan over every watched address
pub struct WhaleScanTask {
    name: String,
    scanner: WhaleScanner,
}

impl WhaleScanTask {
    pub fn new(name: impl Into<String>, scanner: WhaleScanner) -> Self {
        Self {
            name: name.into(),
            scanner,
        }
    }
}

#[async_trait]
impl ScheduledTask for WhaleScanTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self) -> anyhow::Result<TaskOutcome> {
        let report = self.scanner.scan().await;
        Ok(TaskOutcome::posted(report.posted))
    }
}

/// Posts a spot price line for one asset
pub struct PriceUpdateTask {
    name: String,
    symbol: String,
    price_id: String,
    source: Arc<dyn PriceSource>,
    dispatcher: SharedDispatcher,
}

impl PriceUpdateTask {
    pub fn new(
        name: impl Into<String>,
        symbol: impl Into<String>,
        price_id: impl Into<String>,
        source: Arc<dyn PriceSource>,
        dispatcher: SharedDispatcher,
    ) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            price_id: price_id.into(),
            source,
            dispatcher,
        }
    }
}

#[async_trait]
impl ScheduledTask for PriceUpdateTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self) -> anyhow::Result<TaskOutcome> {
        let quote = self
            .source
            .quote(&self.symbol, &self.price_id)
            .await
            .with_context(|| format!("price quote for {}", self.symbol))?;
        let text = quote.render();
        info!(symbol = %self.symbol, usd = quote.usd, "Price update");

        let result = self
            .dispatcher
            .lock()
            .await
            .post(AlertCategory::PriceUpdate, &text)
            .await;
        match result {
            Ok(_) => Ok(TaskOutcome::posted(1)),
            Err(e) => {
                warn!(symbol = %self.symbol, "Price update not posted: {}", e);
                Ok(TaskOutcome::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertDispatcher;
    use crate::error::{ChannelError, ProviderError};
    use crate::price::PriceQuote;
    use crate::testing::ScriptedChannel;
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct FixedPrice(Option<f64>);

    #[async_trait]
    impl PriceSource for FixedPrice {
        async fn quote(&self, symbol: &str, _: &str) -> Result<PriceQuote, ProviderError> {
            match self.0 {
                Some(usd) => Ok(PriceQuote {
                    symbol: symbol.to_string(),
                    usd,
                    change_24h: None,
                }),
                None => Err(ProviderError::Timeout),
            }
        }
    }

    fn dispatcher(channel: &Arc<ScriptedChannel>) -> SharedDispatcher {
        Arc::new(Mutex::new(AlertDispatcher::new(
            channel.clone(),
            Duration::from_secs(60),
            1,
        )))
    }

    #[tokio::test]
    async fn test_price_task_posts() {
        let channel = Arc::new(ScriptedChannel::new());
        let mut task = PriceUpdateTask::new(
            "btc_price",
            "BTC",
            "bitcoin",
            Arc::new(FixedPrice(Some(67012.34))),
            dispatcher(&channel),
        );

        let outcome = task.run().await.unwrap();
        assert_eq!(outcome.alerts_posted, 1);
        assert_eq!(channel.texts(), vec!["$BTC $67,012.34"]);
    }

    #[tokio::test]
    async fn test_price_source_failure_fails_task() {
        let channel = Arc::new(ScriptedChannel::new());
        let mut task = PriceUpdateTask::new(
            "btc_price",
            "BTC",
            "bitcoin",
            Arc::new(FixedPrice(None)),
            dispatcher(&channel),
        );

        assert!(task.run().await.is_err());
        assert!(channel.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_post_is_not_a_failure() {
        let channel = Arc::new(ScriptedChannel::with_responses(vec![Err(
            ChannelError::RateLimited { retry_after: None },
        )]));
        let mut task = PriceUpdateTask::new(
            "eth_price",
            "ETH",
            "ethereum",
            Arc::new(FixedPrice(Some(3120.5))),
            dispatcher(&channel),
        );

        let outcome = task.run().await.unwrap();
        assert_eq!(outcome.alerts_posted, 0);
    }
}
