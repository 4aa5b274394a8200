//! Alert dispatch
//!
//! One post in flight at a time. Rate-limit responses are retried with a
//! linearly growing delay; every other channel failure drops the message
//! after a single attempt. Posts of the same category are additionally
//! spaced by a fixed minimum interval.

use backoff::backoff::Backoff;
use backoff::future::retry_notify;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{AlertCategory, PostId, PostingChannel};
use crate::config::DispatcherConfig;
use crate::error::{ChannelError, DispatchError};

/// Delay before attempt `n + 1` is `base * n`; stops after `max_attempts`
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl LinearBackoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts: max_attempts.max(1),
            attempt: 1,
        }
    }
}

impl Backoff for LinearBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let delay = self.base * self.attempt;
        self.attempt += 1;
        Some(delay)
    }

    fn reset(&mut self) {
        self.attempt = 1;
    }
}

/// A message the channel accepted
#[derive(Debug, Clone, PartialEq)]
pub struct Posted {
    pub id: PostId,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchStats {
    pub posted: u64,
    pub dropped: u64,
}

pub struct AlertDispatcher {
    channel: Arc<dyn PostingChannel>,
    base_backoff: Duration,
    max_attempts: u32,
    spacing: HashMap<AlertCategory, Duration>,
    last_post: HashMap<AlertCategory, Instant>,
    stats: DispatchStats,
}

impl AlertDispatcher {
    pub fn new(channel: Arc<dyn PostingChannel>, base_backoff: Duration, max_attempts: u32) -> Self {
        Self {
            channel,
            base_backoff,
            max_attempts,
            spacing: HashMap::new(),
            last_post: HashMap::new(),
            stats: DispatchStats::default(),
        }
    }

    pub fn from_config(channel: Arc<dyn PostingChannel>, config: &DispatcherConfig) -> Self {
        Self::new(
            channel,
            Duration::from_secs(config.base_backoff_secs),
            config.max_attempts,
        )
        .with_spacing(
            AlertCategory::WhaleAlert,
            Duration::from_secs(config.spacing.whale_alert),
        )
        .with_spacing(
            AlertCategory::PriceUpdate,
            Duration::from_secs(config.spacing.price_update),
        )
    }

    /// Minimum interval between two posts of `category`
    pub fn with_spacing(mut self, category: AlertCategory, spacing: Duration) -> Self {
        self.spacing.insert(category, spacing);
        self
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn channel_name(&self) -> &'static str {
        self.channel.name()
    }

    /// Post one message, waiting out spacing and rate limits as needed
    pub async fn post(
        &mut self,
        category: AlertCategory,
        message: &str,
    ) -> Result<Posted, DispatchError> {
        self.wait_for_spacing(category).await;

        let attempts = AtomicU32::new(0);
        let channel = Arc::clone(&self.channel);

        let result = retry_notify(
            LinearBackoff::new(self.base_backoff, self.max_attempts),
            || async {
                let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                match channel.post(message).await {
                    Ok(id) => Ok(id),
                    Err(ChannelError::RateLimited { retry_after }) => {
                        warn!(attempt, ?retry_after, "Posting channel rate limited");
                        Err(backoff::Error::transient(ChannelError::RateLimited {
                            retry_after,
                        }))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            },
            |_err: ChannelError, delay: Duration| {
                info!(delay_secs = delay.as_secs(), "Backing off before next post attempt");
            },
        )
        .await;

        let attempts = attempts.load(Ordering::Relaxed);
        match result {
            Ok(id) => {
                self.last_post.insert(category, Instant::now());
                self.stats.posted += 1;
                info!(%category, %id, attempts, "Posted alert");
                Ok(Posted { id, attempts })
            }
            Err(e) => {
                self.stats.dropped += 1;
                let err = match e {
                    ChannelError::RateLimited { .. } => DispatchError::RateLimitExhausted { attempts },
                    ChannelError::Rejected { reason } => DispatchError::Rejected(reason),
                    ChannelError::Transport(e) => DispatchError::Transport(e),
                };
                warn!(%category, "Message dropped: {}", err);
                Err(err)
            }
        }
    }

    async fn wait_for_spacing(&self, category: AlertCategory) {
        let Some(spacing) = self.spacing.get(&category).copied() else {
            return;
        };
        if spacing.is_zero() {
            return;
        }
        if let Some(last) = self.last_post.get(&category) {
            let ready_at = *last + spacing;
            if ready_at > Instant::now() {
                debug!(%category, wait_ms = (ready_at - Instant::now()).as_millis() as u64, "Spacing posts");
                tokio::time::sleep_until(ready_at).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedChannel;
    use tokio_test::assert_ok;

    fn rate_limited() -> Result<PostId, ChannelError> {
        Err(ChannelError::RateLimited { retry_after: None })
    }

    fn dispatcher(channel: &Arc<ScriptedChannel>) -> AlertDispatcher {
        AlertDispatcher::new(channel.clone(), Duration::from_secs(60), 3)
    }

    #[test]
    fn test_linear_backoff_sequence() {
        let mut backoff = LinearBackoff::new(Duration::from_secs(60), 4);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(60)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(120)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(180)));
        assert_eq!(backoff.next_backoff(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_rate_limits_then_success() {
        let channel = Arc::new(ScriptedChannel::with_responses(vec![
            rate_limited(),
            rate_limited(),
            Ok("42".to_string()),
        ]));
        let mut dispatcher = dispatcher(&channel);

        let start = Instant::now();
        let posted = assert_ok!(dispatcher.post(AlertCategory::WhaleAlert, "whale").await);
        assert_eq!(posted, Posted { id: "42".to_string(), attempts: 3 });

        let offsets: Vec<Duration> = channel.calls().iter().map(|(at, _)| *at - start).collect();
        assert_eq!(
            offsets,
            vec![Duration::ZERO, Duration::from_secs(60), Duration::from_secs(180)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhausted() {
        let channel = Arc::new(ScriptedChannel::with_responses(vec![
            rate_limited(),
            rate_limited(),
            rate_limited(),
            Ok("never".to_string()),
        ]));
        let mut dispatcher = dispatcher(&channel);

        let start = Instant::now();
        let err = dispatcher
            .post(AlertCategory::WhaleAlert, "whale")
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::RateLimitExhausted { attempts: 3 });
        assert_eq!(channel.calls().len(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(180));
        assert_eq!(dispatcher.stats().dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_single_attempt() {
        let channel = Arc::new(ScriptedChannel::with_responses(vec![Err(
            ChannelError::Rejected {
                reason: "duplicate content".to_string(),
            },
        )]));
        let mut dispatcher = dispatcher(&channel);

        let start = Instant::now();
        let err = dispatcher
            .post(AlertCategory::WhaleAlert, "whale")
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::Rejected("duplicate content".to_string()));
        assert_eq!(channel.calls().len(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_is_single_attempt() {
        let channel = Arc::new(ScriptedChannel::with_responses(vec![Err(
            ChannelError::Transport("connection reset".to_string()),
        )]));
        let mut dispatcher = dispatcher(&channel);

        assert!(matches!(
            dispatcher.post(AlertCategory::PriceUpdate, "price").await,
            Err(DispatchError::Transport(_))
        ));
        assert_eq!(channel.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_per_category() {
        let channel = Arc::new(ScriptedChannel::new());
        let mut dispatcher = dispatcher(&channel)
            .with_spacing(AlertCategory::WhaleAlert, Duration::from_secs(30));

        let start = Instant::now();
        assert_ok!(dispatcher.post(AlertCategory::WhaleAlert, "first").await);
        assert_ok!(dispatcher.post(AlertCategory::PriceUpdate, "price").await);
        assert_ok!(dispatcher.post(AlertCategory::WhaleAlert, "second").await);

        let calls = channel.calls();
        assert_eq!(calls[0].0 - start, Duration::ZERO);
        // Other categories are not held back
        assert_eq!(calls[1].0 - start, Duration::ZERO);
        assert_eq!(calls[2].0 - start, Duration::from_secs(30));
        assert_eq!(channel.texts(), vec!["first", "price", "second"]);
        assert_eq!(dispatcher.stats().posted, 3);
    }
}
