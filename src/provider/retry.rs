//! Fixed-delay retry around any provider

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::future::retry;
use std::time::Duration;
use tracing::warn;

use super::{
    AddressStats, ChainDataProvider, TokenContract, TokenTransfer, TokenTransferSource,
    TransactionDetail,
};
use crate::chain::Chain;
use crate::error::ProviderError;

/// Constant delay between attempts, giving up after `max_attempts` calls
#[derive(Debug, Clone)]
pub struct CappedConstantBackoff {
    delay: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl CappedConstantBackoff {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: max_attempts.max(1),
            attempts: 1,
        }
    }
}

impl Backoff for CappedConstantBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.delay)
    }

    fn reset(&mut self) {
        self.attempts = 1;
    }
}

/// Retries transient provider failures; parse errors and unsupported
/// chains fail immediately.
pub struct RetryingProvider<P> {
    inner: P,
    delay: Duration,
    max_attempts: u32,
}

impl<P> RetryingProvider<P> {
    pub fn new(inner: P, delay: Duration, max_attempts: u32) -> Self {
        Self {
            inner,
            delay,
            max_attempts,
        }
    }

    fn backoff(&self) -> CappedConstantBackoff {
        CappedConstantBackoff::new(self.delay, self.max_attempts)
    }
}

fn classify(provider: &'static str, what: &str, e: ProviderError) -> backoff::Error<ProviderError> {
    if e.is_retryable() {
        warn!(provider, what, error = %e, "Retryable provider error");
        backoff::Error::transient(e)
    } else {
        backoff::Error::permanent(e)
    }
}

#[async_trait]
impl<P: ChainDataProvider> ChainDataProvider for RetryingProvider<P> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn address_stats(
        &self,
        chain: Chain,
        address: &str,
    ) -> Result<AddressStats, ProviderError> {
        retry(self.backoff(), || async {
            self.inner
                .address_stats(chain, address)
                .await
                .map_err(|e| classify(self.inner.name(), address, e))
        })
        .await
    }

    async fn transaction_detail(
        &self,
        chain: Chain,
        tx_hash: &str,
    ) -> Result<TransactionDetail, ProviderError> {
        retry(self.backoff(), || async {
            self.inner
                .transaction_detail(chain, tx_hash)
                .await
                .map_err(|e| classify(self.inner.name(), tx_hash, e))
        })
        .await
    }
}

#[async_trait]
impl<P: TokenTransferSource> TokenTransferSource for RetryingProvider<P> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn token_transfers(
        &self,
        token: &TokenContract,
        address: &str,
        start_block: u64,
    ) -> Result<Vec<TokenTransfer>, ProviderError> {
        retry(self.backoff(), || async {
            self.inner
                .token_transfers(token, address, start_block)
                .await
                .map_err(|e| classify(self.inner.name(), address, e))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Replays scripted results and counts calls
    struct Scripted {
        results: Mutex<VecDeque<Result<AddressStats, ProviderError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(results: Vec<Result<AddressStats, ProviderError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ChainDataProvider for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn address_stats(&self, _: Chain, _: &str) -> Result<AddressStats, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ProviderError::Timeout))
        }

        async fn transaction_detail(
            &self,
            _: Chain,
            _: &str,
        ) -> Result<TransactionDetail, ProviderError> {
            Err(ProviderError::Unsupported(Chain::Bitcoin))
        }
    }

    #[test]
    fn test_backoff_caps_attempts() {
        let mut backoff = CappedConstantBackoff::new(Duration::from_secs(5), 3);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(5)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(5)));
        assert_eq!(backoff.next_backoff(), None);
        backoff.reset();
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let provider = RetryingProvider::new(
            Scripted::new(vec![
                Err(ProviderError::Timeout),
                Err(ProviderError::BadStatus(503)),
                Ok(AddressStats::default()),
            ]),
            Duration::from_secs(5),
            3,
        );

        let start = Instant::now();
        assert!(provider.address_stats(Chain::Bitcoin, "1Addr").await.is_ok());
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert_eq!(provider.inner.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let provider = RetryingProvider::new(Scripted::new(vec![]), Duration::from_secs(5), 3);

        let err = provider.address_stats(Chain::Bitcoin, "1Addr").await.unwrap_err();
        assert_eq!(err, ProviderError::Timeout);
        assert_eq!(provider.inner.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_error_is_not_retried() {
        let provider = RetryingProvider::new(
            Scripted::new(vec![Err(ProviderError::Parse("bad".into()))]),
            Duration::from_secs(5),
            3,
        );

        let start = Instant::now();
        let err = provider.address_stats(Chain::Bitcoin, "1Addr").await.unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
        assert_eq!(provider.inner.calls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
