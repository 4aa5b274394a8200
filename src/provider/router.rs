//! Per-chain provider selection

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{
    AddressStats, BlockCypherProvider, BlockchainInfoProvider, ChainDataProvider,
    EtherscanProvider, RetryingProvider, TokenTransferSource, TransactionDetail,
};
use crate::chain::Chain;
use crate::config::{Backend, ProviderConfig};
use crate::error::ProviderError;

/// Retrying Etherscan source for ERC-20 assets
pub fn token_source_from_config(
    config: &ProviderConfig,
) -> Result<Arc<dyn TokenTransferSource>, ProviderError> {
    let api_key = Some(config.etherscan_api_key.clone());
    let source = EtherscanProvider::new(
        &config.etherscan_url,
        api_key,
        Duration::from_millis(config.timeout_ms),
    )?;
    info!("Routing token transfers to {}", config.etherscan_url);
    Ok(Arc::new(RetryingProvider::new(
        source,
        Duration::from_millis(config.retry_delay_ms),
        config.max_attempts,
    )))
}

/// Dispatches each call to the backend configured for its chain
#[derive(Default)]
pub struct ProviderRouter {
    routes: HashMap<Chain, Arc<dyn ChainDataProvider>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build retrying backends for every configured chain
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let delay = Duration::from_millis(config.retry_delay_ms);

        let mut blockchain_info: Option<Arc<dyn ChainDataProvider>> = None;
        let mut blockcypher: Option<Arc<dyn ChainDataProvider>> = None;
        let mut router = Self::new();

        for (chain, backend) in &config.backends {
            let provider = match backend {
                Backend::BlockchainInfo => {
                    if *chain != Chain::Bitcoin {
                        return Err(ProviderError::Unsupported(*chain));
                    }
                    match &blockchain_info {
                        Some(p) => p.clone(),
                        None => {
                            let p: Arc<dyn ChainDataProvider> = Arc::new(RetryingProvider::new(
                                BlockchainInfoProvider::new(&config.blockchain_info_url, timeout)?,
                                delay,
                                config.max_attempts,
                            ));
                            blockchain_info = Some(p.clone());
                            p
                        }
                    }
                }
                Backend::BlockCypher => match &blockcypher {
                    Some(p) => p.clone(),
                    None => {
                        let token = Some(config.blockcypher_token.clone());
                        let p: Arc<dyn ChainDataProvider> = Arc::new(RetryingProvider::new(
                            BlockCypherProvider::new(&config.blockcypher_url, token, timeout)?,
                            delay,
                            config.max_attempts,
                        ));
                        blockcypher = Some(p.clone());
                        p
                    }
                },
            };
            info!("{} data via {}", chain, provider.name());
            router.routes.insert(*chain, provider);
        }

        Ok(router)
    }

    /// Route a chain to a provider, replacing any previous route
    pub fn with_route(mut self, chain: Chain, provider: Arc<dyn ChainDataProvider>) -> Self {
        self.routes.insert(chain, provider);
        self
    }

    fn route(&self, chain: Chain) -> Result<&Arc<dyn ChainDataProvider>, ProviderError> {
        self.routes
            .get(&chain)
            .ok_or(ProviderError::Unsupported(chain))
    }
}

#[async_trait]
impl ChainDataProvider for ProviderRouter {
    fn name(&self) -> &'static str {
        "router"
    }

    async fn address_stats(
        &self,
        chain: Chain,
        address: &str,
    ) -> Result<AddressStats, ProviderError> {
        self.route(chain)?.address_stats(chain, address).await
    }

    async fn transaction_detail(
        &self,
        chain: Chain,
        tx_hash: &str,
    ) -> Result<TransactionDetail, ProviderError> {
        self.route(chain)?.transaction_detail(chain, tx_hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_default_backends_cover_all_chains() {
        let router = ProviderRouter::from_config(&ProviderConfig::default()).unwrap();
        for chain in Chain::ALL {
            assert!(router.route(chain).is_ok());
        }
        assert_eq!(router.route(Chain::Bitcoin).unwrap().name(), "blockchain_info");
        assert_eq!(router.route(Chain::Litecoin).unwrap().name(), "blockcypher");
    }

    #[test]
    fn test_blockchain_info_is_bitcoin_only() {
        let config = ProviderConfig {
            backends: BTreeMap::from([(Chain::Ethereum, Backend::BlockchainInfo)]),
            ..ProviderConfig::default()
        };
        assert!(matches!(
            ProviderRouter::from_config(&config),
            Err(ProviderError::Unsupported(Chain::Ethereum))
        ));
    }

    #[tokio::test]
    async fn test_unrouted_chain_is_unsupported() {
        let router = ProviderRouter::new();
        let err = router
            .address_stats(Chain::Dogecoin, "DH5yaieqoZN36fDVciNyRueRGvGLR3mr7L")
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::Unsupported(Chain::Dogecoin));
    }
}
