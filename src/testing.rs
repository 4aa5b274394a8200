//! In-memory fakes shared by unit tests

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::time::Instant;

use crate::alert::{PostId, PostingChannel};
use crate::chain::{normalize_address, Chain};
use crate::error::{ChannelError, ProviderError};
use crate::provider::{
    AddressStats, ChainDataProvider, TokenContract, TokenTransfer, TokenTransferSource,
    TransactionDetail,
};

/// Channel that replays scripted responses and records every call
#[derive(Default)]
pub struct ScriptedChannel {
    responses: Mutex<VecDeque<Result<PostId, ChannelError>>>,
    calls: Mutex<Vec<(Instant, String)>>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue responses; once exhausted every post succeeds
    pub fn with_responses(responses: Vec<Result<PostId, ChannelError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(Instant, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.calls().into_iter().map(|(_, text)| text).collect()
    }
}

#[async_trait]
impl PostingChannel for ScriptedChannel {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn post(&self, text: &str) -> Result<PostId, ChannelError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push((Instant::now(), text.to_string()));
        let n = calls.len();
        drop(calls);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("post-{}", n)))
    }
}

/// Provider serving fixed per-address stats and transactions
#[derive(Default)]
pub struct FakeProvider {
    stats: Mutex<HashMap<String, Result<AddressStats, ProviderError>>>,
    txs: Mutex<HashMap<String, TransactionDetail>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stats(&self, address: &str, stats: AddressStats) {
        self.stats
            .lock()
            .unwrap()
            .insert(normalize_address(address), Ok(stats));
    }

    pub fn set_error(&self, address: &str, err: ProviderError) {
        self.stats
            .lock()
            .unwrap()
            .insert(normalize_address(address), Err(err));
    }

    pub fn set_tx(&self, detail: TransactionDetail) {
        self.txs.lock().unwrap().insert(detail.hash.clone(), detail);
    }
}

#[async_trait]
impl ChainDataProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn address_stats(&self, _: Chain, address: &str) -> Result<AddressStats, ProviderError> {
        self.stats
            .lock()
            .unwrap()
            .get(&normalize_address(address))
            .cloned()
            .unwrap_or(Err(ProviderError::BadStatus(404)))
    }

    async fn transaction_detail(
        &self,
        _: Chain,
        tx_hash: &str,
    ) -> Result<TransactionDetail, ProviderError> {
        self.txs
            .lock()
            .unwrap()
            .get(tx_hash)
            .cloned()
            .ok_or(ProviderError::BadStatus(404))
    }
}

/// Token source serving a fixed transfer log, newest first
#[derive(Default)]
pub struct FakeTokenSource {
    transfers: Mutex<Vec<TokenTransfer>>,
    requests: Mutex<Vec<u64>>,
}

impl FakeTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a newer transfer to the log
    pub fn push(&self, transfer: TokenTransfer) {
        self.transfers.lock().unwrap().insert(0, transfer);
    }

    /// `start_block` of every request so far
    pub fn requests(&self) -> Vec<u64> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenTransferSource for FakeTokenSource {
    fn name(&self) -> &'static str {
        "fake-token"
    }

    async fn token_transfers(
        &self,
        _: &TokenContract,
        address: &str,
        start_block: u64,
    ) -> Result<Vec<TokenTransfer>, ProviderError> {
        self.requests.lock().unwrap().push(start_block);
        let address = normalize_address(address);
        Ok(self
            .transfers
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.block_number >= start_block && (t.from == address || t.to == address))
            .cloned()
            .collect())
    }
}
