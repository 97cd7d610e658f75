use ahash::RandomState;
use async_trait::async_trait;
use auto_impl::auto_impl;
use common::Address;
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

type FastMap<K, V> = HashMap<K, V, RandomState>;
type FastSet<T> = HashSet<T, RandomState>;

pub type NodeResult<T> = Result<T, NodeError>;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("node rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("missing result for {0}")]
    MissingResult(&'static str),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl NodeError {
    /// Malformed responses are schema violations, everything else is worth a retry.
    pub fn is_malformed(&self) -> bool {
        matches!(self, NodeError::Malformed(_))
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub timestamp: u64,
    pub transaction_count: u32,
    pub gas_used: u64,
    pub gas_limit: u64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value_wei: u128,
    pub data: Vec<u8>,
}

#[async_trait]
#[auto_impl(&, Arc)]
pub trait NodeProvider: Send + Sync {
    async fn chain_head(&self) -> NodeResult<u64>;
    async fn block_by_number(&self, number: u64) -> NodeResult<Block>;
    async fn balance(&self, address: &Address) -> NodeResult<u128>;
    async fn estimate_gas(&self, call: &CallRequest) -> NodeResult<u64>;
    async fn gas_price(&self) -> NodeResult<u128>;
}

#[derive(Debug, Default)]
struct InMemoryNodeState {
    head: u64,
    blocks: FastMap<u64, Block>,
    failing_blocks: FastSet<u64>,
    balances: FastMap<Address, u128>,
    gas_price_wei: u128,
    estimate_gas_limit: Option<u64>,
    block_fetches: u64,
}

/// Scripted provider for tests; every mutator takes `&self` so it can sit behind an `Arc`.
#[derive(Debug, Default)]
pub struct InMemoryNodeProvider {
    state: Mutex<InMemoryNodeState>,
}

impl InMemoryNodeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocks(blocks: Vec<Block>) -> Self {
        let provider = Self::default();
        {
            let mut state = provider.state.lock();
            for block in blocks {
                state.head = state.head.max(block.number);
                state.blocks.insert(block.number, block);
            }
        }
        provider
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().head = head;
    }

    pub fn insert_block(&self, block: Block) {
        let mut state = self.state.lock();
        state.head = state.head.max(block.number);
        state.blocks.insert(block.number, block);
    }

    pub fn fail_block_fetch(&self, number: u64) {
        self.state.lock().failing_blocks.insert(number);
    }

    pub fn clear_block_failures(&self) {
        self.state.lock().failing_blocks.clear();
    }

    pub fn set_balance(&self, address: Address, balance_wei: u128) {
        self.state.lock().balances.insert(address, balance_wei);
    }

    pub fn set_gas_price(&self, gas_price_wei: u128) {
        self.state.lock().gas_price_wei = gas_price_wei;
    }

    pub fn set_estimate_gas_limit(&self, gas_limit: Option<u64>) {
        self.state.lock().estimate_gas_limit = gas_limit;
    }

    pub fn block_fetches(&self) -> u64 {
        self.state.lock().block_fetches
    }
}

#[async_trait]
impl NodeProvider for InMemoryNodeProvider {
    async fn chain_head(&self) -> NodeResult<u64> {
        Ok(self.state.lock().head)
    }

    async fn block_by_number(&self, number: u64) -> NodeResult<Block> {
        let mut state = self.state.lock();
        state.block_fetches = state.block_fetches.saturating_add(1);
        if state.failing_blocks.contains(&number) {
            return Err(NodeError::Transport(format!(
                "scripted fetch failure for block {number}"
            )));
        }
        state
            .blocks
            .get(&number)
            .cloned()
            .ok_or(NodeError::MissingResult("eth_getBlockByNumber"))
    }

    async fn balance(&self, address: &Address) -> NodeResult<u128> {
        Ok(self
            .state
            .lock()
            .balances
            .get(address)
            .copied()
            .unwrap_or(0))
    }

    async fn estimate_gas(&self, _call: &CallRequest) -> NodeResult<u64> {
        self.state.lock().estimate_gas_limit.ok_or(NodeError::Rpc {
            code: -32000,
            message: "execution reverted".to_owned(),
        })
    }

    async fn gas_price(&self) -> NodeResult<u128> {
        Ok(self.state.lock().gas_price_wei)
    }
}

#[cfg(test)]
mod tests {
    use super::{Block, InMemoryNodeProvider, NodeError, NodeProvider};

    fn block(number: u64) -> Block {
        Block {
            number,
            timestamp: 1_700_000_000 + number * 12,
            transaction_count: 3,
            gas_used: 21_000,
            gas_limit: 30_000_000,
        }
    }

    #[tokio::test]
    async fn with_blocks_tracks_highest_number_as_head() {
        let provider = InMemoryNodeProvider::with_blocks(vec![block(4), block(9), block(7)]);
        assert_eq!(provider.chain_head().await.expect("head"), 9);
        assert_eq!(provider.block_by_number(7).await.expect("block").number, 7);
    }

    #[tokio::test]
    async fn scripted_failures_surface_as_transport_errors() {
        let provider = InMemoryNodeProvider::with_blocks(vec![block(1)]);
        provider.fail_block_fetch(1);
        let err = provider.block_by_number(1).await.expect_err("failure");
        assert!(matches!(err, NodeError::Transport(_)));
        assert!(!err.is_malformed());

        provider.clear_block_failures();
        assert!(provider.block_by_number(1).await.is_ok());
        assert_eq!(provider.block_fetches(), 2);
    }

    #[tokio::test]
    async fn missing_estimate_maps_to_rpc_error() {
        let provider = InMemoryNodeProvider::new();
        let err = provider
            .estimate_gas(&Default::default())
            .await
            .expect_err("no scripted estimate");
        assert!(matches!(err, NodeError::Rpc { .. }));

        provider.set_estimate_gas_limit(Some(21_000));
        assert_eq!(
            provider.estimate_gas(&Default::default()).await.expect("estimate"),
            21_000
        );
    }
}
