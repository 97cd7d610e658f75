use crate::window::{ChainStats, WindowError, compute_window_stats, sample_start};
use futures::future;
use node_client::{Block, NodeError, NodeProvider};
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

pub const DEFAULT_SAMPLE_WINDOW: u64 = 10;

#[derive(Clone, Debug)]
pub struct SamplerConfig {
    pub window: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_SAMPLE_WINDOW,
        }
    }
}

impl SamplerConfig {
    pub fn from_env() -> Self {
        let window = env::var("NEXUS_SAMPLE_WINDOW")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_SAMPLE_WINDOW)
            .clamp(2, 64);
        Self { window }
    }
}

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("fetch block window: {0}")]
    Fetch(#[from] NodeError),
    #[error("inconsistent block window: {0}")]
    Window(#[from] WindowError),
}

impl SampleError {
    /// Malformed windows are discarded for good; everything else is a
    /// transient fetch problem worth retrying on the next head change.
    pub fn is_malformed(&self) -> bool {
        match self {
            SampleError::Fetch(err) => err.is_malformed(),
            SampleError::Window(_) => true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowSample {
    pub head: u64,
    pub blocks: Vec<Block>,
    pub stats: ChainStats,
}

/// Fetches the block window ending at a given head and derives stats from it.
/// All fetches run concurrently; results keep ascending height order and a
/// single failure discards the whole sample.
pub struct WindowSampler<P> {
    provider: P,
    window: u64,
}

impl<P: NodeProvider> WindowSampler<P> {
    pub fn new(provider: P, config: SamplerConfig) -> Self {
        Self {
            provider,
            window: config.window.max(1),
        }
    }

    pub fn window(&self) -> u64 {
        self.window
    }

    pub async fn sample(&self, head: u64) -> Result<WindowSample, SampleError> {
        if head == 0 {
            return Ok(WindowSample {
                head,
                blocks: Vec::new(),
                stats: ChainStats::default(),
            });
        }

        let start = sample_start(head, self.window);
        let fetches =
            (start..=head).map(|number| self.provider.block_by_number(number));
        let blocks: Vec<Block> = future::try_join_all(fetches).await?;
        let stats = compute_window_stats(&blocks)?;

        Ok(WindowSample {
            head,
            blocks,
            stats,
        })
    }
}
