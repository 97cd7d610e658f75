use chain_stats::{PublishedStats, SampleCoordinator, SamplerConfig, WindowSampler};
use node_client::{HeadFeedConfig, NodeProvider, spawn_head_feed};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Clone, Debug, Default)]
pub struct LiveStatsFeedConfig {
    pub head_feed: HeadFeedConfig,
    pub sampler: SamplerConfig,
}

impl LiveStatsFeedConfig {
    pub fn from_env() -> Self {
        Self {
            head_feed: HeadFeedConfig::from_env(),
            sampler: SamplerConfig::from_env(),
        }
    }
}

/// Spawns the head subscription and the sampling loop onto the current
/// runtime. Every distinct head height triggers one admission check; samples
/// that win admission are fetched, validated, and published to `stats_tx`.
pub fn start_live_stats_feed(
    node: Arc<dyn NodeProvider>,
    coordinator: Arc<SampleCoordinator>,
    stats_tx: watch::Sender<PublishedStats>,
    config: LiveStatsFeedConfig,
) {
    let handle = match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle,
        Err(_) => {
            warn!("no tokio runtime available; live stats feed disabled");
            return;
        }
    };

    let mut heads = spawn_head_feed(node.clone(), config.head_feed);
    let sampler = WindowSampler::new(node, config.sampler);

    handle.spawn(async move {
        while heads.changed().await.is_ok() {
            let head = *heads.borrow_and_update();
            if head == 0 {
                continue;
            }
            run_sample_pass(&sampler, &coordinator, &stats_tx, head).await;
        }
    });
}

/// One admission-to-publish cycle for a reported head. Stale or duplicate
/// heads are dropped at admission; failed windows keep the previous
/// published stats and leave the height retryable.
pub async fn run_sample_pass<P: NodeProvider>(
    sampler: &WindowSampler<P>,
    coordinator: &SampleCoordinator,
    stats_tx: &watch::Sender<PublishedStats>,
    head: u64,
) {
    let Some(ticket) = coordinator.admit(head) else {
        return;
    };

    match sampler.sample(head).await {
        Ok(sample) => {
            if coordinator.commit(ticket, &sample, current_unix_ms()) {
                let _ = stats_tx.send(coordinator.snapshot());
                debug!(
                    head,
                    tps = sample.stats.transactions_per_second,
                    blocks = sample.blocks.len(),
                    "published chain stats sample"
                );
            }
        }
        Err(err) => {
            let malformed = err.is_malformed();
            coordinator.fail(ticket, malformed);
            if malformed {
                warn!(error = %err, head, "discarded malformed block window");
            } else {
                warn!(error = %err, head, "chain sample failed; keeping previous stats");
            }
        }
    }
}

fn current_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_client::{Block, InMemoryNodeProvider};

    fn seeded_provider(heights: std::ops::RangeInclusive<u64>) -> InMemoryNodeProvider {
        let blocks: Vec<Block> = heights
            .map(|number| Block {
                number,
                timestamp: 1_000 + number * 10,
                transaction_count: 2,
                gas_used: 1_000_000,
                gas_limit: 30_000_000,
            })
            .collect();
        InMemoryNodeProvider::with_blocks(blocks)
    }

    #[tokio::test]
    async fn successful_pass_publishes_to_the_watch_channel() {
        let provider = seeded_provider(1..=6);
        let coordinator = SampleCoordinator::new();
        let sampler = WindowSampler::new(provider, SamplerConfig::default());
        let (tx, mut rx) = watch::channel(PublishedStats::default());

        run_sample_pass(&sampler, &coordinator, &tx, 6).await;

        assert!(rx.has_changed().unwrap_or(false));
        let published = rx.borrow_and_update().clone();
        assert_eq!(published.head, 6);
        assert_eq!(published.stats.average_block_time_secs, 10.0);
        assert_eq!(published.samples_published, 1);
    }

    #[tokio::test]
    async fn repeated_head_is_dropped_at_admission() {
        let provider = seeded_provider(1..=6);
        let coordinator = SampleCoordinator::new();
        let sampler = WindowSampler::new(provider, SamplerConfig::default());
        let (tx, mut rx) = watch::channel(PublishedStats::default());

        run_sample_pass(&sampler, &coordinator, &tx, 6).await;
        let _ = rx.borrow_and_update();
        run_sample_pass(&sampler, &coordinator, &tx, 6).await;

        assert!(!rx.has_changed().unwrap_or(true));
        assert_eq!(coordinator.snapshot().samples_published, 1);
    }

    #[tokio::test]
    async fn failed_pass_keeps_the_previous_snapshot() {
        let provider = seeded_provider(1..=6);
        let coordinator = SampleCoordinator::new();
        let (tx, mut rx) = watch::channel(PublishedStats::default());
        {
            let sampler = WindowSampler::new(&provider, SamplerConfig::default());
            run_sample_pass(&sampler, &coordinator, &tx, 6).await;
        }
        let _ = rx.borrow_and_update();

        provider.insert_block(Block {
            number: 7,
            timestamp: 1_070,
            transaction_count: 2,
            gas_used: 1_000_000,
            gas_limit: 30_000_000,
        });
        provider.fail_block_fetch(4);
        let sampler = WindowSampler::new(&provider, SamplerConfig::default());
        run_sample_pass(&sampler, &coordinator, &tx, 7).await;

        assert!(!rx.has_changed().unwrap_or(true));
        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.head, 6);
        assert_eq!(snapshot.sample_failures, 1);
    }

    #[test]
    fn feed_start_is_a_noop_outside_a_runtime() {
        let provider: Arc<dyn NodeProvider> = Arc::new(InMemoryNodeProvider::new());
        let coordinator = Arc::new(SampleCoordinator::new());
        let (tx, _rx) = watch::channel(PublishedStats::default());

        start_live_stats_feed(provider, coordinator, tx, LiveStatsFeedConfig::default());
    }
}
