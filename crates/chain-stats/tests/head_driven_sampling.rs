use chain_stats::{SampleCoordinator, SamplerConfig, WindowSampler};
use node_client::{Block, InMemoryNodeProvider};
use std::sync::Arc;

fn seeded_chain(heights: std::ops::RangeInclusive<u64>) -> Arc<InMemoryNodeProvider> {
    let blocks = heights
        .map(|number| Block {
            number,
            timestamp: 1_000 + number * 12,
            transaction_count: 3,
            gas_used: 63_000,
            gas_limit: 30_000_000,
        })
        .collect();
    Arc::new(InMemoryNodeProvider::with_blocks(blocks))
}

#[tokio::test]
async fn head_changes_publish_and_unchanged_heads_cost_no_rpc() {
    let provider = seeded_chain(1..=12);
    let sampler = WindowSampler::new(provider.clone(), SamplerConfig::default());
    let coordinator = SampleCoordinator::new();

    let ticket = coordinator.admit(12).expect("new head admitted");
    let sample = sampler.sample(ticket.head()).await.expect("clean sample");
    assert!(coordinator.commit(ticket, &sample, 42));

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.head, 12);
    assert_eq!(snapshot.blocks.len(), 11);
    assert_eq!(snapshot.stats.average_block_time_secs, 12.0);
    assert_eq!(snapshot.stats.total_transactions, 30);
    assert_eq!(snapshot.stats.transactions_per_second, 0.25);

    let fetched = provider.block_fetches();
    assert_eq!(fetched, 11);

    // Same head again: nothing admitted, nothing fetched.
    assert!(coordinator.admit(12).is_none());
    assert_eq!(provider.block_fetches(), fetched);
}

#[tokio::test]
async fn failed_window_keeps_previous_stats_until_a_retry_succeeds() {
    let provider = seeded_chain(1..=12);
    let sampler = WindowSampler::new(provider.clone(), SamplerConfig::default());
    let coordinator = SampleCoordinator::new();

    let first = coordinator.admit(12).expect("admitted");
    let sample = sampler.sample(first.head()).await.expect("clean sample");
    assert!(coordinator.commit(first, &sample, 42));

    provider.insert_block(Block {
        number: 13,
        timestamp: 1_000 + 13 * 12,
        transaction_count: 9,
        gas_used: 21_000,
        gas_limit: 30_000_000,
    });
    provider.fail_block_fetch(9);

    let failing = coordinator.admit(13).expect("new head admitted");
    let err = sampler.sample(failing.head()).await.expect_err("fetch fails");
    coordinator.fail(failing, err.is_malformed());

    let stale = coordinator.snapshot();
    assert_eq!(stale.head, 12);
    assert_eq!(stale.sample_failures, 1);

    provider.clear_block_failures();
    let retry = coordinator.admit(13).expect("retry admitted");
    let sample = sampler.sample(retry.head()).await.expect("retry succeeds");
    assert!(coordinator.commit(retry, &sample, 43));

    let fresh = coordinator.snapshot();
    assert_eq!(fresh.head, 13);
    assert_eq!(fresh.samples_published, 2);
}
