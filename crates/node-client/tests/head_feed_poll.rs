use node_client::{HeadFeedConfig, InMemoryNodeProvider, NodeProvider, spawn_head_feed};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn poll_feed_publishes_distinct_head_heights() {
    let provider = Arc::new(InMemoryNodeProvider::new());
    provider.set_head(7);

    let config = HeadFeedConfig {
        ws_url: None,
        poll_interval_ms: 50,
        reconnect_delay_ms: 50,
    };
    let provider_dyn: Arc<dyn NodeProvider> = provider.clone();
    let mut heads = spawn_head_feed(provider_dyn, config);

    tokio::time::timeout(Duration::from_secs(2), heads.changed())
        .await
        .expect("first head in time")
        .expect("feed alive");
    assert_eq!(*heads.borrow_and_update(), 7);

    provider.set_head(9);
    tokio::time::timeout(Duration::from_secs(2), heads.changed())
        .await
        .expect("second head in time")
        .expect("feed alive");
    assert_eq!(*heads.borrow_and_update(), 9);
}
