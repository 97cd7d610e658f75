use crate::http::parse_hex_u64;
use crate::provider::NodeProvider;
use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Clone, Debug)]
pub struct HeadFeedConfig {
    pub ws_url: Option<String>,
    pub poll_interval_ms: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for HeadFeedConfig {
    fn default() -> Self {
        Self {
            ws_url: None,
            poll_interval_ms: 4_000,
            reconnect_delay_ms: 2_000,
        }
    }
}

impl HeadFeedConfig {
    pub fn from_env() -> Self {
        let ws_url = env::var("NEXUS_NODE_WS_URL").ok().and_then(|url| {
            let trimmed = url.trim().to_owned();
            if trimmed.is_empty() { None } else { Some(trimmed) }
        });
        let poll_interval_ms = env::var("NEXUS_HEAD_POLL_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(4_000)
            .max(200);
        let reconnect_delay_ms = env::var("NEXUS_HEAD_RECONNECT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(2_000)
            .max(100);

        Self {
            ws_url,
            poll_interval_ms,
            reconnect_delay_ms,
        }
    }
}

/// Publishes distinct head heights into a watch channel. Prefers a websocket
/// `newHeads` subscription when a ws url is configured, otherwise polls
/// `eth_blockNumber` through the provider. The initial value 0 means no head
/// has been observed yet.
pub fn spawn_head_feed(
    provider: Arc<dyn NodeProvider>,
    config: HeadFeedConfig,
) -> watch::Receiver<u64> {
    let (sender, receiver) = watch::channel(0_u64);
    let handle = match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle,
        Err(_) => return receiver,
    };

    handle.spawn(async move {
        match config.ws_url.clone() {
            Some(ws_url) => {
                run_ws_head_loop(&ws_url, config.reconnect_delay_ms, &sender).await;
            }
            None => {
                run_poll_head_loop(provider, config.poll_interval_ms, &sender).await;
            }
        }
    });

    receiver
}

async fn run_ws_head_loop(ws_url: &str, reconnect_delay_ms: u64, sender: &watch::Sender<u64>) {
    loop {
        if let Err(err) = run_ws_head_session(ws_url, sender).await {
            tracing::warn!(error = %err, "newHeads websocket session ended");
        }
        if sender.is_closed() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(reconnect_delay_ms)).await;
    }
}

async fn run_ws_head_session(ws_url: &str, sender: &watch::Sender<u64>) -> Result<()> {
    let (ws_stream, _) = connect_async(ws_url)
        .await
        .with_context(|| format!("connect {ws_url}"))?;
    let (mut write, mut read) = ws_stream.split();

    let subscribe = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_subscribe",
        "params": ["newHeads"],
    });
    write
        .send(Message::Text(subscribe.to_string().into()))
        .await
        .context("send eth_subscribe request")?;

    let mut subscription_id: Option<String> = None;
    while let Some(frame) = read.next().await {
        let frame = frame.context("read websocket frame")?;
        match frame {
            Message::Text(text) => {
                if let Some(head) = parse_new_head(&text, &mut subscription_id) {
                    publish_head(sender, head);
                }
            }
            Message::Ping(payload) => {
                if write.send(Message::Pong(payload)).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    Ok(())
}

async fn run_poll_head_loop(
    provider: Arc<dyn NodeProvider>,
    poll_interval_ms: u64,
    sender: &watch::Sender<u64>,
) {
    let interval = Duration::from_millis(poll_interval_ms);
    loop {
        match provider.chain_head().await {
            Ok(head) => publish_head(sender, head),
            Err(err) => tracing::warn!(error = %err, "head poll failed"),
        }
        if sender.is_closed() {
            return;
        }
        tokio::time::sleep(interval).await;
    }
}

fn parse_new_head(payload: &str, subscription_id: &mut Option<String>) -> Option<u64> {
    let value: Value = serde_json::from_str(payload).ok()?;
    if value.get("id").is_some() {
        if let Some(result) = value.get("result").and_then(Value::as_str) {
            *subscription_id = Some(result.to_owned());
        }
        return None;
    }
    if value.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return None;
    }

    let params = value.get("params")?;
    let incoming_sub = params.get("subscription").and_then(Value::as_str)?;
    if let Some(expected) = subscription_id.as_ref() {
        if expected != incoming_sub {
            return None;
        }
    }
    params
        .get("result")?
        .get("number")
        .and_then(Value::as_str)
        .and_then(parse_hex_u64)
}

fn publish_head(sender: &watch::Sender<u64>, head: u64) {
    sender.send_if_modified(|current| {
        if *current == head {
            false
        } else {
            *current = head;
            true
        }
    });
}
