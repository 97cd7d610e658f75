use crate::provider::{Block, CallRequest, NodeError, NodeProvider, NodeResult};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use common::format_address;
use serde::Deserialize;
use serde_json::{Value, json};
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct NodeClientConfig {
    pub http_url: String,
    pub request_timeout_ms: u64,
}

impl NodeClientConfig {
    pub fn from_env() -> Option<Self> {
        let http_url = env::var("NEXUS_NODE_HTTP_URL").ok()?.trim().to_owned();
        if http_url.is_empty() {
            return None;
        }
        let request_timeout_ms = env::var("NEXUS_NODE_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(6_000)
            .max(250);

        Some(Self {
            http_url,
            request_timeout_ms,
        })
    }
}

/// JSON-RPC 2.0 client for the chain node's HTTP endpoint.
#[derive(Debug)]
pub struct HttpNodeClient {
    client: reqwest::Client,
    http_url: String,
    next_request_id: AtomicU64,
}

impl HttpNodeClient {
    pub fn new(config: NodeClientConfig) -> Result<Self> {
        if config.http_url.trim().is_empty() {
            bail!("node http_url must not be empty");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("build node http client")?;

        Ok(Self {
            client,
            http_url: config.http_url,
            next_request_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &'static str, params: Value) -> NodeResult<Value> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let request_body = json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": method,
            "params": params,
        });

        let response: Value = self
            .client
            .post(&self.http_url)
            .json(&request_body)
            .send()
            .await
            .map_err(|err| NodeError::Transport(format!("POST {}: {err}", self.http_url)))?
            .error_for_status()
            .map_err(|err| NodeError::Transport(format!("{method} http status: {err}")))?
            .json()
            .await
            .map_err(|err| NodeError::Malformed(format!("{method} body is not json: {err}")))?;

        decode_rpc_envelope(response, method)
    }
}

#[async_trait]
impl NodeProvider for HttpNodeClient {
    async fn chain_head(&self) -> NodeResult<u64> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        quantity_u64(&result, "eth_blockNumber")
    }

    async fn block_by_number(&self, number: u64) -> NodeResult<Block> {
        let tag = format!("0x{number:x}");
        let result = self.call("eth_getBlockByNumber", json!([tag, false])).await?;
        decode_block(&result)
    }

    async fn balance(&self, address: &common::Address) -> NodeResult<u128> {
        let result = self
            .call("eth_getBalance", json!([format_address(address), "latest"]))
            .await?;
        quantity_u128(&result, "eth_getBalance")
    }

    async fn estimate_gas(&self, call: &CallRequest) -> NodeResult<u64> {
        let result = self
            .call("eth_estimateGas", json!([encode_call_request(call)]))
            .await?;
        quantity_u64(&result, "eth_estimateGas")
    }

    async fn gas_price(&self) -> NodeResult<u128> {
        let result = self.call("eth_gasPrice", json!([])).await?;
        quantity_u128(&result, "eth_gasPrice")
    }
}

fn decode_rpc_envelope(response: Value, method: &'static str) -> NodeResult<Value> {
    if let Some(error_value) = response.get("error") {
        let code = error_value
            .get("code")
            .and_then(Value::as_i64)
            .unwrap_or_default();
        let message = error_value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_owned();
        return Err(NodeError::Rpc { code, message });
    }
    match response.get("result") {
        Some(value) if !value.is_null() => Ok(value.clone()),
        _ => Err(NodeError::MissingResult(method)),
    }
}

// eth_getBlockByNumber result, transaction bodies omitted. Every field the
// sampler relies on is required; anything absent or non-hex is malformed.
#[derive(Debug, Deserialize)]
struct RpcBlock {
    number: String,
    timestamp: String,
    transactions: Vec<Value>,
    #[serde(rename = "gasUsed")]
    gas_used: String,
    #[serde(rename = "gasLimit")]
    gas_limit: String,
}

fn decode_block(value: &Value) -> NodeResult<Block> {
    let raw: RpcBlock = serde_json::from_value(value.clone())
        .map_err(|err| NodeError::Malformed(format!("decode block: {err}")))?;
    let number = parse_hex_u64(&raw.number)
        .ok_or_else(|| NodeError::Malformed("block number is not a hex quantity".to_owned()))?;
    let timestamp = parse_hex_u64(&raw.timestamp)
        .ok_or_else(|| NodeError::Malformed("block timestamp is not a hex quantity".to_owned()))?;
    let gas_used = parse_hex_u64(&raw.gas_used)
        .ok_or_else(|| NodeError::Malformed("block gasUsed is not a hex quantity".to_owned()))?;
    let gas_limit = parse_hex_u64(&raw.gas_limit)
        .ok_or_else(|| NodeError::Malformed("block gasLimit is not a hex quantity".to_owned()))?;
    if gas_used > gas_limit {
        return Err(NodeError::Malformed(format!(
            "block {number} reports gasUsed {gas_used} above gasLimit {gas_limit}"
        )));
    }

    Ok(Block {
        number,
        timestamp,
        transaction_count: raw.transactions.len() as u32,
        gas_used,
        gas_limit,
    })
}

fn encode_call_request(call: &CallRequest) -> Value {
    let mut object = serde_json::Map::new();
    if let Some(from) = call.from.as_ref() {
        object.insert("from".to_owned(), Value::String(format_address(from)));
    }
    if let Some(to) = call.to.as_ref() {
        object.insert("to".to_owned(), Value::String(format_address(to)));
    }
    if call.value_wei > 0 {
        object.insert(
            "value".to_owned(),
            Value::String(format!("0x{:x}", call.value_wei)),
        );
    }
    if !call.data.is_empty() {
        object.insert("data".to_owned(), Value::String(format_bytes(&call.data)));
    }
    Value::Object(object)
}

fn format_bytes(bytes: &[u8]) -> String {
    let mut out = String::from("0x");
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn quantity_u64(value: &Value, method: &'static str) -> NodeResult<u64> {
    value
        .as_str()
        .and_then(parse_hex_u64)
        .ok_or_else(|| NodeError::Malformed(format!("{method} result is not a hex quantity")))
}

fn quantity_u128(value: &Value, method: &'static str) -> NodeResult<u128> {
    value
        .as_str()
        .and_then(parse_hex_u128)
        .ok_or_else(|| NodeError::Malformed(format!("{method} result is not a hex quantity")))
}

pub(crate) fn parse_hex_u64(value: &str) -> Option<u64> {
    let trimmed = value.strip_prefix("0x").unwrap_or(value);
    if trimmed.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(trimmed, 16).ok()
}

pub(crate) fn parse_hex_u128(value: &str) -> Option<u128> {
    let trimmed = value.strip_prefix("0x").unwrap_or(value);
    if trimmed.is_empty() {
        return Some(0);
    }
    u128::from_str_radix(trimmed, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::{
        decode_block, decode_rpc_envelope, encode_call_request, parse_hex_u128, parse_hex_u64,
    };
    use crate::provider::{CallRequest, NodeError};
    use serde_json::json;

    #[test]
    fn decode_block_reads_hex_quantities_and_counts_transactions() {
        let payload = json!({
            "number": "0x10",
            "timestamp": "0x64",
            "transactions": ["0xaa", "0xbb", "0xcc"],
            "gasUsed": "0x5208",
            "gasLimit": "0x1c9c380",
            "extraData": "0x"
        });

        let block = decode_block(&payload).expect("valid block");
        assert_eq!(block.number, 16);
        assert_eq!(block.timestamp, 100);
        assert_eq!(block.transaction_count, 3);
        assert_eq!(block.gas_used, 21_000);
        assert_eq!(block.gas_limit, 30_000_000);
    }

    #[test]
    fn decode_block_rejects_gas_used_above_gas_limit() {
        let payload = json!({
            "number": "0x1",
            "timestamp": "0x64",
            "transactions": [],
            "gasUsed": "0x2",
            "gasLimit": "0x1"
        });

        let err = decode_block(&payload).expect_err("inconsistent gas accounting");
        assert!(err.is_malformed());
    }

    #[test]
    fn decode_block_rejects_missing_fields_and_bad_hex() {
        let missing = json!({
            "number": "0x1",
            "transactions": [],
            "gasUsed": "0x0",
            "gasLimit": "0x1"
        });
        assert!(decode_block(&missing).expect_err("no timestamp").is_malformed());

        let bad_hex = json!({
            "number": "0x1",
            "timestamp": "soon",
            "transactions": [],
            "gasUsed": "0x0",
            "gasLimit": "0x1"
        });
        assert!(decode_block(&bad_hex).expect_err("bad hex").is_malformed());
    }

    #[test]
    fn envelope_error_member_maps_to_rpc_error() {
        let response = json!({
            "jsonrpc": "2.0",
            "id": 7,
            "error": {"code": -32601, "message": "method not found"}
        });

        match decode_rpc_envelope(response, "eth_blockNumber") {
            Err(NodeError::Rpc { code, message }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "method not found");
            }
            other => panic!("unexpected envelope decode: {other:?}"),
        }
    }

    #[test]
    fn envelope_null_result_is_missing() {
        let response = json!({"jsonrpc": "2.0", "id": 7, "result": null});
        assert!(matches!(
            decode_rpc_envelope(response, "eth_getBlockByNumber"),
            Err(NodeError::MissingResult("eth_getBlockByNumber"))
        ));
    }

    #[test]
    fn encode_call_request_skips_empty_fields() {
        let bare = encode_call_request(&CallRequest::default());
        assert_eq!(bare, json!({}));

        let call = CallRequest {
            from: None,
            to: Some([0x11; 20]),
            value_wei: 255,
            data: vec![0xde, 0xad],
        };
        let encoded = encode_call_request(&call);
        assert_eq!(
            encoded,
            json!({
                "to": "0x1111111111111111111111111111111111111111",
                "value": "0xff",
                "data": "0xdead"
            })
        );
    }

    #[test]
    fn hex_quantity_parsers_accept_prefixed_and_empty_values() {
        assert_eq!(parse_hex_u64("0x2a"), Some(42));
        assert_eq!(parse_hex_u64("0x"), Some(0));
        assert_eq!(parse_hex_u64("2a"), Some(42));
        assert_eq!(parse_hex_u64("0xzz"), None);
        assert_eq!(
            parse_hex_u128("0x16345785d8a0000"),
            Some(100_000_000_000_000_000)
        );
    }
}
