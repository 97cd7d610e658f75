#![forbid(unsafe_code)]

use ahash::RandomState;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use auto_impl::auto_impl;
use common::{Address, format_address};
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use std::env;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

type FastMap<K, V> = HashMap<K, V, RandomState>;

#[derive(Clone, Debug)]
pub struct FaucetClientConfig {
    pub faucet_url: String,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for FaucetClientConfig {
    fn default() -> Self {
        Self {
            faucet_url: String::new(),
            max_retries: 2,
            initial_backoff_ms: 250,
            request_timeout_ms: 4_000,
        }
    }
}

impl FaucetClientConfig {
    /// Returns `None` when `NEXUS_FAUCET_URL` is unset, which disables the
    /// faucet routes' upstream calls entirely.
    pub fn from_env() -> Option<Self> {
        let faucet_url = env::var("NEXUS_FAUCET_URL")
            .ok()
            .map(|raw| raw.trim().to_owned())
            .filter(|raw| !raw.is_empty())?;
        let defaults = Self::default();
        let max_retries = env::var("NEXUS_FAUCET_MAX_RETRIES")
            .ok()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .unwrap_or(defaults.max_retries);
        let initial_backoff_ms = env::var("NEXUS_FAUCET_BACKOFF_MS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(defaults.initial_backoff_ms);
        let request_timeout_ms = env::var("NEXUS_FAUCET_TIMEOUT_MS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(defaults.request_timeout_ms)
            .max(250);

        Some(Self {
            faucet_url,
            max_retries,
            initial_backoff_ms,
            request_timeout_ms,
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct FaucetAttemptTrace {
    pub attempt: u32,
    pub endpoint: String,
    pub http_status: Option<u16>,
    pub error: Option<String>,
    pub latency_ms: u64,
    pub backoff_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct FaucetDripResult {
    pub faucet_url: String,
    pub address: String,
    pub granted: bool,
    pub final_state: String,
    pub attempts: Vec<FaucetAttemptTrace>,
    pub started_unix_ms: i64,
    pub finished_unix_ms: i64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct FaucetStatus {
    pub total_requests: u64,
    pub total_granted: u64,
    pub total_rejected: u64,
    pub latest: Option<FaucetDripResult>,
}

impl FaucetStatus {
    pub fn record(&mut self, result: FaucetDripResult) {
        self.total_requests += 1;
        if result.granted {
            self.total_granted += 1;
        } else {
            self.total_rejected += 1;
        }
        self.latest = Some(result);
    }
}

#[async_trait]
#[auto_impl(Arc)]
pub trait FaucetGateway: Send + Sync {
    async fn request_drip(&self, address: &Address) -> FaucetDripResult;
}

pub struct HttpFaucetClient {
    config: FaucetClientConfig,
    client: reqwest::Client,
}

impl HttpFaucetClient {
    pub fn new(config: FaucetClientConfig) -> Result<Self> {
        if config.faucet_url.trim().is_empty() {
            bail!("faucet_url must not be empty");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("build faucet http client")?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl FaucetGateway for HttpFaucetClient {
    async fn request_drip(&self, address: &Address) -> FaucetDripResult {
        let started_unix_ms = unix_ms_now();
        let body = json!({ "address": format_address(address) });
        let mut attempts = Vec::new();
        let mut granted = false;

        for attempt in 0..=self.config.max_retries {
            let attempt_started = Instant::now();
            let mut http_status = None;
            let mut error = None;

            match self
                .client
                .post(&self.config.faucet_url)
                .json(&body)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    http_status = Some(status.as_u16());
                    match response.json::<Value>().await {
                        Ok(payload) if status.is_success() && payload.get("error").is_none() => {
                            granted = true;
                        }
                        Ok(payload) => {
                            let detail = payload
                                .get("error")
                                .and_then(Value::as_str)
                                .unwrap_or("faucet refused the request");
                            error = Some(format!("status {status}: {detail}"));
                        }
                        Err(err) => {
                            error = Some(format!("decode faucet response: {err}"));
                        }
                    }
                }
                Err(err) => {
                    error = Some(err.to_string());
                }
            }

            let backoff_ms = if granted || attempt == self.config.max_retries {
                0
            } else {
                backoff_delay_ms(self.config.initial_backoff_ms, attempt)
            };
            attempts.push(FaucetAttemptTrace {
                attempt,
                endpoint: self.config.faucet_url.clone(),
                http_status,
                error,
                latency_ms: attempt_started.elapsed().as_millis() as u64,
                backoff_ms,
            });

            if granted {
                break;
            }
            if backoff_ms > 0 {
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
        }

        FaucetDripResult {
            faucet_url: self.config.faucet_url.clone(),
            address: format_address(address),
            granted,
            final_state: if granted { "granted" } else { "exhausted" }.to_owned(),
            attempts,
            started_unix_ms,
            finished_unix_ms: unix_ms_now(),
        }
    }
}

/// Stands in when no faucet endpoint is configured. Every request is
/// reported as rejected without touching the network.
pub struct NoopFaucetGateway;

#[async_trait]
impl FaucetGateway for NoopFaucetGateway {
    async fn request_drip(&self, address: &Address) -> FaucetDripResult {
        let now = unix_ms_now();
        FaucetDripResult {
            faucet_url: String::new(),
            address: format_address(address),
            granted: false,
            final_state: "disabled".to_owned(),
            attempts: Vec::new(),
            started_unix_ms: now,
            finished_unix_ms: now,
        }
    }
}

/// Per-address drip spacing. A grant stamps the address; further requests
/// are refused until the cooldown window has elapsed.
pub struct FaucetCooldownLedger {
    cooldown_secs: u64,
    last_grant_unix_ms: Mutex<FastMap<Address, i64>>,
}

impl FaucetCooldownLedger {
    pub fn new(cooldown_secs: u64) -> Self {
        Self {
            cooldown_secs,
            last_grant_unix_ms: Mutex::new(FastMap::default()),
        }
    }

    pub fn from_env() -> Self {
        let cooldown_secs = env::var("NEXUS_FAUCET_COOLDOWN_SECS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(3_600);
        Self::new(cooldown_secs)
    }

    /// Seconds until the address may receive another drip, or `None` when a
    /// request is admissible now. A cooldown of zero disables spacing.
    pub fn retry_after_secs(&self, address: &Address, now_unix_ms: i64) -> Option<u64> {
        if self.cooldown_secs == 0 {
            return None;
        }
        let last = *self.last_grant_unix_ms.lock().get(address)?;
        let window_ms = self.cooldown_secs.saturating_mul(1_000) as i64;
        let elapsed_ms = now_unix_ms.saturating_sub(last);
        if elapsed_ms >= window_ms {
            return None;
        }
        let remaining_ms = (window_ms - elapsed_ms) as u64;
        Some(remaining_ms.div_ceil(1_000))
    }

    pub fn record_grant(&self, address: &Address, now_unix_ms: i64) {
        self.last_grant_unix_ms.lock().insert(*address, now_unix_ms);
    }
}

fn backoff_delay_ms(initial_backoff_ms: u64, retry_index: u32) -> u64 {
    let retry_shift = retry_index.min(16);
    initial_backoff_ms.max(1).saturating_mul(1_u64 << retry_shift)
}

pub(crate) fn unix_ms_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
