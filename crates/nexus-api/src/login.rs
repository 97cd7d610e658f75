use ahash::RandomState;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use auto_impl::auto_impl;
use common::{Address, format_address};
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::env;
use std::time::Duration;

type FastMap<K, V> = HashMap<K, V, RandomState>;

#[derive(Clone, Debug)]
pub struct LoginConfig {
    pub nonce_ttl_secs: u64,
    pub max_pending_nonces: usize,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            nonce_ttl_secs: 300,
            max_pending_nonces: 10_000,
        }
    }
}

impl LoginConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let nonce_ttl_secs = env::var("NEXUS_LOGIN_NONCE_TTL_SECS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(defaults.nonce_ttl_secs)
            .max(1);
        let max_pending_nonces = env::var("NEXUS_LOGIN_MAX_PENDING")
            .ok()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .unwrap_or(defaults.max_pending_nonces)
            .max(16);

        Self {
            nonce_ttl_secs,
            max_pending_nonces,
        }
    }
}

#[derive(Clone, Debug)]
pub struct IssuedNonce {
    pub nonce: String,
    pub expires_at_unix_ms: i64,
}

struct PendingNonce {
    address: Address,
    expires_at_unix_ms: i64,
}

struct NonceShelf {
    pending: FastMap<String, PendingNonce>,
    order: VecDeque<String>,
}

/// Challenge nonces handed out for wallet sign-in. Each nonce is bound to
/// one address, expires after the configured TTL, and is removed on first
/// use whether or not verification succeeds.
pub struct NonceStore {
    ttl_ms: i64,
    max_pending: usize,
    shelf: Mutex<NonceShelf>,
}

impl NonceStore {
    pub fn new(config: &LoginConfig) -> Self {
        Self {
            ttl_ms: config.nonce_ttl_secs.saturating_mul(1_000) as i64,
            max_pending: config.max_pending_nonces.max(1),
            shelf: Mutex::new(NonceShelf {
                pending: FastMap::default(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn issue(&self, address: Address, now_unix_ms: i64) -> IssuedNonce {
        let nonce = hex::encode(rand::random::<[u8; 16]>());
        let expires_at_unix_ms = now_unix_ms.saturating_add(self.ttl_ms);

        let mut shelf = self.shelf.lock();
        shelf.evict_expired(now_unix_ms);
        while shelf.pending.len() >= self.max_pending {
            let Some(oldest) = shelf.order.pop_front() else {
                break;
            };
            shelf.pending.remove(&oldest);
        }
        shelf.pending.insert(
            nonce.clone(),
            PendingNonce {
                address,
                expires_at_unix_ms,
            },
        );
        shelf.order.push_back(nonce.clone());

        IssuedNonce {
            nonce,
            expires_at_unix_ms,
        }
    }

    /// Takes the nonce off the shelf. Returns true only when it exists, is
    /// bound to `address`, and has not expired.
    pub fn consume(&self, nonce: &str, address: &Address, now_unix_ms: i64) -> bool {
        let mut shelf = self.shelf.lock();
        let Some(pending) = shelf.pending.remove(nonce) else {
            return false;
        };
        shelf.order.retain(|entry| entry != nonce);
        pending.address == *address && pending.expires_at_unix_ms >= now_unix_ms
    }

    pub fn pending_count(&self) -> usize {
        self.shelf.lock().pending.len()
    }
}

impl NonceShelf {
    fn evict_expired(&mut self, now_unix_ms: i64) {
        self.pending
            .retain(|_, pending| pending.expires_at_unix_ms >= now_unix_ms);
        let pending = &self.pending;
        self.order.retain(|nonce| pending.contains_key(nonce));
    }
}

/// Signature checks are delegated to the auth backend. `Ok(Some(token))`
/// means the signature matched and a session token was minted, `Ok(None)`
/// means the signature was rejected.
#[async_trait]
#[auto_impl(Arc)]
pub trait SignatureVerifier: Send + Sync {
    async fn verify_login(
        &self,
        address: &Address,
        nonce: &str,
        signature: &str,
    ) -> Result<Option<String>>;
}

#[derive(Clone, Debug)]
pub struct VerifierConfig {
    pub verify_url: String,
    pub request_timeout_ms: u64,
}

impl VerifierConfig {
    pub fn from_env() -> Option<Self> {
        let verify_url = env::var("NEXUS_AUTH_VERIFY_URL")
            .ok()
            .map(|raw| raw.trim().to_owned())
            .filter(|raw| !raw.is_empty())?;
        let request_timeout_ms = env::var("NEXUS_AUTH_TIMEOUT_MS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(4_000)
            .max(250);

        Some(Self {
            verify_url,
            request_timeout_ms,
        })
    }
}

pub struct HttpSignatureVerifier {
    config: VerifierConfig,
    client: reqwest::Client,
}

impl HttpSignatureVerifier {
    pub fn new(config: VerifierConfig) -> Result<Self> {
        if config.verify_url.trim().is_empty() {
            bail!("verify_url must not be empty");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("build auth http client")?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl SignatureVerifier for HttpSignatureVerifier {
    async fn verify_login(
        &self,
        address: &Address,
        nonce: &str,
        signature: &str,
    ) -> Result<Option<String>> {
        let body = json!({
            "address": format_address(address),
            "nonce": nonce,
            "signature": signature,
        });
        let response = self
            .client
            .post(&self.config.verify_url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("post login verification to {}", self.config.verify_url))?;
        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .context("decode auth verify response")?;

        if let Some(token) = payload.get("token").and_then(Value::as_str) {
            return Ok(Some(token.to_owned()));
        }
        if status.is_client_error() || payload.get("error").is_some() {
            return Ok(None);
        }
        bail!("auth service returned status {status} with neither token nor error")
    }
}

/// Fixed-outcome verifier. Deployments without an auth backend reject every
/// login with it; tests use the accepting variant.
#[derive(Clone, Debug, Default)]
pub struct StaticSignatureVerifier {
    token: Option<String>,
}

impl StaticSignatureVerifier {
    pub fn accepting(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn rejecting() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl SignatureVerifier for StaticSignatureVerifier {
    async fn verify_login(
        &self,
        _address: &Address,
        _nonce: &str,
        _signature: &str,
    ) -> Result<Option<String>> {
        Ok(self.token.clone())
    }
}
