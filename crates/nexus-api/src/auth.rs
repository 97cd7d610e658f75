use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::env;
use std::sync::Arc;
use std::time::Instant;

type FastMap<K, V> = HashMap<K, V, RandomState>;

/// API key auth for the dashboard routes. Disabled by default so local
/// development works without any env setup.
#[derive(Clone, Debug, Default)]
pub struct ApiAuthConfig {
    pub enabled: bool,
    pub api_keys: HashSet<String>,
    pub requests_per_minute: u32,
}

impl ApiAuthConfig {
    pub fn from_env() -> Self {
        let enabled = parse_env_bool(env::var("NEXUS_API_AUTH_ENABLED").ok().as_deref());
        let api_keys = env::var("NEXUS_API_KEYS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|key| !key.is_empty())
                    .map(str::to_owned)
                    .collect::<HashSet<_>>()
            })
            .unwrap_or_default();
        let requests_per_minute = env::var("NEXUS_API_RATE_LIMIT_PER_MINUTE")
            .ok()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .unwrap_or(600)
            .max(1);

        Self {
            enabled,
            api_keys,
            requests_per_minute,
        }
    }

    pub fn validates_key(&self, api_key: &str) -> bool {
        self.api_keys.contains(api_key)
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-key token bucket. Capacity refills continuously at
/// `requests_per_minute / 60` tokens per second.
#[derive(Clone)]
pub struct ApiRateLimiter {
    buckets: Arc<Mutex<FastMap<String, TokenBucket>>>,
    capacity: f64,
}

impl ApiRateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(FastMap::default())),
            capacity: f64::from(requests_per_minute.max(1)),
        }
    }

    pub fn allow(&self, api_key: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(api_key.to_owned()).or_insert(TokenBucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.last_refill = now;
        bucket.tokens = (bucket.tokens + elapsed * self.capacity / 60.0).min(self.capacity);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

fn parse_env_bool(raw: Option<&str>) -> bool {
    matches!(
        raw.map(str::trim).map(str::to_ascii_lowercase).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}
