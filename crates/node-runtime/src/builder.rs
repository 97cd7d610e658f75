use anyhow::Result;
use common::ChainKey;

use crate::handle::{NexusRuntime, ShutdownHook};

pub fn resolve_chain_key(raw: Option<&str>) -> ChainKey {
    match raw.map(str::trim) {
        Some(value) if !value.is_empty() => ChainKey::new(value),
        _ => ChainKey::new("andechain-local"),
    }
}

type BootstrapFn = Box<dyn FnOnce(bool) -> Result<Option<ShutdownHook>> + Send>;

/// Assembles the runtime for the hosting binary. The bootstrap closure is the
/// application's one-time startup work; it receives an explicit flag telling
/// it whether an earlier run already completed that work, so nothing hides in
/// ambient storage. Consuming `build` makes a second bootstrap of the same
/// builder unrepresentable.
#[derive(Default)]
pub struct RuntimeBuilder {
    chain_key: ChainKey,
    previously_bootstrapped: bool,
    bootstrap: Option<BootstrapFn>,
}

impl RuntimeBuilder {
    pub fn from_env() -> Result<Self> {
        let chain_key = resolve_chain_key(std::env::var("NEXUS_CHAIN_KEY").ok().as_deref());
        Ok(Self {
            chain_key,
            previously_bootstrapped: false,
            bootstrap: None,
        })
    }

    pub fn chain_key(&self) -> &ChainKey {
        &self.chain_key
    }

    pub fn previously_bootstrapped(mut self, value: bool) -> Self {
        self.previously_bootstrapped = value;
        self
    }

    pub fn with_bootstrap<F>(mut self, bootstrap: F) -> Self
    where
        F: FnOnce(bool) -> Result<Option<ShutdownHook>> + Send + 'static,
    {
        self.bootstrap = Some(Box::new(bootstrap));
        self
    }

    pub fn build(self) -> Result<NexusRuntime> {
        let bootstrap_completed = self.bootstrap.is_some();
        let shutdown = match self.bootstrap {
            Some(bootstrap) => bootstrap(self.previously_bootstrapped)?,
            None => None,
        };
        Ok(NexusRuntime::new(
            self.chain_key,
            bootstrap_completed,
            shutdown,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::{RuntimeBuilder, resolve_chain_key};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn chain_key_falls_back_when_unset_or_blank() {
        assert_eq!(resolve_chain_key(None).to_string(), "andechain-local");
        assert_eq!(resolve_chain_key(Some("   ")).to_string(), "andechain-local");
        assert_eq!(
            resolve_chain_key(Some("andechain-testnet")).to_string(),
            "andechain-testnet"
        );
    }

    #[test]
    fn bootstrap_runs_once_and_sees_the_explicit_flag() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_in_bootstrap = runs.clone();

        let runtime = RuntimeBuilder::default()
            .previously_bootstrapped(true)
            .with_bootstrap(move |previously_bootstrapped| {
                assert!(previously_bootstrapped);
                runs_in_bootstrap.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            })
            .build()
            .expect("build runtime");

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(runtime.bootstrap_completed());
    }

    #[test]
    fn building_without_a_bootstrap_leaves_the_flag_unset() {
        let runtime = RuntimeBuilder::default().build().expect("build runtime");
        assert!(!runtime.bootstrap_completed());
    }
}
