use anyhow::Result;
use common::ChainKey;
use std::sync::Mutex;

pub type ShutdownHook = Box<dyn FnOnce() -> Result<()> + Send>;

pub struct NexusRuntime {
    chain_key: ChainKey,
    bootstrap_completed: bool,
    shutdown: Mutex<Option<ShutdownHook>>,
}

impl NexusRuntime {
    pub fn new(
        chain_key: ChainKey,
        bootstrap_completed: bool,
        shutdown: Option<ShutdownHook>,
    ) -> Self {
        Self {
            chain_key,
            bootstrap_completed,
            shutdown: Mutex::new(shutdown),
        }
    }

    pub fn chain_key(&self) -> &ChainKey {
        &self.chain_key
    }

    pub fn bootstrap_completed(&self) -> bool {
        self.bootstrap_completed
    }

    pub async fn shutdown(self) -> Result<()> {
        let hook = self.shutdown.into_inner().ok().flatten();
        if let Some(hook) = hook {
            hook()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::NexusRuntime;
    use common::ChainKey;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn shutdown_runs_the_registered_hook() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_in_hook = fired.clone();
        let runtime = NexusRuntime::new(
            ChainKey::new("andechain-local"),
            true,
            Some(Box::new(move || {
                fired_in_hook.store(true, Ordering::SeqCst);
                Ok(())
            })),
        );

        runtime.shutdown().await.expect("shutdown");
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn shutdown_without_a_hook_is_a_noop() {
        let runtime = NexusRuntime::new(ChainKey::new("andechain-local"), false, None);
        runtime.shutdown().await.expect("shutdown");
    }
}
