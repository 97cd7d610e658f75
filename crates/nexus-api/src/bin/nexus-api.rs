use anyhow::Context;
use nexus_api::live_stats::start_live_stats_feed;
use nexus_api::{RuntimeBootstrap, build_router, default_state_with_runtime};
use node_runtime::{RuntimeBuilder, ShutdownHook};
use std::env;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn resolve_log_filter(env_override: Option<&str>) -> String {
    match env_override.map(str::trim) {
        Some(value) if !value.is_empty() => {
            let has_nexus_api_directive = value
                .split(',')
                .map(str::trim)
                .any(|directive| directive == "nexus_api" || directive.starts_with("nexus_api="));
            if has_nexus_api_directive {
                value.to_owned()
            } else {
                format!("{value},nexus_api=info")
            }
        }
        _ => "info,nexus_api=info".to_owned(),
    }
}

fn resolve_bind_addr(env_override: Option<&str>) -> String {
    match env_override.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_owned(),
        _ => "0.0.0.0:3000".to_owned(),
    }
}

fn init_tracing(log_override: Option<&str>) {
    let filter = resolve_log_filter(log_override);
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(env::var("RUST_LOG").ok().as_deref());

    let (state, bootstrap) = default_state_with_runtime()?;
    let node = state.node.clone();
    let coordinator = state.stats.clone();

    let builder = RuntimeBuilder::from_env()?;
    info!(chain = %builder.chain_key(), "starting nexus api");
    let runtime = builder
        // A fresh process has never done its one-time startup work.
        .previously_bootstrapped(false)
        .with_bootstrap(move |previously_bootstrapped| {
            let RuntimeBootstrap { live_feed, stats_tx } = bootstrap;
            if previously_bootstrapped {
                info!("one-time startup work already done by the host; skipping");
            } else if let Some(config) = live_feed {
                start_live_stats_feed(node, coordinator, stats_tx, config);
            }
            Ok(Some(Box::new(|| {
                info!("nexus api stopped");
                Ok(())
            }) as ShutdownHook))
        })
        .build()?;

    let bind_addr = resolve_bind_addr(env::var("NEXUS_BIND_ADDR").ok().as_deref());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("bind {bind_addr}"))?;
    info!(addr = %bind_addr, "nexus api listening");
    axum::serve(listener, build_router(state))
        .await
        .context("serve nexus api")?;

    runtime.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::{resolve_bind_addr, resolve_log_filter};

    #[test]
    fn log_filter_keeps_an_explicit_crate_directive() {
        assert_eq!(resolve_log_filter(Some("warn,nexus_api=trace")), "warn,nexus_api=trace");
        assert_eq!(resolve_log_filter(Some("nexus_api")), "nexus_api");
    }

    #[test]
    fn log_filter_appends_the_crate_directive_when_missing() {
        assert_eq!(resolve_log_filter(Some("warn")), "warn,nexus_api=info");
        assert_eq!(resolve_log_filter(Some("  debug  ")), "debug,nexus_api=info");
        assert_eq!(resolve_log_filter(None), "info,nexus_api=info");
        assert_eq!(resolve_log_filter(Some("   ")), "info,nexus_api=info");
    }

    #[test]
    fn bind_addr_falls_back_to_the_default_port() {
        assert_eq!(resolve_bind_addr(Some("127.0.0.1:8080")), "127.0.0.1:8080");
        assert_eq!(resolve_bind_addr(None), "0.0.0.0:3000");
        assert_eq!(resolve_bind_addr(Some("")), "0.0.0.0:3000");
    }
}
