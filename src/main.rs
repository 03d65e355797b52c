// LLM Gateway - authenticated, load-balanced proxy for LLM APIs
//
// Callers present a gateway-issued API key. Each request is forwarded to one
// of several upstream backends (weighted random, unhealthy ones skipped) with
// the backend's own credential, and the token usage in the response is
// priced and recorded for per-user accounting.
//
// Architecture:
// - Proxy server (axum): auth middleware, forwarding, buffered and SSE relay
// - Balancer: weighted selection, health tracking, startup validation
// - Usage: bounded collector with a single writer thread, daily rollup
// - Storage: SQLite (users, keys, usage logs, daily stats)

mod auth;
mod balancer;
mod cli;
mod config;
mod logging;
mod pricing;
mod proxy;
mod storage;
mod usage;

#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use auth::handlers::CodeState;
use auth::{CodeCache, KeyCache};
use balancer::{validate_backends, HealthPolicy, LoadBalancer};
use clap::Parser;
use cli::{Cli, Commands};
use config::Config;
use proxy::ProxyState;
use std::sync::Arc;
use storage::{SqliteStore, UsageStore};
use usage::{DailyAggregator, UsageCollector};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    // Config output is plain stdout, no subscriber needed
    let command = match cli.command {
        Some(Commands::Config(command)) => return cli::handle_config(&config, command),
        other => other,
    };

    // Keep the guard alive for the whole run so file logs flush
    let _log_guard = logging::init_tracing(&config.logging);

    match command {
        None | Some(Commands::Serve) => run_gateway(config).await,
        Some(Commands::Validate) => cli::handle_validate(&config).await,
        Some(Commands::Aggregate { date }) => {
            let store = Arc::new(open_store(&config)?);
            println!("{}", cli::handle_aggregate(store, &config, date)?);
            Ok(())
        }
        Some(Commands::User(command)) => {
            println!("{}", cli::handle_user(&open_store(&config)?, command)?);
            Ok(())
        }
        Some(Commands::Key(command)) => {
            println!("{}", cli::handle_key(&open_store(&config)?, command)?);
            Ok(())
        }
        Some(Commands::Config(_)) => Ok(()),
    }
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::open(&config.database.path)
        .with_context(|| format!("opening database {}", config.database.path.display()))
}

async fn run_gateway(config: Config) -> Result<()> {
    config.validate_backends()?;

    tracing::info!(
        version = config::VERSION,
        backends = config.backends.len(),
        "Starting llm-gateway"
    );
    if let Some(path) = &config.source {
        tracing::info!("Config loaded from {}", path.display());
    }

    let store: Arc<dyn UsageStore> = Arc::new(open_store(&config)?);

    // Keys: load once, then refresh in the background
    let keys = Arc::new(KeyCache::new());
    let loaded = auth::reload_key_cache(store.as_ref(), &keys)?;
    tracing::info!(keys = loaded, "API key cache loaded");
    auth::spawn_key_reload(store.clone(), keys.clone(), config.auth.key_reload_interval);

    // Backends
    let balancer = Arc::new(LoadBalancer::new(
        &config.backends,
        HealthPolicy::from(&config.balancer),
    ));
    if config.balancer.validate_on_startup {
        let reports = validate_backends(&balancer, config.balancer.validation_timeout).await?;
        let passed = reports.iter().filter(|r| r.passed()).count();
        if passed == 0 {
            tracing::warn!("No backend passed validation; requests will get 503 until one recovers");
        } else {
            tracing::info!("{}/{} backend(s) passed validation", passed, reports.len());
        }
    }
    balancer
        .clone()
        .spawn_recovery(config.balancer.recovery_interval);

    // Usage accounting
    let collector = Arc::new(UsageCollector::start(
        store.clone(),
        config.usage.channel_buffer,
    )?);
    Arc::new(DailyAggregator::new(
        store.clone(),
        config.usage.aggregate_interval,
    ))
    .spawn();

    // Verification codes
    let codes = Arc::new(CodeCache::new(config.auth.code_expiry));
    codes.clone().spawn_sweeper();

    let client = proxy::build_client(config.balancer.upstream_timeout)?;
    let state = ProxyState::new(client, balancer, Some(collector.clone()));
    let app = proxy::build_router(state, keys, CodeState { store, codes });

    proxy::serve(config.bind_addr, app, shutdown_signal()).await?;

    // Drain queued usage records before exit
    let drain = collector.clone();
    tokio::task::spawn_blocking(move || drain.shutdown())
        .await
        .context("usage collector shutdown")?;
    let metrics = collector.metrics();
    tracing::info!(
        enqueued = metrics.enqueued,
        persisted = metrics.persisted,
        failed = metrics.failed,
        dropped = metrics.dropped,
        "Usage collector drained"
    );

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutting down..."),
        Err(e) => {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
