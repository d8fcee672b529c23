//! Whitelist proof server.
//!
//! Loads the TOML config, optionally publishes a seed content file, then
//! answers root and proof queries over HTTP until ctrl-c.
//!
//! Run with:
//!   cargo run --bin server -- --config config.toml

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use whitelist_tree::adapters::memory_store::InMemoryDatastore;
use whitelist_tree::adapters::retrying::RetryingDatastore;
use whitelist_tree::config::ServiceConfig;
use whitelist_tree::domain::record::read_content;
use whitelist_tree::ports::datastore::TreeDatastore;
use whitelist_tree::resolver::EntitlementResolver;
use whitelist_tree::server::routes::AppState;
use whitelist_tree::server::start_server;
use whitelist_tree::store::TreeStore;

#[derive(clap::Parser)]
#[command(name = "server", about = "Serve whitelist roots and inclusion proofs")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // ── Config ──
    let config = match &args.config {
        Some(path) => ServiceConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            warn!("no --config given, using defaults");
            ServiceConfig::default()
        }
    };
    let default_amount = config.default_amount()?;

    // ── Store + resolver ──
    let datastore = RetryingDatastore::new(InMemoryDatastore::new(), config.retry_policy());
    let store = Arc::new(
        TreeStore::new(datastore)
            .with_cache_capacity(config.cache_capacity)
            .with_request_timeout(config.datastore.request_timeout),
    );

    if let Some(path) = &config.seed_content {
        seed(&store, path).await?;
    }

    let resolver = Arc::new(
        EntitlementResolver::new(Arc::clone(&store))
            .with_max_concurrent_lookups(config.max_concurrent_lookups),
    );

    // ── HTTP ──
    let handle = start_server(AppState::new(resolver, default_amount), config.listen_addr)
        .await
        .context("starting HTTP server")?;
    info!(addr = %handle.local_addr(), "ready");

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down");
    handle.shutdown().await?;
    Ok(())
}

/// Publish every tree in a content file. Trees already present are skipped,
/// so restarting with the same seed is harmless.
async fn seed<D: TreeDatastore>(store: &TreeStore<D>, path: &Path) -> Result<()> {
    let trees = read_content(path).with_context(|| format!("reading {}", path.display()))?;

    let mut published = 0;
    for tree in &trees {
        if store.publish_if_absent(tree).await? {
            published += 1;
        }
    }
    info!(
        path = %path.display(),
        trees = trees.len(),
        published,
        "seed content loaded"
    );
    Ok(())
}
