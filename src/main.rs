use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vmfleet::config::Config;
use vmfleet::db::{Database, MemoryDatabase};
use vmfleet::flags::StaticFlags;
use vmfleet::node::pool::NodeDiscovery;
use vmfleet::secrets::{MemorySecrets, SecretsStore};
use vmfleet::service::ControlPlane;
use vmfleet::store::{MemoryStore, SandboxStorage};

#[derive(Parser)]
#[command(name = "vmfleet")]
#[command(about = "Multi-tenant control plane for microVM sandbox fleets")]
#[command(version)]
struct Cli {
    /// Log filter, e.g. "info" or "vmfleet=debug"
    #[arg(long, env = "LOG_FILTER", default_value = "info")]
    log_filter: String,

    /// Override the node sync interval in seconds
    #[arg(long)]
    sync_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_filter).unwrap_or_default())
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    let sync_interval = cli
        .sync_interval
        .map(Duration::from_secs)
        .unwrap_or(config.node_sync_interval);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        workers = config.static_workers.len(),
        "starting control plane"
    );

    // The standalone binary runs on the embedded reference backends; managed
    // Postgres/vault backends plug in through the same traits.
    let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
    let secrets: Arc<dyn SecretsStore> = Arc::new(MemorySecrets::new());
    let flags = Arc::new(StaticFlags::new());
    let store: Arc<dyn SandboxStorage> = Arc::new(MemoryStore::new());

    let plane = ControlPlane::new(db, secrets, flags, store, sync_interval);

    for worker in &config.static_workers {
        let discovery = NodeDiscovery {
            node_id: worker.node_id.clone(),
            address: worker.address.clone(),
            cluster_id: uuid::Uuid::nil(),
        };
        match plane.pool().register_discovered(discovery).await {
            Ok(handle) => {
                info!(node_id = %worker.node_id, status = %handle.status(), "worker registered")
            }
            Err(err) => warn!(node_id = %worker.node_id, error = %err, "worker registration failed"),
        }
    }

    plane.start();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");
    plane.shutdown().await;

    Ok(())
}
