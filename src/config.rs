//! Environment-driven configuration.
//!
//! The control plane is configured entirely from the process environment; a
//! missing `POSTGRES_CONNECTION_STRING` is a fatal startup error. Optional
//! groups (cluster endpoint, secrets backend) validate as pairs.

use anyhow::{Context, Result, bail};
use std::time::Duration;

/// A worker known at startup, for deployments without dynamic discovery.
/// Encoded as `node-id=host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticWorker {
    pub node_id: String,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub postgres_connection_string: String,
    pub postgres_read_replica: Option<String>,
    pub worker_proxy_address: Option<String>,
    pub cluster_endpoint: Option<String>,
    pub cluster_token: Option<String>,
    pub secrets_address: Option<String>,
    pub secrets_role_id: Option<String>,
    pub secrets_secret_id: Option<String>,
    pub log_collector_endpoint: Option<String>,
    pub feature_flag_key: Option<String>,
    pub static_workers: Vec<StaticWorker>,
    pub node_sync_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let Some(postgres_connection_string) = lookup("POSTGRES_CONNECTION_STRING") else {
            bail!("POSTGRES_CONNECTION_STRING must be set");
        };

        let cluster_endpoint = lookup("CLUSTER_ENDPOINT");
        let cluster_token = lookup("CLUSTER_TOKEN");
        if cluster_endpoint.is_some() != cluster_token.is_some() {
            bail!("CLUSTER_ENDPOINT and CLUSTER_TOKEN must be set together");
        }

        let secrets_address = lookup("SECRETS_BACKEND_ADDRESS");
        let secrets_role_id = lookup("SECRETS_ROLE_ID");
        let secrets_secret_id = lookup("SECRETS_SECRET_ID");
        if secrets_address.is_some() && (secrets_role_id.is_none() || secrets_secret_id.is_none())
        {
            bail!("SECRETS_BACKEND_ADDRESS requires SECRETS_ROLE_ID and SECRETS_SECRET_ID");
        }

        let static_workers = match lookup("WORKER_NODES") {
            Some(raw) => parse_static_workers(&raw)?,
            None => Vec::new(),
        };

        let node_sync_interval = match lookup("NODE_SYNC_INTERVAL_SECONDS") {
            Some(raw) => {
                let secs: u64 = raw
                    .parse()
                    .context("NODE_SYNC_INTERVAL_SECONDS must be an integer")?;
                Duration::from_secs(secs.max(1))
            }
            None => Duration::from_secs(5),
        };

        Ok(Self {
            postgres_connection_string,
            postgres_read_replica: lookup("POSTGRES_READ_REPLICA_CONNECTION_STRING"),
            worker_proxy_address: lookup("WORKER_PROXY_ADDRESS"),
            cluster_endpoint,
            cluster_token,
            secrets_address,
            secrets_role_id,
            secrets_secret_id,
            log_collector_endpoint: lookup("LOG_COLLECTOR_ENDPOINT"),
            feature_flag_key: lookup("FEATURE_FLAG_KEY"),
            static_workers,
            node_sync_interval,
        })
    }
}

fn parse_static_workers(raw: &str) -> Result<Vec<StaticWorker>> {
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            let (node_id, address) = part
                .trim()
                .split_once('=')
                .with_context(|| format!("invalid WORKER_NODES entry: {part:?}"))?;
            if node_id.is_empty() || address.is_empty() {
                bail!("invalid WORKER_NODES entry: {part:?}");
            }
            Ok(StaticWorker {
                node_id: node_id.to_string(),
                address: address.to_string(),
            })
        })
        .collect()
}
