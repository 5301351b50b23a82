//! Per-node reconciliation loop.
//!
//! Each pass refreshes the node's status, metadata, machine info, and host
//! metrics from `ServiceInfo`, hands the worker's sandbox list to the store
//! for reconciliation, and on success refreshes the warm-build cache. This
//! loop is the only writer of those node fields.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::node::client::WorkerApi as _;
use crate::node::handle::NodeHandle;
use crate::retry::{RetryPolicy, retry};
use crate::store::SandboxStorage;

/// One reconcile pass with the transport retry budget applied.
pub async fn sync_node_once(
    handle: &Arc<NodeHandle>,
    store: &Arc<dyn SandboxStorage>,
) -> Result<()> {
    let outcome = retry(RetryPolicy::transport(), Error::is_transport, |_| {
        let handle = Arc::clone(handle);
        let store = Arc::clone(store);
        async move {
            let info = handle.worker().service_info().await?;
            handle.apply_service_info(info);

            let mut reported = handle.worker().list_sandboxes().await?;
            for sandbox in &mut reported {
                // Workers do not know their own placement identifiers.
                sandbox.node_id = handle.node_id().to_string();
                sandbox.cluster_id = handle.cluster_id();
            }
            store.sync(reported, handle.node_id()).await
        }
    })
    .await;

    if let Err(err) = outcome {
        if err.is_transport() {
            handle.mark_unhealthy();
        }
        return Err(err);
    }

    // Cache refresh only runs on a successful reconcile; a failure here is
    // not a node health signal.
    match handle.worker().list_cached_builds().await {
        Ok(cached) => {
            for build in cached {
                handle
                    .build_cache()
                    .insert_reported(build.build_id, build.expires_at);
            }
            handle.build_cache().prune();
        }
        Err(err) => {
            debug!(node_id = %handle.node_id(), error = %err, "cached build listing failed");
        }
    }

    Ok(())
}

/// Drive `sync_node_once` on a fixed cadence until shutdown or until the
/// handle is closed.
pub async fn run_node_sync(
    handle: Arc<NodeHandle>,
    store: Arc<dyn SandboxStorage>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if handle.is_closed() {
                    return;
                }
                if let Err(err) = sync_node_once(&handle, &store).await {
                    warn!(node_id = %handle.node_id(), error = %err, "node sync failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
