//! TTL eviction loop.
//!
//! Every tick snapshots the expired running sandboxes and fans out one task
//! per sandbox: claim the removal, run the injected side effect against the
//! owning node, settle the claim. The claim gate makes a sandbox observed in
//! two ticks impossible to double-evict.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::error::Result;
use crate::model::sandbox::Sandbox;
use crate::store::{SandboxStorage, StateAction};

const EVICT_TICK: Duration = Duration::from_millis(50);

/// The side effect that reaches the owning node over gRPC to pause or kill
/// the sandbox.
pub type RemoveSandboxFn = Arc<
    dyn Fn(Sandbox, StateAction) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>
        + Send
        + Sync,
>;

pub struct Evictor {
    store: Arc<dyn SandboxStorage>,
    remove_sandbox: RemoveSandboxFn,
}

impl Evictor {
    pub fn new(store: Arc<dyn SandboxStorage>, remove_sandbox: RemoveSandboxFn) -> Arc<Self> {
        Arc::new(Self {
            store,
            remove_sandbox,
        })
    }

    /// Run the loop until `shutdown` flips; the current tick always drains
    /// before the task exits.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(EVICT_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            // Drain once so in-flight expiries settle.
                            self.tick().await;
                            return;
                        }
                    }
                }
            }
        })
    }

    /// One eviction pass. Per-item failures are logged and never stop the
    /// tick.
    pub async fn tick(&self) {
        let expired = match self.store.items_to_evict().await {
            Ok(items) => items,
            Err(err) => {
                warn!(error = %err, "failed to list expired sandboxes");
                return;
            }
        };

        let mut tasks = Vec::with_capacity(expired.len());
        for sandbox in expired {
            let store = Arc::clone(&self.store);
            let remove_sandbox = Arc::clone(&self.remove_sandbox);
            tasks.push(tokio::spawn(async move {
                evict_one(store, remove_sandbox, sandbox).await;
            }));
        }

        for task in tasks {
            if let Err(join_err) = task.await {
                // A panic in a worker task must not take down the loop.
                error!(error = %join_err, "eviction task panicked");
            }
        }
    }
}

async fn evict_one(
    store: Arc<dyn SandboxStorage>,
    remove_sandbox: RemoveSandboxFn,
    sandbox: Sandbox,
) {
    let action = StateAction::for_sandbox(&sandbox);
    let sandbox_id = sandbox.sandbox_id.clone();

    let claim = match store.start_removing(&sandbox_id, action).await {
        Ok(claim) => claim,
        Err(err) => {
            warn!(sandbox_id = %sandbox_id, error = %err, "eviction admission failed");
            return;
        }
    };
    if claim.already_done {
        return;
    }

    let outcome = (remove_sandbox)(sandbox, action).await;
    if let Err(err) = &outcome {
        warn!(sandbox_id = %sandbox_id, action = %action, error = %err, "sandbox removal side effect failed");
    }
    if let Err(err) = store.finish_removing(&claim, outcome.is_ok()).await {
        warn!(sandbox_id = %sandbox_id, error = %err, "failed to settle eviction");
    }
}
