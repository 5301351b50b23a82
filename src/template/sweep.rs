//! Background build reconciliation.
//!
//! The sweep re-enters `build_status_sync` for every in-progress build that
//! is not already being polled, so builds orphaned by a restart or a missed
//! dispatch still converge. `BuilderHealth` probes the local builder and
//! gates new build placements (never status queries).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::db::Database as _;
use crate::model::node::NodeStatus;
use crate::node::client::WorkerApi;
use crate::template::orchestrator::BuildOrchestrator;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const BUILDER_PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Liveness of the local builder instance, refreshed by a periodic probe.
pub struct BuilderHealth {
    worker: Arc<dyn WorkerApi>,
    healthy: AtomicBool,
}

impl BuilderHealth {
    pub fn new(worker: Arc<dyn WorkerApi>) -> Arc<Self> {
        Arc::new(Self {
            worker,
            healthy: AtomicBool::new(false),
        })
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub async fn probe_once(&self) {
        let healthy = match self.worker.service_info().await {
            Ok(info) => info.status == NodeStatus::Ready,
            Err(err) => {
                debug!(error = %err, "builder probe failed");
                false
            }
        };
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn spawn_probe(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(BUILDER_PROBE_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.probe_once().await,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }
}

/// One sweep pass: kick off a poller for every in-progress build without one.
pub async fn sweep_once(orchestrator: &Arc<BuildOrchestrator>) {
    let builds = match orchestrator.db().get_in_progress_template_builds().await {
        Ok(builds) => builds,
        Err(err) => {
            warn!(error = %err, "failed to list in-progress builds");
            return;
        }
    };

    for build in builds {
        if orchestrator.is_processing(build.build_id) {
            continue;
        }
        let orchestrator = Arc::clone(orchestrator);
        tokio::spawn(async move {
            if let Err(err) = orchestrator.build_status_sync(build.build_id).await {
                warn!(build_id = %build.build_id, error = %err, "build status sync failed");
            }
        });
    }
}

pub fn spawn_sweep(
    orchestrator: Arc<BuildOrchestrator>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => sweep_once(&orchestrator).await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    })
}
