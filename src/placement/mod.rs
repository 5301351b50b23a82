//! Sandbox placement.
//!
//! Filters ready nodes by machine shape and projected capacity, scores by
//! post-placement free capacity (spreading), reserves in-flight resources
//! before the create gRPC, and retries against freshly sampled candidates.
//! The reservation is dropped on every exit path, panics included.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

use crate::error::{CapacityReason, Error, Result};
use crate::model::node::{MachineQuery, NodeStatus};
use crate::model::sandbox::{Sandbox, SandboxState};
use crate::model::team::TeamInfo;
use crate::node::client::WorkerApi as _;
use crate::node::handle::{NodeHandle, ResourceClaim};
use crate::node::pool::NodePool;
use crate::store::SandboxStorage;

const PLACEMENT_ATTEMPTS: usize = 3;

/// Clears the in-flight reservation unless explicitly settled; `Drop` covers
/// early returns and panics.
struct Reservation {
    node: Arc<NodeHandle>,
    sandbox_id: String,
    settled: bool,
}

impl Reservation {
    fn take(node: Arc<NodeHandle>, sandbox: &Sandbox) -> Self {
        node.placement().reserve(
            &sandbox.sandbox_id,
            ResourceClaim {
                vcpu: sandbox.vcpu,
                ram_mb: sandbox.ram_mb,
            },
        );
        Self {
            node,
            sandbox_id: sandbox.sandbox_id.clone(),
            settled: false,
        }
    }

    fn success(mut self) {
        self.node.placement().success(&self.sandbox_id);
        self.settled = true;
    }

    fn fail(mut self) {
        self.node.placement().fail(&self.sandbox_id);
        self.settled = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            self.node.placement().fail(&self.sandbox_id);
        }
    }
}

pub struct Scheduler {
    pool: Arc<NodePool>,
    store: Arc<dyn SandboxStorage>,
}

impl Scheduler {
    pub fn new(pool: Arc<NodePool>, store: Arc<dyn SandboxStorage>) -> Self {
        Self { pool, store }
    }

    /// Count the team's live sandboxes against its tier before any
    /// reservation is taken.
    pub async fn check_team_quota(&self, team: &TeamInfo) -> Result<()> {
        let active = self
            .store
            .team_items(
                team.team_id(),
                &[SandboxState::Running, SandboxState::Paused],
            )
            .await?;
        if active.len() as i64 >= team.tier.concurrent_instances {
            return Err(Error::TooManyInstances {
                limit: team.tier.concurrent_instances,
            });
        }
        Ok(())
    }

    /// Select a node and issue the create gRPC on it. Returns the node that
    /// acknowledged the sandbox.
    pub async fn place(
        &self,
        team: &TeamInfo,
        sandbox: &Sandbox,
        machine: &MachineQuery,
    ) -> Result<Arc<NodeHandle>> {
        self.check_team_quota(team).await?;

        let mut excluded: HashSet<String> = HashSet::new();
        let mut last_reason = CapacityReason::NoMatchingNodes;
        let mut last_create_err: Option<Error> = None;

        for _ in 0..PLACEMENT_ATTEMPTS {
            // Fresh candidate sample every attempt.
            let candidates = self.pool.nodes();
            let (chosen, reason) = select_node(&candidates, sandbox, machine, &excluded);
            last_reason = reason;

            let Some(node) = chosen else { continue };

            let reservation = Reservation::take(Arc::clone(&node), sandbox);
            match node.worker().create_sandbox(sandbox).await {
                Ok(()) => {
                    reservation.success();
                    return Ok(node);
                }
                Err(err) => {
                    warn!(
                        node_id = %node.node_id(),
                        sandbox_id = %sandbox.sandbox_id,
                        error = %err,
                        "sandbox create failed, excluding node"
                    );
                    reservation.fail();
                    excluded.insert(node.node_id().to_string());
                    last_create_err = Some(err);
                }
            }
        }

        Err(match last_create_err {
            Some(err) => err,
            None => Error::NoCapacity {
                reason: last_reason,
            },
        })
    }
}

/// Filter and score candidates. Returns the best node, or the reason the
/// candidate set came up empty.
fn select_node(
    candidates: &[Arc<NodeHandle>],
    sandbox: &Sandbox,
    machine: &MachineQuery,
    excluded: &HashSet<String>,
) -> (Option<Arc<NodeHandle>>, CapacityReason) {
    let mut matched_machine = false;
    let mut matched_ready = false;
    let mut blocked_on = CapacityReason::Cpu;
    let mut best: Option<(i64, i64, Arc<NodeHandle>)> = None;

    for node in candidates {
        if excluded.contains(node.node_id()) {
            continue;
        }
        if !machine.matches(&node.machine_info()) {
            continue;
        }
        matched_machine = true;
        if node.status() != NodeStatus::Ready {
            continue;
        }
        matched_ready = true;

        let metrics = node.metrics();
        let placement = node.placement();
        let projected_cpu = metrics.cpu_allocated as i64
            + placement.in_flight_cpu() as i64
            + sandbox.vcpu as i64;
        let projected_ram = metrics.ram_allocated_mb as i64
            + placement.in_flight_ram_mb() as i64
            + sandbox.ram_mb as i64;

        if projected_cpu > metrics.cpu_count as i64 {
            blocked_on = CapacityReason::Cpu;
            continue;
        }
        if projected_ram > metrics.ram_total_mb as i64 {
            blocked_on = CapacityReason::Ram;
            continue;
        }

        let free_cpu = metrics.cpu_count as i64 - projected_cpu;
        let free_ram = metrics.ram_total_mb as i64 - projected_ram;
        let score = scaled_ratio(free_cpu, metrics.cpu_count as i64)
            + scaled_ratio(free_ram, metrics.ram_total_mb as i64);
        let in_flight = placement.in_flight_count() as i64;

        let better = match &best {
            None => true,
            Some((best_score, best_in_flight, _)) => {
                score > *best_score || (score == *best_score && in_flight < *best_in_flight)
            }
        };
        if better {
            best = Some((score, in_flight, Arc::clone(node)));
        }
    }

    if let Some((_, _, node)) = best {
        return (Some(node), CapacityReason::Cpu);
    }
    let reason = if matched_ready {
        blocked_on
    } else if matched_machine {
        CapacityReason::NoReadyNodes
    } else {
        CapacityReason::NoMatchingNodes
    };
    (None, reason)
}

fn scaled_ratio(free: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    free * 1000 / total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::node::NodeMetadata;
    use crate::model::team::{TeamRecord, TierLimits};
    use crate::node::client::WorkerApi;
    use crate::node::fake::{FakeWorker, service_info};
    use crate::store::MemoryStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use parking_lot::RwLock;
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::sync::watch;
    use uuid::Uuid;

    fn team(concurrent: i64) -> TeamInfo {
        TeamInfo {
            team: TeamRecord {
                id: Uuid::new_v4(),
                name: "acme".to_string(),
                is_banned: false,
                is_blocked: false,
                blocked_reason: None,
            },
            tier: TierLimits {
                concurrent_instances: concurrent,
                ..Default::default()
            },
            last_refresh: Utc::now(),
        }
    }

    fn sandbox(id: &str, team: &TeamInfo, vcpu: u32, ram_mb: u64) -> Sandbox {
        let now = Utc::now();
        Sandbox {
            sandbox_id: id.to_string(),
            execution_id: Uuid::new_v4().to_string(),
            template_id: "tmpl-base".to_string(),
            build_id: Uuid::new_v4(),
            base_template_id: "tmpl-base".to_string(),
            team_id: team.team_id(),
            alias: None,
            node_id: String::new(),
            cluster_id: Uuid::nil(),
            vcpu,
            ram_mb,
            total_disk_size_mb: 1024,
            kernel_version: "6.1.102".to_string(),
            firecracker_version: "1.10.1".to_string(),
            envd_version: "0.2.4".to_string(),
            metadata: HashMap::new(),
            start_time: now,
            end_time: now + ChronoDuration::minutes(15),
            max_length_hours: 24,
            auto_pause: false,
            allow_internet_access: true,
            envd_access_token: None,
            state: SandboxState::Running,
        }
    }

    async fn setup() -> (Arc<NodePool>, Arc<dyn SandboxStorage>, watch::Sender<bool>) {
        let store: Arc<dyn SandboxStorage> = Arc::new(MemoryStore::new());
        let (tx, rx) = watch::channel(false);
        let pool = NodePool::new(Arc::clone(&store), Duration::from_secs(3600), rx);
        (pool, store, tx)
    }

    async fn add_node(
        pool: &Arc<NodePool>,
        node_id: &str,
        cpu: u32,
        ram_mb: u64,
    ) -> Arc<FakeWorker> {
        let worker = Arc::new(FakeWorker::ready(service_info(node_id, cpu, ram_mb)));
        let handle = crate::node::handle::NodeHandle::new(
            node_id.to_string(),
            Uuid::nil(),
            Arc::clone(&worker) as Arc<dyn WorkerApi>,
            Arc::new(RwLock::new(NodeMetadata::default())),
        );
        pool.register(handle).await.unwrap();
        worker
    }

    #[tokio::test]
    async fn test_happy_path_places_on_ready_node() {
        let (pool, store, _tx) = setup().await;
        let worker = add_node(&pool, "n1", 4, 8192).await;
        let scheduler = Scheduler::new(Arc::clone(&pool), store);

        let team = team(2);
        let s = sandbox("s1", &team, 2, 512);
        let node = scheduler
            .place(&team, &s, &MachineQuery::default())
            .await
            .unwrap();

        assert_eq!(node.node_id(), "n1");
        assert_eq!(worker.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(node.placement().in_flight_count(), 0);
        assert_eq!(node.placement().successes(), 1);
    }

    #[tokio::test]
    async fn test_quota_refusal_before_any_reservation() {
        let (pool, store, _tx) = setup().await;
        let worker = add_node(&pool, "n1", 4, 8192).await;
        let scheduler = Scheduler::new(Arc::clone(&pool), Arc::clone(&store));

        let team = team(1);
        store
            .add(sandbox("existing", &team, 1, 256))
            .await
            .unwrap();

        let s = sandbox("s1", &team, 1, 256);
        let err = scheduler
            .place(&team, &s, &MachineQuery::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TooManyInstances { limit: 1 }));
        assert_eq!(err.http_status(), 429);
        assert_eq!(worker.create_calls.load(Ordering::SeqCst), 0);
        assert_eq!(pool.get("n1").unwrap().placement().in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_paused_sandboxes_count_against_quota() {
        let (pool, store, _tx) = setup().await;
        add_node(&pool, "n1", 4, 8192).await;
        let scheduler = Scheduler::new(Arc::clone(&pool), Arc::clone(&store));

        let team = team(1);
        let mut paused = sandbox("old", &team, 1, 256);
        paused.auto_pause = true;
        store.add(paused).await.unwrap();
        let claim = store
            .start_removing("old", crate::store::StateAction::Pause)
            .await
            .unwrap();
        store.finish_removing(&claim, true).await.unwrap();

        let s = sandbox("s1", &team, 1, 256);
        let err = scheduler
            .place(&team, &s, &MachineQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TooManyInstances { .. }));
    }

    #[tokio::test]
    async fn test_capacity_exhaustion_reports_limiting_resource() {
        let (pool, store, _tx) = setup().await;
        let worker = add_node(&pool, "n1", 1, 8192).await;
        let scheduler = Scheduler::new(Arc::clone(&pool), store);

        let team = team(10);
        let s = sandbox("s1", &team, 2, 512);
        let err = scheduler
            .place(&team, &s, &MachineQuery::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::NoCapacity {
                reason: CapacityReason::Cpu
            }
        ));
        assert_eq!(err.http_status(), 503);
        assert_eq!(worker.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_machine_mismatch_reports_no_matching_nodes() {
        let (pool, store, _tx) = setup().await;
        add_node(&pool, "n1", 8, 8192).await;
        let scheduler = Scheduler::new(Arc::clone(&pool), store);

        let team = team(10);
        let s = sandbox("s1", &team, 1, 256);
        let query = MachineQuery {
            cpu_architecture: Some("aarch64".to_string()),
            cpu_family: None,
        };
        let err = scheduler.place(&team, &s, &query).await.unwrap_err();
        assert!(matches!(
            err,
            Error::NoCapacity {
                reason: CapacityReason::NoMatchingNodes
            }
        ));
    }

    #[tokio::test]
    async fn test_spreading_prefers_freest_node() {
        let (pool, store, _tx) = setup().await;
        add_node(&pool, "busy", 8, 8192).await;
        add_node(&pool, "idle", 8, 8192).await;
        pool.get("busy").unwrap().add_sandbox(&sandbox(
            "warm",
            &team(10),
            6,
            4096,
        ));
        let scheduler = Scheduler::new(Arc::clone(&pool), store);

        let team = team(10);
        let s = sandbox("s1", &team, 1, 256);
        let node = scheduler
            .place(&team, &s, &MachineQuery::default())
            .await
            .unwrap();
        assert_eq!(node.node_id(), "idle");
    }

    #[tokio::test]
    async fn test_in_flight_reservations_block_overcommit() {
        let (pool, store, _tx) = setup().await;
        add_node(&pool, "n1", 4, 8192).await;
        let node = pool.get("n1").unwrap();
        // A concurrent placement holds 3 of the 4 cores.
        node.placement()
            .reserve("other", ResourceClaim { vcpu: 3, ram_mb: 512 });
        let scheduler = Scheduler::new(Arc::clone(&pool), store);

        let team = team(10);
        let s = sandbox("s1", &team, 2, 256);
        let err = scheduler
            .place(&team, &s, &MachineQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NoCapacity {
                reason: CapacityReason::Cpu
            }
        ));
    }

    #[tokio::test]
    async fn test_create_failure_clears_reservation_and_surfaces_error() {
        let (pool, store, _tx) = setup().await;
        let worker = add_node(&pool, "n1", 8, 8192).await;
        *worker.fail_create.lock() = Some(Error::FatalTransport("worker crashed".to_string()));
        let scheduler = Scheduler::new(Arc::clone(&pool), store);

        let team = team(10);
        let s = sandbox("s1", &team, 1, 256);
        let err = scheduler
            .place(&team, &s, &MachineQuery::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::FatalTransport(_)));
        let node = pool.get("n1").unwrap();
        assert_eq!(node.placement().in_flight_count(), 0);
        assert_eq!(node.placement().failures(), 1);
        // The failing node was excluded after the first attempt.
        assert_eq!(worker.create_calls.load(Ordering::SeqCst), 1);
    }
}
