//! The per-node handle.
//!
//! Wraps the worker client with the node's synced status, metadata, host
//! metrics, warm-build cache, and in-flight placement bookkeeping. The sync
//! loop is the only writer of status/metadata/machine/host metrics;
//! `add_sandbox`/`remove_sandbox` move the allocation counters between syncs.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::Result;
use crate::model::node::{MachineInfo, NodeMetadata, NodeMetrics, NodeStatus};
use crate::model::sandbox::Sandbox;
use crate::node::client::{Connectivity, ServiceInfo, WorkerApi};

const BUILD_CACHE_CLEAN_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// Resources reserved by an in-flight placement.
#[derive(Debug, Clone, Copy)]
pub struct ResourceClaim {
    pub vcpu: u32,
    pub ram_mb: u64,
}

/// In-flight placement bookkeeping. Reservations are inserted before the
/// create gRPC is issued so concurrent placements see them; every terminal
/// outcome clears its reservation.
#[derive(Default)]
pub struct PlacementMetrics {
    in_flight: DashMap<String, ResourceClaim>,
    success_count: AtomicU64,
    fail_count: AtomicU64,
}

impl PlacementMetrics {
    pub fn reserve(&self, sandbox_id: &str, claim: ResourceClaim) {
        self.in_flight.insert(sandbox_id.to_string(), claim);
    }

    pub fn success(&self, sandbox_id: &str) {
        if self.in_flight.remove(sandbox_id).is_some() {
            self.success_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn fail(&self, sandbox_id: &str) {
        if self.in_flight.remove(sandbox_id).is_some() {
            self.fail_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn in_flight_cpu(&self) -> u64 {
        self.in_flight.iter().map(|c| c.vcpu as u64).sum()
    }

    pub fn in_flight_ram_mb(&self) -> u64 {
        self.in_flight.iter().map(|c| c.ram_mb).sum()
    }

    pub fn successes(&self) -> u64 {
        self.success_count.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> u64 {
        self.fail_count.load(Ordering::SeqCst)
    }
}

/// TTL set of builds the worker has warmed.
#[derive(Default)]
pub struct BuildCache {
    entries: DashMap<Uuid, DateTime<Utc>>,
}

impl BuildCache {
    /// TTL granted to builds we placed ourselves before the worker first
    /// reports them; long enough to survive until the next sync.
    const PROVISIONAL_TTL: i64 = 120;

    /// Record a worker-reported warm build; the worker's expiry wins.
    pub fn insert_reported(&self, build_id: Uuid, expires_at: DateTime<Utc>) {
        self.entries.insert(build_id, expires_at);
    }

    /// Record a locally placed build so it is not forgotten before the next
    /// sync. Never shortens a worker-reported expiry.
    pub fn insert_provisional(&self, build_id: Uuid) {
        let expires_at = Utc::now() + Duration::seconds(Self::PROVISIONAL_TTL);
        self.entries
            .entry(build_id)
            .and_modify(|current| {
                if *current < expires_at {
                    *current = expires_at;
                }
            })
            .or_insert(expires_at);
    }

    pub fn contains(&self, build_id: Uuid) -> bool {
        self.entries
            .get(&build_id)
            .is_some_and(|expiry| *expiry > Utc::now())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn prune(&self) {
        let now = Utc::now();
        self.entries.retain(|_, expiry| *expiry > now);
    }
}

pub struct NodeHandle {
    node_id: String,
    cluster_id: Uuid,
    worker: Arc<dyn WorkerApi>,
    /// Shared with the gRPC client so every outbound call reads the current
    /// service instance id.
    meta: Arc<RwLock<NodeMetadata>>,
    machine: RwLock<MachineInfo>,
    synced_status: RwLock<NodeStatus>,
    metrics: Mutex<NodeMetrics>,
    build_cache: BuildCache,
    placement: PlacementMetrics,
    closed: AtomicBool,
    cleaner: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("node_id", &self.node_id)
            .field("cluster_id", &self.cluster_id)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl NodeHandle {
    pub fn new(
        node_id: String,
        cluster_id: Uuid,
        worker: Arc<dyn WorkerApi>,
        meta: Arc<RwLock<NodeMetadata>>,
    ) -> Arc<Self> {
        let handle = Arc::new(Self {
            node_id,
            cluster_id,
            worker,
            meta,
            machine: RwLock::new(MachineInfo::default()),
            synced_status: RwLock::new(NodeStatus::Connecting),
            metrics: Mutex::new(NodeMetrics::default()),
            build_cache: BuildCache::default(),
            placement: PlacementMetrics::default(),
            closed: AtomicBool::new(false),
            cleaner: Mutex::new(None),
        });

        let cleaner = {
            let weak = Arc::downgrade(&handle);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(BUILD_CACHE_CLEAN_INTERVAL);
                loop {
                    ticker.tick().await;
                    let Some(handle) = weak.upgrade() else { return };
                    handle.build_cache.prune();
                }
            })
        };
        *handle.cleaner.lock() = Some(cleaner);
        handle
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn cluster_id(&self) -> Uuid {
        self.cluster_id
    }

    pub fn worker(&self) -> &Arc<dyn WorkerApi> {
        &self.worker
    }

    pub fn build_cache(&self) -> &BuildCache {
        &self.build_cache
    }

    pub fn placement(&self) -> &PlacementMetrics {
        &self.placement
    }

    /// The public status: a pure composition of the last synced status and
    /// the live channel connectivity, never a cached field.
    pub fn status(&self) -> NodeStatus {
        match self.worker.connectivity() {
            Connectivity::Shutdown => NodeStatus::Unhealthy,
            Connectivity::Connecting | Connectivity::TransientFailure => NodeStatus::Connecting,
            Connectivity::Ready => *self.synced_status.read(),
        }
    }

    pub fn metadata(&self) -> NodeMetadata {
        self.meta.read().clone()
    }

    pub fn machine_info(&self) -> MachineInfo {
        self.machine.read().clone()
    }

    pub fn metrics(&self) -> NodeMetrics {
        self.metrics.lock().clone()
    }

    /// Apply a fresh `ServiceInfo` snapshot. Sync-loop only.
    pub(crate) fn apply_service_info(&self, info: ServiceInfo) {
        *self.meta.write() = info.metadata;
        *self.machine.write() = info.machine;
        *self.synced_status.write() = info.status;
        *self.metrics.lock() = info.metrics;
    }

    /// Mark the node unhealthy after the sync retry budget drained.
    pub(crate) fn mark_unhealthy(&self) {
        *self.synced_status.write() = NodeStatus::Unhealthy;
    }

    /// Propagate an admin drain/ready to the worker. The synced status is
    /// updated optimistically; the next sync confirms it.
    pub async fn send_status_change(&self, status: NodeStatus) -> Result<()> {
        self.worker.send_status_override(status).await?;
        *self.synced_status.write() = status;
        Ok(())
    }

    /// Account a sandbox the node now hosts.
    pub fn add_sandbox(&self, sandbox: &Sandbox) {
        let mut metrics = self.metrics.lock();
        metrics.cpu_allocated += sandbox.vcpu;
        metrics.ram_allocated_mb += sandbox.ram_mb;
        metrics.sandbox_count += 1;
    }

    /// Account a sandbox that left the node.
    pub fn remove_sandbox(&self, sandbox: &Sandbox) {
        let mut metrics = self.metrics.lock();
        metrics.cpu_allocated = metrics.cpu_allocated.saturating_sub(sandbox.vcpu);
        metrics.ram_allocated_mb = metrics.ram_allocated_mb.saturating_sub(sandbox.ram_mb);
        metrics.sandbox_count = metrics.sandbox_count.saturating_sub(1);
    }

    /// Idempotent: stops the build-cache cleaner and shuts the client down.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(cleaner) = self.cleaner.lock().take() {
            cleaner.abort();
        }
        self.worker.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::fake::{FakeWorker, service_info};
    use std::collections::HashMap;

    fn handle_with(worker: Arc<FakeWorker>) -> Arc<NodeHandle> {
        NodeHandle::new(
            "node-1".to_string(),
            Uuid::nil(),
            worker as Arc<dyn WorkerApi>,
            Arc::new(RwLock::new(NodeMetadata::default())),
        )
    }

    fn sandbox(vcpu: u32, ram_mb: u64) -> Sandbox {
        let now = Utc::now();
        Sandbox {
            sandbox_id: "sbx-1".to_string(),
            execution_id: Uuid::new_v4().to_string(),
            template_id: "tmpl-base".to_string(),
            build_id: Uuid::new_v4(),
            base_template_id: "tmpl-base".to_string(),
            team_id: Uuid::new_v4(),
            alias: None,
            node_id: "node-1".to_string(),
            cluster_id: Uuid::nil(),
            vcpu,
            ram_mb,
            total_disk_size_mb: 1024,
            kernel_version: "6.1.102".to_string(),
            firecracker_version: "1.10.1".to_string(),
            envd_version: "0.2.4".to_string(),
            metadata: HashMap::new(),
            start_time: now,
            end_time: now + Duration::minutes(15),
            max_length_hours: 24,
            auto_pause: false,
            allow_internet_access: true,
            envd_access_token: None,
            state: crate::model::sandbox::SandboxState::Running,
        }
    }

    #[tokio::test]
    async fn test_status_composes_connectivity_and_synced_status() {
        let worker = Arc::new(FakeWorker::ready(service_info("node-1", 8, 16384)));
        let handle = handle_with(Arc::clone(&worker));

        // Synced status starts at Connecting but connectivity is Ready.
        assert_eq!(handle.status(), NodeStatus::Connecting);

        handle.apply_service_info(service_info("node-1", 8, 16384));
        assert_eq!(handle.status(), NodeStatus::Ready);

        worker.set_connectivity(Connectivity::TransientFailure);
        assert_eq!(handle.status(), NodeStatus::Connecting);

        worker.set_connectivity(Connectivity::Shutdown);
        assert_eq!(handle.status(), NodeStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_add_remove_sandbox_moves_counters() {
        let worker = Arc::new(FakeWorker::ready(service_info("node-1", 8, 16384)));
        let handle = handle_with(worker);
        handle.apply_service_info(service_info("node-1", 8, 16384));

        let s = sandbox(2, 512);
        handle.add_sandbox(&s);
        let metrics = handle.metrics();
        assert_eq!(metrics.cpu_allocated, 2);
        assert_eq!(metrics.ram_allocated_mb, 512);
        assert_eq!(metrics.sandbox_count, 1);

        handle.remove_sandbox(&s);
        let metrics = handle.metrics();
        assert_eq!(metrics.cpu_allocated, 0);
        assert_eq!(metrics.ram_allocated_mb, 0);
        assert_eq!(metrics.sandbox_count, 0);

        // Removing twice never underflows.
        handle.remove_sandbox(&s);
        assert_eq!(handle.metrics().cpu_allocated, 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let worker = Arc::new(FakeWorker::ready(service_info("node-1", 8, 16384)));
        let handle = handle_with(Arc::clone(&worker));

        handle.close();
        handle.close();
        assert!(handle.is_closed());
        assert_eq!(worker.connectivity(), Connectivity::Shutdown);
        assert_eq!(handle.status(), NodeStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_placement_metrics_clear_on_terminal_outcomes() {
        let metrics = PlacementMetrics::default();
        metrics.reserve("s1", ResourceClaim { vcpu: 2, ram_mb: 512 });
        metrics.reserve("s2", ResourceClaim { vcpu: 1, ram_mb: 256 });

        assert_eq!(metrics.in_flight_count(), 2);
        assert_eq!(metrics.in_flight_cpu(), 3);
        assert_eq!(metrics.in_flight_ram_mb(), 768);

        metrics.success("s1");
        metrics.fail("s2");
        assert_eq!(metrics.in_flight_count(), 0);
        assert_eq!(metrics.successes(), 1);
        assert_eq!(metrics.failures(), 1);

        // Double settlement does not double count.
        metrics.success("s1");
        assert_eq!(metrics.successes(), 1);
    }

    #[tokio::test]
    async fn test_build_cache_provisional_does_not_shorten_reported() {
        let cache = BuildCache::default();
        let build = Uuid::new_v4();

        let far = Utc::now() + Duration::hours(1);
        cache.insert_reported(build, far);
        cache.insert_provisional(build);
        assert!(cache.contains(build));

        // A second build known only locally is held for the provisional TTL.
        let local = Uuid::new_v4();
        cache.insert_provisional(local);
        assert!(cache.contains(local));

        // Expired entries drop out on prune.
        let stale = Uuid::new_v4();
        cache.insert_reported(stale, Utc::now() - Duration::seconds(1));
        assert!(!cache.contains(stale));
        cache.prune();
        assert_eq!(cache.len(), 2);
    }
}
