//! Scripted worker used by unit tests across the node, placement, and
//! template modules.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::node::{MachineInfo, NodeMetadata, NodeMetrics, NodeStatus};
use crate::model::sandbox::Sandbox;
use crate::node::client::{
    CachedBuild, Connectivity, ServiceInfo, TemplateSpec, WorkerApi, WorkerBuildState,
    WorkerBuildStatus,
};

pub fn service_info(node_id: &str, cpu_count: u32, ram_total_mb: u64) -> ServiceInfo {
    ServiceInfo {
        node_id: node_id.to_string(),
        metadata: NodeMetadata {
            service_instance_id: Uuid::new_v4().to_string(),
            commit: "deadbeef".to_string(),
            version: "0.4.0".to_string(),
        },
        status: NodeStatus::Ready,
        machine: MachineInfo {
            cpu_architecture: "x86_64".to_string(),
            cpu_family: "6".to_string(),
            cpu_model: "85".to_string(),
        },
        metrics: NodeMetrics {
            cpu_count,
            ram_total_mb,
            ..Default::default()
        },
    }
}

pub struct FakeWorker {
    pub info: Mutex<Option<Result<ServiceInfo>>>,
    pub sandboxes: Mutex<Result<Vec<Sandbox>>>,
    pub cached_builds: Mutex<Vec<CachedBuild>>,
    /// Responses consumed front to back; the last one repeats forever.
    pub build_statuses: Mutex<VecDeque<Result<WorkerBuildStatus>>>,
    pub fail_create: Mutex<Option<Error>>,

    pub created: Mutex<Vec<Sandbox>>,
    pub deleted: Mutex<Vec<String>>,
    pub paused: Mutex<Vec<String>>,
    pub templates_created: Mutex<Vec<TemplateSpec>>,
    pub builds_deleted: Mutex<Vec<Uuid>>,

    pub service_info_calls: AtomicU32,
    pub create_calls: AtomicU32,
    pub status_calls: AtomicU32,

    connectivity: AtomicU8,
}

impl Default for FakeWorker {
    fn default() -> Self {
        Self {
            info: Mutex::new(None),
            sandboxes: Mutex::new(Ok(Vec::new())),
            cached_builds: Mutex::new(Vec::new()),
            build_statuses: Mutex::new(VecDeque::new()),
            fail_create: Mutex::new(None),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            paused: Mutex::new(Vec::new()),
            templates_created: Mutex::new(Vec::new()),
            builds_deleted: Mutex::new(Vec::new()),
            service_info_calls: AtomicU32::new(0),
            create_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
            connectivity: AtomicU8::new(Connectivity::Connecting as u8),
        }
    }
}

impl FakeWorker {
    pub fn ready(info: ServiceInfo) -> Self {
        let worker = Self {
            connectivity: AtomicU8::new(Connectivity::Ready as u8),
            ..Default::default()
        };
        *worker.info.lock() = Some(Ok(info));
        worker
    }

    pub fn set_connectivity(&self, connectivity: Connectivity) {
        self.connectivity.store(connectivity as u8, Ordering::SeqCst);
    }

    pub fn push_build_status(&self, status: Result<WorkerBuildStatus>) {
        self.build_statuses.lock().push_back(status);
    }

    pub fn building_forever(&self) {
        self.push_build_status(Ok(WorkerBuildStatus {
            state: WorkerBuildState::Building,
            reason: None,
            artifacts: None,
        }));
    }
}

#[async_trait]
impl WorkerApi for FakeWorker {
    async fn service_info(&self) -> Result<ServiceInfo> {
        self.service_info_calls.fetch_add(1, Ordering::SeqCst);
        match &*self.info.lock() {
            Some(Ok(info)) => Ok(info.clone()),
            Some(Err(err)) => Err(err.clone()),
            None => Err(Error::RetryableTransport("no scripted info".to_string())),
        }
    }

    async fn send_status_override(&self, _status: NodeStatus) -> Result<()> {
        Ok(())
    }

    async fn create_sandbox(&self, sandbox: &Sandbox) -> Result<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &*self.fail_create.lock() {
            return Err(err.clone());
        }
        self.created.lock().push(sandbox.clone());
        Ok(())
    }

    async fn update_sandbox(&self, _sandbox_id: &str, _end_time: DateTime<Utc>) -> Result<()> {
        Ok(())
    }

    async fn delete_sandbox(&self, sandbox_id: &str, _execution_id: &str) -> Result<()> {
        self.deleted.lock().push(sandbox_id.to_string());
        Ok(())
    }

    async fn pause_sandbox(
        &self,
        sandbox_id: &str,
        _snapshot_template_id: &str,
        _snapshot_build_id: Uuid,
    ) -> Result<()> {
        self.paused.lock().push(sandbox_id.to_string());
        Ok(())
    }

    async fn list_sandboxes(&self) -> Result<Vec<Sandbox>> {
        self.sandboxes.lock().clone()
    }

    async fn list_cached_builds(&self) -> Result<Vec<CachedBuild>> {
        Ok(self.cached_builds.lock().clone())
    }

    async fn template_create(&self, spec: &TemplateSpec) -> Result<()> {
        self.templates_created.lock().push(spec.clone());
        Ok(())
    }

    async fn template_build_status(
        &self,
        _build_id: Uuid,
        _template_id: &str,
    ) -> Result<WorkerBuildStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut statuses = self.build_statuses.lock();
        if statuses.len() > 1 {
            statuses.pop_front().expect("non-empty")
        } else {
            statuses
                .front()
                .cloned()
                .unwrap_or_else(|| Err(Error::FatalTransport("no scripted status".to_string())))
        }
    }

    async fn template_build_delete(&self, build_id: Uuid, _template_id: &str) -> Result<()> {
        self.builds_deleted.lock().push(build_id);
        Ok(())
    }

    fn connectivity(&self) -> Connectivity {
        match self.connectivity.load(Ordering::SeqCst) {
            1 => Connectivity::Ready,
            2 => Connectivity::TransientFailure,
            3 => Connectivity::Shutdown,
            _ => Connectivity::Connecting,
        }
    }

    fn close(&self) {
        self.set_connectivity(Connectivity::Shutdown);
    }
}
