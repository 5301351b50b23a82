//! Shared fixtures for the integration tests: a scripted worker and record
//! builders.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use uuid::Uuid;

use vmfleet::error::{Error, Result};
use vmfleet::model::node::{MachineInfo, NodeMetadata, NodeMetrics, NodeStatus};
use vmfleet::model::sandbox::Sandbox;
use vmfleet::model::team::{TeamInfo, TeamRecord, TierLimits};
use vmfleet::node::client::{
    CachedBuild, Connectivity, ServiceInfo, TemplateSpec, WorkerApi, WorkerBuildStatus,
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

pub fn team_info(concurrent_instances: i64) -> TeamInfo {
    TeamInfo {
        team: TeamRecord {
            id: Uuid::new_v4(),
            name: "acme".to_string(),
            is_banned: false,
            is_blocked: false,
            blocked_reason: None,
        },
        tier: TierLimits {
            concurrent_instances,
            ..Default::default()
        },
        last_refresh: Utc::now(),
    }
}

/// A worker whose responses are scripted by the test.
pub struct TestWorker {
    pub info: Mutex<ServiceInfo>,
    pub build_statuses: Mutex<VecDeque<Result<WorkerBuildStatus>>>,
    pub created: Mutex<Vec<Sandbox>>,
    pub deleted: Mutex<Vec<String>>,
    pub paused: Mutex<Vec<String>>,
    pub create_calls: AtomicU32,
    pub status_calls: AtomicU32,
    connectivity: AtomicU8,
}

impl TestWorker {
    pub fn ready(info: ServiceInfo) -> Arc<Self> {
        Arc::new(Self {
            info: Mutex::new(info),
            build_statuses: Mutex::new(VecDeque::new()),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            paused: Mutex::new(Vec::new()),
            create_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
            connectivity: AtomicU8::new(Connectivity::Ready as u8),
        })
    }

    pub fn push_build_status(&self, status: Result<WorkerBuildStatus>) {
        self.build_statuses.lock().push_back(status);
    }
}

#[async_trait]
impl WorkerApi for TestWorker {
    async fn service_info(&self) -> Result<ServiceInfo> {
        Ok(self.info.lock().clone())
    }

    async fn send_status_override(&self, _status: NodeStatus) -> Result<()> {
        Ok(())
    }

    async fn create_sandbox(&self, sandbox: &Sandbox) -> Result<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
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
        Ok(self.created.lock().clone())
    }

    async fn list_cached_builds(&self) -> Result<Vec<CachedBuild>> {
        Ok(Vec::new())
    }

    async fn template_create(&self, _spec: &TemplateSpec) -> Result<()> {
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

    async fn template_build_delete(&self, _build_id: Uuid, _template_id: &str) -> Result<()> {
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
        self.connectivity
            .store(Connectivity::Shutdown as u8, Ordering::SeqCst);
    }
}
