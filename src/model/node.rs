//! Worker-node control records: status, metadata, machine shape, metrics.

use serde::{Deserialize, Serialize};

/// Administrative/health status of a worker node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Ready,
    Draining,
    Unhealthy,
    Connecting,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Ready => "ready",
            NodeStatus::Draining => "draining",
            NodeStatus::Unhealthy => "unhealthy",
            NodeStatus::Connecting => "connecting",
        };
        f.write_str(s)
    }
}

/// Service-process identity reported by the worker.
///
/// `service_instance_id` rotates whenever the worker process restarts and is
/// attached to every outbound call for cluster-proxy routing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeMetadata {
    pub service_instance_id: String,
    pub commit: String,
    pub version: String,
}

/// CPU shape of the host. Immutable for the lifetime of a worker boot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineInfo {
    pub cpu_architecture: String,
    pub cpu_family: String,
    pub cpu_model: String,
}

/// Machine constraints a sandbox placement must satisfy.
#[derive(Debug, Clone, Default)]
pub struct MachineQuery {
    pub cpu_architecture: Option<String>,
    pub cpu_family: Option<String>,
}

impl MachineQuery {
    pub fn matches(&self, info: &MachineInfo) -> bool {
        if let Some(arch) = &self.cpu_architecture
            && arch != &info.cpu_architecture
        {
            return false;
        }
        if let Some(family) = &self.cpu_family
            && family != &info.cpu_family
        {
            return false;
        }
        true
    }
}

/// Per-mountpoint disk usage.
#[derive(Debug, Clone, Default)]
pub struct DiskMetrics {
    pub mount_point: String,
    pub used_mb: u64,
    pub total_mb: u64,
}

/// Host-level metrics, refreshed by the sync loop; the `cpu_allocated` and
/// `ram_allocated_mb` counters additionally move with tenant-driven
/// add/remove deltas between syncs.
#[derive(Debug, Clone, Default)]
pub struct NodeMetrics {
    pub cpu_count: u32,
    pub cpu_allocated: u32,
    pub cpu_used_percent: f32,
    pub ram_total_mb: u64,
    pub ram_used_mb: u64,
    pub ram_allocated_mb: u64,
    pub disks: Vec<DiskMetrics>,
    pub sandbox_count: u32,
}

impl NodeMetrics {
    pub fn free_cpu(&self) -> i64 {
        self.cpu_count as i64 - self.cpu_allocated as i64
    }

    pub fn free_ram_mb(&self) -> i64 {
        self.ram_total_mb as i64 - self.ram_allocated_mb as i64
    }
}
