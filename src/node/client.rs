//! The worker API seam.
//!
//! `WorkerApi` is what the rest of the control plane programs against;
//! `GrpcWorker` is the production implementation over one tonic channel per
//! node. tonic exposes no channel-state API, so connectivity is derived from
//! observed call outcomes and `close()`.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tonic::Request;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use uuid::Uuid;

use crate::error::{Error, Result, classify_status};
use crate::model::build::FailureReason;
use crate::model::node::{DiskMetrics, MachineInfo, NodeMetadata, NodeMetrics, NodeStatus};
use crate::model::sandbox::{Sandbox, SandboxState};
use crate::rpc::orchestrator as pb;
use crate::rpc::orchestrator::info_service_client::InfoServiceClient;
use crate::rpc::orchestrator::sandbox_service_client::SandboxServiceClient;
use crate::rpc::orchestrator::template_service_client::TemplateServiceClient;

const SERVICE_INFO_TIMEOUT: Duration = Duration::from_secs(5);
const BUILD_STATUS_TIMEOUT: Duration = Duration::from_secs(30);

const INSTANCE_ID_HEADER: &str = "service-instance-id";
const EVENT_TYPE_HEADER: &str = "event-type";
const SANDBOX_ID_HEADER: &str = "sandbox-id";
const EXECUTION_ID_HEADER: &str = "execution-id";

const EVENT_CATALOG_CREATE: &str = "sandbox-catalog-create";
const EVENT_CATALOG_DELETE: &str = "sandbox-catalog-delete";

/// Observed channel health, blended into `NodeHandle::status()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Connectivity {
    /// No call has succeeded yet.
    Connecting = 0,
    Ready = 1,
    TransientFailure = 2,
    /// The client was closed; sticky.
    Shutdown = 3,
}

impl Connectivity {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Connectivity::Ready,
            2 => Connectivity::TransientFailure,
            3 => Connectivity::Shutdown,
            _ => Connectivity::Connecting,
        }
    }
}

/// Decoded `ServiceInfo` response.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub node_id: String,
    pub metadata: NodeMetadata,
    pub status: NodeStatus,
    pub machine: MachineInfo,
    pub metrics: NodeMetrics,
}

/// A build the worker holds warm, with the worker-reported expiry.
#[derive(Debug, Clone)]
pub struct CachedBuild {
    pub build_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Worker-side view of a build's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerBuildState {
    Waiting,
    Building,
    Completed,
    Failed,
}

/// Artifacts reported with a completed build.
#[derive(Debug, Clone)]
pub struct BuildArtifacts {
    pub rootfs_size_mb: u64,
    pub envd_version: String,
}

#[derive(Debug, Clone)]
pub struct WorkerBuildStatus {
    pub state: WorkerBuildState,
    pub reason: Option<FailureReason>,
    pub artifacts: Option<BuildArtifacts>,
}

/// Parameters for dispatching a template build to a builder node.
#[derive(Debug, Clone)]
pub struct TemplateSpec {
    pub template_id: String,
    pub build_id: Uuid,
    pub team_id: Uuid,
    pub vcpu: u32,
    pub ram_mb: u64,
    pub disk_size_mb: u64,
    pub kernel_version: String,
    pub firecracker_version: String,
    pub start_command: Option<String>,
    pub from_image: Option<String>,
}

#[async_trait]
pub trait WorkerApi: Send + Sync {
    async fn service_info(&self) -> Result<ServiceInfo>;
    async fn send_status_override(&self, status: NodeStatus) -> Result<()>;

    /// Returns on the worker's acknowledgement, not on sandbox readiness.
    async fn create_sandbox(&self, sandbox: &Sandbox) -> Result<()>;
    async fn update_sandbox(&self, sandbox_id: &str, end_time: DateTime<Utc>) -> Result<()>;
    async fn delete_sandbox(&self, sandbox_id: &str, execution_id: &str) -> Result<()>;
    async fn pause_sandbox(
        &self,
        sandbox_id: &str,
        snapshot_template_id: &str,
        snapshot_build_id: Uuid,
    ) -> Result<()>;
    async fn list_sandboxes(&self) -> Result<Vec<Sandbox>>;
    async fn list_cached_builds(&self) -> Result<Vec<CachedBuild>>;

    async fn template_create(&self, spec: &TemplateSpec) -> Result<()>;
    async fn template_build_status(
        &self,
        build_id: Uuid,
        template_id: &str,
    ) -> Result<WorkerBuildStatus>;
    async fn template_build_delete(&self, build_id: Uuid, template_id: &str) -> Result<()>;

    fn connectivity(&self) -> Connectivity;
    fn close(&self);
}

pub struct GrpcWorker {
    sandbox: SandboxServiceClient<Channel>,
    info: InfoServiceClient<Channel>,
    template: TemplateServiceClient<Channel>,
    /// Shared with the node handle; the sync loop rotates the instance id
    /// here and every call re-reads it.
    meta: Arc<RwLock<NodeMetadata>>,
    connectivity: AtomicU8,
}

impl GrpcWorker {
    /// Build a lazily connecting client; the registration `service_info`
    /// probe performs the first real connect.
    pub fn connect_lazy(address: &str, meta: Arc<RwLock<NodeMetadata>>) -> Result<Self> {
        let endpoint = Endpoint::from_shared(format!("http://{address}"))
            .map_err(|e| Error::FatalTransport(format!("invalid worker address: {e}")))?
            .connect_timeout(Duration::from_secs(5));
        let channel = endpoint.connect_lazy();
        Ok(Self {
            sandbox: SandboxServiceClient::new(channel.clone()),
            info: InfoServiceClient::new(channel.clone()),
            template: TemplateServiceClient::new(channel),
            meta,
            connectivity: AtomicU8::new(Connectivity::Connecting as u8),
        })
    }

    fn request<M>(
        &self,
        message: M,
        timeout: Option<Duration>,
        extra_headers: &[(&'static str, &str)],
    ) -> Request<M> {
        let mut request = Request::new(message);
        if let Some(timeout) = timeout {
            request.set_timeout(timeout);
        }
        let instance_id = self.meta.read().service_instance_id.clone();
        if let Ok(value) = MetadataValue::try_from(instance_id.as_str()) {
            request.metadata_mut().insert(INSTANCE_ID_HEADER, value);
        }
        for (name, header) in extra_headers {
            if let Ok(value) = MetadataValue::try_from(*header) {
                request.metadata_mut().insert(*name, value);
            }
        }
        request
    }

    /// Record the call outcome into the connectivity state and strip the
    /// tonic framing.
    fn observe<T>(&self, outcome: std::result::Result<T, tonic::Status>) -> Result<T> {
        if self.connectivity() == Connectivity::Shutdown {
            return outcome.map_err(classify_status);
        }
        match outcome {
            Ok(value) => {
                self.connectivity
                    .store(Connectivity::Ready as u8, Ordering::SeqCst);
                Ok(value)
            }
            Err(status) => {
                if status.code() == tonic::Code::Unavailable {
                    self.connectivity
                        .store(Connectivity::TransientFailure as u8, Ordering::SeqCst);
                }
                Err(classify_status(status))
            }
        }
    }
}

#[async_trait]
impl WorkerApi for GrpcWorker {
    async fn service_info(&self) -> Result<ServiceInfo> {
        let mut client = self.info.clone();
        let request = self.request(pb::ServiceInfoRequest {}, Some(SERVICE_INFO_TIMEOUT), &[]);
        let response = self.observe(client.service_info(request).await)?;
        decode_service_info(response.into_inner())
    }

    async fn send_status_override(&self, status: NodeStatus) -> Result<()> {
        let mut client = self.info.clone();
        let request = self.request(
            pb::ServiceStatusOverrideRequest {
                status: encode_status(status) as i32,
            },
            Some(SERVICE_INFO_TIMEOUT),
            &[],
        );
        self.observe(client.service_status_override(request).await)?;
        Ok(())
    }

    async fn create_sandbox(&self, sandbox: &Sandbox) -> Result<()> {
        let mut client = self.sandbox.clone();
        let request = self.request(
            pb::SandboxCreateRequest {
                sandbox: Some(encode_sandbox(sandbox)),
            },
            None,
            &[
                (EVENT_TYPE_HEADER, EVENT_CATALOG_CREATE),
                (SANDBOX_ID_HEADER, sandbox.sandbox_id.as_str()),
                (EXECUTION_ID_HEADER, sandbox.execution_id.as_str()),
            ],
        );
        self.observe(client.create(request).await)?;
        Ok(())
    }

    async fn update_sandbox(&self, sandbox_id: &str, end_time: DateTime<Utc>) -> Result<()> {
        let mut client = self.sandbox.clone();
        let request = self.request(
            pb::SandboxUpdateRequest {
                sandbox_id: sandbox_id.to_string(),
                end_time: end_time.timestamp(),
            },
            None,
            &[],
        );
        self.observe(client.update(request).await)?;
        Ok(())
    }

    async fn delete_sandbox(&self, sandbox_id: &str, execution_id: &str) -> Result<()> {
        let mut client = self.sandbox.clone();
        let request = self.request(
            pb::SandboxDeleteRequest {
                sandbox_id: sandbox_id.to_string(),
            },
            None,
            &[
                (EVENT_TYPE_HEADER, EVENT_CATALOG_DELETE),
                (SANDBOX_ID_HEADER, sandbox_id),
                (EXECUTION_ID_HEADER, execution_id),
            ],
        );
        self.observe(client.delete(request).await)?;
        Ok(())
    }

    async fn pause_sandbox(
        &self,
        sandbox_id: &str,
        snapshot_template_id: &str,
        snapshot_build_id: Uuid,
    ) -> Result<()> {
        let mut client = self.sandbox.clone();
        let request = self.request(
            pb::SandboxPauseRequest {
                sandbox_id: sandbox_id.to_string(),
                snapshot_template_id: snapshot_template_id.to_string(),
                snapshot_build_id: snapshot_build_id.to_string(),
            },
            None,
            &[],
        );
        self.observe(client.pause(request).await)?;
        Ok(())
    }

    async fn list_sandboxes(&self) -> Result<Vec<Sandbox>> {
        let mut client = self.sandbox.clone();
        let request = self.request(pb::SandboxListRequest {}, None, &[]);
        let response = self.observe(client.list(request).await)?;
        response
            .into_inner()
            .sandboxes
            .into_iter()
            .map(decode_sandbox)
            .collect()
    }

    async fn list_cached_builds(&self) -> Result<Vec<CachedBuild>> {
        let mut client = self.template.clone();
        let request = self.request(pb::ListCachedBuildsRequest {}, None, &[]);
        let response = self.observe(client.list_cached_builds(request).await)?;
        response
            .into_inner()
            .builds
            .into_iter()
            .map(|build| {
                Ok(CachedBuild {
                    build_id: parse_uuid(&build.build_id, "cached build id")?,
                    expires_at: decode_timestamp(build.expiration_time)?,
                })
            })
            .collect()
    }

    async fn template_create(&self, spec: &TemplateSpec) -> Result<()> {
        let mut client = self.template.clone();
        let request = self.request(
            pb::TemplateCreateRequest {
                template: Some(pb::TemplateConfig {
                    template_id: spec.template_id.clone(),
                    build_id: spec.build_id.to_string(),
                    team_id: spec.team_id.to_string(),
                    vcpu: spec.vcpu,
                    ram_mb: spec.ram_mb,
                    disk_size_mb: spec.disk_size_mb,
                    kernel_version: spec.kernel_version.clone(),
                    firecracker_version: spec.firecracker_version.clone(),
                    start_command: spec.start_command.clone(),
                    from_image: spec.from_image.clone(),
                }),
            },
            None,
            &[],
        );
        self.observe(client.template_create(request).await)?;
        Ok(())
    }

    async fn template_build_status(
        &self,
        build_id: Uuid,
        template_id: &str,
    ) -> Result<WorkerBuildStatus> {
        let mut client = self.template.clone();
        let request = self.request(
            pb::TemplateBuildStatusRequest {
                build_id: build_id.to_string(),
                template_id: template_id.to_string(),
            },
            Some(BUILD_STATUS_TIMEOUT),
            &[],
        );
        let response = self.observe(client.template_build_status(request).await)?;
        Ok(decode_build_status(response.into_inner()))
    }

    async fn template_build_delete(&self, build_id: Uuid, template_id: &str) -> Result<()> {
        let mut client = self.template.clone();
        let request = self.request(
            pb::TemplateBuildDeleteRequest {
                build_id: build_id.to_string(),
                template_id: template_id.to_string(),
            },
            None,
            &[],
        );
        self.observe(client.template_build_delete(request).await)?;
        Ok(())
    }

    fn connectivity(&self) -> Connectivity {
        Connectivity::from_u8(self.connectivity.load(Ordering::SeqCst))
    }

    fn close(&self) {
        self.connectivity
            .store(Connectivity::Shutdown as u8, Ordering::SeqCst);
    }
}

fn encode_status(status: NodeStatus) -> pb::ServiceStatus {
    match status {
        NodeStatus::Ready => pb::ServiceStatus::Ready,
        NodeStatus::Draining => pb::ServiceStatus::Draining,
        // Connecting is a control-plane-only composition; the wire carries
        // the nearest admin state.
        NodeStatus::Unhealthy | NodeStatus::Connecting => pb::ServiceStatus::Unhealthy,
    }
}

fn decode_status(raw: i32) -> NodeStatus {
    match raw {
        x if x == pb::ServiceStatus::Ready as i32 => NodeStatus::Ready,
        x if x == pb::ServiceStatus::Draining as i32 => NodeStatus::Draining,
        _ => NodeStatus::Unhealthy,
    }
}

fn parse_uuid(raw: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| Error::FatalTransport(format!("malformed {what}: {raw:?}")))
}

fn decode_timestamp(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| Error::FatalTransport(format!("timestamp out of range: {secs}")))
}

pub(crate) fn encode_sandbox(sandbox: &Sandbox) -> pb::SandboxConfig {
    pb::SandboxConfig {
        sandbox_id: sandbox.sandbox_id.clone(),
        execution_id: sandbox.execution_id.clone(),
        template_id: sandbox.template_id.clone(),
        build_id: sandbox.build_id.to_string(),
        base_template_id: sandbox.base_template_id.clone(),
        team_id: sandbox.team_id.to_string(),
        alias: sandbox.alias.clone(),
        vcpu: sandbox.vcpu,
        ram_mb: sandbox.ram_mb,
        total_disk_size_mb: sandbox.total_disk_size_mb,
        kernel_version: sandbox.kernel_version.clone(),
        firecracker_version: sandbox.firecracker_version.clone(),
        envd_version: sandbox.envd_version.clone(),
        metadata: sandbox.metadata.clone(),
        start_time: sandbox.start_time.timestamp(),
        end_time: sandbox.end_time.timestamp(),
        max_sandbox_length_hours: sandbox.max_length_hours,
        auto_pause: sandbox.auto_pause,
        allow_internet_access: sandbox.allow_internet_access,
        envd_access_token: sandbox.envd_access_token.clone(),
    }
}

/// Decode a worker-reported sandbox. Workers only report live sandboxes, so
/// the record lands in `Running`; the node id is attached by the caller's
/// store sync.
pub(crate) fn decode_sandbox(config: pb::SandboxConfig) -> Result<Sandbox> {
    Ok(Sandbox {
        build_id: parse_uuid(&config.build_id, "build id")?,
        team_id: parse_uuid(&config.team_id, "team id")?,
        sandbox_id: config.sandbox_id,
        execution_id: config.execution_id,
        template_id: config.template_id,
        base_template_id: config.base_template_id,
        alias: config.alias,
        node_id: String::new(),
        cluster_id: Uuid::nil(),
        vcpu: config.vcpu,
        ram_mb: config.ram_mb,
        total_disk_size_mb: config.total_disk_size_mb,
        kernel_version: config.kernel_version,
        firecracker_version: config.firecracker_version,
        envd_version: config.envd_version,
        metadata: config.metadata,
        start_time: decode_timestamp(config.start_time)?,
        end_time: decode_timestamp(config.end_time)?,
        max_length_hours: config.max_sandbox_length_hours,
        auto_pause: config.auto_pause,
        allow_internet_access: config.allow_internet_access,
        envd_access_token: config.envd_access_token,
        state: SandboxState::Running,
    })
}

fn decode_service_info(info: pb::ServiceInfoResponse) -> Result<ServiceInfo> {
    let machine = info.machine.unwrap_or_default();
    Ok(ServiceInfo {
        node_id: info.node_id,
        metadata: NodeMetadata {
            service_instance_id: info.service_instance_id,
            commit: info.service_commit,
            version: info.service_version,
        },
        status: decode_status(info.service_status),
        machine: MachineInfo {
            cpu_architecture: machine.cpu_architecture,
            cpu_family: machine.cpu_family,
            cpu_model: machine.cpu_model,
        },
        metrics: NodeMetrics {
            cpu_count: info.cpu_count,
            cpu_allocated: info.cpu_allocated,
            cpu_used_percent: info.cpu_used_percent,
            ram_total_mb: info.memory_total_mb,
            ram_used_mb: info.memory_used_mb,
            ram_allocated_mb: info.memory_allocated_mb,
            disks: info
                .disks
                .into_iter()
                .map(|disk| DiskMetrics {
                    mount_point: disk.mount_point,
                    used_mb: disk.used_mb,
                    total_mb: disk.total_mb,
                })
                .collect(),
            sandbox_count: info.sandbox_count,
        },
    })
}

fn decode_build_status(response: pb::TemplateBuildStatusResponse) -> WorkerBuildStatus {
    let state = match response.status {
        x if x == pb::TemplateBuildState::Building as i32 => WorkerBuildState::Building,
        x if x == pb::TemplateBuildState::Completed as i32 => WorkerBuildState::Completed,
        x if x == pb::TemplateBuildState::Failed as i32 => WorkerBuildState::Failed,
        _ => WorkerBuildState::Waiting,
    };
    WorkerBuildStatus {
        state,
        reason: response.reason.map(|r| {
            if r.step.is_empty() {
                FailureReason::new(r.message)
            } else {
                FailureReason::at_step(r.message, r.step)
            }
        }),
        artifacts: response.metadata.map(|m| BuildArtifacts {
            rootfs_size_mb: m.rootfs_size_mb,
            envd_version: m.envd_version,
        }),
    }
}
