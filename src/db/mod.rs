//! Database capability consumed by the core.
//!
//! The managed Postgres backend lives with the deployment; this crate ships
//! the trait plus an in-memory reference backend used by the standalone binary
//! and the test suite. Transient backend errors surface as
//! `Error::RetryableTransport` so call sites can apply their retry policy.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::model::build::{BuildStatus, FailureReason, TemplateBuild};
use crate::model::team::{TeamRecord, TierLimits};

pub use memory::MemoryDatabase;

/// A paused sandbox persisted as a resumable template.
///
/// `sandbox_id` is semantically unique; upserting replaces the previous
/// snapshot for the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub sandbox_id: String,
    pub template_id: String,
    pub build_id: Uuid,
    pub base_template_id: String,
    pub team_id: Uuid,
    pub vcpu: u32,
    pub ram_mb: u64,
    pub total_disk_size_mb: u64,
    pub kernel_version: String,
    pub firecracker_version: String,
    pub envd_version: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub auto_pause: bool,
    pub allow_internet_access: bool,
    pub paused_at: DateTime<Utc>,
}

/// A template resolved by id or alias together with its newest build.
#[derive(Debug, Clone)]
pub struct TemplateWithBuild {
    pub template_id: String,
    pub team_id: Uuid,
    pub aliases: Vec<String>,
    pub build: TemplateBuild,
}

/// The persistent-store operations the core issues.
#[async_trait]
pub trait Database: Send + Sync {
    async fn get_team_with_tier_by_api_key(
        &self,
        api_key: &str,
    ) -> Result<(TeamRecord, TierLimits)>;

    async fn get_team_with_tier_by_team_and_user(
        &self,
        team_id: Uuid,
        user_id: Uuid,
    ) -> Result<(TeamRecord, TierLimits)>;

    async fn update_last_time_used(&self, api_key: &str) -> Result<()>;

    async fn upsert_snapshot(&self, snapshot: SnapshotRecord) -> Result<()>;

    /// The snapshot for a sandbox together with the builds that materialized
    /// it, newest first.
    async fn get_snapshot_builds(
        &self,
        sandbox_id: &str,
    ) -> Result<(SnapshotRecord, Vec<TemplateBuild>)>;

    async fn get_in_progress_template_builds(&self) -> Result<Vec<TemplateBuild>>;

    async fn get_env_build(&self, build_id: Uuid) -> Result<TemplateBuild>;

    async fn create_env_build(&self, build: TemplateBuild) -> Result<()>;

    async fn env_build_set_status(
        &self,
        build_id: Uuid,
        status: BuildStatus,
        reason: Option<FailureReason>,
    ) -> Result<()>;

    /// Terminal success: persist `Uploaded` with the build artifacts.
    async fn finish_env_build(
        &self,
        build_id: Uuid,
        rootfs_size_mb: u64,
        envd_version: &str,
    ) -> Result<()>;

    async fn get_template_with_build_by_tag(&self, tag: &str) -> Result<TemplateWithBuild>;

    async fn count_in_progress_builds_for_team(&self, team_id: Uuid) -> Result<i64>;

    /// Fail every non-terminal build of a template, e.g. when a new build of
    /// the same template registers.
    async fn fail_in_progress_builds(
        &self,
        template_id: &str,
        reason: FailureReason,
    ) -> Result<()>;

    async fn claim_alias(&self, alias: &str, template_id: &str) -> Result<()>;
}
