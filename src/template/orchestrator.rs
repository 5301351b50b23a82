//! The template build orchestrator.
//!
//! Drives one build's persistent status from the control-plane side:
//! registration, dispatch to a builder node, and the polling state machine
//! `Waiting -> Building -> Uploaded | Failed`. Retryable probe errors get a
//! bounded retrier; everything else short-circuits to a terminal `Failed`.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{CapacityReason, Error, Result};
use crate::model::build::{BuildStatus, FailureReason, TemplateBuild};
use crate::model::node::NodeStatus;
use crate::model::team::TeamInfo;
use crate::node::client::{TemplateSpec, WorkerApi as _, WorkerBuildState};
use crate::node::handle::NodeHandle;
use crate::node::pool::NodePool;
use crate::retry::{RetryPolicy, retry};
use crate::template::cache::TemplateCache;
use crate::template::sweep::BuilderHealth;

#[derive(Debug, Clone, Copy)]
pub struct BuildTimeouts {
    /// A build stuck in `Waiting` longer than this is failed outright.
    pub waiting_deadline: Duration,
    /// Overall deadline for the polling loop.
    pub build_timeout: Duration,
    /// Pause between status probes.
    pub poll_interval: Duration,
}

impl Default for BuildTimeouts {
    fn default() -> Self {
        Self {
            waiting_deadline: Duration::from_secs(40 * 60),
            build_timeout: Duration::from_secs(60 * 60),
            poll_interval: Duration::from_secs(1),
        }
    }
}

pub struct RegisterBuildRequest {
    pub template_id: String,
    pub alias: Option<String>,
    pub cluster_id: Uuid,
    pub node_id: Option<String>,
}

/// Removes the build from the processing set when polling exits, however it
/// exits.
struct ProcessingGuard<'a> {
    set: &'a DashMap<Uuid, ()>,
    build_id: Uuid,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.build_id);
    }
}

pub struct BuildOrchestrator {
    db: Arc<dyn Database>,
    pool: Arc<NodePool>,
    cache: Arc<TemplateCache>,
    /// Process-wide dedup: at most one poller per build.
    processing: DashMap<Uuid, ()>,
    local_builder: Option<Arc<BuilderHealth>>,
    timeouts: BuildTimeouts,
}

impl BuildOrchestrator {
    pub fn new(
        db: Arc<dyn Database>,
        pool: Arc<NodePool>,
        cache: Arc<TemplateCache>,
        local_builder: Option<Arc<BuilderHealth>>,
        timeouts: BuildTimeouts,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            pool,
            cache,
            processing: DashMap::new(),
            local_builder,
            timeouts,
        })
    }

    pub fn is_processing(&self, build_id: Uuid) -> bool {
        self.processing.contains_key(&build_id)
    }

    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    /// Create the build row: enforce the team's concurrent-builds quota, fail
    /// prior in-progress builds of the template, claim the alias if given.
    pub async fn register_build(
        &self,
        team: &TeamInfo,
        request: RegisterBuildRequest,
    ) -> Result<TemplateBuild> {
        let in_progress = self
            .db
            .count_in_progress_builds_for_team(team.team_id())
            .await?;
        if in_progress >= team.tier.concurrent_template_builds {
            return Err(Error::TooManyInstances {
                limit: team.tier.concurrent_template_builds,
            });
        }

        self.db
            .fail_in_progress_builds(
                &request.template_id,
                FailureReason::new("superseded by a newer build"),
            )
            .await?;

        let build = TemplateBuild {
            build_id: Uuid::new_v4(),
            template_id: request.template_id.clone(),
            team_id: team.team_id(),
            status: BuildStatus::Waiting,
            created_at: Utc::now(),
            cluster_id: request.cluster_id,
            node_id: request.node_id,
            reason: None,
            rootfs_size_mb: None,
            envd_version: None,
        };
        self.db.create_env_build(build.clone()).await?;

        if let Some(alias) = &request.alias {
            self.db.claim_alias(alias, &request.template_id).await?;
        }

        info!(build_id = %build.build_id, template_id = %build.template_id, "build registered");
        Ok(build)
    }

    /// Dispatch the build to its builder node. The persistent status moves to
    /// `Building` only after the builder acknowledged: flipping it earlier
    /// races with the status-polling job when the builder dies before
    /// materializing any state.
    pub async fn create_template(&self, build: &TemplateBuild, spec: &TemplateSpec) -> Result<()> {
        let node = self.builder_for(build)?;

        if build.cluster_id.is_nil()
            && let Some(health) = &self.local_builder
            && !health.is_healthy()
        {
            return Err(Error::NoCapacity {
                reason: CapacityReason::BuilderUnhealthy,
            });
        }

        node.worker().template_create(spec).await?;
        self.db
            .env_build_set_status(build.build_id, BuildStatus::Building, None)
            .await?;
        node.build_cache().insert_provisional(build.build_id);
        Ok(())
    }

    pub async fn delete_build(&self, build_id: Uuid) -> Result<()> {
        let build = self.db.get_env_build(build_id).await?;
        let node = self.builder_for(&build)?;
        node.worker()
            .template_build_delete(build_id, &build.template_id)
            .await?;
        self.cache.invalidate(&build.template_id);
        Ok(())
    }

    /// The polling state machine for one build. De-duplicated process-wide:
    /// a second caller returns immediately while a poller is active.
    pub async fn build_status_sync(&self, build_id: Uuid) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        let _guard = match self.processing.entry(build_id) {
            Entry::Occupied(_) => return Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(());
                ProcessingGuard {
                    set: &self.processing,
                    build_id,
                }
            }
        };

        let build = self.db.get_env_build(build_id).await?;
        if build.status.is_terminal() {
            return Ok(());
        }

        if build.status == BuildStatus::Waiting {
            let age = Utc::now() - build.created_at;
            if age.to_std().unwrap_or_default() > self.timeouts.waiting_deadline {
                self.fail_build(&build, FailureReason::new("waiting for builder too long"))
                    .await?;
            }
            // A young Waiting build is left alone; the next sweep re-checks.
            return Ok(());
        }

        let outcome =
            tokio::time::timeout(self.timeouts.build_timeout, self.poll_until_terminal(&build))
                .await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                self.fail_build(&build, FailureReason::new("build polling timed out"))
                    .await
            }
        }
    }

    async fn poll_until_terminal(&self, build: &TemplateBuild) -> Result<()> {
        let node = match self.builder_for(build) {
            Ok(node) => node,
            Err(err) => {
                return self
                    .fail_build(build, FailureReason::new(format!("builder lost: {err}")))
                    .await;
            }
        };

        let build_id = build.build_id;
        let template_id = build.template_id.clone();
        loop {
            let status = retry(RetryPolicy::build_probe(), Error::is_retryable, |_| {
                let node = Arc::clone(&node);
                let template_id = template_id.clone();
                async move {
                    node.worker()
                        .template_build_status(build_id, &template_id)
                        .await
                }
            })
            .await;

            let status = match status {
                Ok(status) => status,
                // Anything the retrier gave up on is terminal for the build.
                Err(err) => {
                    return self
                        .fail_build(build, FailureReason::new(err.to_string()))
                        .await;
                }
            };

            match status.state {
                WorkerBuildState::Failed => {
                    let reason = status
                        .reason
                        .unwrap_or_else(|| FailureReason::new("build failed"));
                    return self.fail_build(build, reason).await;
                }
                WorkerBuildState::Completed => {
                    let Some(artifacts) = status.artifacts else {
                        return self.fail_build(build, FailureReason::new("nil metadata")).await;
                    };
                    self.db
                        .finish_env_build(
                            build.build_id,
                            artifacts.rootfs_size_mb,
                            &artifacts.envd_version,
                        )
                        .await?;
                    self.cache.invalidate(&build.template_id);
                    info!(build_id = %build.build_id, "build uploaded");
                    return Ok(());
                }
                WorkerBuildState::Waiting | WorkerBuildState::Building => {
                    tokio::time::sleep(self.timeouts.poll_interval).await;
                }
            }
        }
    }

    async fn fail_build(&self, build: &TemplateBuild, reason: FailureReason) -> Result<()> {
        warn!(build_id = %build.build_id, reason = %reason.message, "build failed");
        self.db
            .env_build_set_status(build.build_id, BuildStatus::Failed, Some(reason))
            .await?;
        self.cache.invalidate(&build.template_id);
        Ok(())
    }

    fn builder_for(&self, build: &TemplateBuild) -> Result<Arc<NodeHandle>> {
        if let Some(node_id) = &build.node_id {
            return self.pool.get(node_id);
        }
        self.pool
            .cluster_nodes(build.cluster_id)
            .into_iter()
            .find(|node| node.status() == NodeStatus::Ready)
            .ok_or_else(|| Error::not_found("ready builder node"))
    }
}
