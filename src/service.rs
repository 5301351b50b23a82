//! The control-plane façade.
//!
//! This is the surface the HTTP layer consumes: sandbox create/resume,
//! deadline extension, pause/kill, and the process lifecycle (background
//! loops, graceful shutdown). Every dependency is injected; nothing reads
//! process-global state.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{Credential, TeamCache};
use crate::db::{Database, SnapshotRecord};
use crate::error::{Error, Result};
use crate::flags::{FLAG_AUTO_PAUSE_DEFAULT, FeatureFlags};
use crate::model::build::{BuildStatus, TemplateBuild};
use crate::model::node::MachineQuery;
use crate::model::sandbox::{Sandbox, SandboxState};
use crate::model::team::TeamInfo;
use crate::node::client::WorkerApi as _;
use crate::node::pool::NodePool;
use crate::placement::Scheduler;
use crate::secrets::{SecretMetadata, SecretsStore, team_secret_path};
use crate::store::evictor::{Evictor, RemoveSandboxFn};
use crate::store::{SandboxStorage, StateAction};
use crate::template::orchestrator::{BuildOrchestrator, BuildTimeouts};
use crate::template::sweep::spawn_sweep;
use crate::template::cache::TemplateCache;

const DEFAULT_SANDBOX_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Default)]
pub struct CreateSandboxRequest {
    /// Client-supplied id; generated when absent.
    pub sandbox_id: Option<String>,
    /// Template id or alias.
    pub template: String,
    pub alias: Option<String>,
    pub vcpu: Option<u32>,
    pub ram_mb: Option<u64>,
    pub ttl: Option<Duration>,
    pub metadata: HashMap<String, String>,
    pub auto_pause: Option<bool>,
    pub allow_internet_access: Option<bool>,
    pub machine: MachineQuery,
}

pub struct ControlPlane {
    auth: Arc<TeamCache>,
    db: Arc<dyn Database>,
    secrets: Arc<dyn SecretsStore>,
    flags: Arc<dyn FeatureFlags>,
    store: Arc<dyn SandboxStorage>,
    pool: Arc<NodePool>,
    scheduler: Scheduler,
    templates: Arc<TemplateCache>,
    builds: Arc<BuildOrchestrator>,
    draining: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Self-reference handed to background tasks so they never keep the
    /// plane alive on their own.
    weak: Weak<ControlPlane>,
}

impl ControlPlane {
    pub fn new(
        db: Arc<dyn Database>,
        secrets: Arc<dyn SecretsStore>,
        flags: Arc<dyn FeatureFlags>,
        store: Arc<dyn SandboxStorage>,
        node_sync_interval: Duration,
    ) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = NodePool::new(Arc::clone(&store), node_sync_interval, shutdown_rx);
        let scheduler = Scheduler::new(Arc::clone(&pool), Arc::clone(&store));
        let templates = TemplateCache::new(Arc::clone(&db));
        let builds = BuildOrchestrator::new(
            Arc::clone(&db),
            Arc::clone(&pool),
            Arc::clone(&templates),
            None,
            BuildTimeouts::default(),
        );
        let auth = TeamCache::new(Arc::clone(&db));

        Arc::new_cyclic(|weak| Self {
            auth,
            db,
            secrets,
            flags,
            store,
            pool,
            scheduler,
            templates,
            builds,
            draining: AtomicBool::new(false),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            weak: weak.clone(),
        })
    }

    /// Start the background loops: eviction and the build sweep.
    pub fn start(&self) {
        let weak = self.weak.clone();
        let remove: RemoveSandboxFn = Arc::new(move |sandbox, action| {
            let weak = weak.clone();
            Box::pin(async move {
                match weak.upgrade() {
                    Some(plane) => plane.remove_sandbox_on_node(&sandbox, action).await,
                    None => Err(Error::FatalTransport("control plane stopped".to_string())),
                }
            })
        });

        let evictor = Evictor::new(Arc::clone(&self.store), remove);
        let mut tasks = self.tasks.lock();
        tasks.push(evictor.spawn(self.shutdown_tx.subscribe()));
        tasks.push(spawn_sweep(
            Arc::clone(&self.builds),
            self.shutdown_tx.subscribe(),
        ));
    }

    pub fn pool(&self) -> &Arc<NodePool> {
        &self.pool
    }

    pub fn store(&self) -> &Arc<dyn SandboxStorage> {
        &self.store
    }

    pub fn builds(&self) -> &Arc<BuildOrchestrator> {
        &self.builds
    }

    pub fn templates(&self) -> &Arc<TemplateCache> {
        &self.templates
    }

    pub async fn authenticate(&self, credential: &Credential) -> Result<TeamInfo> {
        self.auth.resolve(credential).await
    }

    fn check_intake(&self) -> Result<()> {
        if self.draining.load(Ordering::SeqCst) {
            return Err(Error::FatalTransport(
                "control plane is shutting down".to_string(),
            ));
        }
        Ok(())
    }

    /// Create a sandbox from a template: resolve the build, enforce tier
    /// limits, place, and admit into the store as `Running`.
    pub async fn create_sandbox(
        &self,
        team: &TeamInfo,
        request: CreateSandboxRequest,
    ) -> Result<Sandbox> {
        self.check_intake()?;

        let vcpu = request.vcpu.unwrap_or(2);
        let ram_mb = request.ram_mb.unwrap_or(512);
        if vcpu > team.tier.max_vcpu || ram_mb > team.tier.max_ram_mb {
            return Err(Error::forbidden(format!(
                "requested {vcpu} vCPU / {ram_mb} MiB exceeds the team tier"
            )));
        }

        let template = self.templates.resolve(&request.template).await?;
        if template.build.status != BuildStatus::Uploaded {
            return Err(Error::not_found(format!(
                "uploaded build for template {}",
                request.template
            )));
        }

        let sandbox_id = request
            .sandbox_id
            .clone()
            .unwrap_or_else(|| format!("sbx-{}", Uuid::new_v4().simple()));
        if self.store.get(&sandbox_id).await.is_ok() {
            return Err(Error::AlreadyExists(format!("sandbox {sandbox_id}")));
        }

        let now = Utc::now();
        let ttl = self.clamp_ttl(team, request.ttl);
        let auto_pause = request
            .auto_pause
            .unwrap_or_else(|| self.flags.bool_flag(FLAG_AUTO_PAUSE_DEFAULT, false));

        let mut sandbox = Sandbox {
            sandbox_id,
            execution_id: Uuid::new_v4().to_string(),
            template_id: template.template_id.clone(),
            build_id: template.build.build_id,
            base_template_id: template.template_id.clone(),
            team_id: team.team_id(),
            alias: request.alias,
            node_id: String::new(),
            cluster_id: Uuid::nil(),
            vcpu,
            ram_mb,
            total_disk_size_mb: team.tier.disk_mb,
            kernel_version: "6.1.102".to_string(),
            firecracker_version: "1.10.1".to_string(),
            envd_version: template
                .build
                .envd_version
                .clone()
                .unwrap_or_else(|| "0.2.4".to_string()),
            metadata: request.metadata,
            start_time: now,
            end_time: now + ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::minutes(15)),
            max_length_hours: team.tier.max_length_hours,
            auto_pause,
            allow_internet_access: request.allow_internet_access.unwrap_or(true),
            envd_access_token: None,
            state: SandboxState::Running,
        };
        self.issue_access_token(&mut sandbox).await;

        self.admit(team, sandbox, &request.machine).await
    }

    /// Resume a paused sandbox from its snapshot under a fresh execution id.
    pub async fn resume_sandbox(
        &self,
        team: &TeamInfo,
        sandbox_id: &str,
        ttl: Option<Duration>,
    ) -> Result<Sandbox> {
        self.check_intake()?;

        if let Ok(live) = self.store.get(sandbox_id).await
            && live.state == SandboxState::Running
        {
            return Err(Error::AlreadyExists(format!("sandbox {sandbox_id}")));
        }

        let (snapshot, builds) = self.db.get_snapshot_builds(sandbox_id).await?;
        if snapshot.team_id != team.team_id() {
            return Err(Error::forbidden("sandbox belongs to another team"));
        }
        let build = builds
            .iter()
            .find(|b| b.status == BuildStatus::Uploaded)
            .ok_or_else(|| Error::not_found(format!("snapshot build for {sandbox_id}")))?;

        // A paused entry may still sit in the store; discard it before
        // re-admitting the new execution.
        if self.store.get(sandbox_id).await.is_ok() {
            self.store.remove(sandbox_id).await?;
        }

        let now = Utc::now();
        let ttl = self.clamp_ttl(team, ttl);
        let mut sandbox = Sandbox {
            sandbox_id: snapshot.sandbox_id.clone(),
            execution_id: Uuid::new_v4().to_string(),
            template_id: snapshot.template_id.clone(),
            build_id: build.build_id,
            base_template_id: snapshot.base_template_id.clone(),
            team_id: snapshot.team_id,
            alias: None,
            node_id: String::new(),
            cluster_id: Uuid::nil(),
            vcpu: snapshot.vcpu,
            ram_mb: snapshot.ram_mb,
            total_disk_size_mb: snapshot.total_disk_size_mb,
            kernel_version: snapshot.kernel_version.clone(),
            firecracker_version: snapshot.firecracker_version.clone(),
            envd_version: snapshot.envd_version.clone(),
            metadata: snapshot.metadata.clone(),
            start_time: now,
            end_time: now + ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::minutes(15)),
            max_length_hours: team.tier.max_length_hours,
            auto_pause: snapshot.auto_pause,
            allow_internet_access: snapshot.allow_internet_access,
            envd_access_token: None,
            state: SandboxState::Running,
        };
        self.issue_access_token(&mut sandbox).await;

        self.admit(team, sandbox, &MachineQuery::default()).await
    }

    /// Place and record a sandbox. The store admit happens after the worker
    /// acknowledged the create; a store conflict rolls the worker back. A
    /// sandbox that never admits can never be killed, so every failure path
    /// here must also revoke the token issued for it.
    async fn admit(
        &self,
        team: &TeamInfo,
        mut sandbox: Sandbox,
        machine: &MachineQuery,
    ) -> Result<Sandbox> {
        let node = match self.scheduler.place(team, &sandbox, machine).await {
            Ok(node) => node,
            Err(err) => {
                self.revoke_access_token(&sandbox).await;
                return Err(err);
            }
        };
        sandbox.node_id = node.node_id().to_string();
        sandbox.cluster_id = node.cluster_id();

        if let Err(err) = self.store.add(sandbox.clone()).await {
            if let Err(cleanup_err) = node
                .worker()
                .delete_sandbox(&sandbox.sandbox_id, &sandbox.execution_id)
                .await
            {
                warn!(sandbox_id = %sandbox.sandbox_id, error = %cleanup_err, "rollback delete failed");
            }
            self.revoke_access_token(&sandbox).await;
            return Err(err);
        }
        node.add_sandbox(&sandbox);

        info!(
            sandbox_id = %sandbox.sandbox_id,
            node_id = %sandbox.node_id,
            team_id = %sandbox.team_id,
            "sandbox running"
        );
        Ok(sandbox)
    }

    /// Extend a sandbox's deadline; shortening fails with `CannotShortenTtl`.
    pub async fn extend_deadline(
        &self,
        sandbox_id: &str,
        end_time: chrono::DateTime<Utc>,
    ) -> Result<Sandbox> {
        let updated = self
            .store
            .update(
                sandbox_id,
                Box::new(move |current| {
                    let mut next = current.clone();
                    next.end_time = end_time;
                    Ok(next)
                }),
            )
            .await?;

        // Propagate so the worker's own bookkeeping follows; the store value
        // already rules.
        if let Ok(node) = self.pool.get(&updated.node_id)
            && let Err(err) = node
                .worker()
                .update_sandbox(sandbox_id, updated.end_time)
                .await
        {
            warn!(sandbox_id = %sandbox_id, error = %err, "worker deadline update failed");
        }
        Ok(updated)
    }

    pub async fn kill_sandbox(&self, sandbox_id: &str) -> Result<()> {
        self.remove_with_action(sandbox_id, StateAction::Kill).await
    }

    pub async fn pause_sandbox(&self, sandbox_id: &str) -> Result<()> {
        self.remove_with_action(sandbox_id, StateAction::Pause).await
    }

    async fn remove_with_action(&self, sandbox_id: &str, action: StateAction) -> Result<()> {
        let claim = self.store.start_removing(sandbox_id, action).await?;
        if claim.already_done {
            return Ok(());
        }
        let outcome = self.remove_sandbox_on_node(&claim.sandbox, action).await;
        self.store
            .finish_removing(&claim, outcome.is_ok())
            .await?;
        outcome
    }

    /// The removal side effect: reach the owning node, effect the pause or
    /// kill, and settle bookkeeping. Shared by the API paths and the evictor.
    pub(crate) async fn remove_sandbox_on_node(
        &self,
        sandbox: &Sandbox,
        action: StateAction,
    ) -> Result<()> {
        let node = self.pool.get(&sandbox.node_id)?;

        match action {
            StateAction::Kill => {
                node.worker()
                    .delete_sandbox(&sandbox.sandbox_id, &sandbox.execution_id)
                    .await?;
            }
            StateAction::Pause => {
                let snapshot_template_id = Uuid::new_v4().to_string();
                let snapshot_build_id = Uuid::new_v4();
                node.worker()
                    .pause_sandbox(&sandbox.sandbox_id, &snapshot_template_id, snapshot_build_id)
                    .await?;

                self.db
                    .upsert_snapshot(SnapshotRecord {
                        sandbox_id: sandbox.sandbox_id.clone(),
                        template_id: snapshot_template_id.clone(),
                        build_id: snapshot_build_id,
                        base_template_id: sandbox.base_template_id.clone(),
                        team_id: sandbox.team_id,
                        vcpu: sandbox.vcpu,
                        ram_mb: sandbox.ram_mb,
                        total_disk_size_mb: sandbox.total_disk_size_mb,
                        kernel_version: sandbox.kernel_version.clone(),
                        firecracker_version: sandbox.firecracker_version.clone(),
                        envd_version: sandbox.envd_version.clone(),
                        metadata: sandbox.metadata.clone(),
                        auto_pause: sandbox.auto_pause,
                        allow_internet_access: sandbox.allow_internet_access,
                        paused_at: Utc::now(),
                    })
                    .await?;
                // The snapshot build the worker just materialized.
                self.db
                    .create_env_build(TemplateBuild {
                        build_id: snapshot_build_id,
                        template_id: snapshot_template_id,
                        team_id: sandbox.team_id,
                        status: BuildStatus::Uploaded,
                        created_at: Utc::now(),
                        cluster_id: sandbox.cluster_id,
                        node_id: Some(sandbox.node_id.clone()),
                        reason: None,
                        rootfs_size_mb: Some(sandbox.total_disk_size_mb),
                        envd_version: Some(sandbox.envd_version.clone()),
                    })
                    .await?;
            }
        }

        // The token is scoped to this execution; a resumed sandbox gets a
        // fresh one, so the outgoing token dies on pause as well as kill.
        self.revoke_access_token(sandbox).await;
        node.remove_sandbox(sandbox);
        Ok(())
    }

    fn clamp_ttl(&self, team: &TeamInfo, requested: Option<Duration>) -> Duration {
        let cap = Duration::from_secs(team.tier.max_length_hours.max(0) as u64 * 3600);
        requested.unwrap_or(DEFAULT_SANDBOX_TTL).min(cap)
    }

    async fn issue_access_token(&self, sandbox: &mut Sandbox) {
        let token = URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes());
        let secret_id = sandbox
            .execution_id
            .parse::<Uuid>()
            .unwrap_or_else(|_| Uuid::new_v4());
        let path = team_secret_path(sandbox.team_id, secret_id);
        if let Err(err) = self
            .secrets
            .write_secret(&path, &token, SecretMetadata::default())
            .await
        {
            warn!(sandbox_id = %sandbox.sandbox_id, error = %err, "access token write failed");
            return;
        }
        sandbox.envd_access_token = Some(token);
    }

    async fn revoke_access_token(&self, sandbox: &Sandbox) {
        if sandbox.envd_access_token.is_none() {
            return;
        }
        let Ok(secret_id) = sandbox.execution_id.parse::<Uuid>() else {
            return;
        };
        let path = team_secret_path(sandbox.team_id, secret_id);
        if let Err(err) = self.secrets.delete_secret(&path).await {
            warn!(sandbox_id = %sandbox.sandbox_id, error = %err, "access token delete failed");
        }
    }

    /// Graceful shutdown: stop intake, let the evictor drain one tick, stop
    /// the background loops, close every node handle.
    pub async fn shutdown(&self) {
        self.draining.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "background task ended abnormally");
            }
        }
        self.pool.close_all();
        info!("control plane stopped");
    }
}
