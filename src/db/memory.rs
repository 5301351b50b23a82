//! In-memory reference backend for the `Database` capability.
//!
//! Backs the standalone binary and the test suite. Semantics mirror the SQL
//! backend: snapshot rows are unique per sandbox id, build rows unique per
//! build id, terminal build statuses are immutable.

use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use async_trait::async_trait;

use crate::db::{Database, SnapshotRecord, TemplateWithBuild};
use crate::error::{Error, Result};
use crate::model::build::{BuildStatus, FailureReason, TemplateBuild};
use crate::model::team::{TeamRecord, TierLimits};

#[derive(Debug, Clone)]
struct TeamRow {
    record: TeamRecord,
    tier: TierLimits,
}

#[derive(Debug, Clone, Default)]
struct TemplateRow {
    team_id: Uuid,
    aliases: Vec<String>,
}

#[derive(Default)]
pub struct MemoryDatabase {
    api_keys: DashMap<String, Uuid>,
    teams: DashMap<Uuid, TeamRow>,
    memberships: DashMap<(Uuid, Uuid), ()>,
    last_used: DashMap<String, chrono::DateTime<Utc>>,
    snapshots: DashMap<String, SnapshotRecord>,
    builds: DashMap<Uuid, TemplateBuild>,
    templates: DashMap<String, TemplateRow>,
    aliases: DashMap<String, String>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a team reachable through `api_key`.
    pub fn insert_team(&self, api_key: &str, record: TeamRecord, tier: TierLimits) {
        self.api_keys.insert(api_key.to_string(), record.id);
        self.teams.insert(record.id, TeamRow { record, tier });
    }

    pub fn insert_membership(&self, team_id: Uuid, user_id: Uuid) {
        self.memberships.insert((team_id, user_id), ());
    }

    pub fn insert_template(&self, template_id: &str, team_id: Uuid) {
        self.templates.insert(
            template_id.to_string(),
            TemplateRow {
                team_id,
                aliases: Vec::new(),
            },
        );
    }

    pub fn last_used(&self, api_key: &str) -> Option<chrono::DateTime<Utc>> {
        self.last_used.get(api_key).map(|v| *v)
    }

    fn team_row(&self, team_id: Uuid) -> Result<TeamRow> {
        self.teams
            .get(&team_id)
            .map(|row| row.clone())
            .ok_or_else(|| Error::not_found(format!("team {team_id}")))
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn get_team_with_tier_by_api_key(
        &self,
        api_key: &str,
    ) -> Result<(TeamRecord, TierLimits)> {
        let team_id = *self
            .api_keys
            .get(api_key)
            .ok_or_else(|| Error::not_found("api key"))?;
        let row = self.team_row(team_id)?;
        Ok((row.record, row.tier))
    }

    async fn get_team_with_tier_by_team_and_user(
        &self,
        team_id: Uuid,
        user_id: Uuid,
    ) -> Result<(TeamRecord, TierLimits)> {
        if !self.memberships.contains_key(&(team_id, user_id)) {
            return Err(Error::not_found(format!(
                "membership of user {user_id} in team {team_id}"
            )));
        }
        let row = self.team_row(team_id)?;
        Ok((row.record, row.tier))
    }

    async fn update_last_time_used(&self, api_key: &str) -> Result<()> {
        self.last_used.insert(api_key.to_string(), Utc::now());
        Ok(())
    }

    async fn upsert_snapshot(&self, snapshot: SnapshotRecord) -> Result<()> {
        self.snapshots
            .insert(snapshot.sandbox_id.clone(), snapshot);
        Ok(())
    }

    async fn get_snapshot_builds(
        &self,
        sandbox_id: &str,
    ) -> Result<(SnapshotRecord, Vec<TemplateBuild>)> {
        let snapshot = self
            .snapshots
            .get(sandbox_id)
            .map(|s| s.clone())
            .ok_or_else(|| Error::not_found(format!("snapshot for sandbox {sandbox_id}")))?;

        let mut builds: Vec<TemplateBuild> = self
            .builds
            .iter()
            .filter(|b| b.template_id == snapshot.template_id)
            .map(|b| b.clone())
            .collect();
        builds.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok((snapshot, builds))
    }

    async fn get_in_progress_template_builds(&self) -> Result<Vec<TemplateBuild>> {
        Ok(self
            .builds
            .iter()
            .filter(|b| !b.status.is_terminal())
            .map(|b| b.clone())
            .collect())
    }

    async fn get_env_build(&self, build_id: Uuid) -> Result<TemplateBuild> {
        self.builds
            .get(&build_id)
            .map(|b| b.clone())
            .ok_or_else(|| Error::not_found(format!("build {build_id}")))
    }

    async fn create_env_build(&self, build: TemplateBuild) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        match self.builds.entry(build.build_id) {
            Entry::Occupied(_) => Err(Error::AlreadyExists(format!("build {}", build.build_id))),
            Entry::Vacant(slot) => {
                self.templates
                    .entry(build.template_id.clone())
                    .or_insert_with(|| TemplateRow {
                        team_id: build.team_id,
                        aliases: Vec::new(),
                    });
                slot.insert(build);
                Ok(())
            }
        }
    }

    async fn env_build_set_status(
        &self,
        build_id: Uuid,
        status: BuildStatus,
        reason: Option<FailureReason>,
    ) -> Result<()> {
        let mut build = self
            .builds
            .get_mut(&build_id)
            .ok_or_else(|| Error::not_found(format!("build {build_id}")))?;

        // Terminal rows are immutable; late writers lose quietly so that
        // at-least-once status sync stays idempotent.
        if build.status.is_terminal() && build.status != status {
            return Ok(());
        }

        build.status = status;
        if status == BuildStatus::Failed {
            build.reason = reason;
        }
        Ok(())
    }

    async fn finish_env_build(
        &self,
        build_id: Uuid,
        rootfs_size_mb: u64,
        envd_version: &str,
    ) -> Result<()> {
        let mut build = self
            .builds
            .get_mut(&build_id)
            .ok_or_else(|| Error::not_found(format!("build {build_id}")))?;

        if build.status.is_terminal() {
            return Ok(());
        }

        build.status = BuildStatus::Uploaded;
        build.rootfs_size_mb = Some(rootfs_size_mb);
        build.envd_version = Some(envd_version.to_string());
        Ok(())
    }

    async fn get_template_with_build_by_tag(&self, tag: &str) -> Result<TemplateWithBuild> {
        let template_id = match self.aliases.get(tag) {
            Some(id) => id.clone(),
            None => tag.to_string(),
        };

        let row = self
            .templates
            .get(&template_id)
            .map(|t| t.clone())
            .ok_or_else(|| Error::not_found(format!("template {tag}")))?;

        let mut builds: Vec<TemplateBuild> = self
            .builds
            .iter()
            .filter(|b| b.template_id == template_id)
            .map(|b| b.clone())
            .collect();
        builds.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let build = builds
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(format!("builds for template {tag}")))?;

        Ok(TemplateWithBuild {
            template_id,
            team_id: row.team_id,
            aliases: row.aliases,
            build,
        })
    }

    async fn count_in_progress_builds_for_team(&self, team_id: Uuid) -> Result<i64> {
        Ok(self
            .builds
            .iter()
            .filter(|b| b.team_id == team_id && !b.status.is_terminal())
            .count() as i64)
    }

    async fn fail_in_progress_builds(
        &self,
        template_id: &str,
        reason: FailureReason,
    ) -> Result<()> {
        for mut build in self.builds.iter_mut() {
            if build.template_id == template_id && !build.status.is_terminal() {
                build.status = BuildStatus::Failed;
                build.reason = Some(reason.clone());
            }
        }
        Ok(())
    }

    async fn claim_alias(&self, alias: &str, template_id: &str) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        match self.aliases.entry(alias.to_string()) {
            Entry::Occupied(existing) => {
                if existing.get() == template_id {
                    Ok(())
                } else {
                    Err(Error::AlreadyExists(format!("alias {alias}")))
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(template_id.to_string());
                if let Some(mut row) = self.templates.get_mut(template_id) {
                    row.aliases.push(alias.to_string());
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team() -> (TeamRecord, TierLimits) {
        (
            TeamRecord {
                id: Uuid::new_v4(),
                name: "acme".to_string(),
                is_banned: false,
                is_blocked: false,
                blocked_reason: None,
            },
            TierLimits::default(),
        )
    }

    fn build_for(template_id: &str, team_id: Uuid) -> TemplateBuild {
        TemplateBuild {
            build_id: Uuid::new_v4(),
            template_id: template_id.to_string(),
            team_id,
            status: BuildStatus::Waiting,
            created_at: Utc::now(),
            cluster_id: Uuid::nil(),
            node_id: None,
            reason: None,
            rootfs_size_mb: None,
            envd_version: None,
        }
    }

    #[tokio::test]
    async fn test_api_key_lookup() {
        let db = MemoryDatabase::new();
        let (record, tier) = team();
        let team_id = record.id;
        db.insert_team("key-1", record, tier);

        let (found, _) = db.get_team_with_tier_by_api_key("key-1").await.unwrap();
        assert_eq!(found.id, team_id);

        let err = db.get_team_with_tier_by_api_key("key-2").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_build_uniqueness() {
        let db = MemoryDatabase::new();
        let build = build_for("tmpl-1", Uuid::new_v4());
        db.create_env_build(build.clone()).await.unwrap();
        let err = db.create_env_build(build).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_terminal_status_is_immutable() {
        let db = MemoryDatabase::new();
        let build = build_for("tmpl-1", Uuid::new_v4());
        let id = build.build_id;
        db.create_env_build(build).await.unwrap();

        db.env_build_set_status(id, BuildStatus::Building, None)
            .await
            .unwrap();
        db.finish_env_build(id, 1024, "0.2.4").await.unwrap();

        // A late failure report must not undo the upload.
        db.env_build_set_status(id, BuildStatus::Failed, Some(FailureReason::new("late")))
            .await
            .unwrap();
        let found = db.get_env_build(id).await.unwrap();
        assert_eq!(found.status, BuildStatus::Uploaded);
        assert_eq!(found.rootfs_size_mb, Some(1024));
    }

    #[tokio::test]
    async fn test_alias_claim_conflict() {
        let db = MemoryDatabase::new();
        let team_id = Uuid::new_v4();
        db.insert_template("tmpl-1", team_id);
        db.insert_template("tmpl-2", team_id);

        db.claim_alias("web", "tmpl-1").await.unwrap();
        // Re-claiming for the same template is idempotent.
        db.claim_alias("web", "tmpl-1").await.unwrap();
        let err = db.claim_alias("web", "tmpl-2").await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_template_lookup_by_alias_returns_newest_build() {
        let db = MemoryDatabase::new();
        let team_id = Uuid::new_v4();
        db.insert_template("tmpl-1", team_id);
        db.claim_alias("web", "tmpl-1").await.unwrap();

        let mut old = build_for("tmpl-1", team_id);
        old.created_at = Utc::now() - chrono::Duration::hours(1);
        let new = build_for("tmpl-1", team_id);
        let newest_id = new.build_id;
        db.create_env_build(old).await.unwrap();
        db.create_env_build(new).await.unwrap();

        let found = db.get_template_with_build_by_tag("web").await.unwrap();
        assert_eq!(found.template_id, "tmpl-1");
        assert_eq!(found.build.build_id, newest_id);
    }

    #[tokio::test]
    async fn test_fail_in_progress_builds_spares_terminal_rows() {
        let db = MemoryDatabase::new();
        let team_id = Uuid::new_v4();
        let done = build_for("tmpl-1", team_id);
        let done_id = done.build_id;
        let pending = build_for("tmpl-1", team_id);
        let pending_id = pending.build_id;
        db.create_env_build(done).await.unwrap();
        db.create_env_build(pending).await.unwrap();
        db.finish_env_build(done_id, 512, "0.2.4").await.unwrap();

        db.fail_in_progress_builds("tmpl-1", FailureReason::new("superseded"))
            .await
            .unwrap();

        assert_eq!(
            db.get_env_build(done_id).await.unwrap().status,
            BuildStatus::Uploaded
        );
        let failed = db.get_env_build(pending_id).await.unwrap();
        assert_eq!(failed.status, BuildStatus::Failed);
        assert_eq!(failed.reason.unwrap().message, "superseded");
    }
}
