//! Tenant identity cache.
//!
//! Maps a credential to its `TeamInfo` with a short TTL. Stale entries are
//! served immediately while a detached single-flight refresh runs; a failed
//! refresh invalidates the entry instead of overwriting a good value.
//! Forbidden/blocked outcomes are cached like positive ones so a banned
//! tenant cannot storm the database.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::model::team::{TeamInfo, TeamRecord, TierLimits};

/// How long a resolution stays servable at all.
const AUTH_INFO_EXPIRATION: Duration = Duration::from_secs(5 * 60);
/// Age past which a served entry triggers a background refresh.
const REFRESH_INTERVAL: Duration = Duration::from_secs(60);
/// Deadline for one backing-store lookup, detached from the requester.
const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// A tenant credential as presented at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Credential {
    ApiKey(String),
    TeamUser { team_id: Uuid, user_id: Uuid },
}

impl Credential {
    fn cache_key(&self) -> String {
        match self {
            Credential::ApiKey(key) => format!("key:{key}"),
            Credential::TeamUser { team_id, user_id } => format!("team:{team_id}:{user_id}"),
        }
    }
}

/// Cached outcome of a lookup. Negative outcomes are first-class so callers
/// can distinguish a banned tenant from an unknown one.
#[derive(Debug, Clone)]
enum Resolution {
    Allowed(TeamInfo),
    Forbidden(String),
    Blocked(String),
}

impl Resolution {
    fn into_result(self) -> Result<TeamInfo> {
        match self {
            Resolution::Allowed(info) => Ok(info),
            Resolution::Forbidden(reason) => Err(Error::Forbidden { reason }),
            Resolution::Blocked(reason) => Err(Error::Blocked { reason }),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    resolution: Resolution,
    refreshed_at: Instant,
}

type FlightResult = Option<Result<Resolution>>;

pub struct TeamCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    db: Arc<dyn Database>,
    entries: DashMap<String, CacheEntry>,
    inflight: Mutex<HashMap<String, watch::Receiver<FlightResult>>>,
}

impl TeamCache {
    pub fn new(db: Arc<dyn Database>) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(CacheInner {
                db,
                entries: DashMap::new(),
                inflight: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Resolve a credential to its tenant identity.
    ///
    /// Serves from cache when fresh enough; a stale-but-present entry is
    /// returned immediately while a refresh runs in the background. A miss or
    /// hard-expired entry blocks on the (single-flight) lookup.
    pub async fn resolve(&self, credential: &Credential) -> Result<TeamInfo> {
        let key = credential.cache_key();

        if let Some(entry) = self.inner.entries.get(&key) {
            let age = entry.refreshed_at.elapsed();
            if age < AUTH_INFO_EXPIRATION {
                let resolution = entry.resolution.clone();
                drop(entry);
                if age >= REFRESH_INTERVAL {
                    spawn_refresh(&self.inner, key, credential.clone());
                }
                return resolution.into_result();
            }
        }

        // Miss or hard-expired: join the in-flight lookup, or start one.
        let mut rx = join_flight(&self.inner, key, credential.clone());
        let outcome = rx
            .wait_for(|v| v.is_some())
            .await
            .map_err(|_| Error::FatalTransport("auth refresh task dropped".to_string()))?
            .clone();
        match outcome {
            Some(Ok(resolution)) => resolution.into_result(),
            Some(Err(err)) => Err(err),
            None => unreachable!("wait_for guarantees a value"),
        }
    }
}

/// Start a background refresh unless one is already in flight.
fn spawn_refresh(inner: &Arc<CacheInner>, key: String, credential: Credential) {
    let mut inflight = inner.inflight.lock();
    if inflight.contains_key(&key) {
        return;
    }
    let (tx, rx) = watch::channel(None);
    inflight.insert(key.clone(), rx);
    drop(inflight);

    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        inner.run_flight(key, credential, tx).await;
    });
}

/// Join the in-flight lookup for `key`, starting one if absent.
fn join_flight(
    inner: &Arc<CacheInner>,
    key: String,
    credential: Credential,
) -> watch::Receiver<FlightResult> {
    let mut inflight = inner.inflight.lock();
    if let Some(rx) = inflight.get(&key) {
        return rx.clone();
    }
    let (tx, rx) = watch::channel(None);
    inflight.insert(key.clone(), rx.clone());
    drop(inflight);

    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        inner.run_flight(key, credential, tx).await;
    });
    rx
}

impl CacheInner {
    async fn run_flight(
        &self,
        key: String,
        credential: Credential,
        tx: watch::Sender<FlightResult>,
    ) {
        let outcome = match tokio::time::timeout(REFRESH_TIMEOUT, self.lookup(&credential)).await
        {
            Ok(result) => result,
            Err(_) => Err(Error::DeadlineExceeded(
                "team lookup timed out".to_string(),
            )),
        };

        match &outcome {
            Ok(resolution) => {
                self.entries.insert(
                    key.clone(),
                    CacheEntry {
                        resolution: resolution.clone(),
                        refreshed_at: Instant::now(),
                    },
                );
            }
            Err(err) => {
                // A failed refresh must not leave a rotten value behind.
                self.entries.remove(&key);
                warn!(key = %key, error = %err, "team refresh failed, entry invalidated");
            }
        }

        self.inflight.lock().remove(&key);
        let _ = tx.send(Some(outcome));
    }

    async fn lookup(&self, credential: &Credential) -> Result<Resolution> {
        let (record, tier) = match credential {
            Credential::ApiKey(api_key) => {
                let found = self.db.get_team_with_tier_by_api_key(api_key).await?;
                if let Err(err) = self.db.update_last_time_used(api_key).await {
                    warn!(error = %err, "failed to record api key use");
                }
                found
            }
            Credential::TeamUser { team_id, user_id } => {
                self.db
                    .get_team_with_tier_by_team_and_user(*team_id, *user_id)
                    .await?
            }
        };

        Ok(Self::classify(record, tier))
    }

    fn classify(record: TeamRecord, tier: TierLimits) -> Resolution {
        if record.is_banned {
            return Resolution::Forbidden("team is banned".to_string());
        }
        if record.is_blocked {
            let reason = record
                .blocked_reason
                .clone()
                .unwrap_or_else(|| "team is blocked".to_string());
            return Resolution::Blocked(reason);
        }
        Resolution::Allowed(TeamInfo {
            team: record,
            tier,
            last_refresh: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use crate::db::{SnapshotRecord, TemplateWithBuild};
    use crate::model::build::{BuildStatus, FailureReason, TemplateBuild};

    /// A database stub that only answers team lookups and counts them.
    struct StubDb {
        record: TeamRecord,
        lookups: AtomicU32,
        failing: AtomicBool,
    }

    impl StubDb {
        fn new(record: TeamRecord) -> Arc<Self> {
            Arc::new(Self {
                record,
                lookups: AtomicU32::new(0),
                failing: AtomicBool::new(false),
            })
        }

        fn lookup_count(&self) -> u32 {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Database for StubDb {
        async fn get_team_with_tier_by_api_key(
            &self,
            _api_key: &str,
        ) -> Result<(TeamRecord, TierLimits)> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::RetryableTransport("db down".to_string()));
            }
            Ok((self.record.clone(), TierLimits::default()))
        }

        async fn get_team_with_tier_by_team_and_user(
            &self,
            _team_id: Uuid,
            _user_id: Uuid,
        ) -> Result<(TeamRecord, TierLimits)> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok((self.record.clone(), TierLimits::default()))
        }

        async fn update_last_time_used(&self, _api_key: &str) -> Result<()> {
            Ok(())
        }

        async fn upsert_snapshot(&self, _snapshot: SnapshotRecord) -> Result<()> {
            unimplemented!()
        }

        async fn get_snapshot_builds(
            &self,
            _sandbox_id: &str,
        ) -> Result<(SnapshotRecord, Vec<TemplateBuild>)> {
            unimplemented!()
        }

        async fn get_in_progress_template_builds(&self) -> Result<Vec<TemplateBuild>> {
            unimplemented!()
        }

        async fn get_env_build(&self, _build_id: Uuid) -> Result<TemplateBuild> {
            unimplemented!()
        }

        async fn create_env_build(&self, _build: TemplateBuild) -> Result<()> {
            unimplemented!()
        }

        async fn env_build_set_status(
            &self,
            _build_id: Uuid,
            _status: BuildStatus,
            _reason: Option<FailureReason>,
        ) -> Result<()> {
            unimplemented!()
        }

        async fn finish_env_build(
            &self,
            _build_id: Uuid,
            _rootfs_size_mb: u64,
            _envd_version: &str,
        ) -> Result<()> {
            unimplemented!()
        }

        async fn get_template_with_build_by_tag(&self, _tag: &str) -> Result<TemplateWithBuild> {
            unimplemented!()
        }

        async fn count_in_progress_builds_for_team(&self, _team_id: Uuid) -> Result<i64> {
            unimplemented!()
        }

        async fn fail_in_progress_builds(
            &self,
            _template_id: &str,
            _reason: FailureReason,
        ) -> Result<()> {
            unimplemented!()
        }

        async fn claim_alias(&self, _alias: &str, _template_id: &str) -> Result<()> {
            unimplemented!()
        }
    }

    fn ok_team() -> TeamRecord {
        TeamRecord {
            id: Uuid::new_v4(),
            name: "acme".to_string(),
            is_banned: false,
            is_blocked: false,
            blocked_reason: None,
        }
    }

    async fn settle() {
        // Let detached refresh tasks run to completion.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_second_resolve_hits_cache() {
        let db = StubDb::new(ok_team());
        let cache = TeamCache::new(db.clone() as Arc<dyn Database>);
        let cred = Credential::ApiKey("key-1".to_string());

        cache.resolve(&cred).await.unwrap();
        cache.resolve(&cred).await.unwrap();
        assert_eq!(db.lookup_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_served_and_refreshed_once() {
        let db = StubDb::new(ok_team());
        let cache = TeamCache::new(db.clone() as Arc<dyn Database>);
        let cred = Credential::ApiKey("key-1".to_string());

        cache.resolve(&cred).await.unwrap();
        assert_eq!(db.lookup_count(), 1);

        tokio::time::advance(REFRESH_INTERVAL + Duration::from_secs(1)).await;

        // Several concurrent-ish stale reads all serve immediately and
        // collapse into one background lookup.
        for _ in 0..5 {
            cache.resolve(&cred).await.unwrap();
        }
        settle().await;
        assert_eq!(db.lookup_count(), 2);

        // Freshly refreshed: no further lookups within the interval.
        cache.resolve(&cred).await.unwrap();
        settle().await;
        assert_eq!(db.lookup_count(), 2);
    }

    #[tokio::test]
    async fn test_banned_team_is_forbidden_and_cached() {
        let mut record = ok_team();
        record.is_banned = true;
        let db = StubDb::new(record);
        let cache = TeamCache::new(db.clone() as Arc<dyn Database>);
        let cred = Credential::ApiKey("key-1".to_string());

        let err = cache.resolve(&cred).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));
        let err = cache.resolve(&cred).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));
        assert_eq!(db.lookup_count(), 1);
    }

    #[tokio::test]
    async fn test_blocked_team_is_distinct_from_forbidden() {
        let mut record = ok_team();
        record.is_blocked = true;
        record.blocked_reason = Some("payment overdue".to_string());
        let db = StubDb::new(record);
        let cache = TeamCache::new(db as Arc<dyn Database>);
        let cred = Credential::ApiKey("key-1".to_string());

        match cache.resolve(&cred).await.unwrap_err() {
            Error::Blocked { reason } => assert_eq!(reason, "payment overdue"),
            other => panic!("expected Blocked, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_invalidates_entry() {
        let db = StubDb::new(ok_team());
        let cache = TeamCache::new(db.clone() as Arc<dyn Database>);
        let cred = Credential::ApiKey("key-1".to_string());

        cache.resolve(&cred).await.unwrap();
        db.failing.store(true, Ordering::SeqCst);

        tokio::time::advance(REFRESH_INTERVAL + Duration::from_secs(1)).await;
        // Stale value still served while the doomed refresh runs.
        cache.resolve(&cred).await.unwrap();
        settle().await;

        // The entry is gone now, so the next resolve goes to the database and
        // surfaces its failure.
        let err = cache.resolve(&cred).await.unwrap_err();
        assert!(matches!(err, Error::RetryableTransport(_)));
    }
}
