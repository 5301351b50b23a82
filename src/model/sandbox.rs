//! The sandbox record and its lifecycle state machine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle state of a sandbox as tracked by the store.
///
/// `Killed` is terminal; entries never stay in the store once they reach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Running,
    Pausing,
    Paused,
    Killing,
    Killed,
}

impl SandboxState {
    /// Whether the state machine permits a transition to `next`.
    ///
    /// A kill supersedes an in-flight pause, so `Pausing -> Killing` is legal.
    /// There is no back-edge out of `Paused` other than `Killing`; resuming a
    /// paused sandbox admits a brand-new execution instead.
    pub fn can_transition_to(self, next: SandboxState) -> bool {
        use SandboxState::*;
        matches!(
            (self, next),
            (Running, Pausing)
                | (Running, Killing)
                | (Pausing, Paused)
                | (Pausing, Killing)
                | (Paused, Killing)
                | (Killing, Killed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == SandboxState::Killed
    }
}

impl std::fmt::Display for SandboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SandboxState::Running => "running",
            SandboxState::Pausing => "pausing",
            SandboxState::Paused => "paused",
            SandboxState::Killing => "killing",
            SandboxState::Killed => "killed",
        };
        f.write_str(s)
    }
}

/// The central sandbox record.
///
/// The store owns these; node handles refer to sandboxes only by
/// `(node_id, sandbox_id)` and consult the store when they need the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sandbox {
    pub sandbox_id: String,
    /// Unique per create/resume; re-issued when a paused sandbox resumes.
    pub execution_id: String,
    pub template_id: String,
    pub build_id: Uuid,
    pub base_template_id: String,
    pub team_id: Uuid,
    pub alias: Option<String>,
    /// Current placement.
    pub node_id: String,
    /// Zero UUID means the local single-cluster deployment.
    pub cluster_id: Uuid,
    pub vcpu: u32,
    pub ram_mb: u64,
    pub total_disk_size_mb: u64,
    pub kernel_version: String,
    pub firecracker_version: String,
    pub envd_version: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub start_time: DateTime<Utc>,
    /// The TTL anchor: the sandbox becomes evictable at `end_time`.
    pub end_time: DateTime<Utc>,
    pub max_length_hours: i64,
    pub auto_pause: bool,
    pub allow_internet_access: bool,
    pub envd_access_token: Option<String>,
    pub state: SandboxState,
}

impl Sandbox {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }

    /// The hard deadline the TTL may never exceed.
    pub fn max_end_time(&self) -> DateTime<Utc> {
        self.start_time + Duration::hours(self.max_length_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox(state: SandboxState) -> Sandbox {
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
            vcpu: 2,
            ram_mb: 512,
            total_disk_size_mb: 2048,
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
            state,
        }
    }

    #[test]
    fn test_allowed_transitions() {
        use SandboxState::*;
        assert!(Running.can_transition_to(Pausing));
        assert!(Running.can_transition_to(Killing));
        assert!(Pausing.can_transition_to(Paused));
        assert!(Pausing.can_transition_to(Killing));
        assert!(Paused.can_transition_to(Killing));
        assert!(Killing.can_transition_to(Killed));
    }

    #[test]
    fn test_forbidden_transitions() {
        use SandboxState::*;
        assert!(!Running.can_transition_to(Paused));
        assert!(!Running.can_transition_to(Killed));
        assert!(!Paused.can_transition_to(Running));
        assert!(!Paused.can_transition_to(Pausing));
        assert!(!Killing.can_transition_to(Pausing));
        assert!(!Killed.can_transition_to(Running));
        assert!(!Killing.can_transition_to(Running));
    }

    #[test]
    fn test_expiry() {
        let mut s = sandbox(SandboxState::Running);
        let now = Utc::now();
        assert!(!s.is_expired(now));
        s.end_time = now - Duration::seconds(1);
        assert!(s.is_expired(now));
        // Exactly at the deadline counts as expired.
        s.end_time = now;
        assert!(s.is_expired(now));
    }

    #[test]
    fn test_max_end_time() {
        let s = sandbox(SandboxState::Running);
        assert_eq!(s.max_end_time(), s.start_time + Duration::hours(24));
    }
}
