//! Tenant identity and tier limits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The team row as stored by the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamRecord {
    pub id: Uuid,
    pub name: String,
    pub is_banned: bool,
    pub is_blocked: bool,
    pub blocked_reason: Option<String>,
}

/// Resource limits attached to a team's pricing tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierLimits {
    pub max_vcpu: u32,
    pub max_ram_mb: u64,
    pub disk_mb: u64,
    pub concurrent_instances: i64,
    pub concurrent_template_builds: i64,
    pub max_length_hours: i64,
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            max_vcpu: 8,
            max_ram_mb: 8192,
            disk_mb: 10240,
            concurrent_instances: 20,
            concurrent_template_builds: 3,
            max_length_hours: 24,
        }
    }
}

/// Cached tenant identity handed to request handlers.
#[derive(Debug, Clone)]
pub struct TeamInfo {
    pub team: TeamRecord,
    pub tier: TierLimits,
    pub last_refresh: DateTime<Utc>,
}

impl TeamInfo {
    pub fn team_id(&self) -> Uuid {
        self.team.id
    }
}
