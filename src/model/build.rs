//! Template build records and persistent status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Persistent status of a template build.
///
/// Legal histories are `Waiting -> Building -> Uploaded`,
/// `Waiting -> Building -> Failed` and `Waiting -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Waiting,
    Building,
    Uploaded,
    Failed,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildStatus::Uploaded | BuildStatus::Failed)
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BuildStatus::Waiting => "waiting",
            BuildStatus::Building => "building",
            BuildStatus::Uploaded => "uploaded",
            BuildStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Structured reason stored with a failed build.
///
/// Older rows persisted the reason as a bare string; those decode into
/// `{ message, step: None }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReason {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

impl FailureReason {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            step: None,
        }
    }

    pub fn at_step(message: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            step: Some(step.into()),
        }
    }
}

impl<'de> Deserialize<'de> for FailureReason {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Structured {
                message: String,
                #[serde(default)]
                step: Option<String>,
            },
            Legacy(String),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Structured { message, step } => FailureReason { message, step },
            Repr::Legacy(message) => FailureReason {
                message,
                step: None,
            },
        })
    }
}

/// One attempt to materialize a template version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateBuild {
    pub build_id: Uuid,
    pub template_id: String,
    pub team_id: Uuid,
    pub status: BuildStatus,
    pub created_at: DateTime<Utc>,
    pub cluster_id: Uuid,
    pub node_id: Option<String>,
    pub reason: Option<FailureReason>,
    pub rootfs_size_mb: Option<u64>,
    pub envd_version: Option<String>,
}
