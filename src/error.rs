//! Error taxonomy for the control-plane boundary.
//!
//! Every fallible operation in the core surfaces one of these kinds. The HTTP
//! layer maps kinds to stable status codes; background loops log and count
//! them without propagating.

use crate::model::sandbox::SandboxState;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Structured reason attached to a `NoCapacity` refusal, identifying the
/// resource that could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityReason {
    /// No registered node matched the requested machine constraints.
    NoMatchingNodes,
    /// Matching nodes exist but none is in `Ready` status.
    NoReadyNodes,
    /// Nodes were ready but lacked CPU headroom.
    Cpu,
    /// Nodes were ready but lacked RAM headroom.
    Ram,
    /// The local template builder is not healthy.
    BuilderUnhealthy,
}

impl std::fmt::Display for CapacityReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CapacityReason::NoMatchingNodes => "no nodes match the requested machine",
            CapacityReason::NoReadyNodes => "no matching node is ready",
            CapacityReason::Cpu => "insufficient vCPU capacity",
            CapacityReason::Ram => "insufficient RAM capacity",
            CapacityReason::BuilderUnhealthy => "template builder is not healthy",
        };
        f.write_str(s)
    }
}

/// The control-plane error taxonomy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),

    #[error("forbidden: {reason}")]
    Forbidden { reason: String },

    #[error("team blocked: {reason}")]
    Blocked { reason: String },

    #[error("invalid sandbox state transition {from} -> {to}")]
    InvalidTransition { from: SandboxState, to: SandboxState },

    #[error("sandbox deadline can only be extended (current {current}, requested {requested})")]
    CannotShortenTtl {
        current: chrono::DateTime<chrono::Utc>,
        requested: chrono::DateTime<chrono::Utc>,
    },

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("no capacity: {reason}")]
    NoCapacity { reason: CapacityReason },

    #[error("too many running instances for team (limit {limit})")]
    TooManyInstances { limit: i64 },

    #[error("build cannot make progress: {reason}")]
    TerminalBuild { reason: String },

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("transient transport failure: {0}")]
    RetryableTransport(String),

    #[error("transport failure: {0}")]
    FatalTransport(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Error::Forbidden {
            reason: reason.into(),
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Error::Blocked {
            reason: reason.into(),
        }
    }

    /// Whether a retrier is allowed to attempt the operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::DeadlineExceeded(_) | Error::RetryableTransport(_)
        )
    }

    /// Whether the error came from the transport layer at all, retryable or
    /// not. Sync loops use this to decide when a node turned unreachable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::DeadlineExceeded(_) | Error::RetryableTransport(_) | Error::FatalTransport(_)
        )
    }

    /// Stable HTTP status code for the boundary layer.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::Forbidden { .. } | Error::Blocked { .. } => 403,
            Error::InvalidTransition { .. }
            | Error::CannotShortenTtl { .. }
            | Error::AlreadyExists(_) => 409,
            Error::NoCapacity { .. } => 503,
            Error::TooManyInstances { .. } => 429,
            Error::TerminalBuild { .. } => 500,
            Error::DeadlineExceeded(_) => 504,
            Error::RetryableTransport(_) | Error::FatalTransport(_) => 500,
        }
    }
}

/// Classify a gRPC status into the taxonomy, stripping tonic framing.
pub fn classify_status(status: tonic::Status) -> Error {
    use tonic::Code;
    match status.code() {
        Code::DeadlineExceeded => Error::DeadlineExceeded(status.message().to_string()),
        Code::Unavailable | Code::Aborted | Code::ResourceExhausted => {
            Error::RetryableTransport(status.message().to_string())
        }
        Code::NotFound => Error::not_found(status.message()),
        Code::PermissionDenied => Error::forbidden(status.message()),
        Code::AlreadyExists => Error::AlreadyExists(status.message().to_string()),
        _ => Error::FatalTransport(format!("{}: {}", status.code(), status.message())),
    }
}
