//! Feature-flag capability.
//!
//! The core only queries booleans; the SDK-backed implementation is provided
//! by the embedding service. `StaticFlags` answers from a fixed table and is
//! the default backend.

use std::collections::HashMap;

pub trait FeatureFlags: Send + Sync {
    /// Evaluate a boolean flag, falling back to `default` when the flag is
    /// unknown or the backend is unavailable.
    fn bool_flag(&self, name: &str, default: bool) -> bool;
}

/// Flags known at process start.
#[derive(Debug, Clone, Default)]
pub struct StaticFlags {
    values: HashMap<String, bool>,
}

impl StaticFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flag(mut self, name: &str, value: bool) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }
}

impl FeatureFlags for StaticFlags {
    fn bool_flag(&self, name: &str, default: bool) -> bool {
        self.values.get(name).copied().unwrap_or(default)
    }
}

/// Flag gating whether sandboxes default to auto-pause at TTL expiry.
pub const FLAG_AUTO_PAUSE_DEFAULT: &str = "sandbox-auto-pause-default";
