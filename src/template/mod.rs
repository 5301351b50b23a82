//! Template builds: the status-polling orchestrator, the periodic sweep, and
//! the short-TTL template lookup cache.

pub mod cache;
pub mod orchestrator;
pub mod sweep;

pub use cache::TemplateCache;
pub use orchestrator::{BuildOrchestrator, BuildTimeouts, RegisterBuildRequest};
pub use sweep::BuilderHealth;
