//! The authoritative sandbox index.
//!
//! `SandboxStorage` is the single capability contract for every backend
//! composition (memory-only, memory-fronted). Operations that only the memory
//! backend can answer (`wait_for_state_change`) are part of the contract so a
//! composed backend routes them unambiguously instead of falling through to
//! whichever layer happens to hold the entry.

pub mod evictor;
pub mod memory;
pub mod tiered;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::sandbox::{Sandbox, SandboxState};

pub use evictor::Evictor;
pub use memory::MemoryStore;
pub use tiered::TieredStore;

/// The two-valued removal choice: pause keeps a resumable snapshot, kill
/// discards the sandbox outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateAction {
    Pause,
    Kill,
}

impl StateAction {
    /// The in-progress state this action drives a sandbox into.
    pub fn transition_state(self) -> SandboxState {
        match self {
            StateAction::Pause => SandboxState::Pausing,
            StateAction::Kill => SandboxState::Killing,
        }
    }

    /// The settled state once the side effect succeeded.
    pub fn settled_state(self) -> SandboxState {
        match self {
            StateAction::Pause => SandboxState::Paused,
            StateAction::Kill => SandboxState::Killed,
        }
    }

    pub fn for_sandbox(sandbox: &Sandbox) -> Self {
        if sandbox.auto_pause {
            StateAction::Pause
        } else {
            StateAction::Kill
        }
    }
}

impl std::fmt::Display for StateAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateAction::Pause => f.write_str("pause"),
            StateAction::Kill => f.write_str("kill"),
        }
    }
}

/// Admission token returned by `start_removing`.
///
/// `already_done = true` means another caller has claimed (or completed) this
/// removal; `finish_removing` is then a no-op. This is the at-most-once gate
/// the evictor relies on.
#[derive(Debug, Clone)]
pub struct RemovalClaim {
    pub already_done: bool,
    pub action: StateAction,
    /// Snapshot of the record at claim time.
    pub sandbox: Sandbox,
}

/// Filtering options for snapshot listings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    pub only_expired: bool,
}

/// Mutation applied under the per-sandbox lock by `update`.
pub type UpdateFn = Box<dyn FnOnce(&Sandbox) -> Result<Sandbox> + Send>;

#[async_trait]
pub trait SandboxStorage: Send + Sync {
    /// Admit a sandbox in state `Running`. Fails with `AlreadyExists` when a
    /// non-terminal entry with the same id is present.
    async fn add(&self, sandbox: Sandbox) -> Result<()>;

    async fn get(&self, sandbox_id: &str) -> Result<Sandbox>;

    /// Compare-and-set under the per-sandbox lock. The store enforces
    /// `end_time` monotonicity (shortening fails with `CannotShortenTtl`,
    /// extension is clamped to `start_time + max_length_hours`) and state
    /// transition legality.
    async fn update(&self, sandbox_id: &str, apply: UpdateFn) -> Result<Sandbox>;

    /// Drive the sandbox through its removal states and discard the entry.
    async fn remove(&self, sandbox_id: &str) -> Result<()>;

    /// Claim the removal of a sandbox, transitioning it into the action's
    /// in-progress state.
    async fn start_removing(&self, sandbox_id: &str, action: StateAction)
    -> Result<RemovalClaim>;

    /// Complete a claim with the side-effect outcome. Success settles the
    /// sandbox (`Paused` stays in the store, `Killed` is discarded); failure
    /// force-kills the entry so the index converges and the next node sync
    /// re-admits the sandbox if the worker still runs it.
    async fn finish_removing(&self, claim: &RemovalClaim, success: bool) -> Result<()>;

    /// Block until the sandbox's state changes or it is removed. Cancellation
    /// is the caller dropping the future.
    async fn wait_for_state_change(&self, sandbox_id: &str) -> Result<SandboxState>;

    async fn all_items(
        &self,
        states: &[SandboxState],
        options: ListOptions,
    ) -> Result<Vec<Sandbox>>;

    async fn team_items(
        &self,
        team_id: uuid::Uuid,
        states: &[SandboxState],
    ) -> Result<Vec<Sandbox>>;

    /// Reconcile against a worker's reported view: running entries bound to
    /// `node_id` that the worker forgot are killed, reported sandboxes missing
    /// locally are inserted, and `start_time`/`end_time`/placement fields are
    /// taken from the worker as authoritative.
    async fn sync(&self, reported: Vec<Sandbox>, node_id: &str) -> Result<()>;

    /// Expired `Running` sandboxes, for the evictor.
    async fn items_to_evict(&self) -> Result<Vec<Sandbox>>;
}
