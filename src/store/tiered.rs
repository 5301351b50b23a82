//! Memory-fronted composed backend.
//!
//! The memory front is the writer-of-record for sandbox state; the secondary
//! backend is a warm-standby materialization populated on every successful
//! mutation. On conflict, memory wins: the secondary may lag behind, never
//! lead. The `update` path repairs a memory entry that went missing (process
//! restart, front eviction) from the secondary before applying the mutation.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::sandbox::{Sandbox, SandboxState};
use crate::store::memory::MemoryStore;
use crate::store::{ListOptions, RemovalClaim, SandboxStorage, StateAction, UpdateFn};

pub struct TieredStore {
    front: MemoryStore,
    back: Arc<dyn SandboxStorage>,
}

impl TieredStore {
    pub fn new(back: Arc<dyn SandboxStorage>) -> Self {
        Self {
            front: MemoryStore::new(),
            back,
        }
    }

    /// Push the memory-side record into the secondary, best effort. The
    /// secondary enforces its own invariants; a record it refuses is logged
    /// and dropped because memory already holds the authoritative value.
    async fn populate(&self, record: Sandbox) {
        let sandbox_id = record.sandbox_id.clone();
        let pushed = record.clone();
        let outcome = self
            .back
            .update(&sandbox_id, Box::new(move |_| Ok(pushed)))
            .await;
        match outcome {
            Ok(_) => {}
            Err(Error::NotFound(_)) => {
                if let Err(err) = self.back.add(record).await {
                    debug!(sandbox_id = %sandbox_id, error = %err, "secondary admit failed");
                }
            }
            Err(err) => {
                debug!(sandbox_id = %sandbox_id, error = %err, "secondary populate failed");
            }
        }
    }

    async fn drop_from_back(&self, sandbox_id: &str) {
        if let Err(err) = self.back.remove(sandbox_id).await
            && !matches!(err, Error::NotFound(_))
        {
            debug!(sandbox_id = %sandbox_id, error = %err, "secondary remove failed");
        }
    }
}

#[async_trait]
impl SandboxStorage for TieredStore {
    async fn add(&self, sandbox: Sandbox) -> Result<()> {
        self.front.add(sandbox.clone()).await?;
        if let Err(err) = self.back.add(sandbox.clone()).await
            && !matches!(err, Error::AlreadyExists(_))
        {
            debug!(sandbox_id = %sandbox.sandbox_id, error = %err, "secondary admit failed");
        }
        Ok(())
    }

    async fn get(&self, sandbox_id: &str) -> Result<Sandbox> {
        self.front.get(sandbox_id).await
    }

    async fn update(&self, sandbox_id: &str, apply: UpdateFn) -> Result<Sandbox> {
        if let Err(Error::NotFound(_)) = self.front.get(sandbox_id).await {
            // Repair the missing memory entry from the secondary before the
            // mutation so convergence happens on the write path.
            let recovered = self.back.get(sandbox_id).await?;
            self.front.restore(recovered);
        }

        let updated = self.front.update(sandbox_id, apply).await?;
        self.populate(updated.clone()).await;
        Ok(updated)
    }

    async fn remove(&self, sandbox_id: &str) -> Result<()> {
        let result = self.front.remove(sandbox_id).await;
        self.drop_from_back(sandbox_id).await;
        result
    }

    async fn start_removing(
        &self,
        sandbox_id: &str,
        action: StateAction,
    ) -> Result<RemovalClaim> {
        let claim = self.front.start_removing(sandbox_id, action).await?;
        if !claim.already_done {
            self.populate(claim.sandbox.clone()).await;
        }
        Ok(claim)
    }

    async fn finish_removing(&self, claim: &RemovalClaim, success: bool) -> Result<()> {
        self.front.finish_removing(claim, success).await?;
        if claim.already_done {
            return Ok(());
        }
        match self.front.get(&claim.sandbox.sandbox_id).await {
            // Settled into a live state (Paused); mirror it.
            Ok(settled) => self.populate(settled).await,
            // Killed and discarded.
            Err(_) => self.drop_from_back(&claim.sandbox.sandbox_id).await,
        }
        Ok(())
    }

    async fn wait_for_state_change(&self, sandbox_id: &str) -> Result<SandboxState> {
        // Explicitly routed to the memory front: only it carries watchers.
        self.front.wait_for_state_change(sandbox_id).await
    }

    async fn all_items(
        &self,
        states: &[SandboxState],
        options: ListOptions,
    ) -> Result<Vec<Sandbox>> {
        self.front.all_items(states, options).await
    }

    async fn team_items(
        &self,
        team_id: Uuid,
        states: &[SandboxState],
    ) -> Result<Vec<Sandbox>> {
        self.front.team_items(team_id, states).await
    }

    async fn sync(&self, reported: Vec<Sandbox>, node_id: &str) -> Result<()> {
        self.front.sync(reported.clone(), node_id).await?;
        if let Err(err) = self.back.sync(reported, node_id).await {
            debug!(node_id = %node_id, error = %err, "secondary sync failed");
        }
        Ok(())
    }

    async fn items_to_evict(&self) -> Result<Vec<Sandbox>> {
        self.front.items_to_evict().await
    }
}
