//! Memory backend of the sandbox index.
//!
//! One slot per sandbox: the record under a short-critical-section mutex
//! (updates are pure closures, never awaiting while locked) plus a watch
//! channel broadcasting state transitions to `wait_for_state_change` callers.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::sandbox::{Sandbox, SandboxState};
use crate::store::{ListOptions, RemovalClaim, SandboxStorage, StateAction, UpdateFn};

struct Slot {
    record: Mutex<Sandbox>,
    state_tx: watch::Sender<SandboxState>,
}

impl Slot {
    fn new(sandbox: Sandbox) -> Arc<Self> {
        let (state_tx, _) = watch::channel(sandbox.state);
        Arc::new(Self {
            record: Mutex::new(sandbox),
            state_tx,
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    slots: DashMap<String, Arc<Slot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, sandbox_id: &str) -> Result<Arc<Slot>> {
        self.slots
            .get(sandbox_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| Error::not_found(format!("sandbox {sandbox_id}")))
    }

    /// Apply a legal transition under the slot lock and wake observers.
    fn transition(&self, slot: &Slot, sandbox_id: &str, next: SandboxState) -> Result<Sandbox> {
        let snapshot = {
            let mut record = slot.record.lock();
            let from = record.state;
            if !from.can_transition_to(next) {
                return Err(Error::InvalidTransition { from, to: next });
            }
            record.state = next;
            record.clone()
        };
        slot.state_tx.send_replace(next);
        if next.is_terminal() {
            self.discard(sandbox_id);
        }
        Ok(snapshot)
    }

    /// Drive a sandbox to `Killed` regardless of where it currently stands,
    /// waking observers for every intermediate transition.
    fn force_kill(&self, slot: &Slot, sandbox_id: &str) {
        loop {
            let next = {
                let record = slot.record.lock();
                match record.state {
                    SandboxState::Running | SandboxState::Pausing | SandboxState::Paused => {
                        SandboxState::Killing
                    }
                    SandboxState::Killing => SandboxState::Killed,
                    SandboxState::Killed => break,
                }
            };
            // The transition cannot fail: every branch above is legal.
            let _ = self.transition(slot, sandbox_id, next);
            if next == SandboxState::Killed {
                break;
            }
        }
    }

    fn discard(&self, sandbox_id: &str) {
        self.slots.remove(sandbox_id);
    }

    /// Re-admit a record recovered from a secondary backend, preserving its
    /// state. Does nothing when a live entry is already present (memory wins).
    pub fn restore(&self, sandbox: Sandbox) {
        if let Entry::Vacant(slot) = self.slots.entry(sandbox.sandbox_id.clone()) {
            slot.insert(Slot::new(sandbox));
        }
    }
}

#[async_trait]
impl SandboxStorage for MemoryStore {
    async fn add(&self, mut sandbox: Sandbox) -> Result<()> {
        sandbox.state = SandboxState::Running;
        match self.slots.entry(sandbox.sandbox_id.clone()) {
            Entry::Occupied(mut existing) => {
                let state = existing.get().record.lock().state;
                if state.is_terminal() {
                    // A terminal leftover only exists briefly between the
                    // killed notification and the map removal; replace it.
                    existing.insert(Slot::new(sandbox));
                    Ok(())
                } else {
                    Err(Error::AlreadyExists(format!(
                        "sandbox {}",
                        existing.key()
                    )))
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot::new(sandbox));
                Ok(())
            }
        }
    }

    async fn get(&self, sandbox_id: &str) -> Result<Sandbox> {
        let slot = self.slot(sandbox_id)?;
        let record = slot.record.lock().clone();
        if record.state.is_terminal() {
            return Err(Error::not_found(format!("sandbox {sandbox_id}")));
        }
        Ok(record)
    }

    async fn update(&self, sandbox_id: &str, apply: UpdateFn) -> Result<Sandbox> {
        let slot = self.slot(sandbox_id)?;

        let (updated, state_change) = {
            let mut record = slot.record.lock();
            if record.state.is_terminal() {
                return Err(Error::not_found(format!("sandbox {sandbox_id}")));
            }
            let current = record.clone();
            let mut proposed = apply(&current)?;

            if proposed.end_time < current.end_time {
                return Err(Error::CannotShortenTtl {
                    current: current.end_time,
                    requested: proposed.end_time,
                });
            }
            let cap = current.max_end_time();
            if proposed.end_time > cap {
                proposed.end_time = cap;
            }

            if proposed.state != current.state
                && !current.state.can_transition_to(proposed.state)
            {
                return Err(Error::InvalidTransition {
                    from: current.state,
                    to: proposed.state,
                });
            }

            let state_change = (proposed.state != current.state).then_some(proposed.state);
            *record = proposed.clone();
            (proposed, state_change)
        };

        if let Some(next) = state_change {
            slot.state_tx.send_replace(next);
            if next.is_terminal() {
                self.discard(sandbox_id);
            }
        }
        Ok(updated)
    }

    async fn remove(&self, sandbox_id: &str) -> Result<()> {
        let slot = self.slot(sandbox_id)?;
        let auto_pause = {
            let record = slot.record.lock();
            record.auto_pause
        };

        if auto_pause {
            let state = slot.record.lock().state;
            if state == SandboxState::Running {
                self.transition(&slot, sandbox_id, SandboxState::Pausing)?;
            }
            let state = slot.record.lock().state;
            if state == SandboxState::Pausing {
                self.transition(&slot, sandbox_id, SandboxState::Paused)?;
            }
            self.discard(sandbox_id);
        } else {
            self.force_kill(&slot, sandbox_id);
        }
        Ok(())
    }

    async fn start_removing(
        &self,
        sandbox_id: &str,
        action: StateAction,
    ) -> Result<RemovalClaim> {
        let slot = self.slot(sandbox_id)?;
        let target = action.transition_state();

        let (already_done, snapshot) = {
            let mut record = slot.record.lock();
            let snapshot = record.clone();
            match (record.state, action) {
                (SandboxState::Running, _) => {
                    record.state = target;
                    (false, Sandbox {
                        state: target,
                        ..snapshot
                    })
                }
                // A kill supersedes an in-flight or settled pause.
                (SandboxState::Pausing, StateAction::Kill)
                | (SandboxState::Paused, StateAction::Kill) => {
                    record.state = SandboxState::Killing;
                    (false, Sandbox {
                        state: SandboxState::Killing,
                        ..snapshot
                    })
                }
                // Already at the target or a later state.
                _ => (true, snapshot),
            }
        };

        if !already_done {
            slot.state_tx.send_replace(snapshot.state);
        }

        Ok(RemovalClaim {
            already_done,
            action,
            sandbox: snapshot,
        })
    }

    async fn finish_removing(&self, claim: &RemovalClaim, success: bool) -> Result<()> {
        if claim.already_done {
            return Ok(());
        }
        let sandbox_id = claim.sandbox.sandbox_id.as_str();
        let slot = match self.slot(sandbox_id) {
            Ok(slot) => slot,
            // Entry raced away (e.g. a competing kill completed); nothing to
            // settle.
            Err(_) => return Ok(()),
        };

        if !success {
            self.force_kill(&slot, sandbox_id);
            return Ok(());
        }

        match claim.action {
            StateAction::Pause => {
                let state = slot.record.lock().state;
                if state == SandboxState::Pausing {
                    self.transition(&slot, sandbox_id, SandboxState::Paused)?;
                }
            }
            StateAction::Kill => {
                let state = slot.record.lock().state;
                if state == SandboxState::Killing {
                    self.transition(&slot, sandbox_id, SandboxState::Killed)?;
                }
            }
        }
        Ok(())
    }

    async fn wait_for_state_change(&self, sandbox_id: &str) -> Result<SandboxState> {
        let slot = self.slot(sandbox_id)?;
        let mut rx = slot.state_tx.subscribe();
        rx.changed()
            .await
            .map_err(|_| Error::not_found(format!("sandbox {sandbox_id}")))?;
        let state = *rx.borrow();
        Ok(state)
    }

    async fn all_items(
        &self,
        states: &[SandboxState],
        options: ListOptions,
    ) -> Result<Vec<Sandbox>> {
        let now = Utc::now();
        Ok(self
            .slots
            .iter()
            .filter_map(|slot| {
                let record = slot.record.lock().clone();
                let wanted = states.is_empty() || states.contains(&record.state);
                let expired_ok = !options.only_expired || record.is_expired(now);
                (wanted && expired_ok).then_some(record)
            })
            .collect())
    }

    async fn team_items(
        &self,
        team_id: Uuid,
        states: &[SandboxState],
    ) -> Result<Vec<Sandbox>> {
        Ok(self
            .slots
            .iter()
            .filter_map(|slot| {
                let record = slot.record.lock().clone();
                let wanted = states.is_empty() || states.contains(&record.state);
                (record.team_id == team_id && wanted).then_some(record)
            })
            .collect())
    }

    async fn sync(&self, reported: Vec<Sandbox>, node_id: &str) -> Result<()> {
        let reported_ids: std::collections::HashSet<&str> =
            reported.iter().map(|s| s.sandbox_id.as_str()).collect();

        // The worker has forgotten these; transition them out of Running.
        let forgotten: Vec<(String, Arc<Slot>)> = self
            .slots
            .iter()
            .filter_map(|entry| {
                let record = entry.record.lock();
                let orphaned = record.node_id == node_id
                    && record.state == SandboxState::Running
                    && !reported_ids.contains(record.sandbox_id.as_str());
                orphaned.then(|| (entry.key().clone(), Arc::clone(entry.value())))
            })
            .collect();
        for (sandbox_id, slot) in forgotten {
            self.force_kill(&slot, &sandbox_id);
        }

        for worker_view in reported {
            match self.slots.get(&worker_view.sandbox_id) {
                Some(slot) => {
                    // Worker attributes are authoritative for timing and
                    // placement; this bypasses the monotonicity check.
                    let mut record = slot.record.lock();
                    record.start_time = worker_view.start_time;
                    record.end_time = worker_view.end_time;
                    record.node_id = worker_view.node_id.clone();
                    record.cluster_id = worker_view.cluster_id;
                }
                None => {
                    self.add(worker_view).await?;
                }
            }
        }
        Ok(())
    }

    async fn items_to_evict(&self) -> Result<Vec<Sandbox>> {
        let now = Utc::now();
        Ok(self
            .slots
            .iter()
            .filter_map(|slot| {
                let record = slot.record.lock().clone();
                (record.state == SandboxState::Running && record.is_expired(now))
                    .then_some(record)
            })
            .collect())
    }
}
