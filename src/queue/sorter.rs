//! Deterministic selection of which ready phase(s) to start next.
//!
//! The hopper is the set of phase-1 items eligible to start a new chain:
//! `ready`, not yet registered with the external tracker. Selection is
//! read-only and pushed entirely into the store's queries — the sorter
//! caches nothing, so concurrent writers are handled by re-reading current
//! state on every call. Selection and claiming are separate steps: a caller
//! picks candidates here, then claims each one through
//! `PhaseQueueService::update_status`, and only one concurrent claim wins.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::errors::Result;

use super::models::PhaseQueueItem;
use super::store::StoreHandle;

/// Per-priority-band counts for operational visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriorityStats {
    pub total: i64,
    pub ready: i64,
}

#[derive(Clone)]
pub struct HopperSorter {
    store: StoreHandle,
}

impl HopperSorter {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// The single next chain head: lowest priority value first, then
    /// insertion order, then parent id as a pure deterministic tie-break.
    pub async fn get_next_phase_1(&self) -> Result<Option<PhaseQueueItem>> {
        self.store
            .call(|store| Ok(store.next_chain_heads(1)?.into_iter().next()))
            .await
    }

    /// Up to `max_parallel` chain heads in selection order. Each parent
    /// task contributes at most one ready phase-1 row at a time, so the
    /// result is automatically restricted to distinct chains.
    pub async fn get_next_phases_parallel(
        &self,
        max_parallel: usize,
    ) -> Result<Vec<PhaseQueueItem>> {
        if max_parallel == 0 {
            return Ok(Vec::new());
        }
        self.store
            .call(move |store| store.next_chain_heads(max_parallel))
            .await
    }

    /// Count of distinct parent tasks with any phase currently running.
    pub async fn get_running_parent_count(&self) -> Result<i64> {
        self.store.call(|store| store.running_parent_count()).await
    }

    /// Advisory comparison only: checking the count and starting work are
    /// not atomic together, so callers must tolerate a bounded overshoot
    /// (re-check after claiming).
    pub async fn can_start_more_parents(&self, max_concurrent: i64) -> Result<bool> {
        Ok(self.get_running_parent_count().await? < max_concurrent)
    }

    pub async fn get_priority_stats(&self) -> Result<BTreeMap<i32, PriorityStats>> {
        self.store
            .call(|store| {
                Ok(store
                    .priority_counts()?
                    .into_iter()
                    .map(|(priority, total, ready)| (priority, PriorityStats { total, ready }))
                    .collect())
            })
            .await
    }
}
