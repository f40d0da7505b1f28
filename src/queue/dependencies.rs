//! Dependency-cascade rules.
//!
//! Chains are strictly linear: phase *k* depends on at most phase *k-1* of
//! the same parent task. On success the next phase wakes; on failure every
//! remaining phase still in `{queued, ready}` is blocked. Both operations
//! run synchronously against the store so a caller can execute a whole
//! cascade inside a single `StoreHandle::call`.

use tracing::{debug, info};

use crate::errors::Result;

use super::models::PhaseStatus;
use super::store::QueueStore;

/// Mark `queue_id` completed and wake its dependent phase.
///
/// Looks up the unique item of the same parent task with
/// `depends_on_phase == this.phase_number` that is still `queued`; if found,
/// flips it to `ready` and returns its id. Returns `None` when the chain is
/// finished (or the dependent was already woken by an earlier call, which
/// makes a repeated completion a no-op).
pub fn trigger_next_phase(store: &QueueStore, queue_id: i64) -> Result<Option<i64>> {
    let Some(item) = store.get(queue_id)? else {
        return Ok(None);
    };
    // Terminal states have no outgoing transition; a failed or blocked
    // phase cannot become completed.
    if item.status.is_terminal() && item.status != PhaseStatus::Completed {
        return Ok(None);
    }
    store.update_status(queue_id, PhaseStatus::Completed, None)?;

    match store.find_dependent(item.parent_task, item.phase_number)? {
        Some(next) => {
            store.update_status(next.queue_id, PhaseStatus::Ready, Some(PhaseStatus::Queued))?;
            info!(
                parent_task = item.parent_task,
                completed = queue_id,
                woke = next.queue_id,
                phase = next.phase_number,
                "phase completed; dependent phase is ready"
            );
            Ok(Some(next.queue_id))
        }
        None => {
            debug!(parent_task = item.parent_task, completed = queue_id, "chain finished");
            Ok(None)
        }
    }
}

/// Mark `queue_id` failed and block the rest of its chain.
///
/// Scans the same parent task's later phases in ascending `phase_number`
/// order, converting each to `blocked` only while it is currently `queued`
/// or `ready`. The scan halts at the first item in any other state, so a
/// second, out-of-order cascade cannot re-block a chain whose tail was
/// already resolved by another path. Returns the newly blocked ids.
pub fn block_dependent_phases(
    store: &QueueStore,
    queue_id: i64,
    reason: &str,
) -> Result<Vec<i64>> {
    let Some(item) = store.get(queue_id)? else {
        return Ok(Vec::new());
    };
    // Repeated or out-of-order failure reports against a phase that already
    // reached a terminal state are no-ops.
    if item.status.is_terminal() {
        return Ok(Vec::new());
    }
    store.update_status_with_error(queue_id, PhaseStatus::Failed, reason, None)?;

    let mut blocked = Vec::new();
    for phase in store.find_by_parent(item.parent_task)? {
        if phase.phase_number <= item.phase_number {
            continue;
        }
        match phase.status {
            PhaseStatus::Queued | PhaseStatus::Ready => {
                store.update_status_with_error(
                    phase.queue_id,
                    PhaseStatus::Blocked,
                    reason,
                    None,
                )?;
                blocked.push(phase.queue_id);
            }
            _ => break,
        }
    }

    info!(
        parent_task = item.parent_task,
        failed = queue_id,
        blocked_count = blocked.len(),
        "phase failed; dependent phases blocked"
    );
    Ok(blocked)
}
