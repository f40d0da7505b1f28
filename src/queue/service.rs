//! Public facade over the phase queue.
//!
//! `PhaseQueueService` owns a `StoreHandle` and exposes the enqueue/dequeue,
//! status-transition, and pause operations callers use. Cascade semantics
//! (waking the next phase, blocking a failed chain's tail) are delegated to
//! `queue::dependencies` and run inside a single store call.

use std::str::FromStr;

use tracing::{debug, info};

use crate::errors::{QueueError, Result};

use super::dependencies;
use super::models::{NewPhase, PhaseQueueItem, PhaseStatus, priority};
use super::store::StoreHandle;

#[derive(Clone)]
pub struct PhaseQueueService {
    store: StoreHandle,
}

impl PhaseQueueService {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Enqueue a phase at normal priority. Status is computed, not supplied:
    /// `ready` iff `phase_number == 1`, else `queued`.
    pub async fn enqueue(
        &self,
        parent_task: i64,
        phase_number: i32,
        payload: serde_json::Value,
        depends_on_phase: Option<i32>,
    ) -> Result<i64> {
        self.enqueue_with_priority(
            parent_task,
            phase_number,
            payload,
            depends_on_phase,
            priority::NORMAL,
        )
        .await
    }

    pub async fn enqueue_with_priority(
        &self,
        parent_task: i64,
        phase_number: i32,
        payload: serde_json::Value,
        depends_on_phase: Option<i32>,
        priority: i32,
    ) -> Result<i64> {
        if phase_number < 1 {
            return Err(QueueError::BadRequest(format!(
                "phase_number must be >= 1, got {}",
                phase_number
            )));
        }
        if let Some(dep) = depends_on_phase {
            if dep >= phase_number {
                return Err(QueueError::BadRequest(format!(
                    "depends_on_phase {} must be earlier than phase {}",
                    dep, phase_number
                )));
            }
        }

        self.store
            .call(move |store| {
                if let Some(dep) = depends_on_phase {
                    if !store.phase_exists(parent_task, dep)? {
                        return Err(QueueError::BadRequest(format!(
                            "depends_on_phase {} does not exist for parent task {}",
                            dep, parent_task
                        )));
                    }
                }
                let status = if phase_number == 1 {
                    PhaseStatus::Ready
                } else {
                    PhaseStatus::Queued
                };
                let item = store.insert(&NewPhase {
                    parent_task,
                    phase_number,
                    status,
                    depends_on_phase,
                    payload,
                    priority,
                })?;
                info!(
                    queue_id = item.queue_id,
                    parent_task,
                    phase = phase_number,
                    status = %status,
                    priority,
                    "phase enqueued"
                );
                Ok(item.queue_id)
            })
            .await
    }

    pub async fn get(&self, queue_id: i64) -> Result<Option<PhaseQueueItem>> {
        self.store.call(move |store| store.get(queue_id)).await
    }

    /// Administrative removal. Idempotent: `false` if the id is unknown.
    pub async fn dequeue(&self, queue_id: i64) -> Result<bool> {
        self.store
            .call(move |store| {
                let removed = store.delete(queue_id)?;
                if removed {
                    info!(queue_id, "phase dequeued");
                }
                Ok(removed)
            })
            .await
    }

    /// Plain FIFO peek over any `ready` row, priority-blind. Suitable for a
    /// simple single-worker pickup; cross-chain selection belongs to
    /// `HopperSorter`.
    pub async fn get_next_ready(&self) -> Result<Option<PhaseQueueItem>> {
        self.store
            .call(|store| Ok(store.find_ready()?.into_iter().next()))
            .await
    }

    /// Mark a phase completed and wake its dependent, if any. Returns
    /// `false` when the id is unknown or the phase already reached a
    /// terminal state other than `completed`.
    pub async fn mark_phase_complete(&self, queue_id: i64) -> Result<bool> {
        self.store
            .call(move |store| {
                let Some(item) = store.get(queue_id)? else {
                    return Ok(false);
                };
                if item.status.is_terminal() && item.status != PhaseStatus::Completed {
                    return Ok(false);
                }
                dependencies::trigger_next_phase(store, queue_id)?;
                Ok(true)
            })
            .await
    }

    /// Manual hold on a single phase; no cascade. Only pending work can be
    /// held: anything outside `{queued, ready}` is left untouched and the
    /// call returns `false`.
    pub async fn mark_phase_blocked(&self, queue_id: i64, reason: &str) -> Result<bool> {
        let reason = reason.to_string();
        self.store
            .call(move |store| {
                let Some(item) = store.get(queue_id)? else {
                    return Ok(false);
                };
                if !matches!(item.status, PhaseStatus::Queued | PhaseStatus::Ready) {
                    debug!(queue_id, status = %item.status, "hold refused; phase is not pending");
                    return Ok(false);
                }
                let updated = store.update_status_with_error(
                    queue_id,
                    PhaseStatus::Blocked,
                    &reason,
                    Some(item.status),
                )?;
                if updated {
                    info!(queue_id, reason = %reason, "phase blocked");
                }
                Ok(updated)
            })
            .await
    }

    /// Mark a phase failed and block the remainder of its chain. Returns
    /// the newly blocked queue ids (empty when the id is unknown).
    pub async fn mark_phase_failed(&self, queue_id: i64, reason: &str) -> Result<Vec<i64>> {
        let reason = reason.to_string();
        self.store
            .call(move |store| dependencies::block_dependent_phases(store, queue_id, &reason))
            .await
    }

    /// Attach an externally created tracking id once the collaborator has
    /// confirmed it. `false` if the queue id is unknown.
    pub async fn update_issue_number(&self, queue_id: i64, external_task_id: i64) -> Result<bool> {
        self.store
            .call(move |store| {
                let updated = store.update_external_task_id(queue_id, external_task_id)?;
                if updated {
                    info!(queue_id, external_task_id, "external tracking record attached");
                }
                Ok(updated)
            })
            .await
    }

    /// Transition a phase to `status`. Status only moves forward: terminal
    /// states have no outgoing transition, `queued` is never a target, and
    /// claiming (`Running`) is always a compare-and-swap from `ready`, so at
    /// most one concurrent caller's claim succeeds. A refused transition
    /// returns `false` and leaves the row untouched.
    pub async fn update_status(
        &self,
        queue_id: i64,
        status: PhaseStatus,
        worker_id: Option<&str>,
    ) -> Result<bool> {
        let worker = worker_id.map(str::to_string);
        self.store
            .call(move |store| {
                let Some(item) = store.get(queue_id)? else {
                    return Ok(false);
                };
                let allowed = match status {
                    PhaseStatus::Queued => false,
                    PhaseStatus::Ready => item.status == PhaseStatus::Queued,
                    PhaseStatus::Running => item.status == PhaseStatus::Ready,
                    PhaseStatus::Blocked => {
                        matches!(item.status, PhaseStatus::Queued | PhaseStatus::Ready)
                    }
                    PhaseStatus::Completed | PhaseStatus::Failed => !item.status.is_terminal(),
                };
                if !allowed {
                    debug!(
                        queue_id,
                        from = %item.status,
                        to = %status,
                        worker = worker.as_deref(),
                        "transition refused"
                    );
                    return Ok(false);
                }
                // The write re-checks the observed state so two claimants
                // racing past the read still resolve to a single winner.
                let updated = store.update_status(queue_id, status, Some(item.status))?;
                if updated {
                    info!(queue_id, status = %status, worker = worker.as_deref(), "phase status updated");
                } else if status == PhaseStatus::Running {
                    debug!(queue_id, worker = worker.as_deref(), "claim lost; phase no longer ready");
                }
                Ok(updated)
            })
            .await
    }

    /// String-typed variant for callers holding a raw status value; unknown
    /// values are rejected as `BadRequest` before touching the store.
    pub async fn update_status_str(
        &self,
        queue_id: i64,
        status: &str,
        worker_id: Option<&str>,
    ) -> Result<bool> {
        let status = PhaseStatus::from_str(status).map_err(QueueError::BadRequest)?;
        self.update_status(queue_id, status, worker_id).await
    }

    /// Advisory pause flag for automatic pollers; manual calls are not
    /// blocked by it.
    pub async fn is_paused(&self) -> Result<bool> {
        self.store.call(|store| store.is_paused()).await
    }

    pub async fn set_paused(&self, paused: bool) -> Result<()> {
        self.store
            .call(move |store| {
                store.set_paused(paused)?;
                info!(paused, "queue pause flag updated");
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::store::QueueStore;
    use serde_json::json;

    fn service() -> PhaseQueueService {
        let store = QueueStore::new_in_memory().unwrap();
        PhaseQueueService::new(StoreHandle::new(store))
    }

    #[tokio::test]
    async fn test_enqueue_computes_status_from_phase_number() -> Result<()> {
        let svc = service();
        let p1 = svc.enqueue(9, 1, json!({}), None).await?;
        let p2 = svc.enqueue(9, 2, json!({}), Some(1)).await?;

        assert_eq!(svc.get(p1).await?.unwrap().status, PhaseStatus::Ready);
        let second = svc.get(p2).await?.unwrap();
        assert_eq!(second.status, PhaseStatus::Queued);
        assert_eq!(second.depends_on_phase, Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn test_enqueue_rejects_forward_dependency() {
        let svc = service();
        let err = svc.enqueue(9, 2, json!({}), Some(2)).await.unwrap_err();
        assert!(matches!(err, QueueError::BadRequest(_)));
        let err = svc.enqueue(9, 2, json!({}), Some(5)).await.unwrap_err();
        assert!(matches!(err, QueueError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_enqueue_rejects_dangling_dependency() {
        let svc = service();
        let err = svc.enqueue(9, 2, json!({}), Some(1)).await.unwrap_err();
        match err {
            QueueError::BadRequest(msg) => assert!(msg.contains("does not exist")),
            other => panic!("Expected BadRequest, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_enqueue_duplicate_phase_fails() -> Result<()> {
        let svc = service();
        svc.enqueue(9, 1, json!({}), None).await?;
        let err = svc.enqueue(9, 1, json!({}), None).await.unwrap_err();
        assert!(matches!(err, QueueError::DuplicateKey { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_dequeue_is_idempotent() -> Result<()> {
        let svc = service();
        let id = svc.enqueue(9, 1, json!({}), None).await?;
        assert!(svc.dequeue(id).await?);
        assert!(!svc.dequeue(id).await?);
        assert!(!svc.dequeue(12345).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_get_next_ready_is_priority_blind_fifo() -> Result<()> {
        let svc = service();
        let first = svc
            .enqueue_with_priority(1, 1, json!({}), None, priority::LOW)
            .await?;
        svc.enqueue_with_priority(2, 1, json!({}), None, priority::URGENT)
            .await?;

        // Plain FIFO: the low-priority item wins because it was inserted first.
        let next = svc.get_next_ready().await?.unwrap();
        assert_eq!(next.queue_id, first);
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_phase_complete_wakes_next() -> Result<()> {
        let svc = service();
        let p1 = svc.enqueue(9, 1, json!({}), None).await?;
        let p2 = svc.enqueue(9, 2, json!({}), Some(1)).await?;

        assert!(svc.mark_phase_complete(p1).await?);
        assert_eq!(svc.get(p1).await?.unwrap().status, PhaseStatus::Completed);
        assert_eq!(svc.get(p2).await?.unwrap().status, PhaseStatus::Ready);

        assert!(!svc.mark_phase_complete(999).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_double_complete_does_not_rewake() -> Result<()> {
        let svc = service();
        let p1 = svc.enqueue(9, 1, json!({}), None).await?;
        let p2 = svc.enqueue(9, 2, json!({}), Some(1)).await?;

        assert!(svc.mark_phase_complete(p1).await?);
        assert!(svc.update_status(p2, PhaseStatus::Running, Some("w1")).await?);
        assert!(svc.mark_phase_complete(p1).await?);
        assert_eq!(svc.get(p2).await?.unwrap().status, PhaseStatus::Running);
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_phase_blocked_has_no_cascade() -> Result<()> {
        let svc = service();
        let p1 = svc.enqueue(9, 1, json!({}), None).await?;
        let p2 = svc.enqueue(9, 2, json!({}), Some(1)).await?;

        assert!(svc.mark_phase_blocked(p1, "waiting on review").await?);
        let held = svc.get(p1).await?.unwrap();
        assert_eq!(held.status, PhaseStatus::Blocked);
        assert_eq!(held.error.as_deref(), Some("waiting on review"));
        assert_eq!(svc.get(p2).await?.unwrap().status, PhaseStatus::Queued);
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_phase_blocked_refuses_non_pending_phases() -> Result<()> {
        let svc = service();
        let completed = svc.enqueue(9, 1, json!({}), None).await?;
        svc.mark_phase_complete(completed).await?;
        let failed = svc.enqueue(10, 1, json!({}), None).await?;
        svc.mark_phase_failed(failed, "boom").await?;
        let running = svc.enqueue(11, 1, json!({}), None).await?;
        svc.update_status(running, PhaseStatus::Running, Some("w1")).await?;

        assert!(!svc.mark_phase_blocked(completed, "hold").await?);
        assert!(!svc.mark_phase_blocked(failed, "hold").await?);
        assert!(!svc.mark_phase_blocked(running, "hold").await?);
        assert_eq!(svc.get(completed).await?.unwrap().status, PhaseStatus::Completed);
        assert_eq!(svc.get(failed).await?.unwrap().status, PhaseStatus::Failed);
        assert_eq!(svc.get(running).await?.unwrap().status, PhaseStatus::Running);
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_phase_complete_refuses_failed_and_blocked_phases() -> Result<()> {
        let svc = service();
        let p1 = svc.enqueue(9, 1, json!({}), None).await?;
        let p2 = svc.enqueue(9, 2, json!({}), Some(1)).await?;
        svc.mark_phase_failed(p1, "boom").await?;

        assert!(!svc.mark_phase_complete(p1).await?);
        assert!(!svc.mark_phase_complete(p2).await?);
        assert_eq!(svc.get(p1).await?.unwrap().status, PhaseStatus::Failed);
        assert_eq!(svc.get(p2).await?.unwrap().status, PhaseStatus::Blocked);
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_phase_failed_returns_blocked_ids() -> Result<()> {
        let svc = service();
        let p1 = svc.enqueue(5, 1, json!({}), None).await?;
        let p2 = svc.enqueue(5, 2, json!({}), Some(1)).await?;
        let p3 = svc.enqueue(5, 3, json!({}), Some(2)).await?;

        let blocked = svc.mark_phase_failed(p1, "boom").await?;
        assert_eq!(blocked, vec![p2, p3]);
        assert_eq!(svc.get(p1).await?.unwrap().status, PhaseStatus::Failed);
        assert_eq!(svc.get(p2).await?.unwrap().status, PhaseStatus::Blocked);
        assert_eq!(svc.get(p3).await?.unwrap().status, PhaseStatus::Blocked);
        Ok(())
    }

    #[tokio::test]
    async fn test_claim_is_compare_and_swap() -> Result<()> {
        let svc = service();
        let id = svc.enqueue(9, 1, json!({}), None).await?;

        assert!(svc.update_status(id, PhaseStatus::Running, Some("w1")).await?);
        // Second claimant lost the race: zero rows affected, no error.
        assert!(!svc.update_status(id, PhaseStatus::Running, Some("w2")).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_status_never_moves_backward() -> Result<()> {
        let svc = service();
        let id = svc.enqueue(9, 1, json!({}), None).await?;

        assert!(!svc.update_status(id, PhaseStatus::Queued, None).await?);
        assert_eq!(svc.get(id).await?.unwrap().status, PhaseStatus::Ready);

        assert!(svc.update_status(id, PhaseStatus::Running, Some("w1")).await?);
        assert!(!svc.update_status(id, PhaseStatus::Ready, None).await?);
        assert_eq!(svc.get(id).await?.unwrap().status, PhaseStatus::Running);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_status_refuses_leaving_terminal_states() -> Result<()> {
        let svc = service();
        for (parent, terminal) in [
            (1, PhaseStatus::Completed),
            (2, PhaseStatus::Failed),
            (3, PhaseStatus::Blocked),
        ] {
            let id = svc.enqueue(parent, 1, json!({}), None).await?;
            match terminal {
                PhaseStatus::Completed => {
                    svc.mark_phase_complete(id).await?;
                }
                PhaseStatus::Failed => {
                    svc.mark_phase_failed(id, "boom").await?;
                }
                _ => {
                    svc.mark_phase_blocked(id, "hold").await?;
                }
            }
            for target in [
                PhaseStatus::Queued,
                PhaseStatus::Ready,
                PhaseStatus::Running,
                PhaseStatus::Completed,
                PhaseStatus::Blocked,
                PhaseStatus::Failed,
            ] {
                assert!(
                    !svc.update_status(id, target, None).await?,
                    "{:?} -> {:?} should be refused",
                    terminal,
                    target
                );
            }
            assert_eq!(svc.get(id).await?.unwrap().status, terminal);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_update_status_str_rejects_unknown_value() -> Result<()> {
        let svc = service();
        let id = svc.enqueue(9, 1, json!({}), None).await?;

        let err = svc.update_status_str(id, "sleeping", None).await.unwrap_err();
        assert!(matches!(err, QueueError::BadRequest(_)));
        assert!(svc.update_status_str(id, "running", Some("w1")).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_issue_number() -> Result<()> {
        let svc = service();
        let id = svc.enqueue(9, 1, json!({}), None).await?;
        assert!(svc.update_issue_number(id, 1234).await?);
        assert_eq!(svc.get(id).await?.unwrap().external_task_id, Some(1234));
        assert!(!svc.update_issue_number(999, 1).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_pause_flag_round_trip() -> Result<()> {
        let svc = service();
        assert!(!svc.is_paused().await?);
        svc.set_paused(true).await?;
        assert!(svc.is_paused().await?);
        svc.set_paused(false).await?;
        assert!(!svc.is_paused().await?);
        Ok(())
    }
}
