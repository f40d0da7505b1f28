//! Turns one N-phase request into a tracked chain.
//!
//! Registration with the external tracker is eager for phase 1 (the chain
//! must be actionable the instant it exists) and just-in-time for every
//! later phase: a phase k>1 gets its tracking record only after the
//! dependency cascade flips it to `ready`. If any tracker call fails, the
//! whole operation fails and every enqueue already made for the chain is
//! rolled back — no partial chain is left behind.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{QueueError, Result};
use crate::queue::models::priority;
use crate::queue::service::PhaseQueueService;
use crate::tracker::TaskTracker;

/// One phase description supplied by the caller. Stored verbatim as the
/// phase payload; the scheduler never inspects its contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub doc_refs: Vec<String>,
}

/// Per-phase result of chain creation. `external_task_id` is set only for
/// phase 1; later phases are registered just-in-time.
#[derive(Debug, Clone, Serialize)]
pub struct ChainPhase {
    pub phase_number: i32,
    pub queue_id: i64,
    pub external_task_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainReceipt {
    pub parent_task: i64,
    pub phases: Vec<ChainPhase>,
}

pub struct MultiPhaseIssueOrchestrator {
    queue: PhaseQueueService,
    tracker: Arc<dyn TaskTracker>,
}

impl MultiPhaseIssueOrchestrator {
    pub fn new(queue: PhaseQueueService, tracker: Arc<dyn TaskTracker>) -> Self {
        Self { queue, tracker }
    }

    /// Create a chain at normal priority.
    pub async fn create_chain(&self, phases: &[PhaseSpec]) -> Result<ChainReceipt> {
        self.create_chain_with_priority(phases, priority::NORMAL).await
    }

    /// Create one parent tracking record plus one queue row per phase.
    /// Requires at least two phases — single-phase work should be enqueued
    /// directly instead.
    pub async fn create_chain_with_priority(
        &self,
        phases: &[PhaseSpec],
        priority: i32,
    ) -> Result<ChainReceipt> {
        if phases.len() < 2 {
            return Err(QueueError::BadRequest(format!(
                "a chain requires at least 2 phases, got {}",
                phases.len()
            )));
        }

        let parent_task = self
            .tracker
            .create_task(
                &parent_title(phases),
                &parent_body(phases),
                &["multi-phase".to_string()],
            )
            .await?;
        info!(parent_task, phase_count = phases.len(), "parent tracking record created");

        let mut enqueued: Vec<i64> = Vec::with_capacity(phases.len());
        match self.build_chain(parent_task, phases, priority, &mut enqueued).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                // No partial chain may be left behind.
                warn!(parent_task, error = %e, "chain creation failed; rolling back enqueues");
                for queue_id in enqueued {
                    if let Err(rollback_err) = self.queue.dequeue(queue_id).await {
                        warn!(queue_id, error = %rollback_err, "rollback dequeue failed");
                    }
                }
                Err(e)
            }
        }
    }

    async fn build_chain(
        &self,
        parent_task: i64,
        phases: &[PhaseSpec],
        priority: i32,
        enqueued: &mut Vec<i64>,
    ) -> Result<ChainReceipt> {
        let total = phases.len();
        let mut receipt = ChainReceipt {
            parent_task,
            phases: Vec::with_capacity(total),
        };

        for (index, spec) in phases.iter().enumerate() {
            let phase_number = (index + 1) as i32;
            let payload = serde_json::to_value(spec)
                .map_err(|e| anyhow::anyhow!("failed to serialize phase spec: {}", e))?;
            let depends_on = (phase_number > 1).then(|| phase_number - 1);

            let queue_id = self
                .queue
                .enqueue_with_priority(parent_task, phase_number, payload, depends_on, priority)
                .await?;
            enqueued.push(queue_id);

            // Phase 1 must be actionable the instant the chain exists; the
            // rest are registered only when they become ready.
            let external_task_id = if phase_number == 1 {
                let external = self
                    .tracker
                    .create_task(
                        &phase_title(spec, phase_number, total),
                        &phase_body(spec, parent_task),
                        &["phase".to_string()],
                    )
                    .await?;
                self.queue.update_issue_number(queue_id, external).await?;
                Some(external)
            } else {
                None
            };

            receipt.phases.push(ChainPhase {
                phase_number,
                queue_id,
                external_task_id,
            });
        }

        info!(parent_task, phase_count = total, "chain created");
        Ok(receipt)
    }
}

fn parent_title(phases: &[PhaseSpec]) -> String {
    format!("{} ({} phases)", phases[0].title, phases.len())
}

fn parent_body(phases: &[PhaseSpec]) -> String {
    let mut body = String::from("Phases:\n");
    for (index, spec) in phases.iter().enumerate() {
        body.push_str(&format!("{}. {}\n", index + 1, spec.title));
    }
    body
}

fn phase_title(spec: &PhaseSpec, phase_number: i32, total: usize) -> String {
    format!("[phase {}/{}] {}", phase_number, total, spec.title)
}

fn phase_body(spec: &PhaseSpec, parent_task: i64) -> String {
    let mut body = format!("Parent task: #{}\n\n{}\n", parent_task, spec.content);
    if !spec.doc_refs.is_empty() {
        body.push_str("\nReferences:\n");
        for doc in &spec.doc_refs {
            body.push_str(&format!("- {}\n", doc));
        }
    }
    body
}
