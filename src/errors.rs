//! Typed error hierarchy for the phase queue.
//!
//! One top-level enum covers the whole subsystem. "Not found" is
//! deliberately absent: operations referencing an unknown `queue_id`
//! return `false`/`None` so callers can branch on a normal negative
//! result instead of catching errors.

use thiserror::Error;

/// Errors from the queue store, service, and chain orchestrator.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Phase {phase_number} already enqueued for parent task {parent_task}")]
    DuplicateKey { parent_task: i64, phase_number: i32 },

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Task tracker error: {0}")]
    Tracker(String),

    #[error("Queue store lock poisoned")]
    LockPoisoned,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;
