//! Multi-phase workflow queue and scheduler.
//!
//! Breaks a multi-step work request into an ordered chain of phases, tracks
//! each phase's lifecycle in a SQLite row store, and deterministically
//! decides which phase across many concurrent chains should execute next
//! (priority bands, FIFO within a band, bounded parallelism across
//! independent chains).
//!
//! The library owns no threads: an external polling loop selects candidate
//! phases via [`HopperSorter`], claims one via
//! [`PhaseQueueService::update_status`] (a compare-and-swap from `ready` to
//! `running`), dispatches the actual work, and reports the outcome with
//! `mark_phase_complete` / `mark_phase_failed`. Chains themselves are
//! created through [`MultiPhaseIssueOrchestrator`], which registers phase 1
//! with the external [`TaskTracker`] eagerly and later phases just-in-time.

pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod queue;
pub mod tracker;

pub use config::QueueConfig;
pub use errors::{QueueError, Result};
pub use orchestrator::{ChainPhase, ChainReceipt, MultiPhaseIssueOrchestrator, PhaseSpec};
pub use queue::models::{NewPhase, PhaseQueueItem, PhaseStatus, priority};
pub use queue::service::PhaseQueueService;
pub use queue::sorter::{HopperSorter, PriorityStats};
pub use queue::store::{QueueStore, StoreHandle};
pub use tracker::{GitHubTracker, TaskTracker};
