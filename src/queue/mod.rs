//! Multi-phase workflow queue.
//!
//! ## Overview
//!
//! A chain of work is stored as rows in a single `phase_queue` table, one
//! row per phase. Phase 1 starts `ready`; later phases start `queued` and
//! each depends on the phase before it. External pollers select candidates
//! through `HopperSorter`, claim them through
//! `PhaseQueueService::update_status` (a compare-and-swap from `ready` to
//! `running`), and report outcomes with `mark_phase_complete` /
//! `mark_phase_failed`, which cascade through `dependencies`.
//!
//! ## Module Map
//!
//! | Module         | Responsibility                                        |
//! |----------------|-------------------------------------------------------|
//! | `models`       | `PhaseQueueItem`, `PhaseStatus`, priority bands       |
//! | `store`        | SQLite access via `StoreHandle` (thin `Arc<Mutex<_>>`)|
//! | `service`      | Public facade: enqueue, transitions, pause flag       |
//! | `dependencies` | Cascades: wake the next phase, block a failed chain   |
//! | `sorter`       | Priority + FIFO selection with a parallelism cap      |

pub mod dependencies;
pub mod models;
pub mod service;
pub mod sorter;
pub mod store;
