use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Documented priority bands. The column is a plain integer (lower = more
/// urgent), so callers may use intermediate values; these are the
/// conventional stops.
pub mod priority {
    pub const URGENT: i32 = 10;
    pub const HIGH: i32 = 20;
    pub const NORMAL: i32 = 50;
    pub const LOW: i32 = 70;
    pub const BACKGROUND: i32 = 90;
}

/// Lifecycle state of a single phase.
///
/// `Queued` is the initial state for phase > 1, `Ready` for phase 1 (or
/// reached when the preceding phase completes). `Completed`, `Blocked`,
/// and `Failed` are terminal: no outgoing transition exists from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Queued,
    Ready,
    Running,
    Completed,
    Blocked,
    Failed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Blocked | Self::Failed)
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "ready" => Ok(Self::Ready),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "blocked" => Ok(Self::Blocked),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid phase status: {}", s)),
        }
    }
}

/// One phase of one chain, as stored in the queue.
///
/// Phases of the same chain share a `parent_task`; `phase_number` is the
/// 1-indexed position within the chain and `depends_on_phase` (if set)
/// names the immediately preceding phase. `queue_position` is a
/// monotonically increasing insertion sequence used as the FIFO tie-break
/// inside a priority band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseQueueItem {
    pub queue_id: i64,
    pub parent_task: i64,
    pub phase_number: i32,
    pub external_task_id: Option<i64>,
    pub status: PhaseStatus,
    pub depends_on_phase: Option<i32>,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub queue_position: i64,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields supplied when inserting a new phase. `queue_id`,
/// `queue_position`, and the timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewPhase {
    pub parent_task: i64,
    pub phase_number: i32,
    pub status: PhaseStatus,
    pub depends_on_phase: Option<i32>,
    pub payload: serde_json::Value,
    pub priority: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_status_roundtrip() {
        for s in &["queued", "ready", "running", "completed", "blocked", "failed"] {
            let parsed: PhaseStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<PhaseStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(PhaseStatus::Completed.is_terminal());
        assert!(PhaseStatus::Blocked.is_terminal());
        assert!(PhaseStatus::Failed.is_terminal());
        assert!(!PhaseStatus::Queued.is_terminal());
        assert!(!PhaseStatus::Ready.is_terminal());
        assert!(!PhaseStatus::Running.is_terminal());
    }

    #[test]
    fn test_serde_produces_lowercase_strings() {
        assert_eq!(
            serde_json::to_string(&PhaseStatus::Running).unwrap(),
            "\"running\""
        );
        assert_eq!(
            serde_json::from_str::<PhaseStatus>("\"blocked\"").unwrap(),
            PhaseStatus::Blocked
        );
    }

    #[test]
    fn test_priority_bands_ascend() {
        assert!(priority::URGENT < priority::HIGH);
        assert!(priority::HIGH < priority::NORMAL);
        assert!(priority::NORMAL < priority::LOW);
        assert!(priority::LOW < priority::BACKGROUND);
    }
}
