//! Queue configuration.
//!
//! Read from a TOML file with sensible defaults; a missing file means
//! defaults. The queue itself never reads this — it is loop state for the
//! hosting poller (database location, parallelism ceilings, the priority
//! assigned to unbanded work).
//!
//! ```toml
//! db_path = ".hopper/queue.db"
//! max_parallel = 3
//! max_concurrent_parents = 3
//! default_priority = 50
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Location of the SQLite queue database.
    pub db_path: PathBuf,
    /// Maximum chain heads handed out per selection call.
    pub max_parallel: usize,
    /// Advisory ceiling on concurrently running parent tasks.
    pub max_concurrent_parents: i64,
    /// Priority assigned to work enqueued without an explicit band.
    pub default_priority: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(".hopper/queue.db"),
            max_parallel: 3,
            max_concurrent_parents: 3,
            default_priority: crate::queue::models::priority::NORMAL,
        }
    }
}

impl QueueConfig {
    /// Load configuration from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.max_parallel, 3);
        assert_eq!(config.max_concurrent_parents, 3);
        assert_eq!(config.default_priority, 50);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = QueueConfig::load(Path::new("/nonexistent/hopper.toml")).unwrap();
        assert_eq!(config, QueueConfig::default());
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hopper.toml");
        std::fs::write(&path, "max_parallel = 8\ndefault_priority = 20\n").unwrap();

        let config = QueueConfig::load(&path).unwrap();
        assert_eq!(config.max_parallel, 8);
        assert_eq!(config.default_priority, 20);
        assert_eq!(config.max_concurrent_parents, 3);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hopper.toml");
        std::fs::write(&path, "max_parallel = \"not a number\"").unwrap();
        assert!(QueueConfig::load(&path).is_err());
    }
}
