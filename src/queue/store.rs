//! SQLite-backed storage for phase queue items.
//!
//! `QueueStore` is a synchronous rusqlite wrapper; `StoreHandle` makes it
//! safe to use from async code by running every access on tokio's blocking
//! thread pool. All ordering needed by the selection layer is pushed into
//! SQL here — nothing is sorted in memory, so every call observes current
//! row state.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use rusqlite::{Connection, ErrorCode, OptionalExtension, params};

use crate::errors::{QueueError, Result};

use super::models::{NewPhase, PhaseQueueItem, PhaseStatus};

/// Settings key for the process-wide pause flag.
const PAUSED_KEY: &str = "queue_paused";

const ITEM_COLUMNS: &str = "id, parent_task, phase_number, external_task_id, status, \
     depends_on_phase, payload, priority, queue_position, error, created_at, updated_at";

/// Async-safe handle to the queue store.
///
/// Wraps `QueueStore` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<std::sync::Mutex<QueueStore>>,
}

impl StoreHandle {
    pub fn new(store: QueueStore) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(store)),
        }
    }

    /// Run a closure with access to the store on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&QueueStore) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = store.lock().map_err(|_| QueueError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| QueueError::Other(anyhow::anyhow!("store task panicked: {}", e)))?
    }

    /// Acquire the store mutex synchronously. For startup initialization and
    /// tests; must not be called from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, QueueStore>> {
        self.inner.lock().map_err(|_| QueueError::LockPoisoned)
    }
}

pub struct QueueStore {
    conn: Connection,
}

impl QueueStore {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.run_migrations()?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS phase_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                parent_task INTEGER NOT NULL DEFAULT 0,
                phase_number INTEGER NOT NULL,
                external_task_id INTEGER,
                status TEXT NOT NULL DEFAULT 'queued',
                depends_on_phase INTEGER,
                payload TEXT NOT NULL DEFAULT '{}',
                priority INTEGER NOT NULL DEFAULT 50,
                queue_position INTEGER NOT NULL,
                error TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(parent_task, phase_number)
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_phase_queue_selection
                ON phase_queue(status, phase_number, priority, queue_position);
            CREATE INDEX IF NOT EXISTS idx_phase_queue_parent
                ON phase_queue(parent_task, phase_number);
            ",
        )?;
        Ok(())
    }

    // ── Phase item CRUD ───────────────────────────────────────────────

    /// Insert a new phase. Assigns the next `queue_position` inside the
    /// INSERT itself so the sequence stays monotonic even when several
    /// processes share the database file. Re-enqueueing an existing
    /// `(parent_task, phase_number)` pair fails with `DuplicateKey`.
    pub fn insert(&self, new: &NewPhase) -> Result<PhaseQueueItem> {
        let payload = serde_json::to_string(&new.payload)
            .map_err(|e| anyhow::anyhow!("failed to serialize phase payload: {}", e))?;
        let now = chrono::Utc::now().to_rfc3339();

        let inserted = self.conn.execute(
            "INSERT INTO phase_queue
                 (parent_task, phase_number, status, depends_on_phase, payload,
                  priority, queue_position, created_at, updated_at)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, COALESCE(MAX(queue_position), 0) + 1, ?7, ?7
             FROM phase_queue",
            params![
                new.parent_task,
                new.phase_number,
                new.status.as_str(),
                new.depends_on_phase,
                payload,
                new.priority,
                now,
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                return Err(QueueError::DuplicateKey {
                    parent_task: new.parent_task,
                    phase_number: new.phase_number,
                });
            }
            Err(e) => return Err(e.into()),
        }

        let id = self.conn.last_insert_rowid();
        self.get(id)?
            .ok_or_else(|| QueueError::Other(anyhow::anyhow!("phase not found after insert")))
    }

    pub fn get(&self, id: i64) -> Result<Option<PhaseQueueItem>> {
        let sql = format!("SELECT {} FROM phase_queue WHERE id = ?1", ITEM_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], ItemRow::from_row)
            .optional()?;
        row.map(ItemRow::into_item).transpose()
    }

    /// All phases of one chain, ordered by `phase_number`.
    pub fn find_by_parent(&self, parent_task: i64) -> Result<Vec<PhaseQueueItem>> {
        let sql = format!(
            "SELECT {} FROM phase_queue WHERE parent_task = ?1 ORDER BY phase_number",
            ITEM_COLUMNS
        );
        self.query_items(&sql, params![parent_task])
    }

    /// All `ready` rows in insertion order.
    pub fn find_ready(&self) -> Result<Vec<PhaseQueueItem>> {
        let sql = format!(
            "SELECT {} FROM phase_queue WHERE status = 'ready' ORDER BY queue_position",
            ITEM_COLUMNS
        );
        self.query_items(&sql, params![])
    }

    /// Whether a phase with the given number exists for this parent.
    pub fn phase_exists(&self, parent_task: i64, phase_number: i32) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM phase_queue WHERE parent_task = ?1 AND phase_number = ?2",
            params![parent_task, phase_number],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// The unique `queued` phase of the same chain that depends on
    /// `phase_number`, if any.
    pub fn find_dependent(
        &self,
        parent_task: i64,
        phase_number: i32,
    ) -> Result<Option<PhaseQueueItem>> {
        let sql = format!(
            "SELECT {} FROM phase_queue
             WHERE parent_task = ?1 AND depends_on_phase = ?2 AND status = 'queued'
             LIMIT 1",
            ITEM_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, params![parent_task, phase_number], ItemRow::from_row)
            .optional()?;
        row.map(ItemRow::into_item).transpose()
    }

    /// Update a row's status. When `expected` is supplied the write is a
    /// compare-and-swap: it succeeds only if the row's current status still
    /// equals `expected`. Returns whether a row was affected.
    pub fn update_status(
        &self,
        id: i64,
        status: PhaseStatus,
        expected: Option<PhaseStatus>,
    ) -> Result<bool> {
        let affected = match expected {
            Some(exp) => self.conn.execute(
                "UPDATE phase_queue SET status = ?1, updated_at = datetime('now')
                 WHERE id = ?2 AND status = ?3",
                params![status.as_str(), id, exp.as_str()],
            )?,
            None => self.conn.execute(
                "UPDATE phase_queue SET status = ?1, updated_at = datetime('now')
                 WHERE id = ?2",
                params![status.as_str(), id],
            )?,
        };
        Ok(affected > 0)
    }

    /// Like `update_status`, but also records an error message. Used for
    /// `blocked`/`failed` writes.
    pub fn update_status_with_error(
        &self,
        id: i64,
        status: PhaseStatus,
        error: &str,
        expected: Option<PhaseStatus>,
    ) -> Result<bool> {
        let affected = match expected {
            Some(exp) => self.conn.execute(
                "UPDATE phase_queue SET status = ?1, error = ?2, updated_at = datetime('now')
                 WHERE id = ?3 AND status = ?4",
                params![status.as_str(), error, id, exp.as_str()],
            )?,
            None => self.conn.execute(
                "UPDATE phase_queue SET status = ?1, error = ?2, updated_at = datetime('now')
                 WHERE id = ?3",
                params![status.as_str(), error, id],
            )?,
        };
        Ok(affected > 0)
    }

    /// Attach an external tracking record to a phase.
    pub fn update_external_task_id(&self, id: i64, external_task_id: i64) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE phase_queue SET external_task_id = ?1, updated_at = datetime('now')
             WHERE id = ?2",
            params![external_task_id, id],
        )?;
        Ok(affected > 0)
    }

    /// Administrative removal; queue items are otherwise retained as history.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM phase_queue WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    pub fn count_by_status(&self) -> Result<HashMap<PhaseStatus, i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM phase_queue GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut counts = HashMap::new();
        for row in rows {
            let (status_str, count) = row?;
            let status = PhaseStatus::from_str(&status_str).map_err(|_| {
                QueueError::Other(anyhow::anyhow!(
                    "invalid status in database: '{}'",
                    status_str
                ))
            })?;
            counts.insert(status, count);
        }
        Ok(counts)
    }

    // ── Selection queries ─────────────────────────────────────────────

    /// Ready phase-1 items without an external tracking record, ordered by
    /// `priority ASC, queue_position ASC, parent_task ASC`. The three-key
    /// order is the full definition of "next work": priority band first,
    /// insertion order second, parent id as a deterministic tie-break for
    /// simultaneous inserts.
    pub fn next_chain_heads(&self, limit: usize) -> Result<Vec<PhaseQueueItem>> {
        let sql = format!(
            "SELECT {} FROM phase_queue
             WHERE status = 'ready' AND phase_number = 1 AND external_task_id IS NULL
             ORDER BY priority ASC, queue_position ASC, parent_task ASC
             LIMIT ?1",
            ITEM_COLUMNS
        );
        self.query_items(&sql, params![limit as i64])
    }

    /// Number of distinct parent tasks with any phase currently `running`.
    pub fn running_parent_count(&self) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT parent_task) FROM phase_queue WHERE status = 'running'",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Per-priority totals: `(priority, total, ready)` in ascending
    /// priority order.
    pub fn priority_counts(&self) -> Result<Vec<(i32, i64, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT priority, COUNT(*),
                    SUM(CASE WHEN status = 'ready' THEN 1 ELSE 0 END)
             FROM phase_queue GROUP BY priority ORDER BY priority",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i32>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }

    // ── Settings ──────────────────────────────────────────────────────

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// Advisory pause flag for automatic pollers. Does not block manual
    /// calls against the queue.
    pub fn is_paused(&self) -> Result<bool> {
        Ok(self.get_setting(PAUSED_KEY)?.as_deref() == Some("true"))
    }

    pub fn set_paused(&self, paused: bool) -> Result<()> {
        self.set_setting(PAUSED_KEY, if paused { "true" } else { "false" })
    }

    // ── Internal helpers ──────────────────────────────────────────────

    fn query_items(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<PhaseQueueItem>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, ItemRow::from_row)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?.into_item()?);
        }
        Ok(items)
    }
}

/// Intermediate row struct for reading phase items from SQLite before
/// converting the status string and payload JSON into typed values.
struct ItemRow {
    id: i64,
    parent_task: i64,
    phase_number: i32,
    external_task_id: Option<i64>,
    status: String,
    depends_on_phase: Option<i32>,
    payload: String,
    priority: i32,
    queue_position: i64,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ItemRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            parent_task: row.get(1)?,
            phase_number: row.get(2)?,
            external_task_id: row.get(3)?,
            status: row.get(4)?,
            depends_on_phase: row.get(5)?,
            payload: row.get(6)?,
            priority: row.get(7)?,
            queue_position: row.get(8)?,
            error: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_item(self) -> Result<PhaseQueueItem> {
        let status = PhaseStatus::from_str(&self.status).map_err(|_| {
            QueueError::Other(anyhow::anyhow!("invalid status in database: '{}'", self.status))
        })?;
        let payload: serde_json::Value = serde_json::from_str(&self.payload)
            .map_err(|e| anyhow::anyhow!("corrupt payload JSON '{}': {}", self.payload, e))?;
        Ok(PhaseQueueItem {
            queue_id: self.id,
            parent_task: self.parent_task,
            phase_number: self.phase_number,
            external_task_id: self.external_task_id,
            status,
            depends_on_phase: self.depends_on_phase,
            payload,
            priority: self.priority,
            queue_position: self.queue_position,
            error: self.error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
