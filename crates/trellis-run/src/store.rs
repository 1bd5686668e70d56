//! SQLite-backed run store.
//!
//! One database per run root holds every run executed there, so a later
//! run can rehydrate results from an earlier one by run id and path.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use trellis_core::error::{Result, TrellisError};
use trellis_core::types::{ComponentPath, ExecutionStatus};
use trellis_engine::{ComponentRecord, ExecutionRecorder, ResultHydrator};

/// Summary row for one run.
#[derive(Debug, Clone)]
pub struct RunRow {
    pub run_id: String,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Persistent store for run metadata and per-component records.
pub struct RunStore {
    conn: Mutex<Connection>,
}

impl RunStore {
    /// Open or create the store database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| TrellisError::Store(format!("failed to open run store: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;

             CREATE TABLE IF NOT EXISTS runs (
                 run_id TEXT PRIMARY KEY,
                 status TEXT NOT NULL,
                 error TEXT,
                 started_at TEXT NOT NULL,
                 completed_at TEXT
             );

             CREATE TABLE IF NOT EXISTS component_records (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 run_id TEXT NOT NULL,
                 path TEXT NOT NULL,
                 status TEXT NOT NULL,
                 record_json TEXT NOT NULL,
                 recorded_at TEXT NOT NULL
             );

             CREATE INDEX IF NOT EXISTS idx_records_run_path
                 ON component_records(run_id, path);",
        )
        .map_err(|e| TrellisError::Store(format!("failed to initialize run schema: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn create_run(&self, run_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO runs (run_id, status, started_at) VALUES (?1, ?2, ?3)",
            params![run_id, "running", Utc::now().to_rfc3339()],
        )
        .map_err(|e| TrellisError::Store(format!("failed to create run row: {}", e)))?;
        Ok(())
    }

    pub fn finish_run(
        &self,
        run_id: &str,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE runs SET status = ?2, error = ?3, completed_at = ?4 WHERE run_id = ?1",
            params![run_id, status.to_string(), error, Utc::now().to_rfc3339()],
        )
        .map_err(|e| TrellisError::Store(format!("failed to finish run row: {}", e)))?;
        Ok(())
    }

    pub fn load_run(&self, run_id: &str) -> Result<Option<RunRow>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT run_id, status, error, started_at, completed_at
                 FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| TrellisError::Store(format!("failed to load run: {}", e)))?;

        row.map(|(run_id, status, error, started_at, completed_at)| {
            Ok(RunRow {
                run_id,
                status: status.parse()?,
                error,
                started_at: parse_timestamp(&started_at)?,
                completed_at: completed_at.as_deref().map(parse_timestamp).transpose()?,
            })
        })
        .transpose()
    }

    pub fn record_component(&self, run_id: &str, record: &ComponentRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO component_records (run_id, path, status, record_json, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run_id,
                record.path.as_str(),
                record.status.to_string(),
                serde_json::to_string(record)?,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| TrellisError::Store(format!("failed to record component: {}", e)))?;
        Ok(())
    }

    /// Records at `prefix` and below for one run, in recording order.
    pub fn load_components(
        &self,
        run_id: &str,
        prefix: &ComponentPath,
    ) -> Result<Vec<ComponentRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT record_json FROM component_records
                 WHERE run_id = ?1 AND (path = ?2 OR path LIKE ?3)
                 ORDER BY id",
            )
            .map_err(|e| TrellisError::Store(format!("failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(
                params![run_id, prefix.as_str(), format!("{}.%", prefix.as_str())],
                |row| row.get::<_, String>(0),
            )
            .map_err(|e| TrellisError::Store(format!("failed to query records: {}", e)))?;

        let mut records = Vec::new();
        for raw in rows {
            let raw = raw.map_err(|e| TrellisError::Store(e.to_string()))?;
            records.push(serde_json::from_str(&raw)?);
        }
        Ok(records)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TrellisError::Store(format!("run store poisoned: {}", e)))
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TrellisError::Store(format!("bad timestamp '{}': {}", raw, e)))
}

/// Recorder bound to one run id.
pub struct StoreRecorder {
    store: Arc<RunStore>,
    run_id: String,
}

impl StoreRecorder {
    pub fn new(store: Arc<RunStore>, run_id: impl Into<String>) -> Self {
        Self {
            store,
            run_id: run_id.into(),
        }
    }
}

impl ExecutionRecorder for StoreRecorder {
    fn record(&self, record: &ComponentRecord) -> Result<()> {
        self.store.record_component(&self.run_id, record)
    }
}

/// Hydrator reading a previous run's records.
pub struct StoreHydrator {
    store: Arc<RunStore>,
    previous_run_id: String,
}

impl StoreHydrator {
    pub fn new(store: Arc<RunStore>, previous_run_id: impl Into<String>) -> Self {
        Self {
            store,
            previous_run_id: previous_run_id.into(),
        }
    }
}

impl ResultHydrator for StoreHydrator {
    fn load_subtree(&self, path: &ComponentPath) -> Result<Vec<ComponentRecord>> {
        self.store.load_components(&self.previous_run_id, path)
    }
}
