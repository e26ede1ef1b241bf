//! SQLite-backed shard checkpoints and leases
//!
//! Tables:
//! - `shard_checkpoints` - last committed sequence number per shard
//! - `shard_leases` - current owner of each shard
//!
//! A checkpointer commits only while its worker still owns the shard lease;
//! once another worker claims it, commits report `ShutdownSignal`.

use crate::pipeline::checkpoint::{CheckpointOutcome, Checkpointer};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckpointStoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
}

pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
}

impl SqliteCheckpointStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, CheckpointStoreError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_millis(500))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS shard_checkpoints (
                shard_id TEXT PRIMARY KEY,
                sequence_number INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS shard_leases (
                shard_id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                claimed_at INTEGER NOT NULL
            );",
        )?;

        log::info!("✅ Checkpoint store initialized with WAL mode");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take ownership of a shard, displacing any previous owner
    pub fn claim_lease(&self, shard_id: &str, owner: &str) -> Result<(), CheckpointStoreError> {
        self.conn().execute(
            "INSERT INTO shard_leases (shard_id, owner, claimed_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(shard_id) DO UPDATE SET owner = excluded.owner, claimed_at = excluded.claimed_at",
            params![shard_id, owner, Utc::now().timestamp()],
        )?;
        log::info!("🔑 Worker {} holds the lease for shard {}", owner, shard_id);
        Ok(())
    }

    pub fn lease_owner(&self, shard_id: &str) -> Result<Option<String>, CheckpointStoreError> {
        let owner = self
            .conn()
            .query_row(
                "SELECT owner FROM shard_leases WHERE shard_id = ?1",
                params![shard_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner)
    }

    /// Last committed sequence number, 0 when the shard was never checkpointed
    pub fn last_sequence(&self, shard_id: &str) -> Result<u64, CheckpointStoreError> {
        let sequence: Option<i64> = self
            .conn()
            .query_row(
                "SELECT sequence_number FROM shard_checkpoints WHERE shard_id = ?1",
                params![shard_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(sequence.map(|s| s.max(0) as u64).unwrap_or(0))
    }

    /// Commit `sequence_number` if `owner` still holds the lease
    fn commit(&self, shard_id: &str, owner: &str, sequence_number: u64) -> CheckpointOutcome {
        let mut conn = self.conn();
        let result = (|| -> rusqlite::Result<bool> {
            let tx = conn.transaction()?;
            let current_owner: Option<String> = tx
                .query_row(
                    "SELECT owner FROM shard_leases WHERE shard_id = ?1",
                    params![shard_id],
                    |row| row.get(0),
                )
                .optional()?;
            if current_owner.as_deref() != Some(owner) {
                return Ok(false);
            }

            tx.execute(
                "INSERT INTO shard_checkpoints (shard_id, sequence_number, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(shard_id) DO UPDATE SET sequence_number = excluded.sequence_number, updated_at = excluded.updated_at",
                params![shard_id, sequence_number as i64, Utc::now().timestamp()],
            )?;
            tx.commit()?;
            Ok(true)
        })();

        match result {
            Ok(true) => CheckpointOutcome::Success,
            Ok(false) => CheckpointOutcome::ShutdownSignal,
            Err(e) => classify_sqlite_error(e),
        }
    }
}

/// Busy or locked databases are transient; everything else needs an operator
fn classify_sqlite_error(err: rusqlite::Error) -> CheckpointOutcome {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            CheckpointOutcome::Throttled(err.to_string())
        }
        _ => CheckpointOutcome::StorageError(err.to_string()),
    }
}

/// Checkpointer for one shard lease held by one worker
pub struct ShardCheckpointer {
    store: Arc<SqliteCheckpointStore>,
    shard_id: String,
    owner: String,
    pending_sequence: u64,
}

impl ShardCheckpointer {
    pub fn new(store: Arc<SqliteCheckpointStore>, shard_id: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            store,
            shard_id: shard_id.into(),
            owner: owner.into(),
            pending_sequence: 0,
        }
    }

    /// Position the next commit will record
    pub fn set_position(&mut self, sequence_number: u64) {
        self.pending_sequence = self.pending_sequence.max(sequence_number);
    }

    pub fn position(&self) -> u64 {
        self.pending_sequence
    }
}

#[async_trait]
impl Checkpointer for ShardCheckpointer {
    async fn checkpoint(&mut self) -> CheckpointOutcome {
        let outcome = self
            .store
            .commit(&self.shard_id, &self.owner, self.pending_sequence);
        if outcome == CheckpointOutcome::Success {
            log::debug!(
                "✅ Shard {} checkpointed at sequence {}",
                self.shard_id,
                self.pending_sequence
            );
        }
        outcome
    }
}
