use anyhow::{Context, Result};
use log::{debug, error};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::history::CheckpointSink;
use crate::model::Snapshot;

/// SQLite-backed checkpoint log. Every row is one full snapshot as JSON.
pub struct CheckpointStore {
    conn: Connection,
    keep: Option<usize>,
}

impl CheckpointStore {
    /// Open or create the store at the specified path
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self { conn, keep: None };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let store = Self { conn, keep: None };
        store.init_schema()?;
        Ok(store)
    }

    /// Prune down to the newest `keep` rows after every checkpoint.
    pub fn with_retention(mut self, keep: usize) -> Self {
        self.keep = Some(keep.max(1));
        self
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at INTEGER NOT NULL,
                group_count INTEGER NOT NULL,
                snapshot_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            INSERT OR IGNORE INTO metadata (key, value) VALUES ('schema_version', '1');
            "#,
        )?;
        Ok(())
    }

    /// Append a snapshot. Returns its row id.
    pub fn save_checkpoint(&mut self, snapshot: &Snapshot) -> Result<i64> {
        let json = serde_json::to_string(snapshot).context("Failed to serialize snapshot")?;
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO checkpoints (created_at, group_count, snapshot_json) VALUES (?1, ?2, ?3)",
            params![created_at, snapshot.groups.len() as i64, json],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        if let Some(keep) = self.keep {
            self.prune(keep)?;
        }
        debug!("[DB] Saved checkpoint {} ({} groups)", id, snapshot.groups.len());
        Ok(id)
    }

    pub fn load(&self, id: i64) -> Result<Option<Snapshot>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT snapshot_json FROM checkpoints WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| parse_snapshot(&j)).transpose()
    }

    pub fn load_latest(&self) -> Result<Option<Snapshot>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT snapshot_json FROM checkpoints ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| parse_snapshot(&j)).transpose()
    }

    pub fn latest_id(&self) -> Result<Option<i64>> {
        let id: Option<i64> = self
            .conn
            .query_row("SELECT MAX(id) FROM checkpoints", [], |row| row.get(0))?;
        Ok(id)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM checkpoints", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Drop everything but the newest `keep` checkpoints. Returns rows removed.
    pub fn prune(&mut self, keep: usize) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM checkpoints WHERE id NOT IN (
                SELECT id FROM checkpoints ORDER BY id DESC LIMIT ?1
             )",
            [keep as i64],
        )?;
        if removed > 0 {
            debug!("[DB] Pruned {} checkpoints", removed);
        }
        Ok(removed)
    }

    /// Removes the newest checkpoint and returns the one before it.
    pub fn discard_latest(&mut self) -> Result<Option<Snapshot>> {
        let Some(id) = self.latest_id()? else {
            return Ok(None);
        };
        self.conn.execute("DELETE FROM checkpoints WHERE id = ?1", [id])?;
        self.load_latest()
    }

    /// Export the latest snapshot to a JSON string (empty tree if none)
    pub fn export_to_json(&self) -> Result<String> {
        let snapshot = self.load_latest()?.unwrap_or_default();
        let json = serde_json::to_string_pretty(&snapshot)?;
        Ok(json)
    }

    /// Import a snapshot as the newest checkpoint
    pub fn import_from_json(&mut self, json: &str) -> Result<i64> {
        let snapshot = parse_snapshot(json)?;
        self.save_checkpoint(&snapshot)
    }
}

fn parse_snapshot(json: &str) -> Result<Snapshot> {
    serde_json::from_str(json).context("Invalid snapshot JSON")
}

impl CheckpointSink for CheckpointStore {
    fn checkpoint(&mut self, snapshot: Snapshot) {
        if let Err(e) = self.save_checkpoint(&snapshot) {
            error!("[DB] Failed to save checkpoint: {:#}", e);
        }
    }
}
