use async_trait::async_trait;
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;
use uuid::Uuid;

use crate::flatten::FlatRecord;
use crate::sink::{RecordSink, SinkError, validate_table_name};

/// Appends records to a table in a local SQLite file.
///
/// Every save runs in one transaction, so a failed save leaves no rows behind.
#[derive(Debug, Clone)]
pub struct SqliteSink {
    path: PathBuf,
    table: String,
}

fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

impl SqliteSink {
    pub fn new(path: impl Into<PathBuf>, table: &str) -> Result<Self, SinkError> {
        validate_table_name(table)?;
        Ok(Self {
            path: path.into(),
            table: table.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Connection, SinkError> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        conn.execute_batch(&format!(
            "
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                parent_id TEXT NOT NULL,
                depth INTEGER NOT NULL,
                load_id TEXT NOT NULL,
                loaded_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_id ON {table}(id);
            ",
            table = self.table
        ))?;
        Ok(conn)
    }

    fn insert_all(&self, records: &[FlatRecord]) -> Result<usize, SinkError> {
        let mut conn = self.open()?;
        let load_id = Uuid::new_v4().to_string();
        let loaded_at = current_timestamp();

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (id, display_name, parent_id, depth, load_id, loaded_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                self.table
            ))?;
            for record in records {
                stmt.execute(params![
                    record.id,
                    record.display_name,
                    record.parent_id,
                    record.depth as i64,
                    load_id,
                    loaded_at
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// Rows currently in the table, across all runs.
    pub fn row_count(&self) -> Result<usize, SinkError> {
        let conn = self.open()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Records of the most recent load, in the order they were written. Loads
    /// are told apart by their id, not by timestamp.
    pub fn latest_load(&self) -> Result<Vec<FlatRecord>, SinkError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, display_name, parent_id, depth FROM {table}
             WHERE load_id = (SELECT load_id FROM {table} ORDER BY rowid DESC LIMIT 1)
             ORDER BY rowid",
            table = self.table
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(FlatRecord {
                id: row.get(0)?,
                display_name: row.get(1)?,
                parent_id: row.get(2)?,
                depth: row.get::<_, i64>(3)? as usize,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl RecordSink for SqliteSink {
    async fn save(&self, records: Vec<FlatRecord>) -> Result<usize, SinkError> {
        let sink = self.clone();
        let written = tokio::task::spawn_blocking(move || sink.insert_all(&records)).await??;
        info!(rows = written, table = %self.destination(), "Inserted rows");
        Ok(written)
    }

    fn destination(&self) -> String {
        format!("{}#{}", self.path.display(), self.table)
    }
}
