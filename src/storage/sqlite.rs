use super::{CheckpointStore, StorageError};
use crate::event_model::IngestionCheckpoint;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// SQLite-backed checkpoint store.
///
/// One row per session id. `save` is a single `INSERT OR REPLACE`, which
/// SQLite applies atomically under its journal, satisfying the
/// old-value-or-new-value contract across crashes. The connection sits behind
/// a mutex so clones of the store can be handed to every session worker.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCheckpointStore {
    /// Opens (or creates) the checkpoint database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)
            .map_err(|err| StorageError::Unavailable(err.to_string()))?;
        Self::with_connection(conn)
    }

    /// Opens an in-memory database. Used by tests and `:memory:` configs.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()
            .map_err(|err| StorageError::Unavailable(err.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                session_id TEXT PRIMARY KEY,
                last_sequence INTEGER NOT NULL,
                idempotency_token TEXT NOT NULL,
                updated_at_ms INTEGER NOT NULL
            );",
        )
        .map_err(|err| StorageError::Unavailable(err.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn load(&self, session_id: &str) -> Result<Option<IngestionCheckpoint>, StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT session_id, last_sequence, idempotency_token, updated_at_ms
             FROM checkpoints WHERE session_id = ?1",
            params![session_id],
            |row| {
                Ok(IngestionCheckpoint {
                    session_id: row.get(0)?,
                    last_sequence: row.get::<_, i64>(1)? as u64,
                    idempotency_token: row.get(2)?,
                    updated_at_ms: row.get::<_, i64>(3)? as u64,
                })
            },
        )
        .optional()
        .map_err(|err| StorageError::Persist(err.to_string()))
    }

    fn save(&mut self, checkpoint: &IngestionCheckpoint) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO checkpoints
             (session_id, last_sequence, idempotency_token, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                checkpoint.session_id,
                checkpoint.last_sequence as i64,
                checkpoint.idempotency_token,
                checkpoint.updated_at_ms as i64,
            ],
        )
        .map_err(|err| StorageError::Persist(err.to_string()))?;
        Ok(())
    }

    fn delete(&mut self, session_id: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM checkpoints WHERE session_id = ?1",
            params![session_id],
        )
        .map_err(|err| StorageError::Persist(err.to_string()))?;
        Ok(())
    }
}
