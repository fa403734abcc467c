//! Durable checkpoint persistence, partitioned by session id.
//!
//! The store is a dumb persistence layer: no business logic, no knowledge of
//! cycle semantics. The ingestor owns the checkpoint lifecycle and never
//! advances its in-memory notion of progress unless `save` reports success.

pub mod memory;
pub mod sqlite;

use crate::event_model::IngestionCheckpoint;
use thiserror::Error;

pub use memory::MemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;

/// Failure surfaced by checkpoint persistence. Always safe to retry on the
/// next scheduling pass.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
    #[error("checkpoint persistence failed: {0}")]
    Persist(String),
}

/// Contract for durable checkpoint stores.
///
/// `load` must be safe to call concurrently for different session ids; calls
/// for the same session id are serialized by the ingestor's single-owner
/// dispatch. `save` atomically replaces the stored checkpoint: a subsequent
/// `load` observes the old value or the new value, never a torn one.
pub trait CheckpointStore {
    fn load(&self, session_id: &str) -> Result<Option<IngestionCheckpoint>, StorageError>;
    fn save(&mut self, checkpoint: &IngestionCheckpoint) -> Result<(), StorageError>;
    fn delete(&mut self, session_id: &str) -> Result<(), StorageError>;
}
