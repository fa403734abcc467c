//! Event model primitives: sessions, session events, and ingestion checkpoints.
//!
//! Pure data with no I/O. Equality and ordering for events are defined by
//! `(session_id, sequence)`; everything serializes deterministically so the
//! delivery layer can derive idempotency tokens from stable identity fields.

pub mod checkpoint;
pub mod session;

pub use checkpoint::{CheckpointRegression, IngestionCheckpoint};
pub use session::{EventKind, Session, SessionEvent};
