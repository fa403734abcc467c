use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Durable marker of ingestion progress for one session.
///
/// `last_sequence` is the highest sequence number the sink has acknowledged.
/// It only ever increases for a given session and is rewritten exactly once
/// per successful delivery cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionCheckpoint {
    pub session_id: String,
    pub last_sequence: u64,
    pub idempotency_token: String,
    pub updated_at_ms: u64,
}

/// Error raised when an advance would move a checkpoint backwards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("checkpoint regression for session {session_id}: {current} -> {attempted}")]
pub struct CheckpointRegression {
    pub session_id: String,
    pub current: u64,
    pub attempted: u64,
}

impl IngestionCheckpoint {
    /// Creates the first checkpoint for a session that has never been ingested.
    pub fn first(
        session_id: impl Into<String>,
        last_sequence: u64,
        idempotency_token: impl Into<String>,
        now_ms: u64,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            last_sequence,
            idempotency_token: idempotency_token.into(),
            updated_at_ms: now_ms,
        }
    }

    /// Produces the successor checkpoint after a durable sink acknowledgment.
    ///
    /// Refuses regressions: the new sequence must be strictly greater than
    /// the current one.
    pub fn advanced(
        &self,
        last_sequence: u64,
        idempotency_token: impl Into<String>,
        now_ms: u64,
    ) -> Result<Self, CheckpointRegression> {
        if last_sequence <= self.last_sequence {
            return Err(CheckpointRegression {
                session_id: self.session_id.clone(),
                current: self.last_sequence,
                attempted: last_sequence,
            });
        }
        Ok(Self {
            session_id: self.session_id.clone(),
            last_sequence,
            idempotency_token: idempotency_token.into(),
            updated_at_ms: now_ms,
        })
    }

    /// Sequence strictly after which the next pull must resume.
    pub fn resume_after(&self) -> u64 {
        self.last_sequence
    }
}
