//! Source collaborator boundary: the exploitation-framework endpoint the
//! pipeline pulls session activity from.

pub mod http;

use crate::event_model::SessionEvent;
use thiserror::Error;

pub use http::HttpEventSource;

/// One page of events pulled from a session's stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullPage {
    pub events: Vec<SessionEvent>,
    pub has_more: bool,
}

/// Failure surfaced by the source endpoint.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("source transport failed: {0}")]
    Transport(String),
    #[error("source authentication failed: {0}")]
    Auth(String),
}

/// Consumed interface of the source endpoint.
///
/// `pull` returns events strictly after `after_sequence`, in increasing
/// sequence order, at most `max_count` of them. `after_sequence == 0` reads
/// from the beginning of the stream.
pub trait EventSource {
    fn pull(
        &mut self,
        session_id: &str,
        after_sequence: u64,
        max_count: usize,
    ) -> Result<PullPage, SourceError>;

    /// Session ids currently open on the framework, used to discover new
    /// sessions each scheduling pass.
    fn list_open_sessions(&mut self) -> Result<Vec<String>, SourceError>;
}
