use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One exploitation-framework session as observed by the pipeline.
///
/// The cursor marks the latest known position in the session's event stream.
/// It is advanced only by the ingestor and never decreased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub protocol: String,
    pub opened_at_ms: u64,
    pub closed_at_ms: Option<u64>,
    cursor: u64,
}

impl Session {
    /// Creates a session record at cursor zero.
    pub fn new(id: impl Into<String>, protocol: impl Into<String>, opened_at_ms: u64) -> Self {
        Self {
            id: id.into(),
            protocol: protocol.into(),
            opened_at_ms,
            closed_at_ms: None,
            cursor: 0,
        }
    }

    /// Latest known stream position.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Advances the cursor; regressions are ignored.
    pub fn advance_cursor(&mut self, sequence: u64) {
        if sequence > self.cursor {
            self.cursor = sequence;
        }
    }

    /// Marks the session closed at the given timestamp.
    pub fn close(&mut self, closed_at_ms: u64) {
        self.closed_at_ms = Some(closed_at_ms);
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at_ms.is_some()
    }
}

/// Kind of activity captured within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Command,
    Output,
    Connect,
    Disconnect,
    Other(String),
}

impl EventKind {
    /// Parses a wire tag, preserving unknown tags verbatim.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "command" => EventKind::Command,
            "output" => EventKind::Output,
            "connect" => EventKind::Connect,
            "disconnect" => EventKind::Disconnect,
            other => EventKind::Other(other.to_string()),
        }
    }

    /// Canonical lowercase tag used on the wire and in logs.
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Command => "command",
            EventKind::Output => "output",
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::Other(tag) => tag,
        }
    }
}

/// One observed activity unit within a session. Immutable once constructed.
///
/// The source-assigned sequence number is unique and strictly increasing
/// within a session; it is the unit of resumability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: String,
    pub sequence: u64,
    pub kind: EventKind,
    pub payload: Vec<u8>,
    pub captured_at_ms: u64,
}

impl SessionEvent {
    pub fn new(
        session_id: impl Into<String>,
        sequence: u64,
        kind: EventKind,
        payload: impl Into<Vec<u8>>,
        captured_at_ms: u64,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            sequence,
            kind,
            payload: payload.into(),
            captured_at_ms,
        }
    }
}

impl Ord for SessionEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.session_id
            .cmp(&other.session_id)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for SessionEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
