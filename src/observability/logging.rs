use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Log severities, orderable for level gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    /// Parses a config-supplied level name, case-insensitive.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rotation policy for accumulated log segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRotationPolicy {
    pub max_bytes: usize,
    pub max_segments: usize,
}

impl Default for LogRotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 1 << 24,
            max_segments: 8,
        }
    }
}

#[derive(Debug, Serialize)]
struct LogRecord<'a> {
    ts: u64,
    level: &'a str,
    module: &'a str,
    session: &'a str,
    message: &'a str,
}

#[derive(Default)]
struct LogSegment {
    lines: Vec<String>,
    bytes: usize,
}

struct LoggerState {
    min_level: LogLevel,
    policy: LogRotationPolicy,
    rotated: VecDeque<LogSegment>,
    active: LogSegment,
}

/// JSON-line logger shared across session workers.
///
/// Lines accumulate in bounded in-memory segments with deterministic rotation
/// so tests can assert on exactly what was emitted.
#[derive(Clone)]
pub struct PipelineLogger {
    state: Arc<Mutex<LoggerState>>,
}

impl PipelineLogger {
    pub fn new(min_level: LogLevel, policy: LogRotationPolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(LoggerState {
                min_level,
                policy,
                rotated: VecDeque::new(),
                active: LogSegment::default(),
            })),
        }
    }

    /// Current minimum severity.
    pub fn level(&self) -> LogLevel {
        self.state.lock().unwrap().min_level
    }

    /// Applies a dynamic level override.
    pub fn set_level(&self, level: LogLevel) {
        self.state.lock().unwrap().min_level = level;
    }

    /// Emits one JSON line; records below the minimum level are dropped.
    pub fn log(&self, now_ms: u64, level: LogLevel, module: &str, session: &str, message: &str) {
        let mut state = self.state.lock().unwrap();
        if level < state.min_level {
            return;
        }
        let record = LogRecord {
            ts: now_ms,
            level: level.as_str(),
            module,
            session,
            message,
        };
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(_) => return,
        };
        if state.active.bytes + line.len() > state.policy.max_bytes
            && !state.active.lines.is_empty()
        {
            let full = std::mem::take(&mut state.active);
            state.rotated.push_back(full);
            while state.rotated.len() > state.policy.max_segments {
                state.rotated.pop_front();
            }
        }
        state.active.bytes += line.len();
        state.active.lines.push(line);
    }

    /// Every retained line, oldest first.
    pub fn lines(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .rotated
            .iter()
            .chain(std::iter::once(&state.active))
            .flat_map(|segment| segment.lines.iter().cloned())
            .collect()
    }

    /// Number of rotated-out segments currently retained.
    pub fn rotated_segments(&self) -> usize {
        self.state.lock().unwrap().rotated.len()
    }
}

impl Default for PipelineLogger {
    fn default() -> Self {
        Self::new(LogLevel::Info, LogRotationPolicy::default())
    }
}
