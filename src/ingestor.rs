//! The per-session control loop: pull events after the checkpoint, transform
//! them into the sink schema, deliver under a deterministic idempotency
//! token, and advance the checkpoint only after durable acknowledgment.
//!
//! The pipeline is at-least-once on the source-to-sink path and exactly-once
//! from the sink's effective-state point of view: a checkpoint write that
//! fails after a successful delivery leaves the checkpoint behind, the next
//! cycle resends the identical batch and token, and the sink answers
//! `replayed`.

use crate::client::{
    idempotency_token, DeliveryClient, DeliveryError, DeliveryRecord, DeliveryStatus, SinkTransport,
};
use crate::event_model::{IngestionCheckpoint, SessionEvent};
use crate::observability::{CycleSpan, TelemetryRecorder};
use crate::source::{EventSource, SourceError};
use crate::storage::{CheckpointStore, StorageError};
use std::thread;
use std::time::{Duration, Instant};

/// States of the per-session delivery cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Pulling,
    Transforming,
    Delivering,
    Advancing,
    Error,
}

/// Tagged outcome of one cycle. `ERROR` is terminal-but-retryable data, not a
/// crash; callers apply differentiated backoff per kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Ok,
    /// Sequence gap or duplicate against the checkpoint. A source-side
    /// anomaly; never retried automatically on the fast path.
    Integrity(String),
    /// Network or timeout failure after the retry budget was exhausted.
    Transport(String),
    /// The sink explicitly rejected the batch.
    Api { reason: String, transient: bool },
    /// Checkpoint persistence failed; safe to retry on the next pass.
    Storage(String),
}

impl CycleOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, CycleOutcome::Ok)
    }

    /// Stable label used in telemetry and logs.
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Ok => "ok",
            CycleOutcome::Integrity(_) => "integrity",
            CycleOutcome::Transport(_) => "transport",
            CycleOutcome::Api { .. } => "api",
            CycleOutcome::Storage(_) => "storage",
        }
    }
}

/// Outcome of one ingestion cycle. Read-only; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionResult {
    pub session_id: String,
    pub pulled: usize,
    pub delivered: usize,
    /// Events absorbed by sink replay detection (batch answered `replayed`).
    pub skipped: usize,
    pub has_more: bool,
    pub checkpoint: Option<IngestionCheckpoint>,
    pub outcome: CycleOutcome,
    /// Step in which the cycle aborted, when it did.
    pub failed_in: Option<CycleState>,
}

/// Exponential backoff schedule for retryable delivery failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: u64,
    pub backoff_cap_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 250,
            backoff_multiplier: 2,
            backoff_cap_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1).saturating_pow(attempt);
        let delay = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_cap_ms);
        Duration::from_millis(delay)
    }
}

/// Tunables for one ingestor instance.
#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    /// Upper bound on events per pull, and therefore per delivered batch.
    pub max_batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_batch_size: 128,
            retry: RetryPolicy::default(),
        }
    }
}

/// Behavior the scheduler requires from a per-worker runner.
pub trait CycleRunner {
    fn run_cycle(&mut self, session_id: &str, now_ms: u64) -> IngestionResult;

    /// Session ids currently open on the source.
    fn discover_sessions(&mut self) -> Result<Vec<String>, SourceError>;

    /// Drops checkpoint tracking for a permanently closed session.
    fn retire_session(&mut self, session_id: &str) -> Result<(), StorageError>;

    /// Releases transport resources before the worker exits.
    fn close(&mut self) {}
}

/// The ingestor: owns the checkpoint lifecycle for whichever session it is
/// currently processing. One cycle pulls at most one batch and rewrites the
/// checkpoint at most once.
pub struct SessionIngestor<S, C, T>
where
    S: EventSource,
    C: CheckpointStore,
    T: SinkTransport,
{
    source: S,
    store: C,
    client: DeliveryClient<T>,
    options: IngestOptions,
    telemetry: TelemetryRecorder,
}

impl<S, C, T> SessionIngestor<S, C, T>
where
    S: EventSource,
    C: CheckpointStore,
    T: SinkTransport,
{
    pub fn new(
        source: S,
        store: C,
        client: DeliveryClient<T>,
        options: IngestOptions,
        telemetry: TelemetryRecorder,
    ) -> Self {
        Self {
            source,
            store,
            client,
            options,
            telemetry,
        }
    }

    /// Runs one pull-transform-deliver-advance cycle for the session.
    ///
    /// The checkpoint is advanced only after the sink acknowledges the batch
    /// and the store reports a successful save; every abort path leaves it
    /// untouched so the next cycle naturally re-pulls the same events.
    pub fn run_cycle(&mut self, session_id: &str, now_ms: u64) -> IngestionResult {
        let started = Instant::now();
        let mut trace = CycleTrace::new(session_id);

        // IDLE -> PULLING
        let checkpoint = match self.store.load(session_id) {
            Ok(checkpoint) => checkpoint,
            Err(err) => {
                return self.seal(
                    trace,
                    started,
                    CycleOutcome::Storage(err.to_string()),
                    Some(CycleState::Pulling),
                );
            }
        };
        let after = checkpoint
            .as_ref()
            .map(IngestionCheckpoint::resume_after)
            .unwrap_or(0);
        let page = match self
            .source
            .pull(session_id, after, self.options.max_batch_size)
        {
            Ok(page) => page,
            Err(err) => {
                return self.seal(
                    trace,
                    started,
                    CycleOutcome::Transport(err.to_string()),
                    Some(CycleState::Pulling),
                );
            }
        };
        trace.pulled = page.events.len();
        trace.has_more = page.has_more;
        if page.events.is_empty() {
            return self.seal(trace, started, CycleOutcome::Ok, None);
        }

        // PULLING -> TRANSFORMING
        if let Err(reason) = validate_sequences(checkpoint.as_ref(), &page.events) {
            return self.seal(
                trace,
                started,
                CycleOutcome::Integrity(reason),
                Some(CycleState::Pulling),
            );
        }
        let records: Vec<DeliveryRecord> =
            page.events.iter().map(DeliveryRecord::from).collect();
        let first_sequence = page.events[0].sequence;
        let last_sequence = page.events[page.events.len() - 1].sequence;
        let token = idempotency_token(session_id, first_sequence, last_sequence);

        // TRANSFORMING -> DELIVERING
        let envelope = loop {
            match self.client.deliver(session_id, &records, &token) {
                Ok(envelope) => break envelope,
                Err(err) if err.is_retryable() && trace.retries < self.options.retry.max_retries => {
                    let delay = self.options.retry.delay_for(trace.retries);
                    trace.retries += 1;
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
                Err(DeliveryError::Transport(message)) => {
                    return self.seal(
                        trace,
                        started,
                        CycleOutcome::Transport(message),
                        Some(CycleState::Delivering),
                    );
                }
                Err(DeliveryError::Api {
                    reason, transient, ..
                }) => {
                    return self.seal(
                        trace,
                        started,
                        CycleOutcome::Api { reason, transient },
                        Some(CycleState::Delivering),
                    );
                }
                Err(DeliveryError::Configuration(message)) => {
                    return self.seal(
                        trace,
                        started,
                        CycleOutcome::Api {
                            reason: message,
                            transient: false,
                        },
                        Some(CycleState::Delivering),
                    );
                }
            }
        };
        match envelope.status {
            DeliveryStatus::Replayed => trace.skipped = page.events.len(),
            _ => trace.delivered = page.events.len(),
        }

        // DELIVERING -> ADVANCING
        let next = match &checkpoint {
            Some(current) => match current.advanced(last_sequence, &token, now_ms) {
                Ok(next) => next,
                Err(err) => {
                    return self.seal(
                        trace,
                        started,
                        CycleOutcome::Integrity(err.to_string()),
                        Some(CycleState::Advancing),
                    );
                }
            },
            None => IngestionCheckpoint::first(session_id, last_sequence, &token, now_ms),
        };
        if let Err(err) = self.store.save(&next) {
            // The sink already holds the batch; the next cycle resends it and
            // the replay acknowledgment advances the checkpoint.
            return self.seal(
                trace,
                started,
                CycleOutcome::Storage(err.to_string()),
                Some(CycleState::Advancing),
            );
        }
        trace.checkpoint = Some(next);

        // ADVANCING -> IDLE
        self.seal(trace, started, CycleOutcome::Ok, None)
    }

    /// Removes checkpoint tracking for a permanently closed session.
    pub fn retire_session(&mut self, session_id: &str) -> Result<(), StorageError> {
        self.store.delete(session_id)
    }

    /// Releases the delivery transport.
    pub fn close(&mut self) {
        self.client.close();
    }

    fn seal(
        &self,
        trace: CycleTrace,
        started: Instant,
        outcome: CycleOutcome,
        failed_in: Option<CycleState>,
    ) -> IngestionResult {
        let duration_ms = started.elapsed().as_millis() as u64;
        self.telemetry.record_cycle(CycleSpan {
            session_id: trace.session_id.clone(),
            outcome: outcome.label(),
            duration_ms,
            pulled: trace.pulled,
            delivered: trace.delivered,
            skipped: trace.skipped,
            retries: trace.retries,
        });
        IngestionResult {
            session_id: trace.session_id,
            pulled: trace.pulled,
            delivered: trace.delivered,
            skipped: trace.skipped,
            has_more: trace.has_more,
            checkpoint: trace.checkpoint,
            outcome,
            failed_in,
        }
    }
}

impl<S, C, T> CycleRunner for SessionIngestor<S, C, T>
where
    S: EventSource,
    C: CheckpointStore,
    T: SinkTransport,
{
    fn run_cycle(&mut self, session_id: &str, now_ms: u64) -> IngestionResult {
        SessionIngestor::run_cycle(self, session_id, now_ms)
    }

    fn discover_sessions(&mut self) -> Result<Vec<String>, SourceError> {
        self.source.list_open_sessions()
    }

    fn retire_session(&mut self, session_id: &str) -> Result<(), StorageError> {
        SessionIngestor::retire_session(self, session_id)
    }

    fn close(&mut self) {
        SessionIngestor::close(self);
    }
}

struct CycleTrace {
    session_id: String,
    pulled: usize,
    delivered: usize,
    skipped: usize,
    has_more: bool,
    retries: u32,
    checkpoint: Option<IngestionCheckpoint>,
}

impl CycleTrace {
    fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            pulled: 0,
            delivered: 0,
            skipped: 0,
            has_more: false,
            retries: 0,
            checkpoint: None,
        }
    }
}

/// Checks a pulled batch against the checkpoint and its own ordering.
///
/// With a checkpoint at `n` the batch must start exactly at `n + 1`: a higher
/// start is a gap, a lower or equal start is a duplicate. Within the batch,
/// sequences must be strictly increasing.
fn validate_sequences(
    checkpoint: Option<&IngestionCheckpoint>,
    events: &[SessionEvent],
) -> Result<(), String> {
    let first = events[0].sequence;
    if let Some(current) = checkpoint {
        if first <= current.last_sequence {
            return Err(format!(
                "duplicate sequence {first} at or below checkpoint {}",
                current.last_sequence
            ));
        }
        if first > current.last_sequence + 1 {
            return Err(format!(
                "sequence gap after checkpoint {}: batch starts at {first}",
                current.last_sequence
            ));
        }
    }
    for pair in events.windows(2) {
        if pair[1].sequence <= pair[0].sequence {
            return Err(format!(
                "non-increasing sequence {} -> {} within batch",
                pair[0].sequence, pair[1].sequence
            ));
        }
    }
    Ok(())
}
