use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tapline::{
    idempotency_token, CheckpointStore, CycleOutcome, CycleState, DeliveryClient, DeliveryStatus,
    EventKind, EventSource, IngestOptions, IngestionCheckpoint, MemoryCheckpointStore, PullPage,
    ResponseEnvelope, RetryPolicy, SessionEvent, SessionIngestor, SinkTransport,
    SinkTransportError, SourceError, SubmitRequest, TelemetryRecorder,
};

#[derive(Default)]
struct SourceState {
    pages: Vec<Result<PullPage, SourceError>>,
    pulls: Vec<(u64, usize)>,
}

#[derive(Clone, Default)]
struct ScriptedSource {
    state: Rc<RefCell<SourceState>>,
}

impl ScriptedSource {
    fn push_page(&self, events: Vec<SessionEvent>, has_more: bool) {
        self.state
            .borrow_mut()
            .pages
            .push(Ok(PullPage { events, has_more }));
    }

    fn push_failure(&self, error: SourceError) {
        self.state.borrow_mut().pages.push(Err(error));
    }

    fn pulls(&self) -> Vec<(u64, usize)> {
        self.state.borrow().pulls.clone()
    }
}

impl EventSource for ScriptedSource {
    fn pull(
        &mut self,
        _session_id: &str,
        after_sequence: u64,
        max_count: usize,
    ) -> Result<PullPage, SourceError> {
        let mut state = self.state.borrow_mut();
        state.pulls.push((after_sequence, max_count));
        if state.pages.is_empty() {
            return Ok(PullPage {
                events: Vec::new(),
                has_more: false,
            });
        }
        state.pages.remove(0)
    }

    fn list_open_sessions(&mut self) -> Result<Vec<String>, SourceError> {
        Ok(Vec::new())
    }
}

struct SinkState {
    responses: Vec<Result<ResponseEnvelope, SinkTransportError>>,
    recorded: Vec<SubmitRequest>,
}

#[derive(Clone)]
struct ScriptedSink {
    state: Rc<RefCell<SinkState>>,
}

impl ScriptedSink {
    fn new(responses: Vec<Result<ResponseEnvelope, SinkTransportError>>) -> Self {
        Self {
            state: Rc::new(RefCell::new(SinkState {
                responses,
                recorded: Vec::new(),
            })),
        }
    }

    fn recorded(&self) -> Vec<SubmitRequest> {
        self.state.borrow().recorded.clone()
    }
}

impl SinkTransport for ScriptedSink {
    fn submit(&mut self, request: SubmitRequest) -> Result<ResponseEnvelope, SinkTransportError> {
        let mut state = self.state.borrow_mut();
        state.recorded.push(request);
        state.responses.remove(0)
    }
}

fn envelope(status: DeliveryStatus, transport_status: u16) -> ResponseEnvelope {
    ResponseEnvelope {
        correlation_id: "req-1".to_string(),
        status,
        errors: Vec::new(),
        signature: None,
        transport_status,
        metadata: BTreeMap::new(),
    }
}

fn events(session_id: &str, sequences: &[u64]) -> Vec<SessionEvent> {
    sequences
        .iter()
        .map(|sequence| {
            SessionEvent::new(
                session_id,
                *sequence,
                EventKind::Command,
                format!("cmd-{sequence}").into_bytes(),
                sequence * 10,
            )
        })
        .collect()
}

fn options() -> IngestOptions {
    IngestOptions {
        max_batch_size: 16,
        retry: RetryPolicy {
            max_retries: 2,
            backoff_base_ms: 0,
            backoff_multiplier: 2,
            backoff_cap_ms: 0,
        },
    }
}

fn ingestor(
    source: ScriptedSource,
    store: MemoryCheckpointStore,
    sink: ScriptedSink,
) -> SessionIngestor<ScriptedSource, MemoryCheckpointStore, ScriptedSink> {
    SessionIngestor::new(
        source,
        store,
        DeliveryClient::new(sink),
        options(),
        TelemetryRecorder::new(),
    )
}

#[test]
fn fresh_session_delivers_full_batch() {
    let source = ScriptedSource::default();
    source.push_page(events("sess-a", &[1, 2, 3]), false);
    let store = MemoryCheckpointStore::new();
    let sink = ScriptedSink::new(vec![Ok(envelope(DeliveryStatus::Accepted, 200))]);
    let mut ingestor = ingestor(source.clone(), store.clone(), sink.clone());

    let result = ingestor.run_cycle("sess-a", 5_000);
    assert_eq!(result.outcome, CycleOutcome::Ok);
    assert_eq!(result.pulled, 3);
    assert_eq!(result.delivered, 3);
    assert_eq!(result.skipped, 0);
    assert!(!result.has_more);

    let checkpoint = result.checkpoint.expect("checkpoint advanced");
    assert_eq!(checkpoint.last_sequence, 3);
    assert_eq!(checkpoint.idempotency_token, idempotency_token("sess-a", 1, 3));
    let stored = store
        .load("sess-a")
        .expect("load succeeds")
        .expect("checkpoint persisted");
    assert_eq!(stored, checkpoint);
    assert_eq!(source.pulls(), vec![(0, 16)]);
}

#[test]
fn empty_pull_returns_to_idle() {
    let source = ScriptedSource::default();
    source.push_page(Vec::new(), false);
    let store = MemoryCheckpointStore::new();
    let sink = ScriptedSink::new(Vec::new());
    let mut ingestor = ingestor(source, store.clone(), sink.clone());

    let result = ingestor.run_cycle("sess-a", 5_000);
    assert_eq!(result.outcome, CycleOutcome::Ok);
    assert_eq!(result.pulled, 0);
    assert!(result.checkpoint.is_none());
    assert!(store.snapshot().is_empty());
    assert!(sink.recorded().is_empty());
}

#[test]
fn gap_after_checkpoint_aborts_with_integrity_error() {
    let source = ScriptedSource::default();
    source.push_page(events("sess-a", &[12, 13]), false);
    let store = MemoryCheckpointStore::new();
    seed(&store, "sess-a", 10);
    let sink = ScriptedSink::new(Vec::new());
    let mut ingestor = ingestor(source.clone(), store.clone(), sink.clone());

    let result = ingestor.run_cycle("sess-a", 5_000);
    assert!(matches!(result.outcome, CycleOutcome::Integrity(_)));
    assert_eq!(result.failed_in, Some(CycleState::Pulling));
    assert!(result.checkpoint.is_none());
    assert_eq!(stored_sequence(&store, "sess-a"), 10);
    assert!(sink.recorded().is_empty());
    assert_eq!(source.pulls(), vec![(10, 16)]);
}

#[test]
fn duplicate_below_checkpoint_aborts_with_integrity_error() {
    let source = ScriptedSource::default();
    source.push_page(events("sess-a", &[10, 11]), false);
    let store = MemoryCheckpointStore::new();
    seed(&store, "sess-a", 10);
    let sink = ScriptedSink::new(Vec::new());
    let mut ingestor = ingestor(source, store.clone(), sink.clone());

    let result = ingestor.run_cycle("sess-a", 5_000);
    match result.outcome {
        CycleOutcome::Integrity(reason) => assert!(reason.contains("duplicate")),
        other => panic!("expected integrity error, got {other:?}"),
    }
    assert_eq!(stored_sequence(&store, "sess-a"), 10);
}

#[test]
fn non_increasing_batch_aborts_with_integrity_error() {
    let source = ScriptedSource::default();
    let mut batch = events("sess-a", &[4, 5]);
    batch[1].sequence = 4;
    source.push_page(batch, false);
    let store = MemoryCheckpointStore::new();
    seed(&store, "sess-a", 3);
    let sink = ScriptedSink::new(Vec::new());
    let mut ingestor = ingestor(source, store.clone(), sink);

    let result = ingestor.run_cycle("sess-a", 5_000);
    assert!(matches!(result.outcome, CycleOutcome::Integrity(_)));
    assert_eq!(stored_sequence(&store, "sess-a"), 3);
}

#[test]
fn save_failure_is_absorbed_by_replay_on_next_cycle() {
    let source = ScriptedSource::default();
    source.push_page(events("sess-a", &[1, 2]), false);
    source.push_page(events("sess-a", &[1, 2]), false);
    let store = MemoryCheckpointStore::new();
    let sink = ScriptedSink::new(vec![
        Ok(envelope(DeliveryStatus::Accepted, 200)),
        Ok(envelope(DeliveryStatus::Replayed, 200)),
    ]);
    let mut ingestor = ingestor(source, store.clone(), sink.clone());

    store.fail_next_saves(1);
    let first = ingestor.run_cycle("sess-a", 5_000);
    assert!(matches!(first.outcome, CycleOutcome::Storage(_)));
    assert_eq!(first.failed_in, Some(CycleState::Advancing));
    assert_eq!(first.delivered, 2);
    assert!(first.checkpoint.is_none());
    assert!(store.snapshot().is_empty());

    let second = ingestor.run_cycle("sess-a", 6_000);
    assert_eq!(second.outcome, CycleOutcome::Ok);
    assert_eq!(second.delivered, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(
        second.checkpoint.expect("checkpoint advanced").last_sequence,
        2
    );

    let recorded = sink.recorded();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0].idempotency_token, recorded[1].idempotency_token);
    assert_eq!(stored_sequence(&store, "sess-a"), 2);
}

#[test]
fn transport_timeouts_retry_with_identical_token() {
    let source = ScriptedSource::default();
    source.push_page(events("sess-a", &[4, 5]), false);
    let store = MemoryCheckpointStore::new();
    seed(&store, "sess-a", 3);
    let sink = ScriptedSink::new(vec![
        Err(SinkTransportError::new("timeout")),
        Err(SinkTransportError::new("timeout")),
        Ok(envelope(DeliveryStatus::Accepted, 200)),
    ]);
    let telemetry = TelemetryRecorder::new();
    let mut ingestor = SessionIngestor::new(
        source.clone(),
        store.clone(),
        DeliveryClient::new(sink.clone()),
        options(),
        telemetry.clone(),
    );

    let result = ingestor.run_cycle("sess-a", 7_000);
    assert_eq!(result.outcome, CycleOutcome::Ok);
    assert_eq!(result.delivered, 2);
    assert_eq!(stored_sequence(&store, "sess-a"), 5);

    let recorded = sink.recorded();
    assert_eq!(recorded.len(), 3);
    let token = idempotency_token("sess-a", 4, 5);
    for request in &recorded {
        assert_eq!(request.idempotency_token, token);
        assert_eq!(request.first_sequence, 4);
        assert_eq!(request.last_sequence, 5);
    }
    assert_eq!(telemetry.metrics().delivery_retries_total, 2);
}

#[test]
fn exhausted_retry_budget_leaves_checkpoint_untouched() {
    let source = ScriptedSource::default();
    source.push_page(events("sess-a", &[4, 5]), false);
    source.push_page(events("sess-a", &[4, 5]), false);
    let store = MemoryCheckpointStore::new();
    seed(&store, "sess-a", 3);
    let sink = ScriptedSink::new(vec![
        Err(SinkTransportError::new("timeout")),
        Err(SinkTransportError::new("timeout")),
        Err(SinkTransportError::new("timeout")),
        Ok(envelope(DeliveryStatus::Accepted, 200)),
    ]);
    let mut ingestor = ingestor(source, store.clone(), sink.clone());

    let failed = ingestor.run_cycle("sess-a", 7_000);
    assert!(matches!(failed.outcome, CycleOutcome::Transport(_)));
    assert_eq!(failed.failed_in, Some(CycleState::Delivering));
    assert_eq!(stored_sequence(&store, "sess-a"), 3);

    let healed = ingestor.run_cycle("sess-a", 8_000);
    assert_eq!(healed.outcome, CycleOutcome::Ok);
    assert_eq!(stored_sequence(&store, "sess-a"), 5);
    assert_eq!(sink.recorded().len(), 4);
}

#[test]
fn terminal_rejection_blocks_without_advancing() {
    let source = ScriptedSource::default();
    source.push_page(events("sess-a", &[1]), false);
    let store = MemoryCheckpointStore::new();
    let mut rejection = envelope(DeliveryStatus::Rejected, 422);
    rejection.errors.push(tapline::SinkErrorDetail {
        code: "SCHEMA_VIOLATION".to_string(),
        message: "unknown field".to_string(),
    });
    let sink = ScriptedSink::new(vec![Ok(rejection)]);
    let mut ingestor = ingestor(source, store.clone(), sink.clone());

    let result = ingestor.run_cycle("sess-a", 5_000);
    match result.outcome {
        CycleOutcome::Api { transient, .. } => assert!(!transient),
        other => panic!("expected api outcome, got {other:?}"),
    }
    assert!(store.snapshot().is_empty());
    assert_eq!(sink.recorded().len(), 1);
}

#[test]
fn transient_rejection_is_retried_within_the_cycle() {
    let source = ScriptedSource::default();
    source.push_page(events("sess-a", &[1]), false);
    let store = MemoryCheckpointStore::new();
    let mut throttled = envelope(DeliveryStatus::Error, 429);
    throttled.errors.push(tapline::SinkErrorDetail {
        code: "THROTTLED".to_string(),
        message: "slow down".to_string(),
    });
    let sink = ScriptedSink::new(vec![
        Ok(throttled),
        Ok(envelope(DeliveryStatus::Accepted, 200)),
    ]);
    let mut ingestor = ingestor(source, store.clone(), sink.clone());

    let result = ingestor.run_cycle("sess-a", 5_000);
    assert_eq!(result.outcome, CycleOutcome::Ok);
    assert_eq!(sink.recorded().len(), 2);
    assert_eq!(stored_sequence(&store, "sess-a"), 1);
}

#[test]
fn source_failure_surfaces_as_transport_outcome() {
    let source = ScriptedSource::default();
    source.push_failure(SourceError::Transport("connection refused".to_string()));
    let store = MemoryCheckpointStore::new();
    let sink = ScriptedSink::new(Vec::new());
    let mut ingestor = ingestor(source, store.clone(), sink);

    let result = ingestor.run_cycle("sess-a", 5_000);
    assert!(matches!(result.outcome, CycleOutcome::Transport(_)));
    assert_eq!(result.failed_in, Some(CycleState::Pulling));
    assert!(store.snapshot().is_empty());
}

#[test]
fn has_more_is_surfaced_for_immediate_requeue() {
    let source = ScriptedSource::default();
    source.push_page(events("sess-a", &[1, 2]), true);
    let store = MemoryCheckpointStore::new();
    let sink = ScriptedSink::new(vec![Ok(envelope(DeliveryStatus::Accepted, 200))]);
    let mut ingestor = ingestor(source, store, sink);

    let result = ingestor.run_cycle("sess-a", 5_000);
    assert_eq!(result.outcome, CycleOutcome::Ok);
    assert!(result.has_more);
}

#[test]
fn checkpoint_sequence_never_decreases_across_cycles() {
    let source = ScriptedSource::default();
    source.push_page(events("sess-a", &[1, 2]), true);
    source.push_page(events("sess-a", &[3]), false);
    source.push_page(Vec::new(), false);
    let store = MemoryCheckpointStore::new();
    let sink = ScriptedSink::new(vec![
        Ok(envelope(DeliveryStatus::Accepted, 200)),
        Ok(envelope(DeliveryStatus::Accepted, 200)),
    ]);
    let mut ingestor = ingestor(source, store.clone(), sink);

    let mut last = 0;
    for cycle in 0..3 {
        let result = ingestor.run_cycle("sess-a", 5_000 + cycle);
        assert_eq!(result.outcome, CycleOutcome::Ok);
        let stored = stored_sequence_opt(&store, "sess-a").unwrap_or(0);
        assert!(stored >= last, "checkpoint regressed: {last} -> {stored}");
        last = stored;
    }
    assert_eq!(last, 3);
}

#[test]
fn retire_session_drops_checkpoint_tracking() {
    let source = ScriptedSource::default();
    let store = MemoryCheckpointStore::new();
    seed(&store, "sess-a", 9);
    let sink = ScriptedSink::new(Vec::new());
    let mut ingestor = ingestor(source, store.clone(), sink);

    ingestor
        .retire_session("sess-a")
        .expect("retire succeeds");
    assert!(store.snapshot().is_empty());
}

fn seed(store: &MemoryCheckpointStore, session_id: &str, last_sequence: u64) {
    let mut writer = store.clone();
    writer
        .save(&IngestionCheckpoint::first(
            session_id,
            last_sequence,
            idempotency_token(session_id, 1, last_sequence),
            1_000,
        ))
        .expect("seed checkpoint");
}

fn stored_sequence(store: &MemoryCheckpointStore, session_id: &str) -> u64 {
    stored_sequence_opt(store, session_id).expect("checkpoint present")
}

fn stored_sequence_opt(store: &MemoryCheckpointStore, session_id: &str) -> Option<u64> {
    store
        .load(session_id)
        .expect("load succeeds")
        .map(|checkpoint| checkpoint.last_sequence)
}
