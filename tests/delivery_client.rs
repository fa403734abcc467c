use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tapline::{
    envelope_signature, idempotency_token, DeliveryClient, DeliveryError, DeliveryRecord,
    DeliveryStatus, ResponseEnvelope, SinkErrorDetail, SinkTransport, SinkTransportError,
    SubmitRequest,
};

struct MockSinkState {
    responses: Vec<Result<ResponseEnvelope, SinkTransportError>>,
    recorded: Vec<SubmitRequest>,
    closed: bool,
}

#[derive(Clone)]
struct MockSink {
    state: Rc<RefCell<MockSinkState>>,
}

impl SinkTransport for MockSink {
    fn submit(&mut self, request: SubmitRequest) -> Result<ResponseEnvelope, SinkTransportError> {
        let mut state = self.state.borrow_mut();
        state.recorded.push(request);
        state.responses.remove(0)
    }

    fn close(&mut self) {
        self.state.borrow_mut().closed = true;
    }
}

fn mock_sink(
    responses: Vec<Result<ResponseEnvelope, SinkTransportError>>,
) -> (MockSink, Rc<RefCell<MockSinkState>>) {
    let state = Rc::new(RefCell::new(MockSinkState {
        responses,
        recorded: Vec::new(),
        closed: false,
    }));
    (
        MockSink {
            state: state.clone(),
        },
        state,
    )
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

fn batch() -> Vec<DeliveryRecord> {
    vec![
        DeliveryRecord {
            sequence: 4,
            kind: "command".to_string(),
            payload: b"whoami".to_vec(),
            captured_at_ms: 10,
        },
        DeliveryRecord {
            sequence: 5,
            kind: "output".to_string(),
            payload: b"root".to_vec(),
            captured_at_ms: 11,
        },
    ]
}

#[test]
fn token_depends_only_on_batch_identity() {
    let a = idempotency_token("sess-a", 4, 5);
    let b = idempotency_token("sess-a", 4, 5);
    assert_eq!(a, b);
    assert_ne!(a, idempotency_token("sess-a", 4, 6));
    assert_ne!(a, idempotency_token("sess-b", 4, 5));
    assert_eq!(a.len(), 64);
}

#[test]
fn deliver_carries_token_and_batch_bounds() {
    let (sink, state) = mock_sink(vec![Ok(envelope(DeliveryStatus::Accepted, 200))]);
    let mut client = DeliveryClient::new(sink);
    let token = idempotency_token("sess-a", 4, 5);
    let response = client
        .deliver("sess-a", &batch(), &token)
        .expect("accepted delivery succeeds");
    assert!(response.ok());

    let recorded = &state.borrow().recorded;
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].idempotency_token, token);
    assert_eq!(recorded[0].request_id, token);
    assert_eq!(recorded[0].first_sequence, 4);
    assert_eq!(recorded[0].last_sequence, 5);
    assert_eq!(recorded[0].records.len(), 2);
}

#[test]
fn replayed_counts_as_success() {
    let (sink, _) = mock_sink(vec![Ok(envelope(DeliveryStatus::Replayed, 200))]);
    let mut client = DeliveryClient::new(sink);
    let response = client
        .deliver("sess-a", &batch(), "tok")
        .expect("replayed delivery succeeds");
    assert!(response.ok());
    assert_eq!(response.status, DeliveryStatus::Replayed);
}

#[test]
fn transport_failure_is_retryable() {
    let (sink, _) = mock_sink(vec![Err(SinkTransportError::new("connection reset"))]);
    let mut client = DeliveryClient::new(sink);
    let err = client
        .deliver("sess-a", &batch(), "tok")
        .expect_err("transport failure surfaces");
    assert!(matches!(err, DeliveryError::Transport(_)));
    assert!(err.is_retryable());
}

#[test]
fn terminal_rejection_is_not_retryable() {
    let mut rejection = envelope(DeliveryStatus::Rejected, 422);
    rejection.errors.push(SinkErrorDetail {
        code: "SCHEMA_VIOLATION".to_string(),
        message: "unknown field".to_string(),
    });
    let (sink, _) = mock_sink(vec![Ok(rejection)]);
    let mut client = DeliveryClient::new(sink);
    let err = client
        .deliver("sess-a", &batch(), "tok")
        .expect_err("rejection surfaces");
    match &err {
        DeliveryError::Api {
            transient, reason, ..
        } => {
            assert!(!transient);
            assert_eq!(reason, "SCHEMA_VIOLATION");
        }
        other => panic!("expected api error, got {other:?}"),
    }
    assert!(!err.is_retryable());
}

#[test]
fn throttled_rejection_is_transient() {
    let mut throttled = envelope(DeliveryStatus::Error, 200);
    throttled.errors.push(SinkErrorDetail {
        code: "THROTTLED".to_string(),
        message: "slow down".to_string(),
    });
    let (sink, _) = mock_sink(vec![Ok(throttled)]);
    let mut client = DeliveryClient::new(sink);
    let err = client
        .deliver("sess-a", &batch(), "tok")
        .expect_err("throttle surfaces");
    assert!(matches!(err, DeliveryError::Api { transient: true, .. }));
    assert!(err.is_retryable());
}

#[test]
fn overloaded_status_code_is_transient() {
    let rejection = envelope(DeliveryStatus::Error, 503);
    let (sink, _) = mock_sink(vec![Ok(rejection)]);
    let mut client = DeliveryClient::new(sink);
    let err = client
        .deliver("sess-a", &batch(), "tok")
        .expect_err("overload surfaces");
    assert!(matches!(err, DeliveryError::Api { transient: true, .. }));
}

#[test]
fn empty_batch_is_caller_misuse() {
    let (sink, state) = mock_sink(vec![]);
    let mut client = DeliveryClient::new(sink);
    let err = client
        .deliver("sess-a", &[], "tok")
        .expect_err("empty batch refused");
    assert!(matches!(err, DeliveryError::Configuration(_)));
    assert!(!err.is_retryable());
    assert!(state.borrow().recorded.is_empty());
}

#[test]
fn valid_signature_passes_and_corrupt_signature_is_transport_fault() {
    let mut signed = envelope(DeliveryStatus::Accepted, 200);
    signed.signature = Some(envelope_signature("req-1", DeliveryStatus::Accepted, 200));
    let mut corrupt = envelope(DeliveryStatus::Accepted, 200);
    corrupt.signature = Some("deadbeef".to_string());
    let (sink, _) = mock_sink(vec![Ok(signed), Ok(corrupt)]);
    let mut client = DeliveryClient::new(sink);

    client
        .deliver("sess-a", &batch(), "tok")
        .expect("valid signature accepted");
    let err = client
        .deliver("sess-a", &batch(), "tok")
        .expect_err("corrupt signature refused");
    assert!(matches!(err, DeliveryError::Transport(_)));
}

#[test]
fn close_releases_transport() {
    let (sink, state) = mock_sink(vec![]);
    let mut client = DeliveryClient::new(sink);
    client.close();
    assert!(state.borrow().closed);
}
