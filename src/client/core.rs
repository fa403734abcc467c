use crate::event_model::SessionEvent;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Structured sink error codes that are safe to retry.
pub const TRANSIENT_SINK_CODES: [&str; 3] = ["THROTTLED", "QUEUE_FULL", "RETRY_LATER"];

/// Normalized status of a delivery attempt as reported by the sink.
///
/// `replayed` means the sink already holds this exact submission (recognized
/// via the idempotency token); it is a success, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Accepted,
    Replayed,
    Rejected,
    Error,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Accepted => "accepted",
            DeliveryStatus::Replayed => "replayed",
            DeliveryStatus::Rejected => "rejected",
            DeliveryStatus::Error => "error",
        }
    }
}

/// One structured error reported by the sink alongside a non-success status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkErrorDetail {
    pub code: String,
    pub message: String,
}

/// Normalized outcome of a delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    pub correlation_id: String,
    pub status: DeliveryStatus,
    pub errors: Vec<SinkErrorDetail>,
    pub signature: Option<String>,
    pub transport_status: u16,
    pub metadata: BTreeMap<String, String>,
}

impl ResponseEnvelope {
    /// True iff the sink durably holds the batch: accepted or replayed, with
    /// no structured errors attached.
    pub fn ok(&self) -> bool {
        matches!(
            self.status,
            DeliveryStatus::Accepted | DeliveryStatus::Replayed
        ) && self.errors.is_empty()
    }
}

/// One session event mapped into the sink's submission schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub sequence: u64,
    pub kind: String,
    pub payload: Vec<u8>,
    pub captured_at_ms: u64,
}

impl From<&SessionEvent> for DeliveryRecord {
    fn from(event: &SessionEvent) -> Self {
        Self {
            sequence: event.sequence,
            kind: event.kind.as_str().to_string(),
            payload: event.payload.clone(),
            captured_at_ms: event.captured_at_ms,
        }
    }
}

/// Submission handed to the transport. The request id doubles as the
/// correlation id echoed back by the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub request_id: String,
    pub session_id: String,
    pub idempotency_token: String,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub records: Vec<DeliveryRecord>,
}

/// Derives the deterministic idempotency token for a batch.
///
/// The token depends only on the batch identity (session id plus first/last
/// sequence), never on payload bytes, so a retried batch always carries the
/// token the sink has already seen.
pub fn idempotency_token(session_id: &str, first_sequence: u64, last_sequence: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(first_sequence.to_be_bytes());
    hasher.update(last_sequence.to_be_bytes());
    to_hex(&hasher.finalize())
}

/// Recomputes the integrity signature the sink attaches to envelopes.
pub fn envelope_signature(
    correlation_id: &str,
    status: DeliveryStatus,
    transport_status: u16,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(correlation_id.as_bytes());
    hasher.update(status.as_str().as_bytes());
    hasher.update(transport_status.to_be_bytes());
    to_hex(&hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        encoded.push_str(&format!("{:02x}", byte));
    }
    encoded
}

/// Transport trait representing the underlying authenticated channel.
pub trait SinkTransport {
    fn submit(&mut self, request: SubmitRequest) -> Result<ResponseEnvelope, SinkTransportError>;

    /// Releases underlying transport resources.
    fn close(&mut self) {}
}

/// Transport-level error returned when the request/response exchange fails.
#[derive(Debug, Clone)]
pub struct SinkTransportError {
    message: String,
}

impl SinkTransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for SinkTransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SinkTransportError {}

/// Delivery failure classes, surfaced as distinct conditions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Caller misuse. Never retried.
    #[error("delivery misconfigured: {0}")]
    Configuration(String),
    /// Network or timeout failure. Retryable with backoff.
    #[error("delivery transport failed: {0}")]
    Transport(String),
    /// The sink explicitly rejected the batch.
    #[error("sink rejected batch {correlation_id} (status {transport_status}): {reason}")]
    Api {
        correlation_id: String,
        transport_status: u16,
        reason: String,
        transient: bool,
    },
}

impl DeliveryError {
    /// True when the failure may clear on retry with the same token.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Configuration(_) => false,
            DeliveryError::Transport(_) => true,
            DeliveryError::Api { transient, .. } => *transient,
        }
    }
}

/// Client wrapper over a sink transport. Stateless with respect to checkpoint
/// lifecycle; safe to build one per session worker.
pub struct DeliveryClient<T: SinkTransport> {
    transport: T,
}

impl<T: SinkTransport> DeliveryClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Submits one batch under the given idempotency token.
    ///
    /// Returns the envelope only when the sink durably holds the batch
    /// (`accepted` or `replayed`). Everything else maps onto the delivery
    /// error taxonomy; a corrupt integrity signature counts as a transport
    /// fault so the caller retries the identical submission.
    pub fn deliver(
        &mut self,
        session_id: &str,
        batch: &[DeliveryRecord],
        token: &str,
    ) -> Result<ResponseEnvelope, DeliveryError> {
        let first = batch
            .first()
            .ok_or_else(|| DeliveryError::Configuration("empty delivery batch".into()))?;
        let last = batch.last().unwrap_or(first);
        let request = SubmitRequest {
            request_id: token.to_string(),
            session_id: session_id.to_string(),
            idempotency_token: token.to_string(),
            first_sequence: first.sequence,
            last_sequence: last.sequence,
            records: batch.to_vec(),
        };
        let envelope = self
            .transport
            .submit(request)
            .map_err(|err| DeliveryError::Transport(err.to_string()))?;
        if let Some(signature) = &envelope.signature {
            let expected = envelope_signature(
                &envelope.correlation_id,
                envelope.status,
                envelope.transport_status,
            );
            if *signature != expected {
                return Err(DeliveryError::Transport(format!(
                    "envelope signature mismatch for {}",
                    envelope.correlation_id
                )));
            }
        }
        if envelope.ok() {
            return Ok(envelope);
        }
        Err(classify_rejection(&envelope))
    }

    /// Releases the underlying transport.
    pub fn close(&mut self) {
        self.transport.close();
    }
}

fn classify_rejection(envelope: &ResponseEnvelope) -> DeliveryError {
    let transient = transient_status(envelope.transport_status)
        || envelope
            .errors
            .iter()
            .any(|detail| TRANSIENT_SINK_CODES.contains(&detail.code.as_str()));
    let reason = envelope
        .errors
        .iter()
        .map(|detail| detail.code.as_str())
        .collect::<Vec<_>>()
        .join(",");
    let reason = if reason.is_empty() {
        envelope.status.as_str().to_string()
    } else {
        reason
    };
    DeliveryError::Api {
        correlation_id: envelope.correlation_id.clone(),
        transport_status: envelope.transport_status,
        reason,
        transient,
    }
}

fn transient_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}
