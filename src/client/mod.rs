//! Delivery client: the stateless request/response boundary to the telemetry
//! sink, plus the idempotency-token contract the sink uses to detect replays.

pub mod core;
pub mod transport;

pub use self::core::{
    envelope_signature, idempotency_token, DeliveryClient, DeliveryError, DeliveryRecord,
    DeliveryStatus, ResponseEnvelope, SinkErrorDetail, SinkTransport, SinkTransportError,
    SubmitRequest, TRANSIENT_SINK_CODES,
};
pub use transport::HttpSinkTransport;
