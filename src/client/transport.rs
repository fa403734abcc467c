use crate::client::core::{
    DeliveryStatus, ResponseEnvelope, SinkErrorDetail, SinkTransport, SinkTransportError,
    SubmitRequest,
};
use base64::{engine::general_purpose, Engine as _};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

const SUBMIT_PATH: &str = "/v1/submissions";

/// Blocking HTTP transport that forwards submissions to the telemetry sink
/// and translates the response body into the client contract.
///
/// The sink answers with a structured envelope on rejections as well as on
/// success; only an undecodable body or a failed exchange is a transport
/// fault.
#[derive(Debug, Clone)]
pub struct HttpSinkTransport {
    client: Client,
    endpoint: String,
    bearer_token: Option<String>,
}

impl HttpSinkTransport {
    /// Creates a transport targeting the provided base endpoint (e.g.
    /// `https://telemetry.internal:8443`).
    pub fn new(
        endpoint: impl Into<String>,
        bearer_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, SinkTransportError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(SinkTransportError::new("sink endpoint must not be empty"));
        }
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| SinkTransportError::new(format!("http client build failed: {err}")))?;
        Ok(Self {
            client,
            endpoint,
            bearer_token,
        })
    }

    fn submit_url(&self) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), SUBMIT_PATH)
    }
}

impl SinkTransport for HttpSinkTransport {
    fn submit(&mut self, request: SubmitRequest) -> Result<ResponseEnvelope, SinkTransportError> {
        let wire_request = WireSubmitRequest::from(request);
        let mut builder = self.client.post(self.submit_url()).json(&wire_request);
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .map_err(|err| SinkTransportError::new(format!("submit rpc failed: {err}")))?;
        let transport_status = response.status().as_u16();
        let mut metadata = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                metadata.insert(name.as_str().to_string(), value.to_string());
            }
        }
        let wire: WireResponseEnvelope = response
            .json()
            .map_err(|err| SinkTransportError::new(format!("submit rpc decode failed: {err}")))?;
        Ok(wire.into_envelope(transport_status, metadata))
    }
}

#[derive(Debug, Serialize)]
struct WireSubmitRequest {
    request_id: String,
    session_id: String,
    idempotency_token: String,
    first_sequence: u64,
    last_sequence: u64,
    records: Vec<WireDeliveryRecord>,
}

impl From<SubmitRequest> for WireSubmitRequest {
    fn from(request: SubmitRequest) -> Self {
        Self {
            request_id: request.request_id,
            session_id: request.session_id,
            idempotency_token: request.idempotency_token,
            first_sequence: request.first_sequence,
            last_sequence: request.last_sequence,
            records: request
                .records
                .into_iter()
                .map(|record| WireDeliveryRecord {
                    sequence: record.sequence,
                    kind: record.kind,
                    payload_b64: general_purpose::STANDARD.encode(record.payload),
                    captured_at_ms: record.captured_at_ms,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireDeliveryRecord {
    sequence: u64,
    kind: String,
    payload_b64: String,
    captured_at_ms: u64,
}

#[derive(Debug, Deserialize)]
struct WireResponseEnvelope {
    request_id: String,
    status: DeliveryStatus,
    #[serde(default)]
    errors: Vec<WireSinkError>,
    #[serde(default)]
    signature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireSinkError {
    code: String,
    #[serde(default)]
    message: String,
}

impl WireResponseEnvelope {
    fn into_envelope(
        self,
        transport_status: u16,
        metadata: BTreeMap<String, String>,
    ) -> ResponseEnvelope {
        ResponseEnvelope {
            correlation_id: self.request_id,
            status: self.status,
            errors: self
                .errors
                .into_iter()
                .map(|err| SinkErrorDetail {
                    code: err.code,
                    message: err.message,
                })
                .collect(),
            signature: self.signature,
            transport_status,
            metadata,
        }
    }
}
