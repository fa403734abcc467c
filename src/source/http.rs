use crate::event_model::{EventKind, SessionEvent};
use crate::source::{EventSource, PullPage, SourceError};
use base64::{engine::general_purpose, Engine as _};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;

const SESSIONS_PATH: &str = "/v1/sessions";

/// Blocking HTTP source reading session streams from the framework's RPC
/// endpoint.
#[derive(Debug, Clone)]
pub struct HttpEventSource {
    client: Client,
    endpoint: String,
    bearer_token: Option<String>,
}

impl HttpEventSource {
    pub fn new(
        endpoint: impl Into<String>,
        bearer_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, SourceError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(SourceError::Transport(
                "source endpoint must not be empty".into(),
            ));
        }
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| SourceError::Transport(format!("http client build failed: {err}")))?;
        Ok(Self {
            client,
            endpoint,
            bearer_token,
        })
    }

    fn base_url(&self) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), SESSIONS_PATH)
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T, SourceError> {
        let mut builder = self.client.get(url);
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .map_err(|err| SourceError::Transport(format!("source rpc failed: {err}")))?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(SourceError::Auth(format!(
                "source rpc returned status {status}"
            )));
        }
        if !status.is_success() {
            return Err(SourceError::Transport(format!(
                "source rpc returned status {status}"
            )));
        }
        response
            .json()
            .map_err(|err| SourceError::Transport(format!("source rpc decode failed: {err}")))
    }
}

impl EventSource for HttpEventSource {
    fn pull(
        &mut self,
        session_id: &str,
        after_sequence: u64,
        max_count: usize,
    ) -> Result<PullPage, SourceError> {
        let url = format!(
            "{}/{}/events?after={}&limit={}",
            self.base_url(),
            session_id,
            after_sequence,
            max_count
        );
        let wire: WirePullResponse = self.get_json(url)?;
        let mut events = Vec::with_capacity(wire.events.len());
        for event in wire.events {
            let payload = general_purpose::STANDARD
                .decode(&event.payload_b64)
                .map_err(|err| {
                    SourceError::Transport(format!("payload decode failed: {err}"))
                })?;
            events.push(SessionEvent {
                session_id: session_id.to_string(),
                sequence: event.sequence,
                kind: EventKind::from_tag(&event.kind),
                payload,
                captured_at_ms: event.captured_at_ms,
            });
        }
        Ok(PullPage {
            events,
            has_more: wire.has_more,
        })
    }

    fn list_open_sessions(&mut self) -> Result<Vec<String>, SourceError> {
        let url = format!("{}?state=open", self.base_url());
        let wire: WireSessionList = self.get_json(url)?;
        Ok(wire.sessions)
    }
}

#[derive(Debug, Deserialize)]
struct WirePullResponse {
    events: Vec<WireSessionEvent>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct WireSessionEvent {
    sequence: u64,
    kind: String,
    payload_b64: String,
    captured_at_ms: u64,
}

#[derive(Debug, Deserialize)]
struct WireSessionList {
    sessions: Vec<String>,
}
