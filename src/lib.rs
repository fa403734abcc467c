//! tapline: checkpointed ingestion of exploitation-framework session
//! activity into a security-telemetry sink.
//!
//! The pipeline pulls session events from the source endpoint, transforms
//! them into the sink's submission schema, delivers each batch under a
//! deterministic idempotency token, and advances a durable per-session
//! checkpoint only after the sink acknowledges. Replay detection at the sink
//! makes delivery exactly-once from the sink's effective-state point of view
//! even though the source-to-sink path is at-least-once.

pub mod app;
pub mod client;
pub mod config;
pub mod event_model;
pub mod ingestor;
pub mod observability;
pub mod runtime;
pub mod source;
pub mod storage;

pub use client::{
    envelope_signature, idempotency_token, DeliveryClient, DeliveryError, DeliveryRecord,
    DeliveryStatus, HttpSinkTransport, ResponseEnvelope, SinkErrorDetail, SinkTransport,
    SinkTransportError, SubmitRequest, TRANSIENT_SINK_CODES,
};
pub use config::{ConfigError, PipelineConfig};
pub use event_model::{
    CheckpointRegression, EventKind, IngestionCheckpoint, Session, SessionEvent,
};
pub use ingestor::{
    CycleOutcome, CycleRunner, CycleState, IngestOptions, IngestionResult, RetryPolicy,
    SessionIngestor,
};
pub use observability::{
    CycleSpan, LogLevel, LogRotationPolicy, PipelineLogger, PipelineMetrics, TelemetryRecorder,
};
pub use runtime::{
    Clock, IngestScheduler, PassStats, RunnerFactory, SchedulerConfig, SessionRegistry,
    SessionSlot, SlotState, SystemClock,
};
pub use source::{EventSource, HttpEventSource, PullPage, SourceError};
pub use storage::{CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore, StorageError};
