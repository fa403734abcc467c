//! Structured logging and in-process telemetry for the pipeline.

pub mod logging;
pub mod telemetry;

pub use logging::{LogLevel, LogRotationPolicy, PipelineLogger};
pub use telemetry::{CycleSpan, PipelineMetrics, TelemetryRecorder};
