use crate::client::{DeliveryClient, HttpSinkTransport};
use crate::config::PipelineConfig;
use crate::ingestor::{CycleRunner, SessionIngestor};
use crate::observability::{LogRotationPolicy, PipelineLogger, TelemetryRecorder};
use crate::runtime::{IngestScheduler, RunnerFactory, SystemClock};
use crate::source::HttpEventSource;
use crate::storage::SqliteCheckpointStore;
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;

/// Application orchestrator: load and validate configuration, wire the
/// pipeline components, and run scheduling passes until shutdown.
pub fn run() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tapline.json".to_string());
    let config = PipelineConfig::load(&config_path)
        .with_context(|| format!("loading config from {config_path}"))?;

    let store = if config.checkpoint_db_path == ":memory:" {
        SqliteCheckpointStore::in_memory()
    } else {
        SqliteCheckpointStore::open(&config.checkpoint_db_path)
    }
    .context("opening checkpoint store")?;

    // Both transports are built once here so endpoint problems fail at
    // startup; workers clone them.
    let source = HttpEventSource::new(
        config.source_endpoint.clone(),
        config.source_token.clone(),
        config.request_timeout(),
    )
    .map_err(|err| anyhow!("source transport setup failed: {err}"))?;
    let sink = HttpSinkTransport::new(
        config.sink_endpoint.clone(),
        config.sink_token.clone(),
        config.request_timeout(),
    )
    .map_err(|err| anyhow!("sink transport setup failed: {err}"))?;

    let telemetry = TelemetryRecorder::new();
    let logger = PipelineLogger::new(config.min_log_level(), LogRotationPolicy::default());
    let options = config.ingest_options();
    let factory: RunnerFactory = Arc::new(move || -> Box<dyn CycleRunner> {
        Box::new(SessionIngestor::new(
            source.clone(),
            store.clone(),
            DeliveryClient::new(sink.clone()),
            options,
            telemetry.clone(),
        ))
    });

    let scheduler = IngestScheduler::new(
        config.scheduler_config(),
        factory,
        Arc::new(SystemClock),
        logger,
    );
    scheduler.run(config.pass_interval());
    scheduler.shutdown();
    Ok(())
}
