use std::sync::{Arc, Mutex};

/// Completed-cycle span recorded by the ingestor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSpan {
    pub session_id: String,
    pub outcome: &'static str,
    pub duration_ms: u64,
    pub pulled: usize,
    pub delivered: usize,
    pub skipped: usize,
    pub retries: u32,
}

/// Counters exposed via the metrics rendering.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineMetrics {
    pub cycles_total: u64,
    pub events_delivered_total: u64,
    pub events_skipped_total: u64,
    pub delivery_retries_total: u64,
    pub integrity_errors_total: u64,
    pub transport_failures_total: u64,
    pub api_rejections_total: u64,
    pub storage_failures_total: u64,
}

#[derive(Default)]
struct TelemetryState {
    spans: Vec<CycleSpan>,
    metrics: PipelineMetrics,
}

/// Shared recorder for cycle spans and aggregate counters.
#[derive(Clone, Default)]
pub struct TelemetryRecorder {
    state: Arc<Mutex<TelemetryState>>,
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one completed cycle and folds it into the counters.
    pub fn record_cycle(&self, span: CycleSpan) {
        let mut state = self.state.lock().unwrap();
        let metrics = &mut state.metrics;
        metrics.cycles_total += 1;
        metrics.events_delivered_total += span.delivered as u64;
        metrics.events_skipped_total += span.skipped as u64;
        metrics.delivery_retries_total += span.retries as u64;
        match span.outcome {
            "integrity" => metrics.integrity_errors_total += 1,
            "transport" => metrics.transport_failures_total += 1,
            "api" => metrics.api_rejections_total += 1,
            "storage" => metrics.storage_failures_total += 1,
            _ => {}
        }
        state.spans.push(span);
    }

    /// Recorded spans, oldest first.
    pub fn spans(&self) -> Vec<CycleSpan> {
        self.state.lock().unwrap().spans.clone()
    }

    /// Current counter snapshot.
    pub fn metrics(&self) -> PipelineMetrics {
        self.state.lock().unwrap().metrics.clone()
    }

    /// Renders counters as Prometheus exposition text.
    pub fn render_metrics(&self) -> String {
        let metrics = self.metrics();
        format!(
            "tapline_cycles_total {}\n\
             tapline_events_delivered_total {}\n\
             tapline_events_skipped_total {}\n\
             tapline_delivery_retries_total {}\n\
             tapline_integrity_errors_total {}\n\
             tapline_transport_failures_total {}\n\
             tapline_api_rejections_total {}\n\
             tapline_storage_failures_total {}\n",
            metrics.cycles_total,
            metrics.events_delivered_total,
            metrics.events_skipped_total,
            metrics.delivery_retries_total,
            metrics.integrity_errors_total,
            metrics.transport_failures_total,
            metrics.api_rejections_total,
            metrics.storage_failures_total,
        )
    }
}
