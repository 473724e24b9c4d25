//! Prometheus metrics for the pipeline.
//!
//! Recording is a no-op until a recorder is installed, so library users
//! and tests pay nothing.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use vgen_models::{Stage, TaskStatus};

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const STAGE_DURATION_SECONDS: &str = "vgen_stage_duration_seconds";
    pub const STAGE_RETRIES_TOTAL: &str = "vgen_stage_retries_total";
    pub const PROVIDER_FALLBACKS_TOTAL: &str = "vgen_provider_fallbacks_total";
    pub const FILLER_WINDOWS_TOTAL: &str = "vgen_material_filler_windows_total";
    pub const TASKS_FINISHED_TOTAL: &str = "vgen_tasks_finished_total";
    pub const TASKS_IN_FLIGHT: &str = "vgen_tasks_in_flight";
}

/// Serve `/metrics` on `addr` from a background task.
pub fn install_prometheus(addr: &str) -> WorkerResult<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| WorkerError::config_error(format!("invalid METRICS_ADDR {}: {}", addr, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

pub fn record_stage_duration(stage: Stage, duration_secs: f64) {
    histogram!(names::STAGE_DURATION_SECONDS, "stage" => stage.as_str()).record(duration_secs);
}

pub fn record_stage_retries(stage: Stage, retries: u32) {
    if retries > 0 {
        counter!(names::STAGE_RETRIES_TOTAL, "stage" => stage.as_str()).increment(retries as u64);
    }
}

/// A request moved from one provider to the next.
pub fn record_provider_fallback(stage: Stage, from_provider: &str) {
    let labels = [
        ("stage", stage.as_str().to_string()),
        ("provider", from_provider.to_string()),
    ];
    counter!(names::PROVIDER_FALLBACKS_TOTAL, &labels).increment(1);
}

pub fn record_filler_windows(count: usize) {
    if count > 0 {
        counter!(names::FILLER_WINDOWS_TOTAL).increment(count as u64);
    }
}

pub fn record_task_finished(status: TaskStatus) {
    counter!(names::TASKS_FINISHED_TOTAL, "status" => status.as_str()).increment(1);
}

pub fn task_started() {
    gauge!(names::TASKS_IN_FLIGHT).increment(1.0);
}

pub fn task_ended() {
    gauge!(names::TASKS_IN_FLIGHT).decrement(1.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_metrics_addr() {
        assert!(matches!(
            install_prometheus("not-an-address"),
            Err(WorkerError::ConfigError(_))
        ));
    }

    #[test]
    fn test_recording_without_recorder() {
        record_stage_duration(Stage::Scripting, 1.5);
        record_stage_retries(Stage::Metadata, 2);
        record_provider_fallback(Stage::Materializing, "pexels");
        record_filler_windows(3);
        record_task_finished(TaskStatus::Done);
        task_started();
        task_ended();
    }
}
