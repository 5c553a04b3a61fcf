//! Prometheus Metrics Module
//!
//! Provides metrics collection and export for observability. Names and
//! install boilerplate follow the same `metrics`/`metrics-exporter-prometheus`
//! pattern as the rest of the Aegis-Flow crates; the metric set itself is
//! just what the lifecycle orchestrator has to report.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::info;

/// Global metrics handle
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names
pub mod names {
    pub const CONNECTIONS_ACTIVE: &str = "aegis_lifecycle_connections_active";
    pub const PHASE: &str = "aegis_lifecycle_phase";
    pub const SHUTDOWN_STARTED: &str = "aegis_lifecycle_shutdown_started_total";
    pub const SHUTDOWN_COMPLETED: &str = "aegis_lifecycle_shutdown_completed_total";
    pub const HANDLER_FAILURES: &str = "aegis_lifecycle_handler_failures_total";
}

/// Initialize the metrics system
#[allow(clippy::expect_used)] // Panicking is acceptable during initialization
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Number of active (non-idle, non-health-check) connections, labeled by tracker"
    );
    describe_gauge!(
        names::PHASE,
        "Current lifecycle phase as an ordinal (0=startup .. 4=final)"
    );
    describe_counter!(
        names::SHUTDOWN_STARTED,
        "Number of times start_shutdown has been invoked"
    );
    describe_counter!(
        names::SHUTDOWN_COMPLETED,
        "Number of times the shutdown sequence reached the final phase"
    );
    describe_counter!(
        names::HANDLER_FAILURES,
        "Registered handler failures, labeled by handler kind"
    );

    info!("metrics system initialized");

    METRICS_HANDLE.set(handle.clone()).ok();
    handle
}

/// Get the global metrics handle
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Update the active-connections gauge for one registered server tracker,
/// labeled by tracker id so a process with several `add_http_server` calls
/// reports each one separately (sum by `tracker` in Prometheus to get the
/// crate-wide total the drain poll itself uses).
pub fn set_active_connections(tracker_id: &str, count: f64) {
    gauge!(names::CONNECTIONS_ACTIVE, "tracker" => tracker_id.to_string()).set(count);
}

/// Record the current phase as an ordinal gauge, matching `Phase`'s
/// `#[repr(u8)]` discriminants.
pub fn set_phase(ordinal: u8) {
    gauge!(names::PHASE).set(f64::from(ordinal));
}

/// Record a `start_shutdown` invocation.
pub fn record_shutdown_started() {
    counter!(names::SHUTDOWN_STARTED).increment(1);
}

/// Record the shutdown sequence reaching `Final`.
pub fn record_shutdown_completed() {
    counter!(names::SHUTDOWN_COMPLETED).increment(1);
}

/// Record a registered-handler failure, labeled by handler kind.
pub fn record_handler_failure(kind: &str) {
    counter!(names::HANDLER_FAILURES, "kind" => kind.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_share_the_lifecycle_prefix() {
        assert!(names::CONNECTIONS_ACTIVE.starts_with("aegis_lifecycle_"));
        assert!(names::PHASE.starts_with("aegis_lifecycle_"));
        assert!(names::SHUTDOWN_STARTED.starts_with("aegis_lifecycle_"));
        assert!(names::SHUTDOWN_COMPLETED.starts_with("aegis_lifecycle_"));
        assert!(names::HANDLER_FAILURES.starts_with("aegis_lifecycle_"));
    }

    #[test]
    fn metric_names_are_not_empty() {
        assert!(!names::CONNECTIONS_ACTIVE.is_empty());
        assert!(!names::PHASE.is_empty());
        assert!(!names::SHUTDOWN_STARTED.is_empty());
    }
}
