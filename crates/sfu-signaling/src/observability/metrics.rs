//! Metrics definitions for the signaling coordinator.
//!
//! Prometheus naming: `sfu_` prefix, `_total` for counters, `_seconds` for
//! duration histograms.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Engine calls are local control-plane requests
        .set_buckets_for_metric(
            Matcher::Prefix("sfu_engine_call".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set engine call buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Set the number of registered peer sessions.
///
/// Metric: `sfu_sessions_active`
pub fn set_sessions_active(count: usize) {
    // usize to f64 conversion is safe for realistic session counts
    #[allow(clippy::cast_precision_loss)]
    gauge!("sfu_sessions_active").set(count as f64);
}

/// Record a handled client action.
///
/// Metric: `sfu_actions_total`
/// Labels: `action`, `status`
pub fn record_action(action: &'static str, status: &'static str) {
    counter!("sfu_actions_total", "action" => action, "status" => status).increment(1);
}

/// Record media engine call latency.
///
/// Metric: `sfu_engine_call_duration_seconds`
/// Labels: `operation`, `status`
pub fn record_engine_call(operation: &'static str, status: &'static str, duration: Duration) {
    histogram!(
        "sfu_engine_call_duration_seconds",
        "operation" => operation,
        "status" => status
    )
    .record(duration.as_secs_f64());
}

/// Record a resource that failed to close during teardown.
///
/// Metric: `sfu_teardown_errors_total`
/// Labels: `resource` (transport, producer, consumer)
pub fn record_teardown_error(resource: &'static str) {
    counter!("sfu_teardown_errors_total", "resource" => resource).increment(1);
}

/// Record an applied engine event.
///
/// Metric: `sfu_engine_events_total`
/// Labels: `event`
pub fn record_engine_event(event: &'static str) {
    counter!("sfu_engine_events_total", "event" => event).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // No recorder is installed in unit tests; these must be no-ops.
    #[test]
    fn test_recording_without_recorder_does_not_panic() {
        set_sessions_active(3);
        record_action("produce", "success");
        record_engine_call("consume", "error", Duration::from_millis(12));
        record_teardown_error("consumer");
        record_engine_event("producer_closed");
    }
}
