//! Metrics definitions for the room service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `room_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `result`: `success` or a wire error code
//! - `reason`: `empty`, `stale`
//! - `code`: wire error codes (13 values)
//! - `kind`: `offer`, `answer`, `ice-candidate`
//! - `operation`: bounded by store method names
//! - `endpoint`: route templates, unknown paths collapse to `/other`
//!
//! Room codes and user ids are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Bucket boundaries for session store latency.
const STORE_LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500,
];

fn builder() -> Result<PrometheusBuilder, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("room_store_latency".to_string()),
            STORE_LATENCY_BUCKETS,
        )
        .map_err(|e| format!("Failed to set store latency buckets: {e}"))
}

/// Initialize the Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    builder()?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

/// Build a handle without installing a global recorder.
///
/// Used by tests and the test server, where several routers may be built in
/// one process.
///
/// # Errors
///
/// Returns error if bucket configuration is rejected.
pub fn detached_handle() -> Result<PrometheusHandle, String> {
    Ok(builder()?.build_recorder().handle())
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record an HTTP request.
///
/// Metrics: `room_http_requests_total`, `room_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status_code` / `status`
pub fn record_http_request(method: &str, path: &str, status_code: u16, duration: Duration) {
    let endpoint = normalize_endpoint(path);
    let status = if (200..400).contains(&status_code) {
        "success"
    } else {
        "error"
    };

    histogram!("room_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("room_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Map a request path to its route template.
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/health" => "/health",
        "/ready" => "/ready",
        "/metrics" => "/metrics",
        "/ws" => "/ws",
        "/rooms" => "/rooms",
        _ => {
            let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();
            match parts.as_slice() {
                ["rooms", _, "settings"] => "/rooms/{id}/settings",
                ["rooms", _, "validate-password"] => "/rooms/{id}/validate-password",
                ["rooms", _, "check-access"] => "/rooms/{id}/check-access",
                ["rooms", _, "host"] => "/rooms/{id}/host",
                ["rooms", _, "history"] => "/rooms/{id}/history",
                _ => "/other",
            }
        }
    }
}

// ============================================================================
// Room Lifecycle Metrics
// ============================================================================

/// Record a join attempt.
///
/// Metric: `room_joins_total`
/// Labels: `result` (`success` or the wire error code)
pub fn record_join(result: &'static str) {
    counter!("room_joins_total", "result" => result).increment(1);
}

/// Record a participant leaving a room.
///
/// Metric: `room_leaves_total`
pub fn record_leave() {
    counter!("room_leaves_total").increment(1);
}

/// Record a room being torn down.
///
/// Metric: `room_reaped_total`
/// Labels: `reason` (`empty`, `stale`)
pub fn record_room_reaped(reason: &'static str) {
    counter!("room_reaped_total", "reason" => reason).increment(1);
}

/// Record a durable history write that failed after the session store change
/// had already been applied.
///
/// Metric: `room_history_write_failures_total`
pub fn record_history_write_failure() {
    counter!("room_history_write_failures_total").increment(1);
}

// ============================================================================
// Broker Metrics
// ============================================================================

/// Record an error returned to a client connection.
///
/// Metric: `room_broker_errors_total`
/// Labels: `code`
pub fn record_broker_error(code: &'static str) {
    counter!("room_broker_errors_total", "code" => code).increment(1);
}

/// Record a relayed signaling message.
///
/// Metric: `room_signaling_relayed_total`
/// Labels: `kind`
pub fn record_signaling_relayed(kind: &'static str) {
    counter!("room_signaling_relayed_total", "kind" => kind).increment(1);
}

/// Metric: `room_connections_active`
pub fn connection_opened() {
    gauge!("room_connections_active").increment(1.0);
}

/// Metric: `room_connections_active`
pub fn connection_closed() {
    gauge!("room_connections_active").decrement(1.0);
}

// ============================================================================
// Session Store Metrics
// ============================================================================

/// Record session store operation latency.
///
/// Metric: `room_store_latency_seconds`
/// Labels: `operation`
pub fn record_store_operation(operation: &'static str, duration: Duration) {
    histogram!("room_store_latency_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn test_recorders_do_not_panic_without_global_recorder() {
        record_join("success");
        record_join("ROOM_LOCKED");
        record_leave();
        record_room_reaped("empty");
        record_history_write_failure();
        record_broker_error("NOT_HOST");
        record_signaling_relayed("offer");
        connection_opened();
        connection_closed();
        record_store_operation("add_member", Duration::from_millis(3));
        record_http_request("GET", "/rooms/abc-def-ghi/host", 200, Duration::from_millis(1));
    }

    #[test]
    fn test_normalize_endpoint_bounds_cardinality() {
        assert_eq!(normalize_endpoint("/health"), "/health");
        assert_eq!(normalize_endpoint("/rooms"), "/rooms");
        assert_eq!(
            normalize_endpoint("/rooms/abc-def-ghi/settings"),
            "/rooms/{id}/settings"
        );
        assert_eq!(
            normalize_endpoint("/rooms/xyz-xyz-xyz/validate-password"),
            "/rooms/{id}/validate-password"
        );
        assert_eq!(normalize_endpoint("/rooms/abc-def-ghi"), "/other");
        assert_eq!(normalize_endpoint("/wp-admin/login.php"), "/other");
    }

    #[test]
    fn test_detached_handle_renders() {
        let handle = detached_handle().unwrap();
        let _ = handle.render();
    }

    #[test]
    fn test_metrics_are_captured_by_local_recorder() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_join("success");
            record_room_reaped("stale");
        });

        let rendered = handle.render();
        assert!(rendered.contains("room_joins_total"));
        assert!(rendered.contains("reason=\"stale\""));
    }
}
