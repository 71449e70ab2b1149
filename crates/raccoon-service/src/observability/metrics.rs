//! Metrics definitions for the Raccoon service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `raccoon_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: HTTP methods
//! - `endpoint`: known routes, everything else is `/other`
//! - `status`: success, error, timeout
//! - `outcome`: token validation outcomes from `InvalidReason::as_str`
//! - `result`: key lookup results (hit, refreshed, cooldown, not_found, error)
//! - `error_type`: `KeySetError::kind`

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used by `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("raccoon_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // JWKS refresh is bounded by the 10s refresh timeout
        .set_buckets_for_metric(
            Matcher::Prefix("raccoon_jwks_refresh".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set JWKS refresh buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion.
///
/// Metric: `raccoon_http_requests_total`, `raccoon_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("raccoon_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("raccoon_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Map a request path to a bounded label.
///
/// Route prefixes are configurable, so prefixed routes are matched by their
/// trailing segments.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/" | "/health" | "/ready" | "/metrics" => path.to_string(),
        _ if path.ends_with("/users/me") => "{api}/users/me".to_string(),
        _ if path.ends_with("/chat") => "{ws}/chat".to_string(),
        _ => "/other".to_string(),
    }
}

// ============================================================================
// JWKS Metrics
// ============================================================================

/// Record a JWKS fetch.
///
/// Metrics:
/// - `raccoon_jwks_refresh_total` counter (labels: `status`)
/// - `raccoon_jwks_refresh_duration_seconds` histogram (labels: `status`)
/// - `raccoon_jwks_refresh_failures_total` counter (labels: `error_type`, on failure only)
pub fn record_jwks_refresh(status: &str, error_type: Option<&str>, duration: Duration) {
    histogram!("raccoon_jwks_refresh_duration_seconds",
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("raccoon_jwks_refresh_total",
        "status" => status.to_string()
    )
    .increment(1);

    if let Some(err_type) = error_type {
        counter!("raccoon_jwks_refresh_failures_total",
            "error_type" => err_type.to_string()
        )
        .increment(1);
    }
}

/// Set the number of keys in the current key set.
///
/// Metric: `raccoon_jwks_keys`
pub fn set_jwks_keys(count: usize) {
    gauge!("raccoon_jwks_keys").set(count as f64);
}

/// Record how a `kid` lookup was resolved.
///
/// Metric: `raccoon_key_lookups_total`
/// Labels: `result`
pub fn record_key_lookup(result: &str) {
    counter!("raccoon_key_lookups_total",
        "result" => result.to_string()
    )
    .increment(1);
}

// ============================================================================
// Token Validation Metrics
// ============================================================================

/// Record a token validation verdict.
///
/// Metric: `raccoon_token_validations_total`
/// Labels: `outcome` ("valid", an invalid reason, or "error")
pub fn record_token_validation(outcome: &str) {
    counter!("raccoon_token_validations_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_status_code() {
        assert_eq!(categorize_status_code(200), "success");
        assert_eq!(categorize_status_code(204), "success");
        assert_eq!(categorize_status_code(401), "error");
        assert_eq!(categorize_status_code(500), "error");
        assert_eq!(categorize_status_code(408), "timeout");
        assert_eq!(categorize_status_code(504), "timeout");
    }

    #[test]
    fn test_normalize_endpoint_known_paths() {
        assert_eq!(normalize_endpoint("/health"), "/health");
        assert_eq!(normalize_endpoint("/ready"), "/ready");
        assert_eq!(normalize_endpoint("/metrics"), "/metrics");
        assert_eq!(normalize_endpoint("/api/users/me"), "{api}/users/me");
        assert_eq!(normalize_endpoint("/v2/users/me"), "{api}/users/me");
        assert_eq!(normalize_endpoint("/ws/chat"), "{ws}/chat");
    }

    #[test]
    fn test_normalize_endpoint_unknown_paths_are_bounded() {
        assert_eq!(normalize_endpoint("/api/users/12345"), "/other");
        assert_eq!(normalize_endpoint("/random/deep/path"), "/other");
    }

    #[test]
    fn test_record_functions_without_recorder() {
        // No recorder installed: the metrics facade turns these into no-ops.
        record_http_request("GET", "/health", 200, Duration::from_millis(3));
        record_jwks_refresh("error", Some("timeout"), Duration::from_secs(10));
        record_jwks_refresh("success", None, Duration::from_millis(40));
        set_jwks_keys(2);
        record_key_lookup("cooldown");
        record_token_validation("expired");
    }
}
