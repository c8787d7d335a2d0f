//! Prometheus metrics for token issuance, validation and sweeping
//!
//! Counters register lazily in the default registry on first use. A
//! registration failure is logged once and recording becomes a no-op.

use crate::{AuthGrantError, Result};
use once_cell::sync::Lazy;
use prometheus::{IntCounterVec, TextEncoder, register_int_counter_vec};

static TOKENS_ISSUED_TOTAL: Lazy<Option<IntCounterVec>> = Lazy::new(|| {
    register_int_counter_vec!(
        "authgrant_tokens_issued_total",
        "Total number of tokens issued",
        &["kind"]
    )
    .inspect_err(|e| tracing::warn!("Failed to register tokens issued counter: {}", e))
    .ok()
});

static TOKEN_VALIDATION_FAILURES_TOTAL: Lazy<Option<IntCounterVec>> = Lazy::new(|| {
    register_int_counter_vec!(
        "authgrant_token_validation_failures_total",
        "Total number of rejected tokens",
        &["kind"]
    )
    .inspect_err(|e| tracing::warn!("Failed to register validation failure counter: {}", e))
    .ok()
});

static GRANTS_SWEPT_TOTAL: Lazy<Option<IntCounterVec>> = Lazy::new(|| {
    register_int_counter_vec!(
        "authgrant_grants_swept_total",
        "Total number of expired grant rows removed by the sweeper",
        &["kind"]
    )
    .inspect_err(|e| tracing::warn!("Failed to register sweep counter: {}", e))
    .ok()
});

fn inc(counter: &Lazy<Option<IntCounterVec>>, kind: &str, by: u64) {
    if let Some(counter) = counter.as_ref() {
        counter.with_label_values(&[kind]).inc_by(by);
    }
}

pub fn record_token_issued(kind: &str) {
    inc(&TOKENS_ISSUED_TOTAL, kind, 1);
}

pub fn record_validation_failure(kind: &str) {
    inc(&TOKEN_VALIDATION_FAILURES_TOTAL, kind, 1);
}

pub fn record_swept(kind: &str, count: u64) {
    if count > 0 {
        inc(&GRANTS_SWEPT_TOTAL, kind, count);
    }
}

/// Get Prometheus metrics in text format
pub fn get_metrics() -> Result<String> {
    TextEncoder::new()
        .encode_to_string(&prometheus::gather())
        .map_err(|e| AuthGrantError::config(format!("Failed to encode metrics: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_metrics() {
        record_token_issued("access_token");
        record_validation_failure("refresh_token");
        record_swept("pkce", 3);
        record_swept("pkce", 0);

        let metrics = get_metrics().unwrap();
        assert!(metrics.contains("authgrant_tokens_issued_total"));
        assert!(metrics.contains("authgrant_token_validation_failures_total"));
        assert!(metrics.contains("authgrant_grants_swept_total"));
    }
}
