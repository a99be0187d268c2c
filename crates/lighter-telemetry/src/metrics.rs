//! Prometheus metrics for nonce coordination.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, which is a fatal startup error. These panics
//! only occur during static initialization, never at runtime.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_int_gauge_vec, CounterVec, Encoder, IntGaugeVec, TextEncoder,
};

/// Total nonces drawn.
/// Labels: api_key_index, mode (rotating/direct)
pub static NONCE_DRAWS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lighter_nonce_draws_total",
        "Total nonces drawn from credential slots",
        &["api_key_index", "mode"]
    )
    .unwrap()
});

/// Total nonce reservations rolled back after a pre-acceptance failure.
pub static NONCE_ROLLBACKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lighter_nonce_rollbacks_total",
        "Total nonce reservations rolled back",
        &["api_key_index"]
    )
    .unwrap()
});

/// Total slot refetches from the venue.
pub static NONCE_SLOT_REFRESH_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lighter_nonce_slot_refresh_total",
        "Total credential slot refetches from the venue",
        &["api_key_index"]
    )
    .unwrap()
});

/// Total failed remote nonce fetches.
pub static NONCE_FETCH_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lighter_nonce_fetch_failures_total",
        "Total failed remote nonce fetches",
        &["api_key_index"]
    )
    .unwrap()
});

/// Coordinator readiness (1 = every configured slot populated).
pub static NONCE_READY: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "lighter_nonce_ready",
        "Nonce coordinator readiness per account (1=ready)",
        &["account_index"]
    )
    .unwrap()
});

/// Metrics helper.
pub struct Metrics;

impl Metrics {
    /// Record a nonce draw.
    pub fn nonce_drawn(api_key_index: &str, mode: &str) {
        NONCE_DRAWS_TOTAL
            .with_label_values(&[api_key_index, mode])
            .inc();
    }

    /// Record a rollback.
    pub fn nonce_rolled_back(api_key_index: &str) {
        NONCE_ROLLBACKS_TOTAL
            .with_label_values(&[api_key_index])
            .inc();
    }

    /// Record a slot refetch.
    pub fn nonce_slot_refreshed(api_key_index: &str) {
        NONCE_SLOT_REFRESH_TOTAL
            .with_label_values(&[api_key_index])
            .inc();
    }

    /// Record a failed remote fetch.
    pub fn nonce_fetch_failed(api_key_index: &str) {
        NONCE_FETCH_FAILURES_TOTAL
            .with_label_values(&[api_key_index])
            .inc();
    }

    /// Set coordinator readiness for an account.
    pub fn nonce_ready(account_index: &str, ready: bool) {
        NONCE_READY
            .with_label_values(&[account_index])
            .set(i64::from(ready));
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
