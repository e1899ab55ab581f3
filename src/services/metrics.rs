use once_cell::sync::OnceCell;
use prometheus::{
    HistogramVec, IntCounterVec, register_histogram_vec, register_int_counter_vec,
};
use std::time::Instant;

pub static CHECKS: OnceCell<IntCounterVec> = OnceCell::new();
pub static BREAKER_TRANSITIONS: OnceCell<IntCounterVec> = OnceCell::new();
pub static STORE_LATENCY: OnceCell<HistogramVec> = OnceCell::new();
pub static STORE_ERRORS: OnceCell<IntCounterVec> = OnceCell::new();

/// Registers all collectors with the default registry. Safe to call more than once.
pub fn init_metrics() {
    CHECKS.get_or_init(|| {
        register_int_counter_vec!(
            "bloomguard_checks_total",
            "Membership checks by outcome",
            &["outcome"]
        )
        .expect("register bloomguard_checks_total")
    });
    BREAKER_TRANSITIONS.get_or_init(|| {
        register_int_counter_vec!(
            "bloomguard_breaker_transitions_total",
            "Circuit breaker state transitions by target state",
            &["to"]
        )
        .expect("register bloomguard_breaker_transitions_total")
    });
    STORE_LATENCY.get_or_init(|| {
        register_histogram_vec!(
            "bloomguard_store_latency_seconds",
            "Bit store round trip latency in seconds",
            &["op"],
            vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.25]
        )
        .expect("register bloomguard_store_latency_seconds")
    });
    STORE_ERRORS.get_or_init(|| {
        register_int_counter_vec!(
            "bloomguard_store_errors_total",
            "Failed bit store round trips",
            &["op", "kind"]
        )
        .expect("register bloomguard_store_errors_total")
    });
}

/// `outcome` is one of `hit`, `miss`, `degraded`, `rejected`.
pub fn record_check(outcome: &'static str) {
    if let Some(checks) = CHECKS.get() {
        checks.with_label_values(&[outcome]).inc();
    }
}

pub fn record_breaker_transition(to: &'static str) {
    if let Some(transitions) = BREAKER_TRANSITIONS.get() {
        transitions.with_label_values(&[to]).inc();
    }
}

pub fn record_store_latency(op: &'static str, start: Instant) {
    if let Some(latency) = STORE_LATENCY.get() {
        latency.with_label_values(&[op]).observe(start.elapsed().as_secs_f64());
    }
}

pub fn record_store_error(op: &'static str, kind: &'static str) {
    if let Some(errors) = STORE_ERRORS.get() {
        errors.with_label_values(&[op, kind]).inc();
    }
}
