//! Metrics collection for Granary
//!
//! TigerStyle: Explicit metric names with units, type-safe recording.
//!
//! Instruments are created through the OpenTelemetry global meter when the
//! `otel` feature is enabled and compile to no-ops otherwise.

#[cfg(feature = "otel")]
use crate::constants::*;
#[cfg(feature = "otel")]
use once_cell::sync::Lazy;
#[cfg(feature = "otel")]
use opentelemetry::metrics::{Counter, Histogram};
#[cfg(feature = "otel")]
use opentelemetry::{global, KeyValue};

#[cfg(feature = "otel")]
static ACTIVATIONS_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("granary")
        .u64_counter(METRIC_NAME_ACTIVATIONS_TOTAL)
        .with_description("Total number of grain activations")
        .init()
});

#[cfg(feature = "otel")]
static DEACTIVATIONS_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("granary")
        .u64_counter(METRIC_NAME_DEACTIVATIONS_TOTAL)
        .with_description("Total number of grain deactivations")
        .init()
});

#[cfg(feature = "otel")]
static INVOCATIONS_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("granary")
        .u64_counter(METRIC_NAME_INVOCATIONS_TOTAL)
        .with_description("Total number of completed invocations")
        .init()
});

#[cfg(feature = "otel")]
static TURN_DURATION_HISTOGRAM: Lazy<Histogram<f64>> = Lazy::new(|| {
    global::meter("granary")
        .f64_histogram(METRIC_NAME_TURN_DURATION_SECONDS)
        .with_description("Turn duration in seconds")
        .init()
});

#[cfg(feature = "otel")]
static CANCELLATIONS_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("granary")
        .u64_counter(METRIC_NAME_INVOCATIONS_CANCELLED_TOTAL)
        .with_description("Invocations cancelled before their turn started")
        .init()
});

/// Record a grain activation
#[cfg(feature = "otel")]
pub fn record_activation(grain_type: &str) {
    ACTIVATIONS_COUNTER.add(1, &[KeyValue::new("grain_type", grain_type.to_string())]);
}

/// Record a grain deactivation
///
/// # Arguments
/// * `reason` - "idle", "requested", "shutdown" or "failed"
#[cfg(feature = "otel")]
pub fn record_deactivation(grain_type: &str, reason: &str) {
    DEACTIVATIONS_COUNTER.add(
        1,
        &[
            KeyValue::new("grain_type", grain_type.to_string()),
            KeyValue::new("reason", reason.to_string()),
        ],
    );
}

/// Record a finished turn
///
/// # Arguments
/// * `method` - The method selector
/// * `status` - "success" or an error kind label
/// * `duration_seconds` - Turn duration in seconds
#[cfg(feature = "otel")]
pub fn record_invocation(method: &str, status: &str, duration_seconds: f64) {
    INVOCATIONS_COUNTER.add(
        1,
        &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("status", status.to_string()),
        ],
    );

    TURN_DURATION_HISTOGRAM.record(
        duration_seconds,
        &[KeyValue::new("method", method.to_string())],
    );
}

/// Record an invocation removed from a turn queue before it started
#[cfg(feature = "otel")]
pub fn record_cancellation(method: &str) {
    CANCELLATIONS_COUNTER.add(1, &[KeyValue::new("method", method.to_string())]);
}

#[cfg(not(feature = "otel"))]
pub fn record_activation(_grain_type: &str) {}

#[cfg(not(feature = "otel"))]
pub fn record_deactivation(_grain_type: &str, _reason: &str) {}

#[cfg(not(feature = "otel"))]
pub fn record_invocation(_method: &str, _status: &str, _duration_seconds: f64) {}

#[cfg(not(feature = "otel"))]
pub fn record_cancellation(_method: &str) {}
