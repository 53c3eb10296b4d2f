//! TigerStyle constants for Granary
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Identity Limits
// =============================================================================

/// Maximum length of a grain type tag in bytes
pub const GRAIN_TYPE_LENGTH_BYTES_MAX: usize = 128;

/// Maximum length of a string grain key in bytes
pub const GRAIN_KEY_LENGTH_BYTES_MAX: usize = 256;

/// Maximum length of a method selector in bytes
pub const METHOD_NAME_LENGTH_BYTES_MAX: usize = 128;

/// Maximum number of methods registered for one grain type
pub const METHOD_TABLE_COUNT_MAX: usize = 1024;

// =============================================================================
// Activation Limits
// =============================================================================

/// Default idle timeout before an activation is collected, in milliseconds (5 min)
pub const GRAIN_IDLE_TIMEOUT_MS_DEFAULT: u64 = 5 * 60 * 1000;

/// Maximum idle timeout in milliseconds (1 hour)
pub const GRAIN_IDLE_TIMEOUT_MS_MAX: u64 = 60 * 60 * 1000;

/// Maximum number of live activations per process
pub const ACTIVATION_COUNT_MAX: usize = 1_000_000;

/// Default number of live activations per process
pub const ACTIVATION_COUNT_DEFAULT: usize = 100_000;

/// Maximum depth of an activation's turn queue
pub const TURN_QUEUE_DEPTH_MAX: usize = 10_000;

/// Default depth of an activation's turn queue
pub const TURN_QUEUE_DEPTH_DEFAULT: usize = 1_000;

/// Default time shutdown waits for one activation to drain, in milliseconds (30 sec)
pub const DEACTIVATION_WAIT_MS_DEFAULT: u64 = 30 * 1000;

/// Maximum time shutdown waits for one activation to drain, in milliseconds (10 min)
pub const DEACTIVATION_WAIT_MS_MAX: u64 = 10 * 60 * 1000;

// =============================================================================
// Message Limits
// =============================================================================

/// Maximum size of an invocation payload in bytes (1 MB)
pub const PAYLOAD_SIZE_BYTES_MAX: usize = 1024 * 1024;

// =============================================================================
// Observability - Metric Names
// =============================================================================

/// Metric: Total number of grain activations (counter, labels: grain_type)
pub const METRIC_NAME_ACTIVATIONS_TOTAL: &str = "granary_activations_total";

/// Metric: Total number of grain deactivations (counter, labels: grain_type, reason)
pub const METRIC_NAME_DEACTIVATIONS_TOTAL: &str = "granary_deactivations_total";

/// Metric: Total number of invocations (counter, labels: method, status)
pub const METRIC_NAME_INVOCATIONS_TOTAL: &str = "granary_invocations_total";

/// Metric: Turn duration in seconds (histogram, labels: method)
pub const METRIC_NAME_TURN_DURATION_SECONDS: &str = "granary_turn_duration_seconds";

/// Metric: Total number of cancelled invocations (counter)
pub const METRIC_NAME_INVOCATIONS_CANCELLED_TOTAL: &str = "granary_invocations_cancelled_total";

// Compile-time assertions for constant validity
const _: () = {
    assert!(GRAIN_IDLE_TIMEOUT_MS_DEFAULT <= GRAIN_IDLE_TIMEOUT_MS_MAX);
    assert!(TURN_QUEUE_DEPTH_DEFAULT <= TURN_QUEUE_DEPTH_MAX);
    assert!(ACTIVATION_COUNT_DEFAULT <= ACTIVATION_COUNT_MAX);
    assert!(DEACTIVATION_WAIT_MS_DEFAULT <= DEACTIVATION_WAIT_MS_MAX);
    assert!(GRAIN_KEY_LENGTH_BYTES_MAX >= 36); // fits a hyphenated UUID
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_have_units_in_names() {
        // Byte limits end in _BYTES_, time limits in _MS_, counts in _COUNT_
        let _: usize = GRAIN_TYPE_LENGTH_BYTES_MAX;
        let _: u64 = GRAIN_IDLE_TIMEOUT_MS_DEFAULT;
        let _: usize = ACTIVATION_COUNT_MAX;
    }

    #[test]
    fn test_metric_names_are_prefixed() {
        for name in [
            METRIC_NAME_ACTIVATIONS_TOTAL,
            METRIC_NAME_DEACTIVATIONS_TOTAL,
            METRIC_NAME_INVOCATIONS_TOTAL,
            METRIC_NAME_TURN_DURATION_SECONDS,
            METRIC_NAME_INVOCATIONS_CANCELLED_TOTAL,
        ] {
            assert!(name.starts_with("granary_"), "{name}");
        }
    }
}
