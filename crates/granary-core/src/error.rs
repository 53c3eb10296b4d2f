//! Error types for Granary
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use thiserror::Error;

/// Result type alias for Granary operations
pub type Result<T> = std::result::Result<T, Error>;

/// Granary error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Invocation Contract
    // =========================================================================
    #[error("Invalid grain identity: {id}, reason: {reason}")]
    InvalidIdentity { id: String, reason: String },

    #[error("Unknown method: {method} on grain type {grain_type}")]
    UnknownMethod { grain_type: String, method: String },

    #[error("Invalid argument for {method}: {reason}")]
    InvalidArgument { method: String, reason: String },

    #[error("Grain activation failed: {id}, reason: {reason}")]
    ActivationFailed { id: String, reason: String },

    #[error("Invocation cancelled: {id}, method: {method}")]
    Cancelled { id: String, method: String },

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    #[error("Unknown grain type: {grain_type}")]
    UnknownGrainType { grain_type: String },

    #[error("Grain type already registered: {grain_type}")]
    GrainTypeAlreadyRegistered { grain_type: String },

    #[error("Turn queue full: {id}, depth: {depth}, max: {max}")]
    TurnQueueFull { id: String, depth: usize, max: usize },

    #[error("Activation limit reached: {limit} live activations")]
    ActivationLimitReached { limit: usize },

    #[error("Invocation timed out: {method} after {timeout_ms}ms")]
    InvocationTimedOut { method: String, timeout_ms: u64 },

    #[error("Runtime is shut down")]
    RuntimeShutdown,

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error("Serialization failed: {reason}")]
    SerializationFailed { reason: String },

    #[error("Deserialization failed: {reason}")]
    DeserializationFailed { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an invalid identity error
    pub fn invalid_identity(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentity {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// Create an activation failed error
    pub fn activation_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ActivationFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Check if this error is retriable
    ///
    /// Transient back-pressure and timeouts are; contract violations are not.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::TurnQueueFull { .. }
                | Self::ActivationLimitReached { .. }
                | Self::InvocationTimedOut { .. }
        )
    }

    /// Check if this error terminates the activation that produced it
    pub fn is_fatal_to_activation(&self) -> bool {
        matches!(self, Self::ActivationFailed { .. })
    }

    /// Short status label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidIdentity { .. } => "invalid_identity",
            Self::UnknownMethod { .. } => "unknown_method",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::ActivationFailed { .. } => "activation_failed",
            Self::Cancelled { .. } => "cancelled",
            Self::UnknownGrainType { .. } => "unknown_grain_type",
            Self::GrainTypeAlreadyRegistered { .. } => "grain_type_already_registered",
            Self::TurnQueueFull { .. } => "turn_queue_full",
            Self::ActivationLimitReached { .. } => "activation_limit_reached",
            Self::InvocationTimedOut { .. } => "timed_out",
            Self::RuntimeShutdown => "runtime_shutdown",
            Self::InvalidConfiguration { .. } => "invalid_configuration",
            Self::Internal { .. } => "internal",
            Self::SerializationFailed { .. } => "serialization_failed",
            Self::DeserializationFailed { .. } => "deserialization_failed",
            Self::Other(_) => "other",
        }
    }
}
