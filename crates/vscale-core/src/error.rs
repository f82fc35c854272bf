//! Error types shared by every vscale crate.

use thiserror::Error;

use crate::types::Dimension;

/// Result type alias for scaling operations.
pub type ScaleResult<T> = Result<T, ScaleError>;

/// Errors raised while configuring or running the autoscaler.
///
/// Only [`ScaleError::Config`] is fatal. Everything else is scoped to a
/// single object or a single cycle and is logged by the control loop.
#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("metrics query for {object} ({dimension}) failed: {message}")]
    Metrics {
        object: String,
        dimension: Dimension,
        message: String,
    },

    #[error("activity query for {object} failed: {message}")]
    Activity { object: String, message: String },

    #[error("target for {object} violates the account contract: {violations}")]
    ContractViolation { object: String, violations: String },

    #[error("provider backend error: {0}")]
    Backend(String),
}

impl ScaleError {
    /// Whether this error must stop the process before the loop starts.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScaleError::Config(_))
    }

    /// Component label used for the error counter.
    pub fn component(&self) -> &'static str {
        match self {
            ScaleError::Config(_) => "config",
            ScaleError::Discovery(_)
            | ScaleError::ContractViolation { .. }
            | ScaleError::Backend(_) => "provider",
            ScaleError::Metrics { .. } => "metrics",
            ScaleError::Activity { .. } => "activity",
        }
    }
}
