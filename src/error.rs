//! Pruning-specific error types.
//!
//! Provides rich error context for pruning rounds following
//! Toyota Way Jidoka (stop on defect) principles: a round either
//! completes with a consistent mask set or stops before any rewrite.
//!
//! # References
//! - Liker, J. K. (2004). The Toyota Way: 14 Management Principles.

use thiserror::Error;

/// Result alias for pruning operations.
pub type Result<T> = std::result::Result<T, PruningError>;

/// Pruning operation errors with detailed context.
///
/// # Toyota Way: Andon
/// Each variant names the offending rule or layer so the caller can
/// act on it without re-running the round.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PruningError {
    /// Malformed or contradictory sparsity configuration.
    ///
    /// Raised before any scoring happens.
    #[error("Configuration error in rule {rule}: {message}")]
    Configuration {
        /// Index of the offending rule in the configuration list
        rule: usize,
        /// What is wrong with it
        message: String,
    },

    /// The network definition could not be traced into layers and edges.
    #[error("Graph tracing failed at layer '{layer}': {message}")]
    GraphTracing {
        /// Layer being traced when the failure happened
        layer: String,
        /// Description of the failure
        message: String,
    },

    /// Tensor or mask shape mismatch.
    #[error("Shape mismatch in {context}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Where the mismatch was detected
        context: String,
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape found
        got: Vec<usize>,
    },

    /// Invalid sparsity mask.
    ///
    /// Masks must contain only binary values (0.0 or 1.0).
    #[error("Invalid sparsity mask: {reason}")]
    InvalidMask {
        /// Reason for invalidity
        reason: String,
    },

    /// Numerical instability detected (NaN/Inf in weights or scores).
    ///
    /// # Jidoka Principle
    /// Stop immediately rather than ranking garbage scores.
    #[error("Numerical instability in {method}: {details}")]
    NumericalInstability {
        /// Method that detected the instability
        method: String,
        /// Detailed description of what was detected
        details: String,
    },

    /// Layer has no prunable dimension.
    #[error("Layer '{layer}' has no parameters to prune")]
    NoParameters {
        /// Layer name
        layer: String,
    },

    /// Configuration could not be (de)serialised.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PruningError {
    /// Shorthand for a configuration error on rule `rule`.
    pub(crate) fn config(rule: usize, message: impl Into<String>) -> Self {
        PruningError::Configuration {
            rule,
            message: message.into(),
        }
    }

    /// Shorthand for a tracing error at `layer`.
    pub(crate) fn tracing(layer: impl Into<String>, message: impl Into<String>) -> Self {
        PruningError::GraphTracing {
            layer: layer.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for PruningError {
    fn from(e: serde_json::Error) -> Self {
        PruningError::Serialization(e.to_string())
    }
}
