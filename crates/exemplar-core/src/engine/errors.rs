//! Error types for factor-graph construction and message passing.

use thiserror::Error;

/// Errors that can occur while building a factor graph or running the
/// max-sum exchange.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error
/// variants in the future without breaking changes.
///
/// Failing to converge is deliberately not represented here: hitting the
/// iteration cap is a reported terminal status the caller must check, and
/// the driver returns the best-effort message state alongside it.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum PropagationError {
    /// Node constructed with a role tag outside the fixed role set.
    #[error("invalid role: {0}")]
    InvalidRole(String),

    /// Message received from a node that is not in the receiver's
    /// neighbor list. Indicates a topology bug, never retried.
    #[error("unknown neighbor: {0}")]
    UnknownNeighbor(String),

    /// Topology that a node role cannot operate on: an arity violation at
    /// the first message update, a forbidden node pairing, or a mutation
    /// after the run has started.
    #[error("malformed topology: {0}")]
    MalformedTopology(String),

    /// Configuration or input-shape rejection.
    #[error("validation error: {0}")]
    Validation(String),

    /// Numerical input error (NaN or infinite dissimilarities).
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Internal engine error (programmer error, not user error).
    #[error("internal error: {0}")]
    Internal(String),
}
