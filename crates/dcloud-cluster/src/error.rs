//! Registry error types.

use thiserror::Error;

/// Result type alias for registry operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// A bookkeeping invariant was broken: double release, reservation
    /// that would drive capacity negative, release past recorded
    /// totals. These indicate a bug and fail the operation loudly
    /// rather than clamping.
    #[error("resource accounting violation: {0}")]
    InvariantViolation(String),
}
