//! Scheduler error types.

use thiserror::Error;

/// Result type alias for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Malformed submission — rejected before entering the queue,
    /// never retried.
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// The requested transition is not in the state machine, e.g.
    /// cancelling a job already in a terminal state.
    #[error("job {id} is {status} and cannot be {action}")]
    InvalidTransition {
        id: String,
        status: String,
        action: &'static str,
    },

    #[error("cluster registry error: {0}")]
    Cluster(#[from] dcloud_cluster::ClusterError),
}
