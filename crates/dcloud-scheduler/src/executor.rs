//! The Executor capability — how the core runs a job remotely.
//!
//! Implemented by the excluded remote-execution backend (session
//! transport + containerized runner); the core only sees this trait.
//! Boxed futures keep the trait object-safe so the scheduler can hold
//! an `Arc<dyn Executor>`.

use thiserror::Error;

use dcloud_core::{Job, JobResult, NodeConnection};

/// Boxed future returned by [`Executor`] methods.
pub type BoxFuture<T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send>>;

/// Transport- or backend-level execution failure.
///
/// For retry purposes the scheduler treats these exactly like a
/// nonzero exit code.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("connection to {0} failed: {1}")]
    Connection(String, String),

    #[error("execution timed out after {0}s")]
    Timeout(u64),

    #[error("node {0} went offline during execution")]
    NodeLost(String),

    #[error("execution backend error: {0}")]
    Backend(String),
}

/// Remote execution capability consumed by the scheduler.
pub trait Executor: Send + Sync {
    /// Run the job's command on the node. The implementation is
    /// expected to honor `job.resources.timeout_secs`; the scheduler
    /// additionally enforces it around this call.
    fn execute(
        &self,
        job: Job,
        connection: NodeConnection,
    ) -> BoxFuture<Result<JobResult, ExecutionError>>;

    /// Best-effort remote termination of a cancelled job. The core does
    /// not wait for confirmation.
    fn cancel(&self, job: Job) -> BoxFuture<()>;
}
