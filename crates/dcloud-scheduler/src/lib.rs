//! dcloud-scheduler — the job lifecycle and placement engine.
//!
//! The [`JobScheduler`] owns every job record and drives each one
//! through its state machine:
//!
//! ```text
//! Queued ──place──► Running ──exit 0──────► Completed
//!   ▲                  │
//!   │                  ├──failure, retries left──► Queued (retry)
//!   │                  └──failure, exhausted────► Failed
//!   └── submit    Queued/Running ──cancel──► Cancelled
//! ```
//!
//! Placement asks the load balancer for a node and reserves capacity in
//! the same registry critical section; remote execution happens through
//! the pluggable [`Executor`] capability on its own task so a slow node
//! never stalls the driver.

pub mod error;
pub mod executor;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use executor::{BoxFuture, ExecutionError, Executor};
pub use scheduler::JobScheduler;
