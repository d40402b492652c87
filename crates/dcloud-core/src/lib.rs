//! dcloud-core — shared data model for the dcloud orchestrator.
//!
//! Defines the domain types shared by the registry, the load balancer
//! and the scheduler:
//!
//! - [`Job`] and its lifecycle states ([`JobStatus`])
//! - [`Node`] records and their resource snapshots ([`NodeResources`])
//! - [`OrchestratorConfig`] — tunable constants for the whole master
//!
//! Ownership is split by id: the cluster registry is the sole mutator
//! of node records, the scheduler is the sole mutator of job records.
//! Cross-references between the two are plain id strings, never live
//! references.

pub mod config;
pub mod types;

pub use config::OrchestratorConfig;
pub use types::{
    ClusterStats, Job, JobId, JobResult, JobSpec, JobStatus, Node, NodeConnection, NodeId,
    NodeResources, NodeStatus, ResourceRequirements, epoch_ms,
};
