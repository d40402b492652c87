//! dcloud-cluster — the node directory and its resource accounting.
//!
//! The [`ClusterRegistry`] owns every [`Node`](dcloud_core::Node) record
//! and is the sole mutator of node status, resources and heartbeat
//! timestamps. It carries two responsibilities:
//!
//! - **Directory + liveness**: registration, heartbeats, point-in-time
//!   snapshots, and the periodic sweep that flags silent nodes
//!   `Offline`.
//! - **Resource accounting**: optimistic reservation and release of
//!   node capacity, done inside the same critical section that produced
//!   the snapshot a placement decision was scored on — so two jobs can
//!   never race onto the same transiently-available capacity.

pub mod error;
pub mod registry;

pub use error::{ClusterError, ClusterResult};
pub use registry::{ClusterRegistry, NodeLoss};
