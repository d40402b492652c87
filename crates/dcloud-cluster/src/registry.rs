//! Cluster registry — node directory, heartbeats, liveness, accounting.
//!
//! One `tokio::sync::Mutex` guards the whole node table. That is
//! deliberate: spec'd placement requires snapshot, scoring and
//! reservation to be a single atomic unit, which
//! [`ClusterRegistry::select_and_reserve`] provides by running the
//! caller's pure selector inside the lock.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use dcloud_core::{
    ClusterStats, Job, JobId, Node, NodeId, NodeStatus, ResourceRequirements, epoch_ms,
};

use crate::error::{ClusterError, ClusterResult};

/// A node newly flagged `Offline` by the liveness sweep, together with
/// the jobs it was running. The scheduler applies the node-loss policy
/// (treat each as an execution failure) to these.
#[derive(Debug, Clone)]
pub struct NodeLoss {
    pub node_id: NodeId,
    pub jobs_running: Vec<JobId>,
}

struct RegistryState {
    nodes: HashMap<NodeId, Node>,
    /// Registration order. Snapshots iterate this so candidate ordering
    /// is deterministic first-seen order, which is also the placement
    /// tie-break.
    order: Vec<NodeId>,
}

/// The node directory. Sole owner and mutator of [`Node`] records.
pub struct ClusterRegistry {
    inner: Mutex<RegistryState>,
}

impl ClusterRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryState {
                nodes: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    /// Register a node, or replace its record if the id is known.
    ///
    /// Re-registration overwrites the prior resource snapshot — a
    /// worker that restarted resets its accounting. The node comes back
    /// `Active` with a fresh heartbeat either way, keeping its original
    /// position in the snapshot order.
    pub async fn register_node(&self, mut node: Node) -> Node {
        node.status = NodeStatus::Active;
        node.touch_heartbeat();

        let mut state = self.inner.lock().await;
        if !state.nodes.contains_key(&node.id) {
            state.order.push(node.id.clone());
        }
        info!(node_id = %node.id, host = %node.connection.host, "node registered");
        state.nodes.insert(node.id.clone(), node.clone());
        node
    }

    /// Record a heartbeat from a node.
    ///
    /// Revives `Offline` and `Busy` nodes to `Active`; an `Error` node
    /// stays `Error` (that flag is cleared only by re-registration).
    pub async fn heartbeat(&self, node_id: &str) -> ClusterResult<()> {
        let mut state = self.inner.lock().await;
        let node = state
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| ClusterError::NodeNotFound(node_id.to_string()))?;

        node.touch_heartbeat();
        if node.status != NodeStatus::Error {
            node.status = NodeStatus::Active;
        }
        debug!(%node_id, "heartbeat received");
        Ok(())
    }

    /// Point-in-time copy of a single node record.
    pub async fn get_node(&self, node_id: &str) -> ClusterResult<Node> {
        let state = self.inner.lock().await;
        state
            .nodes
            .get(node_id)
            .cloned()
            .ok_or_else(|| ClusterError::NodeNotFound(node_id.to_string()))
    }

    /// Point-in-time copy of every node record, in registration order.
    pub async fn list_nodes(&self) -> Vec<Node> {
        let state = self.inner.lock().await;
        state
            .order
            .iter()
            .filter_map(|id| state.nodes.get(id).cloned())
            .collect()
    }

    /// Remove a node from the directory.
    ///
    /// Returns the removed record (with its `jobs_running` set) so the
    /// caller can recover in-flight jobs; `None` if the id is unknown.
    pub async fn deregister_node(&self, node_id: &str) -> Option<Node> {
        let mut state = self.inner.lock().await;
        let removed = state.nodes.remove(node_id);
        if removed.is_some() {
            state.order.retain(|id| id != node_id);
            info!(%node_id, "node deregistered");
        }
        removed
    }

    /// Flag every node silent for longer than `timeout` as `Offline`.
    ///
    /// Idempotent: already-`Offline` nodes are skipped, so each loss is
    /// reported exactly once. This is the only path that downgrades a
    /// node for silence; the way back to `Active` is `heartbeat` or
    /// `register_node`.
    pub async fn sweep_expired(&self, timeout: Duration) -> Vec<NodeLoss> {
        let now = epoch_ms();
        let cutoff_ms = timeout.as_millis() as u64;
        let mut losses = Vec::new();

        let mut state = self.inner.lock().await;
        for node in state.nodes.values_mut() {
            if node.status == NodeStatus::Offline {
                continue;
            }
            let expired = match node.last_heartbeat {
                Some(ts) => now.saturating_sub(ts) > cutoff_ms,
                None => true,
            };
            if !expired {
                continue;
            }

            node.status = NodeStatus::Offline;
            warn!(
                node_id = %node.id,
                in_flight = node.jobs_running.len(),
                "node marked offline (missed heartbeat)"
            );
            losses.push(NodeLoss {
                node_id: node.id.clone(),
                jobs_running: node.jobs_running.iter().cloned().collect(),
            });
        }
        losses
    }

    /// Aggregate resources across the registry's `Active` nodes.
    pub async fn cluster_stats(&self) -> ClusterStats {
        let state = self.inner.lock().await;
        let mut stats = ClusterStats::default();

        for node in state.nodes.values() {
            if node.status != NodeStatus::Active {
                continue;
            }
            let Some(res) = &node.resources else { continue };
            stats.nodes_active += 1;
            stats.total_cpu_cores += u64::from(res.cpu_total);
            stats.available_cpu_cores += u64::from(res.cpu_available);
            stats.total_memory_mb += res.memory_total_mb;
            stats.available_memory_mb += res.memory_available_mb;
            if res.gpu_available {
                stats.gpu_nodes += 1;
            }
        }
        stats
    }

    // ── Resource accounting ─────────────────────────────────────────

    /// Run a placement decision and its reservation as one atomic unit.
    ///
    /// Inside a single critical section: takes a registration-ordered
    /// snapshot, hands it to the caller's pure `select` function, and —
    /// if a node was chosen — reserves the job's capacity on it.
    ///
    /// Returns the post-reservation node record, or `None` when the
    /// selector found no candidate (placement deferred, not an error).
    pub async fn select_and_reserve<F>(
        &self,
        job: &Job,
        select: F,
    ) -> ClusterResult<Option<Node>>
    where
        F: FnOnce(&[Node]) -> Option<NodeId>,
    {
        let mut state = self.inner.lock().await;

        let snapshot: Vec<Node> = state
            .order
            .iter()
            .filter_map(|id| state.nodes.get(id).cloned())
            .collect();

        let Some(node_id) = select(&snapshot) else {
            return Ok(None);
        };

        let node = state
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| ClusterError::NodeNotFound(node_id.clone()))?;
        reserve_on(node, &job.id, &job.resources)?;

        debug!(
            %node_id,
            job_id = %job.id,
            cpu = job.resources.cpu_cores,
            memory_mb = job.resources.memory_mb,
            "capacity reserved"
        );
        Ok(Some(node.clone()))
    }

    /// Return a job's reserved capacity to its node.
    ///
    /// Symmetric with reservation and applied on every exit — success,
    /// failure or cancellation. `completed` additionally bumps the
    /// node's success counter.
    ///
    /// At most once per reservation: releasing a job the node does not
    /// hold is an [`ClusterError::InvariantViolation`]. Releasing
    /// against a node id no longer in the directory is a warn-and-skip,
    /// since that node's accounting died with its record.
    pub async fn release(
        &self,
        node_id: &str,
        job_id: &str,
        requirements: &ResourceRequirements,
        completed: bool,
    ) -> ClusterResult<()> {
        let mut state = self.inner.lock().await;
        let Some(node) = state.nodes.get_mut(node_id) else {
            warn!(%node_id, %job_id, "release against deregistered node, skipping");
            return Ok(());
        };

        if !node.jobs_running.remove(job_id) {
            return Err(ClusterError::InvariantViolation(format!(
                "double release of job {job_id} on node {node_id}"
            )));
        }

        let res = node.resources.as_mut().ok_or_else(|| {
            ClusterError::InvariantViolation(format!(
                "release of job {job_id} on node {node_id} without a resource snapshot"
            ))
        })?;

        let cpu = res.cpu_available + requirements.cpu_cores;
        let memory = res.memory_available_mb + requirements.memory_mb;
        if cpu > res.cpu_total || memory > res.memory_total_mb {
            return Err(ClusterError::InvariantViolation(format!(
                "release of job {job_id} would exceed node {node_id} totals \
                 ({cpu}/{} cpu, {memory}/{} mb)",
                res.cpu_total, res.memory_total_mb
            )));
        }
        res.cpu_available = cpu;
        res.memory_available_mb = memory;

        if completed {
            node.jobs_completed += 1;
        }
        debug!(%node_id, %job_id, completed, "capacity released");
        Ok(())
    }
}

impl Default for ClusterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Reserve `requirements` on `node` for `job_id`.
///
/// The selector already filtered on capacity from the same snapshot, so
/// a shortfall here means the bookkeeping is broken — surfaced loudly,
/// never clamped.
fn reserve_on(
    node: &mut Node,
    job_id: &JobId,
    requirements: &ResourceRequirements,
) -> ClusterResult<()> {
    if node.jobs_running.contains(job_id) {
        return Err(ClusterError::InvariantViolation(format!(
            "job {job_id} already reserved on node {}",
            node.id
        )));
    }

    let res = node.resources.as_mut().ok_or_else(|| {
        ClusterError::InvariantViolation(format!(
            "selected node {} has no resource snapshot",
            node.id
        ))
    })?;

    if res.cpu_available < requirements.cpu_cores
        || res.memory_available_mb < requirements.memory_mb
    {
        return Err(ClusterError::InvariantViolation(format!(
            "reservation of job {job_id} would overdraw node {} \
             ({}cpu/{}mb available, {}cpu/{}mb requested)",
            node.id,
            res.cpu_available,
            res.memory_available_mb,
            requirements.cpu_cores,
            requirements.memory_mb
        )));
    }

    res.cpu_available -= requirements.cpu_cores;
    res.memory_available_mb -= requirements.memory_mb;
    node.jobs_running.insert(job_id.clone());
    Ok(())
}
