//! Domain types for the dcloud master.
//!
//! These types cross the boundary between the registry, the scheduler
//! and the (external) API layer, so they all derive serde with
//! `snake_case` enum values matching the JSON the worker agents speak.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unique identifier for a job.
pub type JobId = String;

/// Unique identifier for a worker node.
pub type NodeId = String;

// ── Jobs ──────────────────────────────────────────────────────────

/// Lifecycle state of a job.
///
/// `Completed`, `Failed` and `Cancelled` are terminal: once reached, a
/// job never leaves them. The internal retry path re-enters `Queued`
/// from a failed attempt *before* `Failed` is ever assigned, so no
/// transition out of a terminal state exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// True for states that absorb: no transition leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// What a job needs from a node, checked as hard placement constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// CPU cores required (≥ 1).
    pub cpu_cores: u32,
    /// Memory required in MiB (≥ 128).
    pub memory_mb: u64,
    /// Whether a GPU is required.
    #[serde(default)]
    pub gpu: bool,
    /// Container image the command runs in.
    pub image: String,
    /// Wall-clock budget for one execution attempt.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    3600
}

/// Outcome of one remote execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
}

/// A job submission as accepted from the API layer.
///
/// Validation of the spec (resource bounds, non-empty command) happens
/// at submission; the command-content security filter is an external
/// collaborator and runs before this type is ever constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default = "default_job_name")]
    pub name: String,
    pub command: String,
    pub resources: ResourceRequirements,
    /// Higher value schedules first; ties go to the older submission.
    #[serde(default)]
    pub priority: i64,
    /// Jobs that must reach `Completed` before this one is eligible.
    #[serde(default)]
    pub dependencies: Vec<JobId>,
    /// Overrides the configured default when set.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

fn default_job_name() -> String {
    "job".to_string()
}

/// A job owned by the scheduler, from submission to terminal state.
///
/// Job records are retained in memory for query after reaching a
/// terminal state; there is no deletion API and no cross-restart
/// persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub command: String,
    pub resources: ResourceRequirements,
    pub priority: i64,
    pub dependencies: Vec<JobId>,
    pub status: JobStatus,
    /// Set while running; kept afterwards for audit.
    pub assigned_node: Option<NodeId>,
    /// Unix milliseconds.
    pub submitted_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    /// Result of the most recent attempt (including failed ones, so
    /// the diagnostic in `stderr` is visible while a retry is queued).
    pub result: Option<JobResult>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Job {
    /// Create a fresh `Queued` job from a submission.
    pub fn new(spec: JobSpec, default_max_retries: u32) -> Self {
        Self {
            id: generate_job_id(&spec.name, &spec.command),
            name: spec.name,
            command: spec.command,
            resources: spec.resources,
            priority: spec.priority,
            dependencies: spec.dependencies,
            status: JobStatus::Queued,
            assigned_node: None,
            submitted_at: epoch_ms(),
            started_at: None,
            completed_at: None,
            result: None,
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
        }
    }
}

// ── Nodes ─────────────────────────────────────────────────────────

/// Lifecycle state of a worker node.
///
/// Only `Active` nodes are eligible for placement. `Offline` is set
/// exclusively by the liveness sweep; `heartbeat`/`register_node` are
/// the only paths back to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Active,
    Busy,
    Offline,
    Error,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Busy => "busy",
            Self::Offline => "offline",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// A node's resource snapshot, as reported by its agent and amended by
/// the registry's reservation accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResources {
    pub cpu_total: u32,
    pub cpu_available: u32,
    pub memory_total_mb: u64,
    pub memory_available_mb: u64,
    pub disk_total_gb: f64,
    pub disk_free_gb: f64,
    #[serde(default)]
    pub gpu_available: bool,
    /// Container images already present on the node (locality bonus).
    #[serde(default)]
    pub cached_images: HashSet<String>,
}

/// How to reach a node. Opaque to the core; consumed by the Executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConnection {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    /// Reference to a credential (key path, secret name); never the
    /// credential itself.
    #[serde(default)]
    pub credential_ref: Option<String>,
}

fn default_port() -> u16 {
    22
}

/// A worker node record, owned exclusively by the cluster registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub connection: NodeConnection,
    pub status: NodeStatus,
    pub resources: Option<NodeResources>,
    /// Unix milliseconds of the last heartbeat or registration.
    pub last_heartbeat: Option<u64>,
    /// Jobs currently reserved onto this node.
    pub jobs_running: HashSet<JobId>,
    /// Successful runs completed on this node.
    pub jobs_completed: u64,
}

impl Node {
    /// Stamp the node as heard-from right now.
    pub fn touch_heartbeat(&mut self) {
        self.last_heartbeat = Some(epoch_ms());
    }
}

/// Aggregated view across the registry's active nodes, consumed by the
/// external dashboard/metrics collaborators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStats {
    pub nodes_active: usize,
    pub total_cpu_cores: u64,
    pub available_cpu_cores: u64,
    pub total_memory_mb: u64,
    pub available_memory_mb: u64,
    pub gpu_nodes: usize,
}

// ── Helpers ───────────────────────────────────────────────────────

/// Current Unix epoch in milliseconds.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Generate a job id from the submission and a process-wide sequence.
///
/// The sequence keeps ids unique even for identical submissions landing
/// in the same millisecond.
fn generate_job_id(name: &str, command: &str) -> JobId {
    use std::hash::{Hash, Hasher};
    static SEQ: AtomicU64 = AtomicU64::new(0);

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    name.hash(&mut hasher);
    command.hash(&mut hasher);
    epoch_ms().hash(&mut hasher);
    SEQ.fetch_add(1, Ordering::Relaxed).hash(&mut hasher);
    format!("job-{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(command: &str) -> JobSpec {
        JobSpec {
            name: "test".to_string(),
            command: command.to_string(),
            resources: ResourceRequirements {
                cpu_cores: 1,
                memory_mb: 128,
                gpu: false,
                image: "alpine:3".to_string(),
                timeout_secs: 60,
            },
            priority: 0,
            dependencies: Vec::new(),
            max_retries: None,
        }
    }

    #[test]
    fn new_job_is_queued_with_defaults() {
        let job = Job::new(spec("echo hi"), 3);

        assert!(job.id.starts_with("job-"));
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, 3);
        assert!(job.assigned_node.is_none());
        assert!(job.result.is_none());
        assert!(job.submitted_at > 1_704_067_200_000); // after 2024-01-01
    }

    #[test]
    fn spec_max_retries_overrides_default() {
        let mut s = spec("echo hi");
        s.max_retries = Some(7);
        let job = Job::new(s, 3);
        assert_eq!(job.max_retries, 7);
    }

    #[test]
    fn identical_submissions_get_distinct_ids() {
        let a = Job::new(spec("echo hi"), 3);
        let b = Job::new(spec("echo hi"), 3);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn status_enums_serialize_snake_case() {
        // Wire compatibility with the worker agents' JSON.
        assert_eq!(serde_json::to_string(&JobStatus::Queued).unwrap(), "\"queued\"");
        assert_eq!(serde_json::to_string(&NodeStatus::Offline).unwrap(), "\"offline\"");
        let s: NodeStatus = serde_json::from_str("\"active\"").unwrap();
        assert_eq!(s, NodeStatus::Active);
    }

    #[test]
    fn job_spec_defaults_from_json() {
        let s: JobSpec = serde_json::from_str(
            r#"{
                "command": "echo hi",
                "resources": {"cpu_cores": 1, "memory_mb": 256, "image": "alpine:3"}
            }"#,
        )
        .unwrap();

        assert_eq!(s.name, "job");
        assert_eq!(s.priority, 0);
        assert!(s.dependencies.is_empty());
        assert_eq!(s.resources.timeout_secs, 3600);
        assert!(!s.resources.gpu);
    }

    #[test]
    fn epoch_ms_is_monotonic_enough() {
        let a = epoch_ms();
        let b = epoch_ms();
        assert!(b >= a);
    }
}
