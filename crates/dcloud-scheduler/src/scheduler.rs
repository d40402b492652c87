//! Job scheduler — queue, dependency gate, retry policy, placement loop.
//!
//! The scheduler is the sole owner and mutator of [`Job`] records. Its
//! driver performs one full placement pass at a time: eligible jobs are
//! sorted by `(priority desc, submitted_at asc)` and placed one by one,
//! each against a freshly derived registry snapshot so capacity taken
//! by an earlier placement in the pass is visible to later ones.
//!
//! Lock order is jobs table → registry, everywhere, so the placement
//! pass, cancellation and completion re-entry can all nest the two
//! without deadlocking.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock, watch};
use tracing::{debug, error, info, warn};

use dcloud_cluster::{ClusterRegistry, NodeLoss};
use dcloud_core::{
    Job, JobId, JobResult, JobSpec, JobStatus, Node, OrchestratorConfig, epoch_ms,
};
use dcloud_placement::{ScoringWeights, select_node};

use crate::error::{SchedulerError, SchedulerResult};
use crate::executor::{ExecutionError, Executor};

/// Dependency-gate verdict for one queued job.
enum Gate {
    /// Every dependency is `Completed`.
    Ready,
    /// Some dependency is still pending (or not yet submitted).
    Waiting { unknown_dep: Option<JobId> },
    /// A dependency reached `Failed`/`Cancelled`: this job can never
    /// become eligible. It stays queued — failure is not propagated
    /// through dependency edges.
    Unsatisfiable { dep: JobId },
}

struct JobTable {
    jobs: HashMap<JobId, Job>,
    /// Submission order, for deterministic listing and tie-breaks.
    order: Vec<JobId>,
    /// Jobs whose gate anomaly (cycle, dead or unknown dependency) has
    /// already been logged, so each is diagnosed once, not every pass.
    diagnosed: HashSet<JobId>,
}

/// The master-side placement and lifecycle engine.
pub struct JobScheduler {
    registry: Arc<ClusterRegistry>,
    executor: Arc<dyn Executor>,
    config: OrchestratorConfig,
    weights: ScoringWeights,
    jobs: RwLock<JobTable>,
    /// Woken on submit and on attempt completion, so the driver does
    /// not have to wait out its tick to react.
    wake: Notify,
}

impl JobScheduler {
    pub fn new(
        registry: Arc<ClusterRegistry>,
        executor: Arc<dyn Executor>,
        config: OrchestratorConfig,
    ) -> Self {
        let weights = ScoringWeights::from_config(&config);
        Self {
            registry,
            executor,
            config,
            weights,
            jobs: RwLock::new(JobTable {
                jobs: HashMap::new(),
                order: Vec::new(),
                diagnosed: HashSet::new(),
            }),
            wake: Notify::new(),
        }
    }

    // ── Submission and query ────────────────────────────────────────

    /// Validate and enqueue a job. Wakes the driver.
    pub async fn submit_job(&self, spec: JobSpec) -> SchedulerResult<Job> {
        validate_spec(&spec)?;
        let job = Job::new(spec, self.config.default_max_retries);

        let mut table = self.jobs.write().await;
        table.order.push(job.id.clone());
        table.jobs.insert(job.id.clone(), job.clone());
        drop(table);

        info!(
            job_id = %job.id,
            name = %job.name,
            priority = job.priority,
            deps = job.dependencies.len(),
            "job submitted"
        );
        self.wake.notify_one();
        Ok(job)
    }

    /// Point-in-time copy of a job record.
    pub async fn get_job(&self, job_id: &str) -> SchedulerResult<Job> {
        let table = self.jobs.read().await;
        table
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))
    }

    /// Point-in-time copy of every job, in submission order.
    pub async fn list_jobs(&self) -> Vec<Job> {
        let table = self.jobs.read().await;
        table
            .order
            .iter()
            .filter_map(|id| table.jobs.get(id).cloned())
            .collect()
    }

    /// Cancel a queued or running job.
    ///
    /// Releases any reserved capacity immediately and fires a
    /// best-effort remote kill; the core does not wait for the remote
    /// side to confirm.
    pub async fn cancel_job(&self, job_id: &str) -> SchedulerResult<Job> {
        let mut table = self.jobs.write().await;
        let job = table
            .jobs
            .get(job_id)
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;

        if job.status.is_terminal() {
            return Err(SchedulerError::InvalidTransition {
                id: job_id.to_string(),
                status: job.status.to_string(),
                action: "cancelled",
            });
        }

        let was_running = job.status == JobStatus::Running;
        let assigned = job.assigned_node.clone();
        let requirements = job.resources.clone();

        // Release before marking the record terminal: if the accounting
        // surfaces an invariant violation the job must stay as-is, not
        // read as cancelled with an error in hand.
        if was_running {
            if let Some(node_id) = &assigned {
                self.registry
                    .release(node_id, job_id, &requirements, false)
                    .await?;
            }
        }

        let Some(job) = table.jobs.get_mut(job_id) else {
            return Err(SchedulerError::JobNotFound(job_id.to_string()));
        };
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(epoch_ms());
        let cancelled = job.clone();

        if was_running {
            let executor = Arc::clone(&self.executor);
            let job_for_kill = cancelled.clone();
            tokio::spawn(async move {
                executor.cancel(job_for_kill).await;
            });
        }

        info!(%job_id, was_running, "job cancelled");
        Ok(cancelled)
    }

    // ── Placement pass ──────────────────────────────────────────────

    /// Run one full placement pass. Returns the number of jobs placed.
    ///
    /// An empty candidate set for a job is not an error — the job just
    /// stays queued for a later pass.
    pub async fn run_scheduling_pass(self: &Arc<Self>) -> SchedulerResult<usize> {
        let mut eligible = self.collect_eligible().await;

        // Higher priority first; ties go to the older submission. The
        // sort is stable and `eligible` is in submission order, so
        // exact ties keep submission order.
        eligible.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.submitted_at.cmp(&b.submitted_at))
        });

        let mut placed = 0;
        for candidate in eligible {
            if self.try_place(&candidate.id).await? {
                placed += 1;
            }
        }
        Ok(placed)
    }

    /// Gather dependency-satisfied queued jobs, diagnosing blocked ones.
    async fn collect_eligible(&self) -> Vec<Job> {
        let mut table = self.jobs.write().await;
        let mut eligible = Vec::new();

        let ids: Vec<JobId> = table.order.clone();
        for id in ids {
            let Some(job) = table.jobs.get(&id) else { continue };
            if job.status != JobStatus::Queued {
                continue;
            }

            match dependency_gate(&table, job) {
                Gate::Ready => eligible.push(job.clone()),
                Gate::Waiting { unknown_dep } => {
                    if graph_has_cycle(&table, &id) {
                        if table.diagnosed.insert(id.clone()) {
                            warn!(
                                job_id = %id,
                                "dependency graph contains a cycle; job will never become eligible"
                            );
                        }
                    } else if let Some(dep) = unknown_dep {
                        if table.diagnosed.insert(id.clone()) {
                            warn!(
                                job_id = %id,
                                dependency = %dep,
                                "waiting on a dependency that has not been submitted"
                            );
                        }
                    }
                }
                Gate::Unsatisfiable { dep } => {
                    if table.diagnosed.insert(id.clone()) {
                        warn!(
                            job_id = %id,
                            dependency = %dep,
                            "permanently blocked: dependency reached a terminal failure state"
                        );
                    }
                }
            }
        }
        eligible
    }

    /// Attempt to place one job against a fresh registry snapshot.
    ///
    /// Snapshot, scoring and reservation happen in a single registry
    /// critical section; the jobs table is held across it (lock order
    /// jobs → registry) so a concurrent cancel cannot slip between the
    /// reservation and the `Running` transition.
    async fn try_place(self: &Arc<Self>, job_id: &str) -> SchedulerResult<bool> {
        let mut table = self.jobs.write().await;
        let Some(job) = table.jobs.get(job_id) else {
            return Ok(false);
        };
        // Re-check: the job may have been cancelled since collection.
        if job.status != JobStatus::Queued {
            return Ok(false);
        }
        let job_snapshot = job.clone();

        let weights = self.weights.clone();
        let reserved = self
            .registry
            .select_and_reserve(&job_snapshot, |snapshot| {
                select_node(snapshot, &job_snapshot, &weights).map(|n| n.id.clone())
            })
            .await?;

        let Some(node) = reserved else {
            debug!(%job_id, "no eligible node this pass, placement deferred");
            return Ok(false);
        };

        let Some(job) = table.jobs.get_mut(job_id) else {
            return Ok(false);
        };
        job.status = JobStatus::Running;
        job.assigned_node = Some(node.id.clone());
        job.started_at = Some(epoch_ms());
        let running = job.clone();
        drop(table);

        info!(
            %job_id,
            node_id = %node.id,
            attempt = running.retry_count,
            "job placed"
        );
        self.dispatch(running, node);
        Ok(true)
    }

    /// Run the attempt on its own task, off the driver's critical path.
    fn dispatch(self: &Arc<Self>, job: Job, node: Node) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let attempt = job.retry_count;
            let budget = Duration::from_secs(job.resources.timeout_secs);

            let fut = this.executor.execute(job.clone(), node.connection.clone());
            let outcome = match tokio::time::timeout(budget, fut).await {
                Ok(result) => result,
                Err(_) => Err(ExecutionError::Timeout(job.resources.timeout_secs)),
            };

            if let Err(e) = this
                .complete_attempt(&job.id, &node.id, attempt, outcome)
                .await
            {
                error!(job_id = %job.id, error = %e, "failed to record attempt outcome");
            }
            this.wake.notify_one();
        });
    }

    // ── Completion re-entry ─────────────────────────────────────────

    /// Record the outcome of one execution attempt.
    ///
    /// The `(node, attempt)` pair is a stale guard: if the job was
    /// already re-queued by the node-loss path (or cancelled), a late
    /// executor callback for the old attempt is dropped here instead of
    /// double-releasing capacity.
    async fn complete_attempt(
        &self,
        job_id: &str,
        node_id: &str,
        attempt: u32,
        outcome: Result<JobResult, ExecutionError>,
    ) -> SchedulerResult<()> {
        let mut table = self.jobs.write().await;
        let job = table
            .jobs
            .get(job_id)
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;

        let current = job.status == JobStatus::Running
            && job.assigned_node.as_deref() == Some(node_id)
            && job.retry_count == attempt;
        if !current {
            debug!(%job_id, %node_id, attempt, "stale attempt outcome, ignoring");
            return Ok(());
        }

        let requirements = job.resources.clone();
        let success = matches!(&outcome, Ok(r) if r.exit_code == 0);

        // Release before touching job state: if the accounting is
        // broken this aborts loudly with the job still visible as
        // running on its node.
        self.registry
            .release(node_id, job_id, &requirements, success)
            .await?;

        let Some(job) = table.jobs.get_mut(job_id) else {
            return Ok(());
        };

        if let Ok(result) = &outcome {
            if result.exit_code == 0 {
                job.status = JobStatus::Completed;
                job.completed_at = Some(epoch_ms());
                info!(
                    %job_id,
                    %node_id,
                    execution_time_ms = result.execution_time_ms,
                    "job completed"
                );
                job.result = Some(result.clone());
                return Ok(());
            }
        }

        let result = match outcome {
            Ok(r) => r,
            Err(e) => JobResult {
                exit_code: 1,
                stdout: String::new(),
                stderr: e.to_string(),
                execution_time_ms: 0,
            },
        };

        if job.retry_count < job.max_retries {
            job.retry_count += 1;
            job.status = JobStatus::Queued;
            job.assigned_node = None;
            job.started_at = None;
            warn!(
                %job_id,
                %node_id,
                retry = job.retry_count,
                max_retries = job.max_retries,
                stderr = %result.stderr,
                "attempt failed, job re-queued"
            );
        } else {
            job.status = JobStatus::Failed;
            job.completed_at = Some(epoch_ms());
            error!(
                %job_id,
                %node_id,
                retries = job.retry_count,
                stderr = %result.stderr,
                "job failed, retries exhausted"
            );
        }
        job.result = Some(result);
        Ok(())
    }

    /// Apply the node-loss policy to jobs stranded on swept nodes.
    ///
    /// Each running job assigned to a newly-offline node is treated as
    /// an execution failure: capacity released, retry policy applied.
    pub async fn handle_node_loss(&self, losses: &[NodeLoss]) {
        for loss in losses {
            for job_id in &loss.jobs_running {
                let attempt = {
                    let table = self.jobs.read().await;
                    match table.jobs.get(job_id) {
                        Some(j)
                            if j.status == JobStatus::Running
                                && j.assigned_node.as_deref() == Some(loss.node_id.as_str()) =>
                        {
                            j.retry_count
                        }
                        _ => continue,
                    }
                };
                let outcome = Err(ExecutionError::NodeLost(loss.node_id.clone()));
                if let Err(e) = self
                    .complete_attempt(job_id, &loss.node_id, attempt, outcome)
                    .await
                {
                    error!(%job_id, node_id = %loss.node_id, error = %e, "node-loss recovery failed");
                }
            }
        }
    }

    // ── Background drivers ──────────────────────────────────────────

    /// The scheduling driver: one placement pass per tick or wake-up.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick =
            tokio::time::interval(Duration::from_secs(self.config.tick_interval_secs));
        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = self.wake.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler driver stopping");
                        return;
                    }
                }
            }
            if let Err(e) = self.run_scheduling_pass().await {
                error!(error = %e, "scheduling pass failed");
            }
        }
    }

    /// The liveness sweeper: flags silent nodes and recovers their
    /// in-flight jobs.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let timeout = Duration::from_secs(self.config.heartbeat_timeout_secs);
        let mut tick =
            tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs));
        loop {
            tokio::select! {
                _ = tick.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("liveness sweeper stopping");
                        return;
                    }
                }
            }
            let losses = self.registry.sweep_expired(timeout).await;
            if !losses.is_empty() {
                self.handle_node_loss(&losses).await;
                self.wake.notify_one();
            }
        }
    }
}

// ── Gate helpers ────────────────────────────────────────────────────

fn validate_spec(spec: &JobSpec) -> SchedulerResult<()> {
    if spec.command.trim().is_empty() {
        return Err(SchedulerError::InvalidJob("command is empty".to_string()));
    }
    if spec.resources.cpu_cores < 1 {
        return Err(SchedulerError::InvalidJob(
            "cpu_cores must be at least 1".to_string(),
        ));
    }
    if spec.resources.memory_mb < 128 {
        return Err(SchedulerError::InvalidJob(
            "memory_mb must be at least 128".to_string(),
        ));
    }
    if spec.resources.image.trim().is_empty() {
        return Err(SchedulerError::InvalidJob("image is empty".to_string()));
    }
    if spec.resources.timeout_secs == 0 {
        return Err(SchedulerError::InvalidJob(
            "timeout_secs must be nonzero".to_string(),
        ));
    }
    Ok(())
}

fn dependency_gate(table: &JobTable, job: &Job) -> Gate {
    let mut unknown_dep = None;
    let mut waiting = false;

    for dep in &job.dependencies {
        match table.jobs.get(dep) {
            Some(d) => match d.status {
                JobStatus::Completed => {}
                JobStatus::Failed | JobStatus::Cancelled => {
                    return Gate::Unsatisfiable { dep: dep.clone() };
                }
                JobStatus::Queued | JobStatus::Running => waiting = true,
            },
            // Not submitted yet: keep waiting, it may still arrive.
            None => {
                waiting = true;
                unknown_dep.get_or_insert_with(|| dep.clone());
            }
        }
    }

    if waiting {
        Gate::Waiting { unknown_dep }
    } else {
        Gate::Ready
    }
}

/// True if the dependency graph reachable from `start` contains a
/// cycle. Unsubmitted dependency ids are leaves.
fn graph_has_cycle(table: &JobTable, start: &JobId) -> bool {
    const IN_STACK: u8 = 1;
    const DONE: u8 = 2;

    fn visit(table: &JobTable, id: &JobId, state: &mut HashMap<JobId, u8>) -> bool {
        match state.get(id) {
            Some(&IN_STACK) => return true,
            Some(&DONE) => return false,
            _ => {}
        }
        state.insert(id.clone(), IN_STACK);
        if let Some(job) = table.jobs.get(id) {
            for dep in &job.dependencies {
                if visit(table, dep, state) {
                    return true;
                }
            }
        }
        state.insert(id.clone(), DONE);
        false
    }

    let mut state = HashMap::new();
    visit(table, start, &mut state)
}
