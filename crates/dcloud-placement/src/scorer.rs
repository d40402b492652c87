//! Load scoring for placement candidates.
//!
//! A node's load score is a weighted blend of cpu and memory
//! utilization — lower is better. A locality bonus is subtracted when
//! the node already caches the job's container image, and candidates
//! past the overload cutoff are discarded entirely.

use serde::{Deserialize, Serialize};

use dcloud_core::{Job, Node, NodeResources, NodeStatus, OrchestratorConfig};

/// Weights and thresholds for candidate scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    /// CPU utilization term weight.
    pub cpu: f64,
    /// Memory utilization term weight.
    pub memory: f64,
    /// Subtracted when the job's image is already cached on the node.
    pub locality_bonus: f64,
    /// Candidates whose final score exceeds this are discarded.
    pub overload_cutoff: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            cpu: 0.6,
            memory: 0.4,
            locality_bonus: 0.15,
            overload_cutoff: 0.9,
        }
    }
}

impl ScoringWeights {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            cpu: config.cpu_weight,
            memory: config.memory_weight,
            locality_bonus: config.locality_bonus,
            overload_cutoff: config.overload_cutoff,
        }
    }
}

/// Weighted utilization of a node. 0.0 = idle, 1.0 = fully loaded.
///
/// A node reporting zero total capacity on either axis is treated as
/// fully loaded.
pub fn load_score(resources: &NodeResources, weights: &ScoringWeights) -> f64 {
    if resources.cpu_total == 0 || resources.memory_total_mb == 0 {
        return 1.0;
    }
    let cpu_used =
        1.0 - f64::from(resources.cpu_available) / f64::from(resources.cpu_total);
    let memory_used =
        1.0 - resources.memory_available_mb as f64 / resources.memory_total_mb as f64;
    weights.cpu * cpu_used + weights.memory * memory_used
}

/// Hard constraints: cpu, memory and gpu. A node without a resource
/// snapshot satisfies nothing.
pub fn meets_requirements(node: &Node, job: &Job) -> bool {
    let Some(res) = &node.resources else {
        return false;
    };
    res.cpu_available >= job.resources.cpu_cores
        && res.memory_available_mb >= job.resources.memory_mb
        && (!job.resources.gpu || res.gpu_available)
}

/// Score one node for one job, or `None` when the node is not a
/// candidate (not `Active`, fails hard constraints, or past the
/// overload cutoff after the locality adjustment).
///
/// The locality bonus can push a score below zero; a negative score is
/// valid and only affects relative ordering.
pub fn score_candidate(node: &Node, job: &Job, weights: &ScoringWeights) -> Option<f64> {
    if node.status != NodeStatus::Active {
        return None;
    }
    if !meets_requirements(node, job) {
        return None;
    }
    let res = node.resources.as_ref()?;

    let mut score = load_score(res, weights);
    if res.cached_images.contains(&job.resources.image) {
        score -= weights.locality_bonus;
    }

    if score > weights.overload_cutoff {
        return None;
    }
    Some(score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use dcloud_core::{JobSpec, NodeConnection, ResourceRequirements};

    fn node(id: &str, cpu_avail: u32, cpu_total: u32, mem_avail: u64, mem_total: u64) -> Node {
        Node {
            id: id.to_string(),
            connection: NodeConnection {
                host: format!("{id}.local"),
                port: 22,
                user: "dcloud".to_string(),
                credential_ref: None,
            },
            status: NodeStatus::Active,
            resources: Some(NodeResources {
                cpu_total,
                cpu_available: cpu_avail,
                memory_total_mb: mem_total,
                memory_available_mb: mem_avail,
                disk_total_gb: 100.0,
                disk_free_gb: 100.0,
                gpu_available: false,
                cached_images: HashSet::new(),
            }),
            last_heartbeat: None,
            jobs_running: HashSet::new(),
            jobs_completed: 0,
        }
    }

    fn job(cpu: u32, memory_mb: u64) -> Job {
        Job::new(
            JobSpec {
                name: "test".to_string(),
                command: "echo".to_string(),
                resources: ResourceRequirements {
                    cpu_cores: cpu,
                    memory_mb,
                    gpu: false,
                    image: "img:1".to_string(),
                    timeout_secs: 60,
                },
                priority: 0,
                dependencies: Vec::new(),
                max_retries: None,
            },
            3,
        )
    }

    fn approx(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "expected {b}, got {a}");
    }

    #[test]
    fn idle_node_scores_zero() {
        let n = node("n1", 4, 4, 8000, 8000);
        approx(load_score(n.resources.as_ref().unwrap(), &ScoringWeights::default()), 0.0);
    }

    #[test]
    fn three_quarters_loaded_node_scores_075() {
        // 1/4 cpu and 2000/8000 memory available: 0.6·0.75 + 0.4·0.75.
        let n = node("n2", 1, 4, 2000, 8000);
        approx(load_score(n.resources.as_ref().unwrap(), &ScoringWeights::default()), 0.75);
    }

    #[test]
    fn zero_total_capacity_is_fully_loaded() {
        let n = node("n1", 0, 0, 8000, 8000);
        approx(load_score(n.resources.as_ref().unwrap(), &ScoringWeights::default()), 1.0);
    }

    #[test]
    fn oversized_job_fails_hard_constraints() {
        let n = node("n1", 4, 4, 8000, 8000);
        assert!(!meets_requirements(&n, &job(5, 100)));
        assert!(!meets_requirements(&n, &job(1, 9000)));
        assert!(meets_requirements(&n, &job(4, 8000)));
    }

    #[test]
    fn gpu_requirement_filters_non_gpu_nodes() {
        let plain = node("n1", 4, 4, 8000, 8000);
        let mut gpu = node("n2", 4, 4, 8000, 8000);
        gpu.resources.as_mut().unwrap().gpu_available = true;

        let mut j = job(1, 100);
        j.resources.gpu = true;

        assert!(!meets_requirements(&plain, &j));
        assert!(meets_requirements(&gpu, &j));
    }

    #[test]
    fn missing_resource_snapshot_excludes_node() {
        let mut n = node("n1", 4, 4, 8000, 8000);
        n.resources = None;
        assert!(!meets_requirements(&n, &job(1, 100)));
        assert!(score_candidate(&n, &job(1, 100), &ScoringWeights::default()).is_none());
    }

    #[test]
    fn non_active_node_is_not_a_candidate() {
        let mut n = node("n1", 4, 4, 8000, 8000);
        let w = ScoringWeights::default();
        for status in [NodeStatus::Busy, NodeStatus::Offline, NodeStatus::Error] {
            n.status = status;
            assert!(score_candidate(&n, &job(1, 100), &w).is_none());
        }
    }

    #[test]
    fn overload_cutoff_discards_after_locality() {
        let w = ScoringWeights::default();

        // 95% loaded on both axes: score 0.95 > 0.9, discarded.
        let hot = node("n1", 1, 20, 400, 8000);
        assert!(score_candidate(&hot, &job(1, 100), &w).is_none());

        // Same load but the image is cached: 0.95 − 0.15 = 0.8 passes.
        let mut warm = node("n2", 1, 20, 400, 8000);
        warm.resources
            .as_mut()
            .unwrap()
            .cached_images
            .insert("img:1".to_string());
        let score = score_candidate(&warm, &job(1, 100), &w).unwrap();
        approx(score, 0.8);
    }

    #[test]
    fn locality_bonus_exact_arithmetic() {
        let w = ScoringWeights::default();

        // 40% loaded on both axes with the image cached:
        // 0.6·0.4 + 0.4·0.4 − 0.15 = 0.25.
        let mut n = node("n1", 6, 10, 4800, 8000);
        n.resources
            .as_mut()
            .unwrap()
            .cached_images
            .insert("img:1".to_string());
        approx(score_candidate(&n, &job(1, 100), &w).unwrap(), 0.25);
    }

    #[test]
    fn idle_node_with_cached_image_goes_negative() {
        let w = ScoringWeights::default();
        let mut n = node("n1", 4, 4, 8000, 8000);
        n.resources
            .as_mut()
            .unwrap()
            .cached_images
            .insert("img:1".to_string());
        approx(score_candidate(&n, &job(1, 100), &w).unwrap(), -0.15);
    }
}
