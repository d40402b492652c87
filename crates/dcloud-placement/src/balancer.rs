//! Candidate ranking and final node selection.

use tracing::debug;

use dcloud_core::{Job, Node, NodeId};

use crate::scorer::{ScoringWeights, score_candidate};

/// A scored placement candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeScore {
    pub node_id: NodeId,
    /// Final load score after the locality adjustment. Lower is better;
    /// negative is valid.
    pub score: f64,
}

/// Score every candidate in the snapshot, best first.
///
/// The input order is the registry's registration order; the sort is
/// stable, so equal scores keep that order. Exposed for diagnostics —
/// the scheduler uses [`select_node`].
pub fn rank_candidates(nodes: &[Node], job: &Job, weights: &ScoringWeights) -> Vec<NodeScore> {
    let mut scores: Vec<NodeScore> = nodes
        .iter()
        .filter_map(|node| {
            score_candidate(node, job, weights).map(|score| NodeScore {
                node_id: node.id.clone(),
                score,
            })
        })
        .collect();

    scores.sort_by(|a, b| a.score.total_cmp(&b.score));
    scores
}

/// Pick the best node for a job from a snapshot, or `None` when no
/// candidate survives the filters.
///
/// `None` is not an error: it signals "retry placement later" and the
/// job stays queued. Ties go to the node seen first in the snapshot.
pub fn select_node<'a>(nodes: &'a [Node], job: &Job, weights: &ScoringWeights) -> Option<&'a Node> {
    let mut best: Option<(&Node, f64)> = None;

    for node in nodes {
        let Some(score) = score_candidate(node, job, weights) else {
            continue;
        };
        debug!(job_id = %job.id, node_id = %node.id, score, "placement candidate");
        // Strict comparison keeps the first-seen node on ties.
        match best {
            Some((_, current)) if score >= current => {}
            _ => best = Some((node, score)),
        }
    }

    best.map(|(node, _)| node)
}
