//! dcloud-placement — node selection for queued jobs.
//!
//! Pure, side-effect-free functions over a node snapshot and a job. The
//! scheduler feeds these a registry snapshot from inside the
//! reservation critical section; nothing here mutates anything.
//!
//! # Components
//!
//! - **`scorer`** — load score, hard-constraint filter, locality bonus
//! - **`balancer`** — candidate ranking and final selection

pub mod balancer;
pub mod scorer;

pub use balancer::{NodeScore, rank_candidates, select_node};
pub use scorer::{ScoringWeights, load_score, meets_requirements, score_candidate};
