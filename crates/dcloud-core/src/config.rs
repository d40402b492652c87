//! Orchestrator configuration.
//!
//! All tunables the core depends on, with the fixed design values as
//! defaults. Loadable from a TOML file; every field is optional in the
//! file, so a partial config overrides only what it names.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Tunable constants for the master's scheduling core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// A node silent for longer than this is swept to `Offline`.
    pub heartbeat_timeout_secs: u64,
    /// Candidates whose final load score exceeds this are discarded.
    pub overload_cutoff: f64,
    /// CPU term weight in the load score.
    pub cpu_weight: f64,
    /// Memory term weight in the load score.
    pub memory_weight: f64,
    /// Score reduction for a node that already caches the job's image.
    pub locality_bonus: f64,
    /// Retries granted to a job that does not specify its own limit.
    pub default_max_retries: u32,
    /// Fixed interval between scheduling passes (the driver also wakes
    /// on submit and on completion).
    pub tick_interval_secs: u64,
    /// Fixed interval between liveness sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 90,
            overload_cutoff: 0.9,
            cpu_weight: 0.6,
            memory_weight: 0.4,
            locality_bonus: 0.15,
            default_max_retries: 3,
            tick_interval_secs: 2,
            sweep_interval_secs: 15,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: OrchestratorConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
