//! System-wide resource ceilings

use serde::{Deserialize, Serialize};

/// Largest integer representable without loss in a double
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// Ceilings applied to the sum of step resources across a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Aggregate CPU share in percent
    #[serde(default = "default_max_cpu")]
    pub max_cpu: f64,

    /// Aggregate memory in megabytes
    #[serde(default = "default_max_memory")]
    pub max_memory: i64,

    /// Aggregate agent count
    #[serde(default = "default_max_agents")]
    pub max_agents: i64,
}

fn default_max_cpu() -> f64 {
    100.0
}

fn default_max_memory() -> i64 {
    MAX_SAFE_INTEGER
}

fn default_max_agents() -> i64 {
    100
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_cpu: default_max_cpu(),
            max_memory: default_max_memory(),
            max_agents: default_max_agents(),
        }
    }
}
