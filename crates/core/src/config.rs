use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Scheduler configuration, typically parsed from JSON or TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedConfig {
    /// Depth of each device worker's assignment channel.
    #[serde(default = "default_assign_depth")]
    pub assign_depth: usize,
    /// Timeout handed to the driver when powering on fan-out devices.
    #[serde(default = "default_power_on_timeout_ms")]
    pub power_on_timeout_ms: u64,
    /// Maximum done-list entries reconciled per scheduler pass. The
    /// pass re-wakes itself if entries remain.
    #[serde(default = "default_max_drain")]
    pub max_drain_per_pass: usize,
}

fn default_assign_depth() -> usize {
    1
}
fn default_power_on_timeout_ms() -> u64 {
    3000
}
fn default_max_drain() -> usize {
    32
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            assign_depth: default_assign_depth(),
            power_on_timeout_ms: default_power_on_timeout_ms(),
            max_drain_per_pass: default_max_drain(),
        }
    }
}

impl SchedConfig {
    pub fn power_on_timeout(&self) -> Duration {
        Duration::from_millis(self.power_on_timeout_ms)
    }
}
