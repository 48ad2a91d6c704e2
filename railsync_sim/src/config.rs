// Tuning parameters for replica reconciliation.
//
// Loaded from JSON alongside the rest of a node's configuration (see
// `railsync_net::config::NodeConfig`). Every threshold the reconciler uses
// lives here; none are hard-coded in `reconcile.rs`.
//
// The defaults were tuned by eye against 1 Hz move updates and carry no
// physical derivation: small enough that a stationary train doesn't creep,
// large enough that a late sample after a brake application doesn't cause a
// visible jump.

use serde::{Deserialize, Serialize};

/// Dead-reckoning thresholds for replica trains.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Discrepancies (metres) below this are accepted as-is.
    pub snap_tolerance: f32,
    /// Discrepancies (metres) above this are treated as desync and snapped.
    pub divergence_threshold: f32,
    /// Time (seconds) over which an in-between discrepancy is absorbed.
    pub blend_window_secs: f32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            snap_tolerance: 0.2,
            divergence_threshold: 5.0,
            blend_window_secs: 1.0,
        }
    }
}

impl ReconcileConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
