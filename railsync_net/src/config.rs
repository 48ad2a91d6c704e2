// Node and session configuration.
//
// `NodeConfig` is everything a host needs to stand up a node in either role:
// where to listen, which wire format to speak, the session policy (route,
// player cap, manual-switch and signal-helper rules) and the two tuning
// blocks. `SyncConfig`
// holds the session cadence and timeouts; the dead-reckoning thresholds live
// in `railsync_sim::ReconcileConfig` because the sim crate applies them.
//
// All structs use `#[serde(default)]` so a JSON file only needs to name the
// fields it overrides.

use std::path::Path;

use railsync_protocol::WireFormat;
use railsync_sim::ReconcileConfig;
use serde::{Deserialize, Serialize};

use crate::error::NetError;

/// Session cadence and timeouts, in simulated seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How often move batches are sent.
    pub move_interval_secs: f64,
    /// How often the server considers resending the switch snapshot.
    pub switch_interval_secs: f64,
    /// How long a disconnected player's train is kept for a rejoin.
    pub lost_player_grace_secs: f64,
    /// Client silence after which an `ALIVE` is sent.
    pub keep_alive_secs: f64,
    /// Move samples for an unknown train before the client asks for it.
    pub missing_train_threshold: u32,
    /// Switch snapshots are resent unconditionally for this many intervals
    /// after a join.
    pub join_switch_resend_intervals: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            move_interval_secs: 1.0,
            switch_interval_secs: 10.0,
            lost_player_grace_secs: 60.0,
            keep_alive_secs: 30.0,
            missing_train_threshold: 10,
            join_switch_resend_intervals: 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub bind_address: String,
    /// Listen port for the server role. 0 lets the OS pick one.
    pub port: u16,
    pub wire_format: WireFormat,
    /// Route name every joiner must match.
    pub route: String,
    pub max_players: usize,
    /// Whether players may throw switches by hand.
    pub allow_manual_switch: bool,
    /// Players whose signal requests reach the server's signalling engine.
    pub signal_helpers: Vec<String>,
    pub sync: SyncConfig,
    pub reconcile: ReconcileConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".into(),
            port: 30000,
            wire_format: WireFormat::default(),
            route: String::new(),
            max_players: 16,
            allow_manual_switch: true,
            signal_helpers: Vec::new(),
            sync: SyncConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, NetError> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        assert_eq!(NodeConfig::from_json("{}").unwrap(), NodeConfig::default());
    }

    #[test]
    fn nested_overrides_keep_other_defaults() {
        let config = NodeConfig::from_json(
            r#"{
                "route": "USA2",
                "wire_format": "LengthHeader",
                "signal_helpers": ["Bob"],
                "sync": { "lost_player_grace_secs": 5.0 },
                "reconcile": { "divergence_threshold": 12.0 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.route, "USA2");
        assert_eq!(config.signal_helpers, vec!["Bob".to_owned()]);
        assert_eq!(config.wire_format, WireFormat::LengthHeader);
        assert_eq!(config.sync.lost_player_grace_secs, 5.0);
        assert_eq!(config.sync.move_interval_secs, 1.0);
        assert_eq!(config.reconcile.divergence_threshold, 12.0);
        assert_eq!(config.reconcile.snap_tolerance, 0.2);
        assert_eq!(config.port, 30000);
    }

    #[test]
    fn unknown_wire_format_is_an_error() {
        assert!(NodeConfig::from_json(r#"{ "wire_format": "Carrier pigeon" }"#).is_err());
    }

    #[test]
    fn load_reports_missing_file_as_io() {
        let err = NodeConfig::load("/nonexistent/railsync/node.json").unwrap_err();
        assert!(matches!(err, NetError::Io(_)));
    }
}
