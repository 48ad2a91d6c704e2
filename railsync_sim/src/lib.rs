// railsync_sim: the world model the sync layer mediates.
//
// This crate holds the pieces of simulation state that multiplayer sync
// reads and writes: trains (locally owned or replicas), the ordered switch
// and signal tables, the shared clock/season/weather, and dead-reckoning for replicas.
// Physics, rendering and file-format parsing stay with the host application;
// they reach this crate through `Train::set_kinematics` (local physics
// results), `World` reads (what to draw), and the `CarLoader` trait.
//
// Module overview:
// - `world.rs`:     `World`: train list, number allocation, uncoupling and
//                   coupling.
// - `train.rs`:     `Train`, `Ownership`, `ControlState`, move-report state.
// - `switches.rs`:  `SwitchTable`: ordered switch routes and snapshots.
// - `signals.rs`:   `SignalTable`: ordered signal aspects and snapshots.
// - `reconcile.rs`: `ReplicaMotion`: prediction and sample blending.
// - `loader.rs`:    `CarLoader` seam and `load_consist`.
// - `config.rs`:    `ReconcileConfig` thresholds.
// - `error.rs`:     `WorldError`, `SwitchError`, `SignalError`,
//                   `CarLoadError`.
//
// No networking and no threads: every method runs on the host's tick thread.
// `BTreeMap` everywhere so iteration order (and therefore broadcast order) is
// the same on every node.

pub mod config;
pub mod error;
pub mod loader;
pub mod reconcile;
pub mod signals;
pub mod switches;
pub mod train;
pub mod world;

pub use config::ReconcileConfig;
pub use error::{CarLoadError, SignalError, SwitchError, WorldError};
pub use loader::{AcceptAllCars, CarLoader, TrainsetDirLoader, load_consist};
pub use reconcile::{Correction, ReplicaMotion};
pub use signals::SignalTable;
pub use switches::SwitchTable;
pub use train::{ControlState, Ownership, Train};
pub use world::{Environment, World};
