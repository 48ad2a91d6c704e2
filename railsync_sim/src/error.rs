// Error types for world mutations, switch and signal updates, and car
// loading.

use std::path::PathBuf;

use railsync_protocol::{SignalKey, SwitchKey, TrainNumber};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    #[error("train {0} already exists")]
    DuplicateTrain(TrainNumber),
    #[error("train {0} does not exist")]
    UnknownTrain(TrainNumber),
    #[error("train {0} is locally owned and only accepts local updates")]
    NotReplica(TrainNumber),
    #[error("train {0} is a replica and cannot be driven locally")]
    NotLocal(TrainNumber),
    #[error("train {train} has no car {car_id:?}")]
    CarNotFound { train: TrainNumber, car_id: String },
    #[error("cannot uncouple train {train} behind its last car {car_id:?}")]
    NothingToUncouple { train: TrainNumber, car_id: String },
    #[error("train {0} cannot couple to itself")]
    SelfCouple(TrainNumber),
    #[error("coupled consist of train {train} does not match the cars of the trains it joins")]
    ConsistMismatch { train: TrainNumber },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SwitchError {
    #[error("no switch {0}")]
    UnknownSwitch(SwitchKey),
    #[error("route {route} for switch {key} does not fit in one digit")]
    RouteOutOfRange { key: SwitchKey, route: u8 },
    #[error("snapshot covers {got} switches, track database has {expected}")]
    LengthMismatch { expected: usize, got: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("no {0}")]
    UnknownSignal(SignalKey),
    #[error("no signal at position {0}")]
    NoSignalAt(u32),
    #[error("snapshot covers {got} signals, track database has {expected}")]
    LengthMismatch { expected: usize, got: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CarLoadError {
    #[error("rolling stock file {0} not found")]
    Missing(PathBuf),
    #[error("none of the train's cars could be loaded")]
    EmptyTrain,
}
