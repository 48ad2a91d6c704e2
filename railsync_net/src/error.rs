// Error types for the session layer and the transport.
//
// `SessionError` is what a message handler or host action returns when it
// refuses to act. The node logs it at `warn` and drops the message; none of
// these variants close a connection. Connection-fatal conditions (framing
// desync, unknown verb) are detected in the reader thread and surface as
// `CloseReason` instead (see `connection.rs`).
//
// `NetError` covers standing up a node: binding, connecting, loading config.

use std::io;

use railsync_protocol::PeerId;
use railsync_sim::{CarLoadError, SignalError, SwitchError, WorldError};
use thiserror::Error;

use crate::session::Role;

#[derive(Debug, Error)]
pub enum SessionError {
    /// A peer sent something other than a join before identifying itself.
    #[error("{peer} sent {verb} before joining")]
    Unbound { peer: PeerId, verb: &'static str },
    /// A peer tried to act for an identity or train it does not own.
    #[error("{sender} may not act for {claimed}")]
    OwnershipViolation { sender: String, claimed: String },
    #[error("{action} is not available in the {role:?} role")]
    WrongRole { action: &'static str, role: Role },
    #[error("the local player has no train")]
    NoLocalTrain,
    /// Two players' own trains ran into each other; neither can take over
    /// the other's.
    #[error("the trains of {first} and {second} cannot be coupled")]
    PlayerTrainsCoupled { first: String, second: String },
    #[error(transparent)]
    World(#[from] WorldError),
    #[error(transparent)]
    Switch(#[from] SwitchError),
    #[error(transparent)]
    Signal(#[from] SignalError),
    #[error(transparent)]
    CarLoad(#[from] CarLoadError),
}

impl SessionError {
    pub(crate) fn violation(sender: &str, claimed: impl ToString) -> Self {
        SessionError::OwnershipViolation {
            sender: sender.to_owned(),
            claimed: claimed.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NetError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("bad config: {0}")]
    Config(#[from] serde_json::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
}
