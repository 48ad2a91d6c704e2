// Signal aspect table, ordered like the switch table.
//
// Signals are keyed by the track node they sit on and their item index
// within it. Every node derives the same key set from the same track
// database, so a `SignalSnapshot` is positional: entry i belongs to the i-th
// key in `SignalKey` order. The server is the only node that computes
// aspects; clients just display what the last snapshot said.

use std::collections::BTreeMap;

use railsync_protocol::{SignalKey, SignalSnapshot, SignalState};

use crate::error::SignalError;

/// Displayed state of every signal on the route.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignalTable {
    states: BTreeMap<SignalKey, SignalState>,
}

impl SignalTable {
    /// All signals at stop.
    pub fn new(keys: impl IntoIterator<Item = SignalKey>) -> Self {
        Self {
            states: keys
                .into_iter()
                .map(|key| (key, SignalState::default()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state(&self, key: &SignalKey) -> Option<SignalState> {
        self.states.get(key).copied()
    }

    /// Signal keys in session order.
    pub fn keys(&self) -> impl Iterator<Item = &SignalKey> {
        self.states.keys()
    }

    /// The key at a snapshot position.
    pub fn key_at(&self, index: usize) -> Option<SignalKey> {
        self.states.keys().nth(index).copied()
    }

    /// Position of `key` in snapshots and change requests.
    pub fn index_of(&self, key: &SignalKey) -> Option<usize> {
        self.states.keys().position(|k| k == key)
    }

    /// Set one signal. Returns whether its state actually changed.
    pub fn set_state(&mut self, key: SignalKey, state: SignalState) -> Result<bool, SignalError> {
        let slot = self
            .states
            .get_mut(&key)
            .ok_or(SignalError::UnknownSignal(key))?;
        let changed = *slot != state;
        *slot = state;
        Ok(changed)
    }

    pub fn snapshot(&self) -> SignalSnapshot {
        SignalSnapshot::new(self.states.values().copied().collect())
    }

    /// Overwrite every signal from a snapshot. Returns the keys whose state
    /// changed; a snapshot of the wrong length changes nothing.
    pub fn apply_snapshot(&mut self, snapshot: &SignalSnapshot) -> Result<Vec<SignalKey>, SignalError> {
        if snapshot.len() != self.states.len() {
            return Err(SignalError::LengthMismatch {
                expected: self.states.len(),
                got: snapshot.len(),
            });
        }
        let mut changed = Vec::new();
        for ((key, slot), state) in self.states.iter_mut().zip(snapshot.states()) {
            if slot != state {
                *slot = *state;
                changed.push(*key);
            }
        }
        Ok(changed)
    }
}
