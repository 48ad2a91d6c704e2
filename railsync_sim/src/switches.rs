// Track switch table with a session-wide positional encoding.
//
// Every node builds its `SwitchTable` from the same track database, so the
// `BTreeMap` order over `SwitchKey` (tile X, tile Z, world ID) is identical
// everywhere. That shared order is what gives the digit string in a
// `SwitchSnapshot` its meaning: position i is the i-th switch in key order.
//
// Invariant: a snapshot produced here always has exactly `len()` digits, and
// a snapshot of any other length is refused rather than partially applied.

use std::collections::BTreeMap;

use railsync_protocol::{SwitchKey, SwitchSnapshot};

use crate::error::SwitchError;

/// Selected route index of every switch on the route.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SwitchTable {
    routes: BTreeMap<SwitchKey, u8>,
}

impl SwitchTable {
    /// All switches set to their main route (index 0).
    pub fn new(keys: impl IntoIterator<Item = SwitchKey>) -> Self {
        Self {
            routes: keys.into_iter().map(|key| (key, 0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn route(&self, key: &SwitchKey) -> Option<u8> {
        self.routes.get(key).copied()
    }

    /// Switch keys in session order.
    pub fn keys(&self) -> impl Iterator<Item = &SwitchKey> {
        self.routes.keys()
    }

    /// Throw one switch. Returns whether the route actually changed.
    pub fn set_route(&mut self, key: SwitchKey, route: u8) -> Result<bool, SwitchError> {
        if route > SwitchSnapshot::MAX_ROUTE {
            return Err(SwitchError::RouteOutOfRange { key, route });
        }
        let slot = self
            .routes
            .get_mut(&key)
            .ok_or(SwitchError::UnknownSwitch(key))?;
        let changed = *slot != route;
        *slot = route;
        Ok(changed)
    }

    /// Encode the full table.
    pub fn snapshot(&self) -> Result<SwitchSnapshot, SwitchError> {
        SwitchSnapshot::from_routes(self.routes.values().copied()).map_err(|i| {
            match self.routes.iter().nth(i) {
                Some((key, route)) => SwitchError::RouteOutOfRange {
                    key: *key,
                    route: *route,
                },
                None => SwitchError::LengthMismatch {
                    expected: self.routes.len(),
                    got: i,
                },
            }
        })
    }

    /// Overwrite every switch from a snapshot. Returns the keys whose route
    /// changed.
    pub fn apply_snapshot(&mut self, snapshot: &SwitchSnapshot) -> Result<Vec<SwitchKey>, SwitchError> {
        if snapshot.len() != self.routes.len() {
            return Err(SwitchError::LengthMismatch {
                expected: self.routes.len(),
                got: snapshot.len(),
            });
        }
        let mut changed = Vec::new();
        for ((key, slot), route) in self.routes.iter_mut().zip(snapshot.routes()) {
            if *slot != route {
                *slot = route;
                changed.push(*key);
            }
        }
        Ok(changed)
    }
}
