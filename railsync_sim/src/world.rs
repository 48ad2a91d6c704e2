// The node's live train list, switch and signal tables, and environment.
//
// `World` is what the session layer mutates in response to messages and what
// the host's physics/rendering side reads each tick. It enforces the
// train-number invariant (numbers unique within the session) and owns the
// numbering policy: permanent numbers count up from 1, provisional ones are
// drawn at random from the range reserved in `railsync_protocol::types`.

use std::collections::BTreeMap;

use railsync_protocol::types::{PROVISIONAL_BASE, PROVISIONAL_SPAN};
use railsync_protocol::{CarDescriptor, Kinematics, TrainNumber};
use serde::{Deserialize, Serialize};

use crate::error::WorldError;
use crate::signals::SignalTable;
use crate::switches::SwitchTable;
use crate::train::{Ownership, Train};

/// Simulated clock and conditions shared across the session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    /// Seconds since midnight.
    pub clock_seconds: f64,
    pub season: u8,
    pub weather: u8,
}

#[derive(Clone, Debug)]
pub struct World {
    trains: BTreeMap<TrainNumber, Train>,
    pub switches: SwitchTable,
    pub signals: SignalTable,
    pub environment: Environment,
    next_number: u32,
}

impl Default for World {
    fn default() -> Self {
        Self::new(SwitchTable::default(), Environment::default())
    }
}

impl World {
    pub fn new(switches: SwitchTable, environment: Environment) -> Self {
        Self {
            trains: BTreeMap::new(),
            switches,
            signals: SignalTable::default(),
            environment,
            next_number: 1,
        }
    }

    /// Route with signals. Worlds built with `new` have none.
    pub fn with_signals(mut self, signals: SignalTable) -> Self {
        self.signals = signals;
        self
    }

    pub fn train(&self, number: TrainNumber) -> Option<&Train> {
        self.trains.get(&number)
    }

    pub fn train_mut(&mut self, number: TrainNumber) -> Option<&mut Train> {
        self.trains.get_mut(&number)
    }

    pub fn trains(&self) -> impl Iterator<Item = &Train> {
        self.trains.values()
    }

    pub fn trains_mut(&mut self) -> impl Iterator<Item = &mut Train> {
        self.trains.values_mut()
    }

    pub fn train_count(&self) -> usize {
        self.trains.len()
    }

    pub fn contains_train(&self, number: TrainNumber) -> bool {
        self.trains.contains_key(&number)
    }

    pub fn add_train(&mut self, train: Train) -> Result<(), WorldError> {
        if self.trains.contains_key(&train.number) {
            return Err(WorldError::DuplicateTrain(train.number));
        }
        self.trains.insert(train.number, train);
        Ok(())
    }

    pub fn remove_train(&mut self, number: TrainNumber) -> Option<Train> {
        self.trains.remove(&number)
    }

    /// Move a train to a new number. Fails if the target is taken.
    pub fn renumber(&mut self, from: TrainNumber, to: TrainNumber) -> Result<(), WorldError> {
        if from == to {
            return Ok(());
        }
        if self.trains.contains_key(&to) {
            return Err(WorldError::DuplicateTrain(to));
        }
        let mut train = self
            .trains
            .remove(&from)
            .ok_or(WorldError::UnknownTrain(from))?;
        train.number = to;
        self.trains.insert(to, train);
        Ok(())
    }

    /// The train currently containing `car_id`.
    pub fn find_by_car(&self, car_id: &str) -> Option<TrainNumber> {
        self.trains
            .values()
            .find(|train| train.contains_car(car_id))
            .map(|train| train.number)
    }

    /// Next free permanent number. Only the server calls this.
    pub fn allocate_number(&mut self) -> TrainNumber {
        loop {
            let candidate = TrainNumber(self.next_number);
            self.next_number += 1;
            if self.next_number >= PROVISIONAL_BASE {
                self.next_number = 1;
            }
            if !candidate.is_provisional() && !self.trains.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Whether a number proposed by a peer can be kept as permanent.
    pub fn is_free_permanent(&self, number: TrainNumber) -> bool {
        number.0 != 0 && !number.is_provisional() && !self.trains.contains_key(&number)
    }

    /// Random unused placeholder for a train created before the server has
    /// numbered it.
    pub fn provisional_number(&self, rng: &mut fastrand::Rng) -> TrainNumber {
        loop {
            let candidate = TrainNumber(rng.u32(PROVISIONAL_BASE..PROVISIONAL_BASE + PROVISIONAL_SPAN));
            if !self.trains.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Split `number` behind `car_id`; the detached cars become train
    /// `rear_number` with the same ownership and owner as the original.
    pub fn uncouple(
        &mut self,
        number: TrainNumber,
        car_id: &str,
        rear_number: TrainNumber,
        front: Kinematics,
        rear: Kinematics,
    ) -> Result<(), WorldError> {
        if self.trains.contains_key(&rear_number) {
            return Err(WorldError::DuplicateTrain(rear_number));
        }
        let train = self
            .trains
            .get_mut(&number)
            .ok_or(WorldError::UnknownTrain(number))?;
        let rear_cars = train.split_behind(car_id)?;
        train.reset(front);
        let owner = train.owner.clone();
        let rear_train = if train.is_replica() {
            Train::replica(rear_number, rear_cars, rear, owner)
        } else {
            Train::local(rear_number, rear_cars, rear, owner)
        };
        self.trains.insert(rear_number, rear_train);
        Ok(())
    }

    /// Join `absorbed` onto `number`. `cars` is the combined consist in
    /// order and must hold exactly the cars of both trains. The surviving
    /// train keeps its cab controls and restarts from `kinematics`.
    pub fn couple(
        &mut self,
        number: TrainNumber,
        absorbed: TrainNumber,
        cars: Vec<CarDescriptor>,
        kinematics: Kinematics,
        owner: Option<String>,
        ownership: Ownership,
    ) -> Result<(), WorldError> {
        if number == absorbed {
            return Err(WorldError::SelfCouple(number));
        }
        let kept = self.trains.get(&number).ok_or(WorldError::UnknownTrain(number))?;
        let gone = self
            .trains
            .get(&absorbed)
            .ok_or(WorldError::UnknownTrain(absorbed))?;
        let mut expected: Vec<&str> = kept
            .cars
            .iter()
            .chain(&gone.cars)
            .map(|car| car.id.as_str())
            .collect();
        let mut given: Vec<&str> = cars.iter().map(|car| car.id.as_str()).collect();
        expected.sort_unstable();
        given.sort_unstable();
        if expected != given {
            return Err(WorldError::ConsistMismatch { train: number });
        }

        let controls = kept.controls;
        self.trains.remove(&absorbed);
        let mut coupled = match ownership {
            Ownership::Local => Train::local(number, cars, kinematics, owner),
            Ownership::Replica => Train::replica(number, cars, kinematics, owner),
        };
        coupled.controls = controls;
        self.trains.insert(number, coupled);
        Ok(())
    }

    /// Run one prediction step on every replica.
    pub fn advance_replicas(&mut self, dt: f32) {
        for train in self.trains.values_mut() {
            train.advance(dt);
        }
    }
}
