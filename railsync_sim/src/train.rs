// Trains as the sync layer sees them.
//
// A `Train` is either locally owned (this node's physics drives it and its
// kinematics are written through `set_kinematics`) or a replica (its
// kinematics only ever come from `apply_sample` plus the `ReplicaMotion`
// prediction in between). The two paths are exclusive: each refuses calls
// meant for the other with `WorldError::NotLocal` / `NotReplica`, which is
// how the session layer enforces single ownership.
//
// Move reporting state also lives here:
// - local trains remember the last speed they reported so a train that
//   stops sends one final zero-speed sample and then goes quiet;
// - replicas on the server remember whether a sample arrived since it was
//   last forwarded to the other clients.

use railsync_protocol::{CarDescriptor, EventKind, Kinematics, TrainNumber, TrainRecord};

use crate::config::ReconcileConfig;
use crate::error::WorldError;
use crate::reconcile::{Correction, ReplicaMotion};

/// Speeds at or below this (m/s) count as stationary for move reporting.
const MOVING_EPSILON: f32 = 0.001;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    Local,
    Replica,
}

/// Cab controls mirrored from the owning node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControlState {
    pub horn: bool,
    pub bell: bool,
    pub wiper: bool,
    /// 0 off, 1 dim, 2 bright.
    pub headlight: u8,
    pub pantographs: [bool; 2],
}

impl ControlState {
    pub fn apply(&mut self, kind: EventKind, state: i32) {
        let on = state != 0;
        match kind {
            EventKind::Horn => self.horn = on,
            EventKind::Bell => self.bell = on,
            EventKind::Wiper => self.wiper = on,
            EventKind::Headlight => self.headlight = state.clamp(0, 2) as u8,
            EventKind::Pantograph1 => self.pantographs[0] = on,
            EventKind::Pantograph2 => self.pantographs[1] = on,
        }
    }

    pub fn state(&self, kind: EventKind) -> i32 {
        match kind {
            EventKind::Horn => i32::from(self.horn),
            EventKind::Bell => i32::from(self.bell),
            EventKind::Wiper => i32::from(self.wiper),
            EventKind::Headlight => i32::from(self.headlight),
            EventKind::Pantograph1 => i32::from(self.pantographs[0]),
            EventKind::Pantograph2 => i32::from(self.pantographs[1]),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Train {
    pub number: TrainNumber,
    pub cars: Vec<CarDescriptor>,
    /// Player that owns this train; `None` for background trains.
    pub owner: Option<String>,
    pub controls: ControlState,
    ownership: Ownership,
    kinematics: Kinematics,
    motion: Option<ReplicaMotion>,
    last_sample: Option<Kinematics>,
    fresh_sample: bool,
    unforwarded_sample: bool,
    last_reported_speed: Option<f32>,
}

impl Train {
    /// A train this node drives.
    pub fn local(
        number: TrainNumber,
        cars: Vec<CarDescriptor>,
        kinematics: Kinematics,
        owner: Option<String>,
    ) -> Self {
        Self {
            number,
            cars,
            owner,
            controls: ControlState::default(),
            ownership: Ownership::Local,
            kinematics,
            motion: None,
            last_sample: None,
            fresh_sample: false,
            unforwarded_sample: false,
            last_reported_speed: None,
        }
    }

    /// A train driven elsewhere, starting from its first known sample.
    pub fn replica(
        number: TrainNumber,
        cars: Vec<CarDescriptor>,
        kinematics: Kinematics,
        owner: Option<String>,
    ) -> Self {
        Self {
            motion: Some(ReplicaMotion::new(&kinematics)),
            last_sample: Some(kinematics),
            ownership: Ownership::Replica,
            ..Self::local(number, cars, kinematics, owner)
        }
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn is_replica(&self) -> bool {
        self.ownership == Ownership::Replica
    }

    /// Current kinematic state: the local physics state, or the replica's
    /// prediction.
    pub fn kinematics(&self) -> Kinematics {
        match &self.motion {
            Some(motion) => motion.kinematics(),
            None => self.kinematics,
        }
    }

    pub fn motion(&self) -> Option<&ReplicaMotion> {
        self.motion.as_ref()
    }

    /// Write the physics result for a locally-owned train.
    pub fn set_kinematics(&mut self, kinematics: Kinematics) -> Result<(), WorldError> {
        if self.is_replica() {
            return Err(WorldError::NotLocal(self.number));
        }
        self.kinematics = kinematics;
        Ok(())
    }

    /// Fold an authoritative sample into a replica.
    pub fn apply_sample(
        &mut self,
        sample: &Kinematics,
        config: &ReconcileConfig,
    ) -> Result<Correction, WorldError> {
        let motion = self
            .motion
            .as_mut()
            .ok_or(WorldError::NotReplica(self.number))?;
        let correction = motion.apply(sample, config);
        self.last_sample = Some(*sample);
        self.fresh_sample = true;
        self.unforwarded_sample = true;
        Ok(correction)
    }

    /// Restart from a known state without blending, e.g. after an uncouple.
    pub fn reset(&mut self, kinematics: Kinematics) {
        match &mut self.motion {
            Some(motion) => {
                *motion = ReplicaMotion::new(&kinematics);
                self.last_sample = Some(kinematics);
                self.unforwarded_sample = true;
            }
            None => self.kinematics = kinematics,
        }
    }

    /// Bring the train to rest where it currently is.
    pub fn stop(&mut self) {
        let stopped = Kinematics {
            speed: 0.0,
            ..self.kinematics()
        };
        self.reset(stopped);
    }

    /// Advance a replica's prediction. Local trains are moved by physics,
    /// never here.
    pub fn advance(&mut self, dt: f32) {
        if let Some(motion) = &mut self.motion {
            motion.advance(dt);
        }
    }

    /// Whether a sample was applied since the last `clear_fresh_sample`.
    pub fn has_fresh_sample(&self) -> bool {
        self.fresh_sample
    }

    pub fn clear_fresh_sample(&mut self) {
        self.fresh_sample = false;
    }

    /// Most recent authoritative sample of a replica.
    pub fn last_sample(&self) -> Option<&Kinematics> {
        self.last_sample.as_ref()
    }

    /// For a replica: the latest sample if it has not been forwarded yet.
    pub fn take_unforwarded_sample(&mut self) -> Option<Kinematics> {
        if !self.unforwarded_sample {
            return None;
        }
        self.unforwarded_sample = false;
        self.last_sample
    }

    /// For a local train: the state to report in the next move batch, if
    /// any. A stationary train is reported once after it stops and then not
    /// again until it moves.
    pub fn take_move_report(&mut self) -> Option<Kinematics> {
        if self.is_replica() {
            return None;
        }
        let speed = self.kinematics.speed;
        let moving = speed.abs() > MOVING_EPSILON;
        let due = moving
            || self
                .last_reported_speed
                .is_none_or(|last| last.abs() > MOVING_EPSILON);
        if !due {
            return None;
        }
        self.last_reported_speed = Some(speed);
        Some(self.kinematics)
    }

    /// Take over a replica after its owner vanished.
    pub fn make_local(&mut self) {
        if let Some(motion) = self.motion.take() {
            self.kinematics = motion.kinematics();
            self.ownership = Ownership::Local;
            self.last_reported_speed = None;
        }
    }

    pub fn first_car_id(&self) -> Option<&str> {
        self.cars.first().map(|car| car.id.as_str())
    }

    pub fn contains_car(&self, car_id: &str) -> bool {
        self.cars.iter().any(|car| car.id == car_id)
    }

    /// Detach every car behind `car_id` and return them.
    pub fn split_behind(&mut self, car_id: &str) -> Result<Vec<CarDescriptor>, WorldError> {
        let index = self
            .cars
            .iter()
            .position(|car| car.id == car_id)
            .ok_or_else(|| WorldError::CarNotFound {
                train: self.number,
                car_id: car_id.to_owned(),
            })?;
        if index + 1 >= self.cars.len() {
            return Err(WorldError::NothingToUncouple {
                train: self.number,
                car_id: car_id.to_owned(),
            });
        }
        Ok(self.cars.split_off(index + 1))
    }

    /// Wire record for a train-add.
    pub fn record(&self) -> TrainRecord {
        TrainRecord {
            number: self.number,
            kinematics: self.kinematics(),
            cars: self.cars.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cars(n: usize) -> Vec<CarDescriptor> {
        (0..n)
            .map(|i| CarDescriptor {
                file: format!("stock\\car{i}.wag"),
                id: format!("T - {i}"),
                flipped: false,
            })
            .collect()
    }

    fn moving(travelled: f32, speed: f32) -> Kinematics {
        Kinematics {
            travelled,
            speed,
            ..Kinematics::default()
        }
    }

    #[test]
    fn replica_refuses_local_writes() {
        let mut train = Train::replica(TrainNumber(3), cars(2), moving(0.0, 0.0), None);
        assert_eq!(
            train.set_kinematics(moving(5.0, 1.0)),
            Err(WorldError::NotLocal(TrainNumber(3)))
        );
    }

    #[test]
    fn local_refuses_samples() {
        let mut train = Train::local(TrainNumber(3), cars(2), moving(0.0, 0.0), None);
        assert_eq!(
            train.apply_sample(&moving(5.0, 1.0), &ReconcileConfig::default()),
            Err(WorldError::NotReplica(TrainNumber(3)))
        );
    }

    #[test]
    fn sample_marks_fresh_and_unforwarded() {
        let mut train = Train::replica(TrainNumber(3), cars(2), moving(0.0, 0.0), None);
        train.take_unforwarded_sample();
        train
            .apply_sample(&moving(1.0, 1.0), &ReconcileConfig::default())
            .unwrap();
        assert!(train.has_fresh_sample());
        train.clear_fresh_sample();
        assert!(!train.has_fresh_sample());
        assert_eq!(train.take_unforwarded_sample(), Some(moving(1.0, 1.0)));
        assert_eq!(train.take_unforwarded_sample(), None);
    }

    #[test]
    fn stationary_local_train_reports_once() {
        let mut train = Train::local(TrainNumber(1), cars(1), moving(0.0, 0.0), None);
        assert!(train.take_move_report().is_some());
        assert!(train.take_move_report().is_none());

        train.set_kinematics(moving(3.0, 3.0)).unwrap();
        assert!(train.take_move_report().is_some());
        assert!(train.take_move_report().is_some());

        train.set_kinematics(moving(4.0, 0.0)).unwrap();
        assert_eq!(train.take_move_report(), Some(moving(4.0, 0.0)));
        assert!(train.take_move_report().is_none());
    }

    #[test]
    fn controls_clamp_headlight() {
        let mut controls = ControlState::default();
        controls.apply(EventKind::Headlight, 7);
        assert_eq!(controls.headlight, 2);
        controls.apply(EventKind::Headlight, -1);
        assert_eq!(controls.headlight, 0);
        controls.apply(EventKind::Pantograph2, 1);
        assert_eq!(controls.state(EventKind::Pantograph2), 1);
        assert_eq!(controls.state(EventKind::Pantograph1), 0);
    }

    #[test]
    fn split_behind_detaches_trailing_cars() {
        let mut train = Train::local(TrainNumber(1), cars(4), moving(0.0, 0.0), None);
        let rear = train.split_behind("T - 1").unwrap();
        assert_eq!(train.cars.len(), 2);
        assert_eq!(rear.len(), 2);
        assert_eq!(rear[0].id, "T - 2");
        assert!(matches!(
            train.split_behind("T - 1"),
            Err(WorldError::NothingToUncouple { .. })
        ));
        assert!(matches!(
            train.split_behind("T - 9"),
            Err(WorldError::CarNotFound { .. })
        ));
    }

    #[test]
    fn stop_keeps_position_and_zeroes_speed() {
        let mut replica = Train::replica(TrainNumber(8), cars(1), moving(10.0, 2.0), None);
        replica.advance(1.0);
        replica.stop();
        assert_eq!(replica.kinematics().speed, 0.0);
        assert!((replica.kinematics().travelled - 12.0).abs() < 1e-4);
        replica.advance(5.0);
        assert!((replica.kinematics().travelled - 12.0).abs() < 1e-4);

        let mut local = Train::local(TrainNumber(9), cars(1), moving(4.0, 3.0), None);
        local.stop();
        assert_eq!(local.kinematics(), moving(4.0, 0.0));
    }

    #[test]
    fn make_local_keeps_predicted_state() {
        let mut train = Train::replica(TrainNumber(8), cars(1), moving(10.0, 2.0), None);
        train.advance(1.0);
        train.make_local();
        assert!(!train.is_replica());
        assert!((train.kinematics().travelled - 12.0).abs() < 1e-4);
        assert!(train.set_kinematics(moving(13.0, 2.0)).is_ok());
    }
}
