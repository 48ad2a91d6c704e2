// Dead reckoning for replica trains.
//
// A replica only learns its true state from move samples, which arrive about
// once a second. Between samples `ReplicaMotion` extrapolates
// `travelled += |speed| * dt`. When a sample arrives, the gap between the
// prediction and the reported distance picks one of three outcomes:
//
// - below `snap_tolerance`: take the sample as-is (`Correction::Accepted`);
// - above `divergence_threshold`, or on a different track segment: jump to
//   the sample (`Correction::Snapped`);
// - in between: keep the current distance and run faster or slower than the
//   reported speed for `blend_window_secs` so the gap closes by the end of
//   the window (`Correction::Blending`).
//
// Between samples the distance never decreases, so a blend can only close a
// gap the reported speed would cover within the window. A prediction that
// ran further ahead than that (the usual case when a train brakes to a stop)
// is snapped back. Only `apply` may move a replica backward, and only by
// accepting or snapping to an authoritative sample.
//
// See also: `train.rs`, which owns one `ReplicaMotion` per replica train,
// and `config.rs` for the thresholds.

use railsync_protocol::{Heading, Kinematics, TrackPosition};

use crate::config::ReconcileConfig;

/// Blend time left below this (seconds) counts as finished.
const BLEND_EPSILON: f32 = 1e-5;

/// How a sample was folded into the prediction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Correction {
    Accepted,
    Snapped,
    Blending { discrepancy: f32 },
}

/// Predicted motion of one replica train.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicaMotion {
    travelled: f32,
    speed: f32,
    position: TrackPosition,
    heading: Heading,
    correction_rate: f32,
    blend_remaining: f32,
    since_sample: f32,
}

impl ReplicaMotion {
    /// Start predicting from an initial authoritative sample.
    pub fn new(sample: &Kinematics) -> Self {
        Self {
            travelled: sample.travelled,
            speed: sample.speed,
            position: sample.position,
            heading: sample.heading,
            correction_rate: 0.0,
            blend_remaining: 0.0,
            since_sample: 0.0,
        }
    }

    /// Current predicted cumulative distance.
    pub fn travelled(&self) -> f32 {
        self.travelled
    }

    /// Speed last reported by the owning node.
    pub fn reported_speed(&self) -> f32 {
        self.speed
    }

    /// Speed the replica is actually being moved at, including any blend
    /// correction. Carries the sign of the reported speed.
    pub fn applied_speed(&self) -> f32 {
        self.rate().copysign(self.speed)
    }

    pub fn is_blending(&self) -> bool {
        self.blend_remaining > 0.0
    }

    /// Seconds since the last sample was applied.
    pub fn since_sample(&self) -> f32 {
        self.since_sample
    }

    /// Last reported position, heading, and the current prediction as one
    /// kinematic snapshot.
    pub fn kinematics(&self) -> Kinematics {
        Kinematics {
            position: self.position,
            heading: self.heading,
            travelled: self.travelled,
            speed: self.applied_speed(),
        }
    }

    fn rate(&self) -> f32 {
        if self.is_blending() {
            (self.speed.abs() + self.correction_rate).max(0.0)
        } else {
            self.speed.abs()
        }
    }

    /// Extrapolate `dt` seconds forward.
    pub fn advance(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        let mut remaining = dt;
        if self.is_blending() {
            let step = remaining.min(self.blend_remaining);
            self.travelled += self.rate() * step;
            self.blend_remaining -= step;
            remaining -= step;
            if self.blend_remaining <= BLEND_EPSILON {
                self.blend_remaining = 0.0;
                self.correction_rate = 0.0;
            }
        }
        self.travelled += self.speed.abs() * remaining;
        self.since_sample += dt;
    }

    /// Fold in a new authoritative sample.
    pub fn apply(&mut self, sample: &Kinematics, config: &ReconcileConfig) -> Correction {
        let discrepancy = sample.travelled - self.travelled;
        let gap = discrepancy.abs();
        // Blending backward would need a negative rate.
        let unreachable =
            discrepancy < 0.0 && gap > sample.speed.abs() * config.blend_window_secs;
        let correction = if sample.position.changes_segment(&self.position)
            || gap > config.divergence_threshold
            || config.blend_window_secs <= 0.0
        {
            Correction::Snapped
        } else if gap < config.snap_tolerance {
            Correction::Accepted
        } else if unreachable {
            Correction::Snapped
        } else {
            Correction::Blending { discrepancy }
        };

        match correction {
            Correction::Accepted | Correction::Snapped => {
                self.travelled = sample.travelled;
                self.correction_rate = 0.0;
                self.blend_remaining = 0.0;
            }
            Correction::Blending { discrepancy } => {
                self.correction_rate = discrepancy / config.blend_window_secs;
                self.blend_remaining = config.blend_window_secs;
            }
        }
        self.speed = sample.speed;
        self.position = sample.position;
        self.heading = sample.heading;
        self.since_sample = 0.0;
        correction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(travelled: f32, speed: f32, track_node: u32) -> Kinematics {
        Kinematics {
            position: TrackPosition {
                track_node,
                ..TrackPosition::default()
            },
            heading: Heading::Forward,
            travelled,
            speed,
        }
    }

    #[test]
    fn prediction_extrapolates_reported_speed() {
        let mut motion = ReplicaMotion::new(&sample(100.0, 10.0, 1));
        motion.advance(0.5);
        assert!((motion.travelled() - 105.0).abs() < 1e-4);
        motion.advance(0.5);
        assert!((motion.travelled() - 110.0).abs() < 1e-4);
        assert!((motion.since_sample() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn small_discrepancy_is_accepted() {
        let config = ReconcileConfig::default();
        let mut motion = ReplicaMotion::new(&sample(100.0, 10.0, 1));
        motion.advance(1.0);
        let c = motion.apply(&sample(110.1, 10.0, 1), &config);
        assert_eq!(c, Correction::Accepted);
        assert_eq!(motion.travelled(), 110.1);
        assert!(!motion.is_blending());
    }

    #[test]
    fn large_discrepancy_snaps() {
        let config = ReconcileConfig::default();
        let mut motion = ReplicaMotion::new(&sample(100.0, 0.0, 1));
        let c = motion.apply(&sample(110.0, 12.5, 1), &config);
        assert_eq!(c, Correction::Snapped);
        assert_eq!(motion.travelled(), 110.0);
        assert_eq!(motion.applied_speed(), 12.5);
    }

    #[test]
    fn segment_change_snaps_even_when_close() {
        let config = ReconcileConfig::default();
        let mut motion = ReplicaMotion::new(&sample(100.0, 10.0, 1));
        motion.advance(1.0);
        let c = motion.apply(&sample(111.0, 10.0, 2), &config);
        assert_eq!(c, Correction::Snapped);
        assert_eq!(motion.travelled(), 111.0);
    }

    #[test]
    fn intermediate_discrepancy_blends_within_window() {
        let config = ReconcileConfig::default();
        let mut motion = ReplicaMotion::new(&sample(100.0, 10.0, 1));
        motion.advance(1.0);
        let c = motion.apply(&sample(112.0, 10.0, 1), &config);
        assert!(matches!(c, Correction::Blending { .. }));
        // Not jumped: still at the prediction, but moving faster.
        assert!((motion.travelled() - 110.0).abs() < 1e-4);
        assert!((motion.applied_speed() - 12.0).abs() < 1e-4);

        for _ in 0..10 {
            motion.advance(0.1);
        }
        let authoritative = 112.0 + 10.0 * 1.0;
        assert!((motion.travelled() - authoritative).abs() < config.snap_tolerance);
        assert!(!motion.is_blending());
        assert!((motion.applied_speed() - 10.0).abs() < 1e-4);
    }

    #[test]
    fn overshoot_past_a_braking_train_snaps_back() {
        let config = ReconcileConfig::default();
        let mut motion = ReplicaMotion::new(&sample(100.0, 1.0, 1));
        motion.advance(1.0);
        // Sample is 3 m behind the prediction while crawling at 1 m/s.
        let c = motion.apply(&sample(98.0, 1.0, 1), &config);
        assert_eq!(c, Correction::Snapped);
        assert_eq!(motion.travelled(), 98.0);
        assert!(!motion.is_blending());
        motion.advance(0.5);
        assert!((motion.travelled() - 98.5).abs() < 1e-4);
    }

    #[test]
    fn replica_settles_where_the_train_stopped() {
        let config = ReconcileConfig::default();
        let mut motion = ReplicaMotion::new(&sample(100.0, 10.0, 1));
        motion.advance(1.0);
        // Braked to a halt 2 m short of where the prediction got to.
        for _ in 0..10 {
            motion.apply(&sample(108.0, 0.0, 1), &config);
            motion.advance(1.0);
            assert_eq!(motion.travelled(), 108.0);
        }
        assert_eq!(motion.applied_speed(), 0.0);
    }

    #[test]
    fn small_lead_over_a_slow_train_still_blends() {
        let config = ReconcileConfig::default();
        let mut motion = ReplicaMotion::new(&sample(100.0, 4.0, 1));
        motion.advance(1.0);
        // 3 m behind at 4 m/s: reachable by running slower.
        let c = motion.apply(&sample(101.0, 4.0, 1), &config);
        assert!(matches!(c, Correction::Blending { .. }));
        assert!((motion.applied_speed() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn reversing_train_keeps_sign_of_speed() {
        let config = ReconcileConfig::default();
        let mut motion = ReplicaMotion::new(&sample(50.0, -4.0, 1));
        motion.advance(1.0);
        assert!((motion.travelled() - 54.0).abs() < 1e-4);
        motion.apply(&sample(55.0, -4.0, 1), &config);
        assert!(motion.applied_speed() < -4.0);
    }

    proptest! {
        #[test]
        fn converges_and_never_moves_backward(
            start in 0.0f32..1000.0,
            speed in 0.0f32..40.0,
            lead in -4.9f32..4.9,
            steps in 1usize..20,
        ) {
            let config = ReconcileConfig::default();
            let mut motion = ReplicaMotion::new(&sample(start, speed, 1));
            motion.advance(1.0);
            let target = motion.travelled() + lead;
            prop_assume!(target >= 0.0);
            motion.apply(&sample(target, speed, 1), &config);

            let dt = config.blend_window_secs / steps as f32;
            let mut last = motion.travelled();
            for _ in 0..steps {
                motion.advance(dt);
                prop_assert!(motion.travelled() >= last);
                last = motion.travelled();
            }
            let authoritative = target + speed * config.blend_window_secs;
            prop_assert!((motion.travelled() - authoritative).abs() < config.snap_tolerance);
        }
    }
}
