//! Dead reckoning from accelerometer and gyroscope samples
//!
//! Acceleration is rotated into the local frame with the current orientation,
//! gravity is removed, and the result is integrated twice. Velocity is damped
//! every step to bound unconstrained drift. Confidence decays exponentially
//! with the time since the last absolute correction.

use crate::core::{SourceEstimate, SourceKind, TimestampMs, Vec3, STANDARD_GRAVITY};
use crate::fusion::source::{is_fresh, PositionSource};
use crate::utils::config::InertialConfig;
use crate::validation::{FusionError, FusionResult};
use nalgebra::UnitQuaternion;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Pose produced by one integration step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    pub position: Vec3,
    pub velocity: Vec3,
    pub orientation: UnitQuaternion<f64>,
    pub confidence: f64,
    pub accuracy_m: f64,
}

pub struct InertialEstimator {
    config: InertialConfig,
    position: Vec3,
    velocity: Vec3,
    orientation: UnitQuaternion<f64>,
    /// Gravity in the local frame, subtracted from rotated specific force
    gravity: Vec3,
    seconds_since_correction: f64,
    last_sample_ms: Option<TimestampMs>,
    /// Set once an absolute fix has placed the estimate in the local frame
    anchored: bool,
}

impl InertialEstimator {
    pub fn new(config: InertialConfig) -> Self {
        Self {
            config,
            position: Vec3::zeros(),
            velocity: Vec3::zeros(),
            orientation: UnitQuaternion::identity(),
            gravity: Vec3::new(0.0, 0.0, STANDARD_GRAVITY),
            seconds_since_correction: 0.0,
            last_sample_ms: None,
            anchored: false,
        }
    }

    /// Integrate one sample over `dt_s` seconds
    ///
    /// A step outside `(0, max_dt_s]` is rejected and leaves the state untouched.
    pub fn integrate(&mut self, accel: Vec3, gyro: Vec3, dt_s: f64) -> FusionResult<PoseEstimate> {
        if !(dt_s.is_finite() && dt_s > 0.0 && dt_s <= self.config.max_dt_s) {
            return Err(FusionError::InvalidTimestep { dt_s });
        }
        if !(accel.iter().all(|v| v.is_finite()) && gyro.iter().all(|v| v.is_finite())) {
            return Err(FusionError::InvalidSample {
                reason: "non-finite inertial reading".to_string(),
            });
        }

        let world_accel = self.orientation * accel - self.gravity;

        self.position += self.velocity * dt_s + world_accel * (0.5 * dt_s * dt_s);
        self.velocity = (self.velocity + world_accel * dt_s) * self.config.velocity_damping;

        self.orientation *= UnitQuaternion::from_scaled_axis(gyro * dt_s);
        self.orientation.renormalize();

        self.seconds_since_correction += dt_s;
        Ok(self.pose())
    }

    /// Integrate a timestamped sample, deriving `dt` from the previous one
    ///
    /// The first sample only establishes the time base.
    pub fn integrate_at(&mut self, accel: Vec3, gyro: Vec3, timestamp_ms: TimestampMs) -> FusionResult<PoseEstimate> {
        let Some(previous) = self.last_sample_ms else {
            self.last_sample_ms = Some(timestamp_ms);
            return Ok(self.pose());
        };

        let dt_s = (timestamp_ms as f64 - previous as f64) / 1000.0;
        self.last_sample_ms = Some(previous.max(timestamp_ms));

        self.integrate(accel, gyro, dt_s).map_err(|e| {
            debug!(dt_s, "inertial sample skipped: {}", e);
            e
        })
    }

    /// Pull the estimate toward an absolute position
    ///
    /// `trust_weight` in `[0, 1]` is the fraction of the gap closed. The first
    /// correction after a reset places the estimate outright.
    pub fn correct(&mut self, absolute_position: &Vec3, trust_weight: f64) {
        let weight = crate::core::clamp_weight(trust_weight);
        if !absolute_position.iter().all(|v| v.is_finite()) {
            return;
        }

        if !self.anchored {
            self.position = *absolute_position;
            self.velocity = Vec3::zeros();
            self.seconds_since_correction = 0.0;
            self.anchored = true;
            return;
        }

        self.position += (absolute_position - self.position) * weight;
        self.seconds_since_correction *= 1.0 - weight;
    }

    /// Estimate gravity from samples taken at rest (body frame)
    pub fn calibrate_gravity(&mut self, stationary_samples: &[Vec3]) -> Option<Vec3> {
        if stationary_samples.is_empty() {
            return None;
        }
        let mean = stationary_samples.iter().fold(Vec3::zeros(), |acc, s| acc + s) / stationary_samples.len() as f64;
        if !mean.iter().all(|v| v.is_finite()) || mean.norm() < 0.5 * STANDARD_GRAVITY {
            return None;
        }

        self.gravity = self.orientation * mean;
        debug!(gravity = %self.gravity.norm(), "gravity calibrated");
        Some(self.gravity)
    }

    /// Decays from `initial_confidence` toward `min_confidence`
    pub fn confidence(&self) -> f64 {
        let decayed = self.config.initial_confidence
            * (-self.config.confidence_decay_per_s * self.seconds_since_correction).exp();
        decayed.max(self.config.min_confidence).min(1.0)
    }

    pub fn accuracy_m(&self) -> f64 {
        self.config.base_accuracy_m + self.config.drift_accuracy_per_s * self.seconds_since_correction
    }

    pub fn pose(&self) -> PoseEstimate {
        PoseEstimate {
            position: self.position,
            velocity: self.velocity,
            orientation: self.orientation,
            confidence: self.confidence(),
            accuracy_m: self.accuracy_m(),
        }
    }

    /// Roll, pitch and yaw of the device (radians)
    pub fn euler_angles(&self) -> (f64, f64, f64) {
        self.orientation.euler_angles()
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn gravity(&self) -> Vec3 {
        self.gravity
    }

    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    pub fn last_sample_ms(&self) -> Option<TimestampMs> {
        self.last_sample_ms
    }

    /// Discard all integrated state, gravity calibration included
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

impl PositionSource for InertialEstimator {
    fn kind(&self) -> SourceKind {
        SourceKind::Inertial
    }

    fn snapshot(&self, now_ms: TimestampMs, staleness_ms: u64) -> Option<SourceEstimate> {
        let last = self.last_sample_ms?;
        if !self.anchored || !is_fresh(last, now_ms, staleness_ms) {
            return None;
        }
        Some(SourceEstimate::new(
            SourceKind::Inertial,
            self.position,
            self.accuracy_m(),
            self.confidence(),
            last,
        ))
    }

    fn reset(&mut self) {
        InertialEstimator::reset(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn at_rest() -> Vec3 {
        Vec3::new(0.0, 0.0, STANDARD_GRAVITY)
    }

    fn undamped() -> InertialConfig {
        InertialConfig {
            velocity_damping: 1.0,
            ..InertialConfig::default()
        }
    }

    #[test]
    fn test_rejects_bad_timesteps() {
        let mut estimator = InertialEstimator::new(InertialConfig::default());
        for dt in [0.0, -0.01, 0.5, f64::NAN] {
            let result = estimator.integrate(Vec3::new(1.0, 0.0, 0.0), Vec3::zeros(), dt);
            assert!(matches!(result, Err(FusionError::InvalidTimestep { .. })));
        }
        assert_eq!(estimator.position(), Vec3::zeros());
        assert_eq!(estimator.velocity(), Vec3::zeros());
    }

    #[test]
    fn test_at_rest_stays_put() {
        let mut estimator = InertialEstimator::new(InertialConfig::default());
        for _ in 0..100 {
            estimator.integrate(at_rest(), Vec3::zeros(), 0.01).unwrap();
        }
        assert!(estimator.position().norm() < 1e-9);
    }

    #[test]
    fn test_constant_acceleration_integrates_exactly() {
        let mut estimator = InertialEstimator::new(undamped());
        let accel = at_rest() + Vec3::new(1.0, 0.0, 0.0);
        for _ in 0..100 {
            estimator.integrate(accel, Vec3::zeros(), 0.01).unwrap();
        }
        // x = a t² / 2, v = a t
        assert!((estimator.position().x - 0.5).abs() < 1e-9);
        assert!((estimator.velocity().x - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_damping_bounds_velocity() {
        let mut damped = InertialEstimator::new(InertialConfig::default());
        let mut free = InertialEstimator::new(undamped());
        let accel = at_rest() + Vec3::new(0.0, 2.0, 0.0);
        for _ in 0..50 {
            damped.integrate(accel, Vec3::zeros(), 0.02).unwrap();
            free.integrate(accel, Vec3::zeros(), 0.02).unwrap();
        }
        assert!(damped.velocity().y < free.velocity().y);
        assert!(damped.position().y < free.position().y);
    }

    #[test]
    fn test_gyro_rotation_keeps_unit_quaternion() {
        let mut estimator = InertialEstimator::new(InertialConfig::default());
        let gyro = Vec3::new(0.0, 0.0, FRAC_PI_2);
        for _ in 0..100 {
            estimator.integrate(at_rest(), gyro, 0.01).unwrap();
        }
        let (roll, pitch, yaw) = estimator.euler_angles();
        assert!((yaw - FRAC_PI_2).abs() < 1e-6);
        assert!(roll.abs() < 1e-9 && pitch.abs() < 1e-9);
        assert!((estimator.pose().orientation.into_inner().norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_confidence_decays_and_correction_restores() {
        let mut estimator = InertialEstimator::new(InertialConfig::default());
        let initial = estimator.confidence();
        assert!((initial - 0.9).abs() < 1e-12);

        let mut previous = initial;
        for _ in 0..50 {
            estimator.integrate(at_rest(), Vec3::zeros(), 0.1).unwrap();
            let current = estimator.confidence();
            assert!(current < previous);
            previous = current;
        }

        estimator.correct(&Vec3::new(1.0, 1.0, 0.0), 1.0);
        estimator.correct(&Vec3::new(1.0, 1.0, 0.0), 0.8);
        assert!(estimator.confidence() > previous);
    }

    #[test]
    fn test_confidence_floor() {
        let mut estimator = InertialEstimator::new(InertialConfig::default());
        for _ in 0..10_000 {
            estimator.integrate(at_rest(), Vec3::zeros(), 0.1).unwrap();
        }
        assert!((estimator.confidence() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_correct_moves_proportionally() {
        let mut estimator = InertialEstimator::new(InertialConfig::default());
        estimator.correct(&Vec3::new(10.0, 0.0, 0.0), 0.3);
        // First correction anchors outright
        assert_eq!(estimator.position(), Vec3::new(10.0, 0.0, 0.0));

        estimator.correct(&Vec3::new(20.0, 0.0, 0.0), 0.5);
        assert!((estimator.position().x - 15.0).abs() < 1e-12);

        estimator.correct(&Vec3::new(0.0, 0.0, 0.0), 0.0);
        assert!((estimator.position().x - 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_integrate_at_derives_dt() {
        let mut estimator = InertialEstimator::new(undamped());
        let accel = at_rest() + Vec3::new(1.0, 0.0, 0.0);

        estimator.integrate_at(accel, Vec3::zeros(), 1_000).unwrap();
        assert_eq!(estimator.velocity(), Vec3::zeros());

        estimator.integrate_at(accel, Vec3::zeros(), 1_050).unwrap();
        assert!((estimator.velocity().x - 0.05).abs() < 1e-12);

        // A clock jump is skipped and the time base moves on
        assert!(estimator.integrate_at(accel, Vec3::zeros(), 5_000).is_err());
        estimator.integrate_at(accel, Vec3::zeros(), 5_010).unwrap();
        assert!((estimator.velocity().x - 0.06).abs() < 1e-12);
    }

    #[test]
    fn test_snapshot_requires_anchor_and_fresh_sample() {
        let mut estimator = InertialEstimator::new(InertialConfig::default());
        estimator.integrate_at(at_rest(), Vec3::zeros(), 0).unwrap();
        assert!(estimator.snapshot(0, 1000).is_none());

        estimator.correct(&Vec3::new(2.0, 3.0, 0.0), 1.0);
        let estimate = estimator.snapshot(500, 1000).unwrap();
        assert_eq!(estimate.source, SourceKind::Inertial);
        assert_eq!(estimate.position, Vec3::new(2.0, 3.0, 0.0));
        assert!((estimate.weight - estimator.confidence()).abs() < 1e-12);

        assert!(estimator.snapshot(5_000, 1000).is_none());
    }

    #[test]
    fn test_calibrate_gravity() {
        let mut estimator = InertialEstimator::new(InertialConfig::default());
        let biased = Vec3::new(0.1, 0.0, 9.7);
        assert_eq!(estimator.calibrate_gravity(&[biased, biased]), Some(biased));
        assert!(estimator.calibrate_gravity(&[]).is_none());

        for _ in 0..50 {
            estimator.integrate(biased, Vec3::zeros(), 0.01).unwrap();
        }
        assert!(estimator.position().norm() < 1e-9);
    }

    #[test]
    fn test_reset_discards_state() {
        let mut estimator = InertialEstimator::new(InertialConfig::default());
        estimator.correct(&Vec3::new(5.0, 5.0, 0.0), 1.0);
        estimator.integrate_at(at_rest(), Vec3::zeros(), 10).unwrap();
        estimator.calibrate_gravity(&[Vec3::new(0.0, 0.0, 9.7)]);

        estimator.reset();
        assert!(!estimator.is_anchored());
        assert_eq!(estimator.position(), Vec3::zeros());
        assert!(estimator.last_sample_ms().is_none());
        assert_eq!(estimator.gravity(), Vec3::new(0.0, 0.0, STANDARD_GRAVITY));
    }
}
