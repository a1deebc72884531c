//! Sample dispatch in front of the fusion coordinator
//!
//! Owns everything that reacts to individual sensor samples: motion windows,
//! step detection, activity classification and platform detection. Fusion
//! itself happens only when the scheduler calls `tick`.

use crate::core::{Anchor, FusedPosition, GeoPosition, SensorSample, TimestampMs, Vec3};
use crate::fusion::coordinator::{FusionCoordinator, FusionEvent};
use crate::processing::motion::{MotionClassifier, MotionState, MotionStatus, MotionTransition, SampleWindow, StepDetector};
use crate::processing::platform::{PlatformMotionDetector, PlatformObservation};
use crate::utils::config::FusionConfig;
use crate::utils::monitor::FusionStats;
use crate::validation::{validate_sample, FusionResult};
use std::collections::VecDeque;
use tracing::{debug, info};

pub struct TrackingPipeline {
    coordinator: FusionCoordinator,
    classifier: MotionClassifier,
    step_detector: StepDetector,
    accel_window: SampleWindow,
    gyro_window: SampleWindow,
    /// Raw accelerometer vectors, for gravity calibration at rest
    recent_accel: VecDeque<Vec3>,
    window_size: usize,
    latest_gyro: Vec3,
    magnetic_heading_rad: Option<f64>,
    platform_detector: Option<PlatformMotionDetector>,
    classify_every: usize,
    accel_since_classify: usize,
    transitions: Vec<MotionTransition>,
}

impl TrackingPipeline {
    pub fn new(config: FusionConfig, anchors: Vec<Anchor>, origin: Option<GeoPosition>) -> Self {
        let motion = config.motion.clone();
        let platform_detector = config
            .enable_platform_motion_compensation
            .then(|| PlatformMotionDetector::new(config.platform.detector.clone()));

        Self {
            classifier: MotionClassifier::new(motion.clone()),
            step_detector: StepDetector::new(&motion),
            accel_window: SampleWindow::new(motion.window_size),
            gyro_window: SampleWindow::new(motion.window_size),
            recent_accel: VecDeque::with_capacity(motion.window_size),
            window_size: motion.window_size.max(1),
            latest_gyro: Vec3::zeros(),
            magnetic_heading_rad: None,
            platform_detector,
            classify_every: motion.classify_every_n_samples.max(1),
            accel_since_classify: 0,
            transitions: Vec::new(),
            coordinator: FusionCoordinator::new(config, anchors, origin),
        }
    }

    /// Validate a sample and route it to its consumer
    pub fn push_sample(&mut self, sample: &SensorSample) -> FusionResult<()> {
        if let Err(e) = validate_sample(sample) {
            debug!(kind = sample.kind_name(), "sample rejected: {}", e);
            self.coordinator.stats_mut().record_error(&e);
            return Err(e);
        }

        match sample {
            SensorSample::Accelerometer { acceleration, timestamp_ms } => {
                self.on_acceleration(*acceleration, *timestamp_ms)
            }
            SensorSample::Gyroscope { angular_velocity, .. } => {
                self.latest_gyro = *angular_velocity;
                self.gyro_window.push_magnitude(angular_velocity);
                Ok(())
            }
            SensorSample::Magnetometer { field, .. } => {
                // Clockwise from magnetic north, device held flat
                self.magnetic_heading_rad = Some(field.x.atan2(field.y));
                Ok(())
            }
            SensorSample::Gnss(fix) => self.coordinator.ingest_gnss(fix),
            SensorSample::Ranging(reading) => self.coordinator.ingest_range(reading),
            SensorSample::Rssi(reading) => self.coordinator.ingest_rssi(reading),
        }
    }

    fn on_acceleration(&mut self, acceleration: Vec3, timestamp_ms: TimestampMs) -> FusionResult<()> {
        self.accel_window.push_magnitude(&acceleration);
        if self.recent_accel.len() >= self.window_size {
            self.recent_accel.pop_front();
        }
        self.recent_accel.push_back(acceleration);
        self.step_detector.push(&acceleration, timestamp_ms);

        let integrated = self
            .coordinator
            .ingest_inertial(acceleration, self.latest_gyro, timestamp_ms)
            .map(|_| ());

        self.observe_platform(acceleration, timestamp_ms);

        self.accel_since_classify += 1;
        if self.accel_since_classify >= self.classify_every {
            self.accel_since_classify = 0;
            self.classify(timestamp_ms);
        }

        integrated
    }

    fn observe_platform(&mut self, acceleration: Vec3, timestamp_ms: TimestampMs) {
        let Some(detector) = self.platform_detector.as_mut() else {
            return;
        };

        let inertial = self.coordinator.inertial();
        let (roll, pitch, yaw) = inertial.euler_angles();
        let vertical_accel = (inertial.pose().orientation * acceleration).z;
        let observation = PlatformObservation {
            timestamp_ms,
            roll,
            pitch,
            yaw: self.magnetic_heading_rad.unwrap_or(yaw),
            vertical_accel,
        };

        detector.observe(observation);
        let state = detector.state().copied();
        self.coordinator.set_platform_state(state);
    }

    fn classify(&mut self, timestamp_ms: TimestampMs) {
        let step_frequency_hz = self.step_detector.step_frequency_hz(timestamp_ms);
        let gyro = (!self.gyro_window.is_empty()).then_some(&self.gyro_window);
        let (status, transition) = self
            .classifier
            .classify(&self.accel_window, gyro, step_frequency_hz, timestamp_ms);

        self.coordinator.set_motion_state(status.state);
        let Some(transition) = transition else {
            return;
        };

        if transition.to == MotionState::Stationary {
            let samples: Vec<Vec3> = self.recent_accel.iter().copied().collect();
            if let Some(gravity) = self.coordinator.inertial_mut().calibrate_gravity(&samples) {
                info!(gravity = gravity.norm(), "gravity recalibrated at rest");
            }
        }
        self.coordinator.stats_mut().motion_transitions += 1;
        self.transitions.push(transition);
    }

    /// Run one fusion tick
    pub fn tick(&mut self, now_ms: TimestampMs) -> Option<FusedPosition> {
        self.coordinator.tick(now_ms)
    }

    /// Motion transitions accepted since the last drain, oldest first
    pub fn drain_transitions(&mut self) -> Vec<MotionTransition> {
        std::mem::take(&mut self.transitions)
    }

    pub fn drain_events(&mut self) -> Vec<FusionEvent> {
        self.coordinator.drain_events()
    }

    pub fn motion_status(&self, now_ms: TimestampMs) -> MotionStatus {
        self.classifier.status(now_ms)
    }

    pub fn motion_state(&self) -> MotionState {
        self.classifier.state()
    }

    pub fn magnetic_heading_rad(&self) -> Option<f64> {
        self.magnetic_heading_rad
    }

    pub fn is_platform_detected(&self) -> bool {
        self.platform_detector.as_ref().is_some_and(PlatformMotionDetector::is_active)
    }

    pub fn coordinator(&self) -> &FusionCoordinator {
        &self.coordinator
    }

    pub fn config(&self) -> &FusionConfig {
        self.coordinator.config()
    }

    pub fn stats(&self) -> &FusionStats {
        self.coordinator.stats()
    }

    /// Count samples lost before they reached the pipeline
    pub fn record_dropped(&mut self, count: u64) {
        self.coordinator.stats_mut().dropped_samples += count;
    }

    /// Discard all filter, window and classifier state
    pub fn reset(&mut self) {
        self.coordinator.reset();
        self.classifier.reset();
        self.step_detector.reset();
        self.accel_window.clear();
        self.gyro_window.clear();
        self.recent_accel.clear();
        self.latest_gyro = Vec3::zeros();
        self.magnetic_heading_rad = None;
        if let Some(detector) = self.platform_detector.as_mut() {
            detector.reset();
        }
        self.accel_since_classify = 0;
        self.transitions.clear();
    }
}
