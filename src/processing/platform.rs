//! Moving-platform detection and compensation
//!
//! A ship or similar rigid platform shows up as a persistent, slow oscillation
//! in device roll and vertical acceleration, well below pedestrian cadence.
//! Once such a pattern is found the compensator removes the platform-induced
//! displacement from fused positions.

use crate::core::{TimestampMs, Vec3};
use crate::utils::config::{PlatformConfig, PlatformDetectorConfig};
use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::f64::consts::TAU;
use tracing::{debug, info};

/// Attitude and heave of the platform the agent stands on
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlatformMotionState {
    /// Radians
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    /// Vertical displacement from the mean (meters)
    pub heave: f64,
    /// Dominant oscillation frequency (Hz)
    pub frequency_hz: f64,
    pub timestamp_ms: TimestampMs,
}

/// One attitude sample for the detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlatformObservation {
    pub timestamp_ms: TimestampMs,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    /// Vertical specific force (m/s², gravity included)
    pub vertical_accel: f64,
}

/// Mean, amplitude and zero-crossing frequency of one channel
struct Oscillation {
    mean: f64,
    amplitude: f64,
    frequency_hz: f64,
}

impl Oscillation {
    fn measure(values: impl Iterator<Item = f64> + Clone, span_s: f64) -> Self {
        let (sum, count) = values.clone().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        let mean = if count > 0 { sum / count as f64 } else { 0.0 };

        let mut amplitude: f64 = 0.0;
        let mut crossings = 0usize;
        let mut previous: Option<f64> = None;
        for v in values {
            let centred = v - mean;
            amplitude = amplitude.max(centred.abs());
            if let Some(p) = previous {
                if (p < 0.0 && centred >= 0.0) || (p >= 0.0 && centred < 0.0) {
                    crossings += 1;
                }
            }
            previous = Some(centred);
        }

        let frequency_hz = if span_s > 0.0 { crossings as f64 / (2.0 * span_s) } else { 0.0 };
        Self {
            mean,
            amplitude,
            frequency_hz,
        }
    }
}

pub struct PlatformMotionDetector {
    config: PlatformDetectorConfig,
    samples: VecDeque<PlatformObservation>,
    last_evaluation_ms: Option<TimestampMs>,
    state: Option<PlatformMotionState>,
}

impl PlatformMotionDetector {
    pub fn new(config: PlatformDetectorConfig) -> Self {
        Self {
            config,
            samples: VecDeque::new(),
            last_evaluation_ms: None,
            state: None,
        }
    }

    /// Buffer an observation; re-evaluates every `update_interval_ms`.
    /// Returns true when detection switched on or off.
    pub fn observe(&mut self, observation: PlatformObservation) -> bool {
        let values = [observation.roll, observation.pitch, observation.yaw, observation.vertical_accel];
        if !values.iter().all(|v| v.is_finite()) {
            return false;
        }
        if self
            .samples
            .back()
            .is_some_and(|last| observation.timestamp_ms < last.timestamp_ms)
        {
            return false;
        }
        self.samples.push_back(observation);

        let now = observation.timestamp_ms;
        let due = self
            .last_evaluation_ms
            .map_or(true, |last| now.saturating_sub(last) >= self.config.update_interval_ms);
        if !due {
            return false;
        }

        let was_active = self.state.is_some();
        self.evaluate(now);
        let active = self.state.is_some();
        if active != was_active {
            info!(active, "platform motion detection changed");
        }
        active != was_active
    }

    /// Re-run detection over the buffered window ending at `now_ms`
    pub fn evaluate(&mut self, now_ms: TimestampMs) -> Option<&PlatformMotionState> {
        self.last_evaluation_ms = Some(now_ms);

        let window_ms = (self.config.window_s * 1000.0) as u64;
        while self
            .samples
            .front()
            .is_some_and(|s| now_ms.saturating_sub(s.timestamp_ms) > window_ms)
        {
            self.samples.pop_front();
        }

        self.state = self.detect();
        self.state.as_ref()
    }

    fn detect(&self) -> Option<PlatformMotionState> {
        let first = self.samples.front()?;
        let latest = self.samples.back()?;
        let span_s = latest.timestamp_ms.saturating_sub(first.timestamp_ms) as f64 / 1000.0;
        if span_s < self.config.min_window_s {
            return None;
        }

        let c = &self.config;
        let in_band = |f: f64| f >= c.min_frequency_hz && f <= c.max_frequency_hz;

        let roll = Oscillation::measure(self.samples.iter().map(|s| s.roll), span_s);
        let pitch = Oscillation::measure(self.samples.iter().map(|s| s.pitch), span_s);
        let vertical = Oscillation::measure(self.samples.iter().map(|s| s.vertical_accel), span_s);

        let heave_omega = TAU * vertical.frequency_hz;
        let heave_amplitude = if heave_omega > 0.0 {
            vertical.amplitude / (heave_omega * heave_omega)
        } else {
            0.0
        };

        let rolling = in_band(roll.frequency_hz) && roll.amplitude >= c.min_roll_amplitude_rad;
        let heaving = in_band(vertical.frequency_hz) && heave_amplitude >= c.min_heave_amplitude_m;
        debug!(
            roll_hz = roll.frequency_hz,
            roll_amplitude = roll.amplitude,
            heave_hz = vertical.frequency_hz,
            heave_amplitude,
            "platform detector evaluated"
        );
        if !(rolling || heaving) {
            return None;
        }

        let heave = if heaving {
            -(latest.vertical_accel - vertical.mean) / (heave_omega * heave_omega)
        } else {
            0.0
        };

        let (sin_sum, cos_sum) = self
            .samples
            .iter()
            .fold((0.0, 0.0), |(s, c), o| (s + o.yaw.sin(), c + o.yaw.cos()));

        Some(PlatformMotionState {
            roll: latest.roll - roll.mean,
            pitch: latest.pitch - pitch.mean,
            yaw: sin_sum.atan2(cos_sum),
            heave,
            frequency_hz: if heaving { vertical.frequency_hz } else { roll.frequency_hz },
            timestamp_ms: latest.timestamp_ms,
        })
    }

    pub fn state(&self) -> Option<&PlatformMotionState> {
        self.state.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.last_evaluation_ms = None;
        self.state = None;
    }
}

/// Removes platform roll/pitch/heave from positions in the local frame
pub struct PlatformMotionCompensator {
    config: PlatformConfig,
}

impl PlatformMotionCompensator {
    pub fn new(config: PlatformConfig) -> Self {
        Self { config }
    }

    /// Corrected position, or `None` if it falls outside the platform
    pub fn compensate(&self, position: &Vec3, state: &PlatformMotionState) -> Option<Vec3> {
        let heading = Rotation3::from_axis_angle(&Vector3::z_axis(), self.config.heading_rad);
        let tilt = Rotation3::from_euler_angles(state.roll, state.pitch, 0.0);

        let observed = heading.inverse() * (position - self.config.pivot);
        let level = tilt.inverse() * (observed - Vec3::new(0.0, 0.0, state.heave));

        if !self.within_bounds(&level) {
            debug!(x = level.x, y = level.y, z = level.z, "platform correction out of bounds");
            return None;
        }
        Some(self.config.pivot + heading * level)
    }

    /// Box centred on the pivot, in the platform frame
    pub fn within_bounds(&self, platform_offset: &Vec3) -> bool {
        let c = &self.config;
        platform_offset.iter().all(|v| v.is_finite())
            && platform_offset.x.abs() <= c.length_m / 2.0
            && platform_offset.y.abs() <= c.width_m / 2.0
            && platform_offset.z.abs() <= c.height_m / 2.0
    }
}
