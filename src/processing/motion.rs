//! Activity classification with vote and dwell-time hysteresis
//!
//! Raw votes come from fixed bands on acceleration-magnitude variance,
//! gyroscope-magnitude variance and step cadence. A vote only becomes the
//! reported state after enough consecutive agreeing votes and once the
//! previous state has been held for the minimum duration. Leaving Stationary
//! takes more votes than entering it.

use crate::core::{TimestampMs, Vec3, STANDARD_GRAVITY};
use crate::utils::config::MotionThresholds;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MotionState {
    Stationary,
    Walking,
    Running,
    #[default]
    Unknown,
}

impl MotionState {
    pub fn is_moving(&self) -> bool {
        matches!(self, MotionState::Walking | MotionState::Running)
    }
}

impl fmt::Display for MotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MotionState::Stationary => "stationary",
            MotionState::Walking => "walking",
            MotionState::Running => "running",
            MotionState::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Reported activity state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionStatus {
    pub state: MotionState,
    pub confidence: f64,
    pub timestamp_ms: TimestampMs,
    pub time_since_last_transition_ms: u64,
}

/// Accepted change of reported state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionTransition {
    pub from: MotionState,
    pub to: MotionState,
    pub confidence: f64,
    pub timestamp_ms: TimestampMs,
}

/// Single raw vote, before hysteresis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub state: MotionState,
    pub confidence: f64,
    pub accel_variance: f64,
    pub gyro_variance: Option<f64>,
    pub step_frequency_hz: f64,
}

/// Fixed-size window of scalar readings
#[derive(Debug, Clone)]
pub struct SampleWindow {
    capacity: usize,
    values: VecDeque<f64>,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Push the magnitude of a vector reading
    pub fn push_magnitude(&mut self, vector: &Vec3) {
        self.push(vector.norm());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    /// Population variance
    pub fn variance(&self) -> Option<f64> {
        let mean = self.mean()?;
        let sum_sq: f64 = self.values.iter().map(|v| (v - mean).powi(2)).sum();
        Some(sum_sq / self.values.len() as f64)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Counts acceleration peaks as steps and reports cadence
#[derive(Debug, Clone)]
pub struct StepDetector {
    window_ms: u64,
    peak_threshold: f64,
    min_interval_ms: u64,
    steps: VecDeque<TimestampMs>,
    above_threshold: bool,
}

impl StepDetector {
    pub fn new(thresholds: &MotionThresholds) -> Self {
        Self {
            window_ms: thresholds.step_window_ms.max(1),
            peak_threshold: thresholds.step_peak_threshold,
            min_interval_ms: thresholds.step_min_interval_ms,
            steps: VecDeque::new(),
            above_threshold: false,
        }
    }

    /// Feed one accelerometer reading; true when a step is counted
    pub fn push(&mut self, acceleration: &Vec3, timestamp_ms: TimestampMs) -> bool {
        let dynamic = acceleration.norm() - STANDARD_GRAVITY;
        let rising = dynamic > self.peak_threshold && !self.above_threshold;
        self.above_threshold = dynamic > self.peak_threshold;

        let refractory = self
            .steps
            .back()
            .is_some_and(|last| timestamp_ms.saturating_sub(*last) < self.min_interval_ms);

        self.expire(timestamp_ms);
        if rising && !refractory {
            self.steps.push_back(timestamp_ms);
            return true;
        }
        false
    }

    /// Steps per second over the trailing window
    pub fn step_frequency_hz(&self, now_ms: TimestampMs) -> f64 {
        let count = self
            .steps
            .iter()
            .filter(|t| **t <= now_ms && now_ms - **t < self.window_ms)
            .count();
        count as f64 / (self.window_ms as f64 / 1000.0)
    }

    fn expire(&mut self, now_ms: TimestampMs) {
        while self
            .steps
            .front()
            .is_some_and(|t| now_ms.saturating_sub(*t) >= self.window_ms)
        {
            self.steps.pop_front();
        }
    }

    pub fn reset(&mut self) {
        self.steps.clear();
        self.above_threshold = false;
    }
}

pub struct MotionClassifier {
    thresholds: MotionThresholds,
    state: MotionState,
    confidence: f64,
    last_transition_ms: Option<TimestampMs>,
    candidate: Option<MotionState>,
    votes: u32,
}

impl MotionClassifier {
    pub fn new(thresholds: MotionThresholds) -> Self {
        Self {
            thresholds,
            state: MotionState::Unknown,
            confidence: 0.0,
            last_transition_ms: None,
            candidate: None,
            votes: 0,
        }
    }

    /// Raw band classification with no hysteresis
    pub fn vote(&self, accel_window: &SampleWindow, gyro_window: Option<&SampleWindow>, step_frequency_hz: f64) -> Classification {
        let t = &self.thresholds;
        let accel_variance = accel_window.variance().unwrap_or(0.0);
        let gyro_variance = gyro_window
            .filter(|w| w.len() >= t.min_samples)
            .and_then(SampleWindow::variance);

        let mut classification = Classification {
            state: MotionState::Unknown,
            confidence: 0.0,
            accel_variance,
            gyro_variance,
            step_frequency_hz,
        };
        if accel_window.len() < t.min_samples || !accel_variance.is_finite() {
            return classification;
        }

        let gyro_still = gyro_variance.map_or(true, |g| g <= t.stationary_max_gyro_variance);
        if accel_variance <= t.stationary_max_accel_variance
            && gyro_still
            && step_frequency_hz <= t.stationary_max_step_frequency_hz
        {
            let mut ratio = accel_variance / t.stationary_max_accel_variance;
            if let Some(g) = gyro_variance {
                ratio = ratio.max(g / t.stationary_max_gyro_variance);
            }
            if t.stationary_max_step_frequency_hz > 0.0 {
                ratio = ratio.max(step_frequency_hz / t.stationary_max_step_frequency_hz);
            }
            classification.state = MotionState::Stationary;
            classification.confidence = 0.5 + 0.49 * (1.0 - ratio.clamp(0.0, 1.0));
        } else if accel_variance <= t.walking_max_accel_variance
            && step_frequency_hz <= t.walking_max_step_frequency_hz
        {
            classification.state = MotionState::Walking;
            // Cadence inside the walking band backs up the variance vote
            classification.confidence = if step_frequency_hz > t.stationary_max_step_frequency_hz {
                0.8
            } else {
                0.6
            };
        } else {
            classification.state = MotionState::Running;
            classification.confidence = if step_frequency_hz > t.walking_max_step_frequency_hz
                || accel_variance > 2.0 * t.walking_max_accel_variance
            {
                0.85
            } else {
                0.7
            };
        }
        classification
    }

    /// Vote, then apply hysteresis. Returns the reported status and the
    /// transition, if one was accepted.
    pub fn classify(
        &mut self,
        accel_window: &SampleWindow,
        gyro_window: Option<&SampleWindow>,
        step_frequency_hz: f64,
        timestamp_ms: TimestampMs,
    ) -> (MotionStatus, Option<MotionTransition>) {
        let vote = self.vote(accel_window, gyro_window, step_frequency_hz);
        let transition = self.apply_vote(vote.state, vote.confidence, timestamp_ms);
        (self.status(timestamp_ms), transition)
    }

    fn apply_vote(&mut self, vote: MotionState, confidence: f64, now_ms: TimestampMs) -> Option<MotionTransition> {
        if vote == MotionState::Unknown {
            self.candidate = None;
            self.votes = 0;
            return None;
        }
        if vote == self.state {
            self.candidate = None;
            self.votes = 0;
            self.confidence = confidence;
            return None;
        }

        if self.candidate == Some(vote) {
            self.votes = self.votes.saturating_add(1);
        } else {
            self.candidate = Some(vote);
            self.votes = 1;
        }

        let t = &self.thresholds;
        let required = match (self.state, vote) {
            (MotionState::Stationary, _) => t.votes_to_leave_stationary,
            (_, MotionState::Stationary) => t.votes_to_enter_stationary,
            _ => t.votes_between_moving_states,
        };
        let dwell_elapsed = self.state == MotionState::Unknown
            || self
                .last_transition_ms
                .map_or(true, |last| now_ms.saturating_sub(last) >= t.min_state_duration_ms);

        if self.votes < required || !dwell_elapsed {
            return None;
        }

        let transition = MotionTransition {
            from: self.state,
            to: vote,
            confidence,
            timestamp_ms: now_ms,
        };
        info!(from = %transition.from, to = %transition.to, confidence, "motion state changed");

        self.state = vote;
        self.confidence = confidence;
        self.last_transition_ms = Some(now_ms);
        self.candidate = None;
        self.votes = 0;
        Some(transition)
    }

    pub fn status(&self, now_ms: TimestampMs) -> MotionStatus {
        MotionStatus {
            state: self.state,
            confidence: self.confidence,
            timestamp_ms: now_ms,
            time_since_last_transition_ms: self
                .last_transition_ms
                .map_or(0, |last| now_ms.saturating_sub(last)),
        }
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.thresholds.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_window() -> SampleWindow {
        let mut window = SampleWindow::new(50);
        for _ in 0..10 {
            window.push(STANDARD_GRAVITY);
        }
        window
    }

    /// Alternating ±1 around gravity: variance 1.0
    fn walking_window() -> SampleWindow {
        let mut window = SampleWindow::new(50);
        for i in 0..20 {
            let offset = if i % 2 == 0 { 1.0 } else { -1.0 };
            window.push(STANDARD_GRAVITY + offset);
        }
        window
    }

    fn stationary_classifier(at_ms: TimestampMs) -> MotionClassifier {
        let mut classifier = MotionClassifier::new(MotionThresholds::default());
        let still = constant_window();
        for i in 0..3 {
            classifier.classify(&still, None, 0.0, at_ms + i);
        }
        assert_eq!(classifier.state(), MotionState::Stationary);
        classifier
    }

    #[test]
    fn test_window_statistics() {
        let mut window = SampleWindow::new(3);
        assert!(window.variance().is_none());
        for v in [1.0, 2.0, 3.0, 4.0] {
            window.push(v);
        }
        assert!(window.is_full());
        assert_eq!(window.len(), 3);
        assert!((window.mean().unwrap() - 3.0).abs() < 1e-12);
        assert!((window.variance().unwrap() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_variance_is_stationary_after_min_samples() {
        let thresholds = MotionThresholds::default();
        let mut classifier = MotionClassifier::new(thresholds.clone());

        let mut short = SampleWindow::new(50);
        for _ in 0..thresholds.min_samples - 1 {
            short.push(STANDARD_GRAVITY);
        }
        assert_eq!(classifier.vote(&short, None, 0.0).state, MotionState::Unknown);

        let still = constant_window();
        let mut transition = None;
        for i in 0..thresholds.votes_to_enter_stationary as u64 {
            let (_, t) = classifier.classify(&still, None, 0.0, 100 * i);
            transition = transition.or(t);
        }

        let status = classifier.status(1000);
        assert_eq!(status.state, MotionState::Stationary);
        assert!(status.confidence >= 0.9);
        let transition = transition.unwrap();
        assert_eq!(transition.from, MotionState::Unknown);
        assert_eq!(transition.to, MotionState::Stationary);
    }

    #[test]
    fn test_band_votes() {
        let classifier = MotionClassifier::new(MotionThresholds::default());
        assert_eq!(classifier.vote(&walking_window(), None, 1.8).state, MotionState::Walking);
        assert_eq!(classifier.vote(&walking_window(), None, 3.2).state, MotionState::Running);

        let mut hard = SampleWindow::new(50);
        for i in 0..20 {
            hard.push(STANDARD_GRAVITY + if i % 2 == 0 { 3.0 } else { -3.0 });
        }
        assert_eq!(classifier.vote(&hard, None, 2.0).state, MotionState::Running);

        // Still accelerometer but turning in hand
        let mut spinning = SampleWindow::new(50);
        for i in 0..20 {
            spinning.push(if i % 2 == 0 { 0.0 } else { 1.0 });
        }
        let vote = classifier.vote(&constant_window(), Some(&spinning), 0.0);
        assert_ne!(vote.state, MotionState::Stationary);
    }

    #[test]
    fn test_leaving_stationary_needs_more_votes_than_entering() {
        let thresholds = MotionThresholds::default();
        assert!(thresholds.votes_to_leave_stationary > thresholds.votes_to_enter_stationary);

        let mut classifier = stationary_classifier(0);
        let moving = walking_window();
        let start = thresholds.min_state_duration_ms + 1000;

        for i in 0..thresholds.votes_to_leave_stationary - 1 {
            let (_, t) = classifier.classify(&moving, None, 1.8, start + i as u64);
            assert!(t.is_none());
        }
        let (status, t) = classifier.classify(&moving, None, 1.8, start + 100);
        assert_eq!(status.state, MotionState::Walking);
        assert!(t.is_some());

        // Back into Stationary with the smaller vote count once dwell time passed
        let still = constant_window();
        let later = start + 100 + thresholds.min_state_duration_ms;
        for i in 0..thresholds.votes_to_enter_stationary - 1 {
            assert!(classifier.classify(&still, None, 0.0, later + i as u64).1.is_none());
        }
        assert!(classifier.classify(&still, None, 0.0, later + 10).1.is_some());
        assert_eq!(classifier.state(), MotionState::Stationary);
    }

    #[test]
    fn test_oscillating_signal_never_transitions() {
        let mut classifier = stationary_classifier(0);
        let moving = walking_window();
        let still = constant_window();

        for i in 0..40u64 {
            let t = 5_000 + i * 100;
            let (status, transition) = if i % 2 == 0 {
                classifier.classify(&moving, None, 1.8, t)
            } else {
                classifier.classify(&still, None, 0.0, t)
            };
            assert!(transition.is_none());
            assert_eq!(status.state, MotionState::Stationary);
        }
    }

    #[test]
    fn test_no_transition_before_min_state_duration() {
        let thresholds = MotionThresholds::default();
        let mut classifier = stationary_classifier(0);
        let moving = walking_window();

        // Plenty of votes, but all inside the dwell time
        let mut t = 10;
        while t < thresholds.min_state_duration_ms {
            let (status, transition) = classifier.classify(&moving, None, 1.8, t);
            assert!(transition.is_none());
            assert_eq!(status.state, MotionState::Stationary);
            t += 100;
        }

        let (status, transition) = classifier.classify(&moving, None, 1.8, thresholds.min_state_duration_ms + 2);
        assert!(transition.is_some());
        assert_eq!(status.state, MotionState::Walking);
    }

    #[test]
    fn test_status_reports_time_since_transition() {
        let classifier = stationary_classifier(1_000);
        let status = classifier.status(4_000);
        assert_eq!(status.time_since_last_transition_ms, 4_000 - 1_002);
    }

    #[test]
    fn test_step_detector_cadence() {
        let thresholds = MotionThresholds::default();
        let mut detector = StepDetector::new(&thresholds);

        // 2 Hz steps sampled at 50 Hz for 5 s
        let mut steps = 0;
        for i in 0..250u64 {
            let t = i * 20;
            let phase = (t % 500) as f64 / 500.0;
            let bump = if phase < 0.1 { 3.0 } else { 0.0 };
            if detector.push(&Vec3::new(0.0, 0.0, STANDARD_GRAVITY + bump), t) {
                steps += 1;
            }
        }
        assert_eq!(steps, 10);
        assert!((detector.step_frequency_hz(4_980) - 2.0).abs() < 1e-9);

        detector.reset();
        assert_eq!(detector.step_frequency_hz(4_980), 0.0);
    }

    #[test]
    fn test_step_detector_refractory() {
        let thresholds = MotionThresholds::default();
        let mut detector = StepDetector::new(&thresholds);
        let high = Vec3::new(0.0, 0.0, STANDARD_GRAVITY + 3.0);
        let low = Vec3::new(0.0, 0.0, STANDARD_GRAVITY);

        assert!(detector.push(&high, 1_000));
        assert!(!detector.push(&low, 1_050));
        assert!(!detector.push(&high, 1_100));
        assert!(!detector.push(&low, 1_200));
        assert!(detector.push(&high, 1_300));
    }

    #[test]
    fn test_reset_returns_to_unknown() {
        let mut classifier = stationary_classifier(0);
        classifier.reset();
        assert_eq!(classifier.state(), MotionState::Unknown);
        assert_eq!(classifier.status(0).state, MotionState::Unknown);
    }
}
