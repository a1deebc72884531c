//! Callback-based API for event-driven hosts
//!
//! For hosts that already own a sensor event loop and a timer: push samples as
//! they arrive, call `tick` on the fusion period, and registered callbacks fire
//! synchronously for every fused position, motion transition and fusion event.

use crate::core::{Anchor, FusedPosition, GeoPosition, SensorSample, TimestampMs};
use crate::fusion::coordinator::FusionEvent;
use crate::fusion::pipeline::TrackingPipeline;
use crate::processing::motion::MotionTransition;
use crate::utils::config::FusionConfig;
use crate::utils::monitor::FusionStats;
use crate::validation::FusionResult;
use std::collections::BTreeMap;

/// Callback function type for fused positions
pub type PositionCallback = Box<dyn Fn(&FusedPosition) + Send>;

/// Callback function type for accepted motion transitions
pub type MotionCallback = Box<dyn Fn(&MotionTransition) + Send>;

/// Callback function type for indoor / stationary-lock changes
pub type EventCallback = Box<dyn Fn(&FusionEvent) + Send>;

/// Callback registration handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackHandle(u32);

impl CallbackHandle {
    pub fn id(&self) -> u32 {
        self.0
    }
}

pub struct CallbackTracker {
    pipeline: TrackingPipeline,
    callback_counter: u32,
    position_callbacks: BTreeMap<CallbackHandle, PositionCallback>,
    motion_callbacks: BTreeMap<CallbackHandle, MotionCallback>,
    event_callbacks: BTreeMap<CallbackHandle, EventCallback>,
}

impl CallbackTracker {
    /// Validates the configuration before building the pipeline
    pub fn new(config: FusionConfig, anchors: Vec<Anchor>, origin: Option<GeoPosition>) -> FusionResult<Self> {
        config.validate()?;
        Ok(Self {
            pipeline: TrackingPipeline::new(config, anchors, origin),
            callback_counter: 0,
            position_callbacks: BTreeMap::new(),
            motion_callbacks: BTreeMap::new(),
            event_callbacks: BTreeMap::new(),
        })
    }

    fn next_handle(&mut self) -> CallbackHandle {
        self.callback_counter += 1;
        CallbackHandle(self.callback_counter)
    }

    pub fn register_position_callback(&mut self, callback: PositionCallback) -> CallbackHandle {
        let handle = self.next_handle();
        self.position_callbacks.insert(handle, callback);
        handle
    }

    pub fn register_motion_callback(&mut self, callback: MotionCallback) -> CallbackHandle {
        let handle = self.next_handle();
        self.motion_callbacks.insert(handle, callback);
        handle
    }

    pub fn register_event_callback(&mut self, callback: EventCallback) -> CallbackHandle {
        let handle = self.next_handle();
        self.event_callbacks.insert(handle, callback);
        handle
    }

    /// Returns false if the handle was not registered
    pub fn unregister_callback(&mut self, handle: CallbackHandle) -> bool {
        self.position_callbacks.remove(&handle).is_some()
            || self.motion_callbacks.remove(&handle).is_some()
            || self.event_callbacks.remove(&handle).is_some()
    }

    pub fn callback_count(&self) -> usize {
        self.position_callbacks.len() + self.motion_callbacks.len() + self.event_callbacks.len()
    }

    /// Apply a sample; motion callbacks fire for any transition it caused
    pub fn push_sample(&mut self, sample: &SensorSample) -> FusionResult<()> {
        let result = self.pipeline.push_sample(sample);
        for transition in self.pipeline.drain_transitions() {
            for callback in self.motion_callbacks.values() {
                callback(&transition);
            }
        }
        result
    }

    /// Run a fusion tick and notify subscribers
    pub fn tick(&mut self, now_ms: TimestampMs) -> Option<FusedPosition> {
        let fused = self.pipeline.tick(now_ms);
        if let Some(position) = &fused {
            for callback in self.position_callbacks.values() {
                callback(position);
            }
        }
        for event in self.pipeline.drain_events() {
            for callback in self.event_callbacks.values() {
                callback(&event);
            }
        }
        fused
    }

    pub fn pipeline(&self) -> &TrackingPipeline {
        &self.pipeline
    }

    pub fn stats(&self) -> &FusionStats {
        self.pipeline.stats()
    }

    /// Discard all tracking state; registered callbacks stay
    pub fn reset(&mut self) {
        self.pipeline.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RangingReading, Vec3, STANDARD_GRAVITY};
    use crate::processing::motion::MotionState;
    use std::sync::{Arc, Mutex};

    fn venue() -> Vec<Anchor> {
        vec![
            Anchor::new("a1", Vec3::new(0.0, 0.0, 0.0)),
            Anchor::new("a2", Vec3::new(20.0, 0.0, 0.0)),
            Anchor::new("a3", Vec3::new(0.0, 20.0, 0.0)),
        ]
    }

    fn feed_ranges(tracker: &mut CallbackTracker, truth: Vec3, timestamp_ms: TimestampMs) {
        for anchor in venue() {
            tracker
                .push_sample(&SensorSample::Ranging(RangingReading {
                    distance_m: (truth - anchor.position).norm(),
                    anchor_id: anchor.id,
                    quality: 0.1,
                    timestamp_ms,
                }))
                .unwrap();
        }
    }

    #[test]
    fn test_position_and_event_callbacks_fire() {
        let mut tracker = CallbackTracker::new(FusionConfig::default(), venue(), None).unwrap();
        let positions = Arc::new(Mutex::new(Vec::new()));
        let events = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&positions);
        tracker.register_position_callback(Box::new(move |p: &FusedPosition| sink.lock().unwrap().push(p.position)));
        let sink = Arc::clone(&events);
        tracker.register_event_callback(Box::new(move |e: &FusionEvent| sink.lock().unwrap().push(*e)));

        let truth = Vec3::new(4.0, 7.0, 0.0);
        feed_ranges(&mut tracker, truth, 0);
        assert!(tracker.tick(0).is_some());

        let positions = positions.lock().unwrap();
        assert_eq!(positions.len(), 1);
        assert!((positions[0] - truth).norm() < 1e-3);
        assert_eq!(
            *events.lock().unwrap(),
            vec![FusionEvent::IndoorModeChanged { indoor: true, timestamp_ms: 0 }]
        );
    }

    #[test]
    fn test_motion_callback_fires_on_transition() {
        let mut tracker = CallbackTracker::new(FusionConfig::default(), venue(), None).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        tracker.register_motion_callback(Box::new(move |t: &MotionTransition| sink.lock().unwrap().push(t.to)));

        for i in 0..30u64 {
            tracker
                .push_sample(&SensorSample::Accelerometer {
                    acceleration: Vec3::new(0.0, 0.0, STANDARD_GRAVITY),
                    timestamp_ms: i * 20,
                })
                .unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec![MotionState::Stationary]);
    }

    #[test]
    fn test_unregister() {
        let mut tracker = CallbackTracker::new(FusionConfig::default(), venue(), None).unwrap();
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        let handle = tracker.register_position_callback(Box::new(move |_: &FusedPosition| *sink.lock().unwrap() += 1));
        let other = tracker.register_motion_callback(Box::new(|_: &MotionTransition| {}));
        assert_ne!(handle, other);
        assert_eq!(tracker.callback_count(), 2);

        assert!(tracker.unregister_callback(handle));
        assert!(!tracker.unregister_callback(handle));

        feed_ranges(&mut tracker, Vec3::new(4.0, 7.0, 0.0), 0);
        tracker.tick(0);
        assert_eq!(*count.lock().unwrap(), 0);
        assert_eq!(tracker.callback_count(), 1);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = FusionConfig::default();
        config.weights.inertial_feedback_gain = -1.0;
        assert!(CallbackTracker::new(config, venue(), None).is_err());
    }
}
