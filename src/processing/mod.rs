//! Per-source filters and estimators

pub mod inertial;
pub mod kalman;
pub mod motion;
pub mod platform;

pub use inertial::{InertialEstimator, PoseEstimate};
pub use kalman::{FilterState, GeoKalmanFilter, RangeSmoother, ScalarKalmanFilter};
pub use motion::{
    Classification, MotionClassifier, MotionState, MotionStatus, MotionTransition, SampleWindow, StepDetector,
};
pub use platform::{PlatformMotionCompensator, PlatformMotionDetector, PlatformMotionState, PlatformObservation};
