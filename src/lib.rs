//! Multi-Source Position Fusion
//!
//! Estimates an agent's position by reconciling satellite fixes, inertial dead
//! reckoning and BLE/UWB ranging against fixed anchors. Each source is filtered
//! on its own; a coordinator blends them once per tick into a single
//! confidence-scored position, tracks indoor mode and feeds corrections back
//! into the inertial estimator.

pub mod core;
pub mod algorithms;
pub mod processing;
pub mod validation;
pub mod fusion;
pub mod api;
pub mod utils;

// Re-export commonly used types
pub use core::{
    Anchor, AnchorCalibration, FusedPosition, GeoPosition, GnssFix, RangingReading, RangingTechnology, RssiReading,
    SensorSample, SourceEstimate, SourceKind, TimestampMs, Vec3,
};
pub use algorithms::{LocalFrame, RangeMeasurement, TrilaterationResult, TrilaterationSolver};
pub use processing::{
    InertialEstimator, MotionClassifier, MotionState, MotionStatus, MotionTransition, PlatformMotionCompensator,
    PlatformMotionState, ScalarKalmanFilter,
};
pub use validation::{FusionError, FusionResult};
pub use fusion::{FusionCoordinator, FusionEvent, PositionSource, TrackingPipeline};
pub use api::{CallbackTracker, SessionHandle, SessionOutputs, TrackingSession};
pub use utils::{FusionConfig, FusionStats};
