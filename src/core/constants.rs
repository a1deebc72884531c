//! Physical constants and fixed system parameters

/// Standard gravity (m/s²)
pub const STANDARD_GRAVITY: f64 = 9.80665;

/// Mean earth radius used by the local tangent plane approximation (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Scale between reported GNSS accuracy (meters) and coordinate noise (degrees)
pub const GEO_NOISE_SCALE: f64 = 1e5;

/// Fusion never reports more confidence than this
pub const MAX_FUSED_CONFIDENCE: f64 = 0.95;

/// Floor for distances derived from signal strength (meters)
pub const MIN_RANGE_M: f64 = 0.1;
