//! Core data types for the position fusion engine

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Position or vector in the local East-North-Up frame (meters)
pub type Vec3 = Vector3<f64>;

/// Milliseconds on the caller's monotonic clock
pub type TimestampMs = u64;

/// Geodetic position (WGS84 degrees, altitude in meters)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl GeoPosition {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self { latitude, longitude, altitude }
    }
}

/// Independent location signal feeding the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceKind {
    /// Satellite fix smoothed by the geographic Kalman filter
    Gnss,
    /// Dead reckoning from accelerometer and gyroscope
    Inertial,
    /// BLE/UWB ranging against fixed anchors
    Trilateration,
}

impl SourceKind {
    /// Absolute sources can anchor inertial drift
    pub fn is_absolute(&self) -> bool {
        !matches!(self, SourceKind::Inertial)
    }
}

/// Clamp a reliability weight into `[0, 1]`; NaN counts as no trust.
pub fn clamp_weight(weight: f64) -> f64 {
    if weight.is_nan() {
        0.0
    } else {
        weight.clamp(0.0, 1.0)
    }
}

/// Normalized output of any source-specific filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEstimate {
    pub source: SourceKind,
    pub position: Vec3,
    pub accuracy_m: f64,
    /// Reliability in `[0, 1]`
    pub weight: f64,
    pub timestamp_ms: TimestampMs,
}

impl SourceEstimate {
    pub fn new(
        source: SourceKind,
        position: Vec3,
        accuracy_m: f64,
        weight: f64,
        timestamp_ms: TimestampMs,
    ) -> Self {
        Self {
            source,
            position,
            accuracy_m,
            weight: clamp_weight(weight),
            timestamp_ms,
        }
    }

    /// Replace the weight, clamping it into range
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = clamp_weight(weight);
        self
    }
}

/// One fused estimate per coordinator tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedPosition {
    /// Local ENU position (meters)
    pub position: Vec3,
    /// Geodetic position, when the local frame origin is known
    pub geo_position: Option<GeoPosition>,
    pub accuracy_m: f64,
    /// Confidence in `[0, 0.95]`
    pub confidence: f64,
    /// Sources with positive weight, highest weight first
    pub sources: Vec<SourceEstimate>,
    pub indoor: bool,
    pub platform_corrected: bool,
    pub stationary_locked: bool,
    pub timestamp_ms: TimestampMs,
}

impl FusedPosition {
    pub fn source(&self, kind: SourceKind) -> Option<&SourceEstimate> {
        self.sources.iter().find(|s| s.source == kind)
    }

    pub fn has_source(&self, kind: SourceKind) -> bool {
        self.source(kind).is_some()
    }

    pub fn primary_source(&self) -> Option<SourceKind> {
        self.sources.first().map(|s| s.source)
    }
}

/// Radio technology used to range against an anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangingTechnology {
    Ble,
    Uwb,
}

/// Path-loss calibration for signal-strength ranging
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorCalibration {
    /// Expected RSSI at 1 m (dBm)
    pub reference_rssi_dbm: f64,
    /// Environment-dependent path-loss exponent, typically 2-4
    pub path_loss_exponent: f64,
}

impl Default for AnchorCalibration {
    fn default() -> Self {
        Self {
            reference_rssi_dbm: -59.0,
            path_loss_exponent: 2.0,
        }
    }
}

/// Fixed radio anchor with a known position in the local frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub id: String,
    pub position: Vec3,
    pub technology: RangingTechnology,
    pub calibration: AnchorCalibration,
}

impl Anchor {
    /// UWB anchor with default calibration
    pub fn new(id: impl Into<String>, position: Vec3) -> Self {
        Self {
            id: id.into(),
            position,
            technology: RangingTechnology::Uwb,
            calibration: AnchorCalibration::default(),
        }
    }

    /// BLE beacon ranged through signal strength
    pub fn ble(id: impl Into<String>, position: Vec3, calibration: AnchorCalibration) -> Self {
        Self {
            id: id.into(),
            position,
            technology: RangingTechnology::Ble,
            calibration,
        }
    }
}

/// Satellite position fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GnssFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// Reported horizontal accuracy (meters, 1σ)
    pub accuracy_m: f64,
    pub speed_mps: Option<f64>,
    pub heading_deg: Option<f64>,
    pub timestamp_ms: TimestampMs,
}

impl GnssFix {
    pub fn geo(&self) -> GeoPosition {
        GeoPosition::new(self.latitude, self.longitude, self.altitude)
    }
}

/// Distance to an anchor from UWB time-of-flight or a calibrated BLE link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangingReading {
    pub anchor_id: String,
    pub distance_m: f64,
    /// Range standard deviation (meters); smaller is better
    pub quality: f64,
    pub timestamp_ms: TimestampMs,
}

/// Raw BLE signal strength against an anchor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RssiReading {
    pub anchor_id: String,
    pub rssi_dbm: f64,
    pub timestamp_ms: TimestampMs,
}

/// Timestamped reading from one physical sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SensorSample {
    /// Specific force in the body frame (m/s², gravity included)
    Accelerometer { acceleration: Vec3, timestamp_ms: TimestampMs },
    /// Angular velocity in the body frame (rad/s)
    Gyroscope { angular_velocity: Vec3, timestamp_ms: TimestampMs },
    /// Magnetic field in the body frame (µT)
    Magnetometer { field: Vec3, timestamp_ms: TimestampMs },
    Gnss(GnssFix),
    Ranging(RangingReading),
    Rssi(RssiReading),
}

impl SensorSample {
    pub fn timestamp_ms(&self) -> TimestampMs {
        match self {
            SensorSample::Accelerometer { timestamp_ms, .. }
            | SensorSample::Gyroscope { timestamp_ms, .. }
            | SensorSample::Magnetometer { timestamp_ms, .. } => *timestamp_ms,
            SensorSample::Gnss(fix) => fix.timestamp_ms,
            SensorSample::Ranging(reading) => reading.timestamp_ms,
            SensorSample::Rssi(reading) => reading.timestamp_ms,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            SensorSample::Accelerometer { .. } => "accelerometer",
            SensorSample::Gyroscope { .. } => "gyroscope",
            SensorSample::Magnetometer { .. } => "magnetometer",
            SensorSample::Gnss(_) => "gnss",
            SensorSample::Ranging(_) => "ranging",
            SensorSample::Rssi(_) => "rssi",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_clamped_on_construction() {
        let high = SourceEstimate::new(SourceKind::Gnss, Vec3::zeros(), 3.0, 1.7, 0);
        let negative = SourceEstimate::new(SourceKind::Gnss, Vec3::zeros(), 3.0, -0.2, 0);
        let nan = SourceEstimate::new(SourceKind::Gnss, Vec3::zeros(), 3.0, f64::NAN, 0);

        assert_eq!(high.weight, 1.0);
        assert_eq!(negative.weight, 0.0);
        assert_eq!(nan.weight, 0.0);
    }

    #[test]
    fn test_only_inertial_is_relative() {
        assert!(SourceKind::Gnss.is_absolute());
        assert!(SourceKind::Trilateration.is_absolute());
        assert!(!SourceKind::Inertial.is_absolute());
    }

    #[test]
    fn test_sample_timestamp() {
        let sample = SensorSample::Ranging(RangingReading {
            anchor_id: "a1".to_string(),
            distance_m: 2.0,
            quality: 0.1,
            timestamp_ms: 42,
        });
        assert_eq!(sample.timestamp_ms(), 42);
        assert_eq!(sample.kind_name(), "ranging");
    }
}
