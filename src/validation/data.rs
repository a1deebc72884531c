use crate::core::{GnssFix, SensorSample, TimestampMs, Vec3};
use crate::validation::{FusionError, FusionResult};
use tracing::{debug, info};

/// ±16 g accelerometer range (m/s²)
const MAX_ACCELERATION_MPS2: f64 = 16.0 * crate::core::STANDARD_GRAVITY;
/// 2000 deg/s gyroscope range (rad/s)
const MAX_ANGULAR_RATE_RPS: f64 = 35.0;
/// Earth's field is 25-65 µT; allow for local disturbance
const MAX_MAGNETIC_FIELD_UT: f64 = 1000.0;
const MIN_RSSI_DBM: f64 = -120.0;

fn invalid(reason: impl Into<String>) -> FusionError {
    FusionError::InvalidSample { reason: reason.into() }
}

fn finite(v: &Vec3) -> bool {
    v.iter().all(|c| c.is_finite())
}

/// Boundary validation for every incoming sample
pub fn validate_sample(sample: &SensorSample) -> FusionResult<()> {
    match sample {
        SensorSample::Accelerometer { acceleration, .. } => {
            if !finite(acceleration) || acceleration.norm() > MAX_ACCELERATION_MPS2 {
                return Err(invalid(format!("acceleration out of range: {:?}", acceleration.as_slice())));
            }
        }
        SensorSample::Gyroscope { angular_velocity, .. } => {
            if !finite(angular_velocity) || angular_velocity.norm() > MAX_ANGULAR_RATE_RPS {
                return Err(invalid(format!("angular rate out of range: {:?}", angular_velocity.as_slice())));
            }
        }
        SensorSample::Magnetometer { field, .. } => {
            if !finite(field) || field.norm() > MAX_MAGNETIC_FIELD_UT {
                return Err(invalid("magnetic field out of range"));
            }
        }
        SensorSample::Gnss(fix) => validate_fix(fix)?,
        SensorSample::Ranging(reading) => {
            if reading.anchor_id.is_empty() {
                return Err(invalid("ranging reading without anchor id"));
            }
            if !(reading.distance_m.is_finite() && reading.distance_m >= 0.0) {
                return Err(invalid(format!("range {} m for anchor {}", reading.distance_m, reading.anchor_id)));
            }
            if !(reading.quality.is_finite() && reading.quality >= 0.0) {
                return Err(invalid(format!("range quality {} for anchor {}", reading.quality, reading.anchor_id)));
            }
        }
        SensorSample::Rssi(reading) => {
            if reading.anchor_id.is_empty() {
                return Err(invalid("rssi reading without anchor id"));
            }
            if !(reading.rssi_dbm.is_finite() && (MIN_RSSI_DBM..=0.0).contains(&reading.rssi_dbm)) {
                return Err(invalid(format!("rssi {} dBm for anchor {}", reading.rssi_dbm, reading.anchor_id)));
            }
        }
    }
    Ok(())
}

/// Range checks for a satellite fix
pub fn validate_fix(fix: &GnssFix) -> FusionResult<()> {
    if !(fix.latitude.is_finite() && (-90.0..=90.0).contains(&fix.latitude)) {
        return Err(invalid(format!("latitude {}", fix.latitude)));
    }
    if !(fix.longitude.is_finite() && (-180.0..=180.0).contains(&fix.longitude)) {
        return Err(invalid(format!("longitude {}", fix.longitude)));
    }
    if !fix.altitude.is_finite() {
        return Err(invalid("non-finite altitude"));
    }
    if !(fix.accuracy_m.is_finite() && fix.accuracy_m > 0.0) {
        return Err(invalid(format!("accuracy {} m", fix.accuracy_m)));
    }
    if fix.speed_mps.is_some_and(|s| !(s.is_finite() && s >= 0.0)) {
        return Err(invalid("negative or non-finite speed"));
    }
    if fix.heading_deg.is_some_and(|h| !h.is_finite()) {
        return Err(invalid("non-finite heading"));
    }
    Ok(())
}

/// Outcome of an accepted jump check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpVerdict {
    Accepted,
    /// Accepted as a relocation after persistent rejections
    Reseeded,
}

/// Rejects absolute fixes that imply an implausible displacement
///
/// A fix is accepted if it lies within `max(max_jump_distance, max_speed * dt)`
/// of the last accepted one. After `max_consecutive_rejections` rejections in a
/// row the next fix is accepted as a genuine relocation.
#[derive(Debug, Clone)]
pub struct JumpFilter {
    max_jump_distance_m: f64,
    max_speed_mps: f64,
    max_consecutive_rejections: u32,
    last_accepted: Option<(Vec3, TimestampMs)>,
    consecutive_rejections: u32,
    total_rejections: u64,
}

impl JumpFilter {
    pub fn new(max_jump_distance_m: f64, max_speed_mps: f64, max_consecutive_rejections: u32) -> Self {
        Self {
            max_jump_distance_m,
            max_speed_mps,
            max_consecutive_rejections,
            last_accepted: None,
            consecutive_rejections: 0,
            total_rejections: 0,
        }
    }

    pub fn check(&mut self, position: &Vec3, timestamp_ms: TimestampMs) -> FusionResult<JumpVerdict> {
        let Some((last_position, last_ms)) = self.last_accepted else {
            self.accept(position, timestamp_ms);
            return Ok(JumpVerdict::Accepted);
        };

        let dt_s = timestamp_ms.saturating_sub(last_ms) as f64 / 1000.0;
        let distance_m = (position - last_position).norm();
        let allowed_m = self.max_jump_distance_m.max(self.max_speed_mps * dt_s);
        if distance_m <= allowed_m {
            self.accept(position, timestamp_ms);
            return Ok(JumpVerdict::Accepted);
        }

        if self.consecutive_rejections >= self.max_consecutive_rejections {
            info!(distance_m, rejections = self.consecutive_rejections, "jump filter reseeded");
            self.accept(position, timestamp_ms);
            return Ok(JumpVerdict::Reseeded);
        }
        self.consecutive_rejections += 1;
        self.total_rejections += 1;

        let implied_speed_mps = if dt_s > 0.0 { distance_m / dt_s } else { f64::INFINITY };
        debug!(distance_m, implied_speed_mps, "fix rejected as jump");
        Err(FusionError::JumpRejected { distance_m, implied_speed_mps })
    }

    fn accept(&mut self, position: &Vec3, timestamp_ms: TimestampMs) {
        self.last_accepted = Some((*position, timestamp_ms));
        self.consecutive_rejections = 0;
    }

    pub fn consecutive_rejections(&self) -> u32 {
        self.consecutive_rejections
    }

    pub fn total_rejections(&self) -> u64 {
        self.total_rejections
    }

    pub fn reset(&mut self) {
        self.last_accepted = None;
        self.consecutive_rejections = 0;
        self.total_rejections = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RangingReading, RssiReading};

    fn fix(latitude: f64, accuracy_m: f64) -> GnssFix {
        GnssFix {
            latitude,
            longitude: 18.0,
            altitude: 0.0,
            accuracy_m,
            speed_mps: None,
            heading_deg: None,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_valid_samples_pass() {
        let samples = [
            SensorSample::Accelerometer { acceleration: Vec3::new(0.1, 0.2, 9.8), timestamp_ms: 0 },
            SensorSample::Gyroscope { angular_velocity: Vec3::new(0.0, 0.0, 1.0), timestamp_ms: 0 },
            SensorSample::Magnetometer { field: Vec3::new(20.0, 0.0, -40.0), timestamp_ms: 0 },
            SensorSample::Gnss(fix(59.0, 4.0)),
            SensorSample::Ranging(RangingReading {
                anchor_id: "a1".into(),
                distance_m: 3.0,
                quality: 0.1,
                timestamp_ms: 0,
            }),
            SensorSample::Rssi(RssiReading { anchor_id: "b1".into(), rssi_dbm: -70.0, timestamp_ms: 0 }),
        ];
        for sample in &samples {
            assert!(validate_sample(sample).is_ok(), "{}", sample.kind_name());
        }
    }

    #[test]
    fn test_invalid_samples_rejected() {
        let samples = [
            SensorSample::Accelerometer { acceleration: Vec3::new(f64::NAN, 0.0, 9.8), timestamp_ms: 0 },
            SensorSample::Accelerometer { acceleration: Vec3::new(0.0, 0.0, 500.0), timestamp_ms: 0 },
            SensorSample::Gyroscope { angular_velocity: Vec3::new(0.0, 0.0, 100.0), timestamp_ms: 0 },
            SensorSample::Gnss(fix(91.0, 4.0)),
            SensorSample::Gnss(fix(59.0, 0.0)),
            SensorSample::Ranging(RangingReading {
                anchor_id: "a1".into(),
                distance_m: -1.0,
                quality: 0.1,
                timestamp_ms: 0,
            }),
            SensorSample::Ranging(RangingReading {
                anchor_id: String::new(),
                distance_m: 1.0,
                quality: 0.1,
                timestamp_ms: 0,
            }),
            SensorSample::Rssi(RssiReading { anchor_id: "b1".into(), rssi_dbm: 5.0, timestamp_ms: 0 }),
        ];
        for sample in &samples {
            assert!(
                matches!(validate_sample(sample), Err(FusionError::InvalidSample { .. })),
                "{} should be rejected",
                sample.kind_name()
            );
        }
    }

    #[test]
    fn test_jump_filter_rejects_implausible_speed() {
        let mut filter = JumpFilter::new(50.0, 12.0, 5);
        filter.check(&Vec3::zeros(), 0).unwrap();

        // 30 m in 1 s is inside the always-tolerated distance
        filter.check(&Vec3::new(30.0, 0.0, 0.0), 1_000).unwrap();

        match filter.check(&Vec3::new(130.0, 0.0, 0.0), 2_000) {
            Err(FusionError::JumpRejected { distance_m, implied_speed_mps }) => {
                assert!((distance_m - 100.0).abs() < 1e-9);
                assert!((implied_speed_mps - 100.0).abs() < 1e-9);
            }
            other => panic!("expected jump rejection, got {:?}", other),
        }
        assert_eq!(filter.consecutive_rejections(), 1);

        // Long gaps allow proportionally larger moves
        filter.check(&Vec3::new(130.0, 0.0, 0.0), 11_000).unwrap();
        assert_eq!(filter.consecutive_rejections(), 0);
        assert_eq!(filter.total_rejections(), 1);
    }

    #[test]
    fn test_jump_filter_reseeds_after_persistent_rejections() {
        let mut filter = JumpFilter::new(10.0, 2.0, 3);
        filter.check(&Vec3::zeros(), 0).unwrap();

        let relocated = Vec3::new(500.0, 0.0, 0.0);
        for i in 1..=3 {
            assert!(filter.check(&relocated, i * 1_000).is_err());
        }
        assert_eq!(filter.check(&relocated, 4_000), Ok(JumpVerdict::Reseeded));
        assert_eq!(filter.check(&Vec3::new(501.0, 0.0, 0.0), 5_000), Ok(JumpVerdict::Accepted));
        assert_eq!(filter.total_rejections(), 3);
    }

    #[test]
    fn test_jump_filter_reset() {
        let mut filter = JumpFilter::new(10.0, 2.0, 3);
        filter.check(&Vec3::zeros(), 0).unwrap();
        filter.reset();
        filter.check(&Vec3::new(1_000.0, 0.0, 0.0), 100).unwrap();
    }
}
