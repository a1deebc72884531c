//! Satellite fixes: gating, jump rejection and Kalman smoothing

use crate::algorithms::coordinates::LocalFrame;
use crate::core::{GeoPosition, GnssFix, SourceEstimate, SourceKind, TimestampMs, Vec3};
use crate::fusion::source::{is_fresh, PositionSource};
use crate::processing::kalman::GeoKalmanFilter;
use crate::utils::config::FusionConfig;
use crate::validation::{validate_fix, FusionError, FusionResult, JumpFilter, JumpVerdict};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq)]
struct AcceptedFix {
    position: Vec3,
    accuracy_m: f64,
    timestamp_ms: TimestampMs,
}

pub struct GnssSource {
    max_accuracy_m: f64,
    min_update_interval_ms: u64,
    accuracy_scale_m: f64,
    filter: GeoKalmanFilter,
    jump_filter: JumpFilter,
    /// Venue origin supplied by the caller; survives resets
    configured_origin: Option<GeoPosition>,
    frame: Option<LocalFrame>,
    latest: Option<AcceptedFix>,
    bad_readings: u64,
}

impl GnssSource {
    pub fn new(config: &FusionConfig, origin: Option<GeoPosition>) -> Self {
        Self {
            max_accuracy_m: config.max_accuracy_threshold_m,
            min_update_interval_ms: config.min_update_interval_ms,
            accuracy_scale_m: config.weights.gnss_accuracy_scale_m,
            filter: GeoKalmanFilter::new(&config.kalman),
            jump_filter: JumpFilter::new(
                config.max_jump_distance_m,
                config.max_speed_mps,
                config.max_consecutive_rejections,
            ),
            configured_origin: origin,
            frame: origin.map(LocalFrame::new),
            latest: None,
            bad_readings: 0,
        }
    }

    /// Gate, filter and store a fix, returning the resulting estimate
    pub fn ingest(&mut self, fix: &GnssFix) -> FusionResult<SourceEstimate> {
        validate_fix(fix)?;

        if fix.accuracy_m > self.max_accuracy_m {
            self.bad_readings += 1;
            debug!(accuracy_m = fix.accuracy_m, "fix dropped for poor accuracy");
            return Err(FusionError::AccuracyRejected {
                accuracy_m: fix.accuracy_m,
                threshold_m: self.max_accuracy_m,
            });
        }

        if let Some(latest) = &self.latest {
            let elapsed_ms = fix.timestamp_ms.saturating_sub(latest.timestamp_ms);
            if elapsed_ms < self.min_update_interval_ms {
                return Err(FusionError::Throttled { elapsed_ms });
            }
        }

        let geo = fix.geo();
        let frame = *self.frame.get_or_insert_with(|| {
            info!(latitude = geo.latitude, longitude = geo.longitude, "local frame origin set from first fix");
            LocalFrame::new(geo)
        });

        match self.jump_filter.check(&frame.to_local(&geo), fix.timestamp_ms) {
            Ok(JumpVerdict::Accepted) => {}
            Ok(JumpVerdict::Reseeded) => self.filter.reset(),
            Err(e) => {
                self.bad_readings += 1;
                return Err(e);
            }
        }

        let smoothed = self.filter.update(&geo, fix.accuracy_m, fix.timestamp_ms);
        let accepted = AcceptedFix {
            position: frame.to_local(&smoothed),
            accuracy_m: fix.accuracy_m,
            timestamp_ms: fix.timestamp_ms,
        };
        self.latest = Some(accepted);
        Ok(self.estimate_from(&accepted))
    }

    /// `1 / (1 + accuracy / scale)`: 0.5 at the scale accuracy
    pub fn weight_for_accuracy(&self, accuracy_m: f64) -> f64 {
        1.0 / (1.0 + accuracy_m.max(0.0) / self.accuracy_scale_m)
    }

    fn estimate_from(&self, fix: &AcceptedFix) -> SourceEstimate {
        SourceEstimate::new(
            SourceKind::Gnss,
            fix.position,
            fix.accuracy_m,
            self.weight_for_accuracy(fix.accuracy_m),
            fix.timestamp_ms,
        )
    }

    pub fn frame(&self) -> Option<&LocalFrame> {
        self.frame.as_ref()
    }

    /// Fixes dropped for accuracy or rejected as jumps since the last reset
    pub fn bad_reading_count(&self) -> u64 {
        self.bad_readings
    }

    pub fn last_accuracy_m(&self) -> Option<f64> {
        self.latest.map(|f| f.accuracy_m)
    }
}

impl PositionSource for GnssSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Gnss
    }

    fn snapshot(&self, now_ms: TimestampMs, staleness_ms: u64) -> Option<SourceEstimate> {
        let latest = self.latest.as_ref()?;
        is_fresh(latest.timestamp_ms, now_ms, staleness_ms).then(|| self.estimate_from(latest))
    }

    fn reset(&mut self) {
        self.filter.reset();
        self.jump_filter.reset();
        self.frame = self.configured_origin.map(LocalFrame::new);
        self.latest = None;
        self.bad_readings = 0;
    }
}
