//! BLE/UWB ranging against the anchor table

use crate::algorithms::trilateration::{rssi_to_distance, RangeMeasurement, TrilaterationSolver};
use crate::core::{Anchor, RangingReading, RangingTechnology, RssiReading, SourceEstimate, SourceKind, TimestampMs};
use crate::fusion::source::{is_fresh, PositionSource};
use crate::processing::kalman::RangeSmoother;
use crate::utils::config::FusionConfig;
use crate::validation::{FusionError, FusionResult};
use std::collections::HashMap;

/// Trilateration never reports better than this (meters)
const MIN_RANGING_ACCURACY_M: f64 = 0.05;

/// Time-of-flight ranging is good to a few centimeters
const UWB_RANGE_SIGMA_M: f64 = 0.05;

/// Signal-strength ranges degrade with distance; never better than 1 m
fn rssi_range_sigma(distance_m: f64) -> f64 {
    (0.3 * distance_m).max(1.0)
}

/// Best range sigma the anchor's radio can deliver at this distance
fn range_sigma_floor(technology: RangingTechnology, distance_m: f64) -> f64 {
    match technology {
        RangingTechnology::Uwb => UWB_RANGE_SIGMA_M,
        RangingTechnology::Ble => rssi_range_sigma(distance_m),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LatestRange {
    distance_m: f64,
    quality: f64,
    timestamp_ms: TimestampMs,
}

pub struct RangingSource {
    solver: TrilaterationSolver,
    smoother: RangeSmoother,
    latest: HashMap<String, LatestRange>,
    full_anchor_count: usize,
    residual_scale_m: f64,
}

impl RangingSource {
    pub fn new(config: &FusionConfig, anchors: impl IntoIterator<Item = Anchor>) -> Self {
        Self {
            solver: TrilaterationSolver::new(anchors, config.trilateration.clone()),
            smoother: RangeSmoother::new(config.kalman.range_process_noise),
            latest: HashMap::new(),
            full_anchor_count: config.weights.trilateration_full_anchor_count.max(1),
            residual_scale_m: config.weights.trilateration_residual_scale_m,
        }
    }

    /// Store a smoothed range; returns the smoothed distance
    pub fn ingest_range(&mut self, reading: &RangingReading) -> FusionResult<f64> {
        self.store(&reading.anchor_id, reading.distance_m, reading.quality, reading.timestamp_ms)
    }

    /// Convert signal strength through the anchor's path-loss calibration, then store
    pub fn ingest_rssi(&mut self, reading: &RssiReading) -> FusionResult<f64> {
        let anchor = self.anchor(&reading.anchor_id)?;
        let calibration = anchor.calibration;
        let distance_m = rssi_to_distance(
            reading.rssi_dbm,
            calibration.reference_rssi_dbm,
            calibration.path_loss_exponent,
        );
        self.store(&reading.anchor_id, distance_m, rssi_range_sigma(distance_m), reading.timestamp_ms)
    }

    fn anchor(&self, anchor_id: &str) -> FusionResult<&Anchor> {
        self.solver.anchor(anchor_id).ok_or_else(|| FusionError::UnknownAnchor {
            anchor_id: anchor_id.to_string(),
        })
    }

    fn store(&mut self, anchor_id: &str, distance_m: f64, quality: f64, timestamp_ms: TimestampMs) -> FusionResult<f64> {
        self.anchor(anchor_id)?;

        let smoothed = self.smoother.smooth(anchor_id, distance_m, quality, timestamp_ms);
        let sigma = self.smoother.variance(anchor_id).map_or(quality, f64::sqrt);
        self.latest.insert(
            anchor_id.to_string(),
            LatestRange {
                distance_m: smoothed,
                quality: sigma,
                timestamp_ms,
            },
        );
        Ok(smoothed)
    }

    /// Trilaterate the fresh ranges
    ///
    /// `StaleInput` when no anchor was heard within `staleness_ms`,
    /// `DegenerateGeometry` when the fresh ranges cannot be solved.
    pub fn estimate(&self, now_ms: TimestampMs, staleness_ms: u64) -> FusionResult<SourceEstimate> {
        let fresh: Vec<(&String, &LatestRange)> = self
            .latest
            .iter()
            .filter(|(_, r)| is_fresh(r.timestamp_ms, now_ms, staleness_ms))
            .collect();
        if fresh.is_empty() {
            return Err(FusionError::StaleInput {
                kind: SourceKind::Trilateration,
            });
        }

        // A reported quality can never beat what the anchor's radio delivers
        let mut measurements = Vec::with_capacity(fresh.len());
        let mut floors = Vec::with_capacity(fresh.len());
        for (id, r) in &fresh {
            let floor = range_sigma_floor(self.anchor(id)?.technology, r.distance_m);
            measurements.push(RangeMeasurement::new(id.as_str(), r.distance_m, r.quality.max(floor)));
            floors.push(floor);
        }
        let newest_ms = fresh.iter().map(|(_, r)| r.timestamp_ms).max().unwrap_or(now_ms);

        let result = self.solver.try_solve(&measurements)?;
        let residual = result.residual_error_m;
        let coverage = (result.anchors_used as f64 / self.full_anchor_count as f64).min(1.0);
        let weight = coverage / (1.0 + residual / self.residual_scale_m);

        // The solver keeps the best-rated ranges; the tightest radio among them bounds the accuracy
        let mut rated: Vec<(f64, f64)> = measurements.iter().map(|m| m.quality).zip(floors).collect();
        rated.sort_by(|a, b| a.0.total_cmp(&b.0));
        let radio_floor_m = rated
            .iter()
            .take(result.anchors_used)
            .map(|(_, floor)| *floor)
            .fold(f64::INFINITY, f64::min);

        Ok(SourceEstimate::new(
            SourceKind::Trilateration,
            result.position,
            residual.max(radio_floor_m).max(MIN_RANGING_ACCURACY_M),
            weight,
            newest_ms,
        ))
    }

    pub fn anchor_count(&self) -> usize {
        self.solver.anchor_count()
    }
}

impl PositionSource for RangingSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Trilateration
    }

    fn snapshot(&self, now_ms: TimestampMs, staleness_ms: u64) -> Option<SourceEstimate> {
        self.estimate(now_ms, staleness_ms).ok()
    }

    fn reset(&mut self) {
        self.smoother.reset();
        self.latest.clear();
    }
}
