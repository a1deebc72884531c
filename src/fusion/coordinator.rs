//! Per-tick fusion of all active sources into one confidence-scored position
//!
//! Each tick snapshots every source, weights them, blends them into a single
//! position, optionally removes moving-platform motion, decides indoor mode and
//! feeds a correction back into the inertial estimator. A tick with no active
//! source produces nothing; callers keep the previous position.

use crate::core::{
    Anchor, FusedPosition, GeoPosition, GnssFix, RangingReading, RssiReading, SourceEstimate, SourceKind,
    TimestampMs, Vec3, MAX_FUSED_CONFIDENCE,
};
use crate::fusion::gnss::GnssSource;
use crate::fusion::ranging::RangingSource;
use crate::fusion::source::PositionSource;
use crate::processing::inertial::{InertialEstimator, PoseEstimate};
use crate::processing::motion::MotionState;
use crate::processing::platform::{PlatformMotionCompensator, PlatformMotionState};
use crate::algorithms::coordinates::LocalFrame;
use crate::utils::config::FusionConfig;
use crate::utils::monitor::FusionStats;
use crate::validation::{FusionError, FusionResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

/// One-shot notifications raised by a tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FusionEvent {
    IndoorModeChanged { indoor: bool, timestamp_ms: TimestampMs },
    StationaryLockChanged { locked: bool, timestamp_ms: TimestampMs },
}

/// Weighted combination of source estimates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blend {
    pub position: Vec3,
    pub accuracy_m: f64,
    pub confidence: f64,
}

/// Blend estimates by weight; `None` if no source has positive weight.
///
/// `confidence = min(0.95, Σw / n)`, `accuracy = Σ(w·a) / Σw`, where `n` counts
/// only positive-weight sources. Zero-weight sources are dropped before blending,
/// and `tick` leaves them out of `FusedPosition::sources` as well.
pub fn blend(sources: &[SourceEstimate]) -> Option<Blend> {
    let active: Vec<&SourceEstimate> = sources.iter().filter(|s| s.weight > 0.0).collect();
    let primary = active.iter().copied().max_by(|a, b| a.weight.total_cmp(&b.weight))?;

    if active.len() == 1 {
        return Some(Blend {
            position: primary.position,
            accuracy_m: primary.accuracy_m,
            confidence: primary.weight.min(MAX_FUSED_CONFIDENCE),
        });
    }

    let total_weight: f64 = active.iter().map(|s| s.weight).sum();
    let position = active.iter().fold(Vec3::zeros(), |acc, s| acc + s.position * s.weight) / total_weight;
    let accuracy_m = active.iter().map(|s| s.weight * s.accuracy_m).sum::<f64>() / total_weight;
    let confidence = (total_weight / active.len() as f64).min(MAX_FUSED_CONFIDENCE);

    Some(Blend {
        position,
        accuracy_m,
        confidence,
    })
}

pub struct FusionCoordinator {
    config: FusionConfig,
    gnss: GnssSource,
    ranging: RangingSource,
    inertial: InertialEstimator,
    compensator: Option<PlatformMotionCompensator>,
    platform_state: Option<PlatformMotionState>,
    motion_state: MotionState,
    indoor: bool,
    locked_position: Option<Vec3>,
    last_fused: Option<FusedPosition>,
    history: VecDeque<FusedPosition>,
    events: Vec<FusionEvent>,
    stats: FusionStats,
}

impl FusionCoordinator {
    /// `origin` anchors the local frame; without it the first accepted fix does
    pub fn new(config: FusionConfig, anchors: Vec<Anchor>, origin: Option<GeoPosition>) -> Self {
        let compensator = config
            .enable_platform_motion_compensation
            .then(|| PlatformMotionCompensator::new(config.platform.clone()));

        Self {
            gnss: GnssSource::new(&config, origin),
            ranging: RangingSource::new(&config, anchors),
            inertial: InertialEstimator::new(config.inertial.clone()),
            compensator,
            platform_state: None,
            motion_state: MotionState::Unknown,
            indoor: false,
            locked_position: None,
            last_fused: None,
            history: VecDeque::with_capacity(config.history_capacity),
            events: Vec::new(),
            stats: FusionStats::new(),
            config,
        }
    }

    pub fn ingest_gnss(&mut self, fix: &GnssFix) -> FusionResult<()> {
        let result = self.gnss.ingest(fix).map(|_| ());
        self.record(result)
    }

    pub fn ingest_range(&mut self, reading: &RangingReading) -> FusionResult<()> {
        let result = self.ranging.ingest_range(reading).map(|_| ());
        self.record(result)
    }

    pub fn ingest_rssi(&mut self, reading: &RssiReading) -> FusionResult<()> {
        let result = self.ranging.ingest_rssi(reading).map(|_| ());
        self.record(result)
    }

    pub fn ingest_inertial(&mut self, accel: Vec3, gyro: Vec3, timestamp_ms: TimestampMs) -> FusionResult<PoseEstimate> {
        let result = self.inertial.integrate_at(accel, gyro, timestamp_ms);
        if let Err(e) = &result {
            self.stats.record_error(e);
        }
        result
    }

    fn record(&mut self, result: FusionResult<()>) -> FusionResult<()> {
        if let Err(e) = &result {
            debug!("reading rejected: {}", e);
            self.stats.record_error(e);
        }
        result
    }

    pub fn set_motion_state(&mut self, state: MotionState) {
        self.motion_state = state;
    }

    pub fn set_platform_state(&mut self, state: Option<PlatformMotionState>) {
        self.platform_state = state;
    }

    /// Latest estimate of every fresh source, weights adjusted, highest weight first
    pub fn collect_sources(&mut self, now_ms: TimestampMs) -> Vec<SourceEstimate> {
        let staleness = &self.config.staleness;
        let mut sources = Vec::with_capacity(3);

        if let Some(gnss) = self.gnss.snapshot(now_ms, staleness.gnss_ms) {
            sources.push(gnss);
        }
        match self.ranging.estimate(now_ms, staleness.ranging_ms) {
            Ok(estimate) => sources.push(estimate),
            Err(FusionError::StaleInput { .. }) => {}
            Err(e) => {
                debug!("trilateration unavailable: {}", e);
                self.stats.record_error(&e);
            }
        }
        if let Some(inertial) = self.inertial.snapshot(now_ms, staleness.inertial_ms) {
            sources.push(inertial);
        }

        if self.detect_indoor(&sources) {
            let factor = self.config.weights.indoor_gnss_factor;
            for source in sources.iter_mut().filter(|s| s.source == SourceKind::Gnss) {
                *source = source.clone().with_weight(source.weight * factor);
            }
        }

        sources.sort_by(|a, b| b.weight.total_cmp(&a.weight).then_with(|| a.source.cmp(&b.source)));
        sources
    }

    /// Indoor when GNSS is absent or poor while a local source is present
    fn detect_indoor(&self, sources: &[SourceEstimate]) -> bool {
        let gnss_reliable = sources
            .iter()
            .find(|s| s.source == SourceKind::Gnss)
            .is_some_and(|g| g.accuracy_m <= self.config.indoor_accuracy_threshold_m);
        let local_present = sources
            .iter()
            .any(|s| matches!(s.source, SourceKind::Trilateration | SourceKind::Inertial));
        !gnss_reliable && local_present
    }

    /// Run one fusion tick
    pub fn tick(&mut self, now_ms: TimestampMs) -> Option<FusedPosition> {
        self.stats.ticks += 1;

        let sources = self.collect_sources(now_ms);
        let indoor = self.detect_indoor(&sources);
        if indoor != self.indoor && !sources.is_empty() {
            info!(indoor, "indoor mode changed");
            self.indoor = indoor;
            self.stats.indoor_transitions += 1;
            self.events.push(FusionEvent::IndoorModeChanged {
                indoor,
                timestamp_ms: now_ms,
            });
        }

        let sources: Vec<SourceEstimate> = sources.into_iter().filter(|s| s.weight > 0.0).collect();
        let Some(fused) = blend(&sources) else {
            self.stats.empty_ticks += 1;
            return None;
        };

        let (position, platform_corrected) = self.compensate_platform(fused.position);
        let (position, stationary_locked) = self.apply_stationary_lock(position, fused.accuracy_m, now_ms);

        let result = FusedPosition {
            position,
            geo_position: self.gnss.frame().map(|f| f.to_geodetic(&position)),
            accuracy_m: fused.accuracy_m,
            confidence: fused.confidence,
            sources,
            indoor: self.indoor,
            platform_corrected,
            stationary_locked,
            timestamp_ms: now_ms,
        };

        self.feed_back_inertial(&result.sources, fused.confidence);

        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        if self.config.history_capacity > 0 {
            self.history.push_back(result.clone());
        }
        self.last_fused = Some(result.clone());
        self.stats.fused_positions += 1;
        Some(result)
    }

    fn compensate_platform(&self, position: Vec3) -> (Vec3, bool) {
        let (Some(compensator), Some(state)) = (&self.compensator, &self.platform_state) else {
            return (position, false);
        };
        match compensator.compensate(&position, state) {
            Some(corrected) => (corrected, true),
            None => (position, false),
        }
    }

    fn apply_stationary_lock(&mut self, position: Vec3, accuracy_m: f64, now_ms: TimestampMs) -> (Vec3, bool) {
        if self.motion_state != MotionState::Stationary {
            if self.locked_position.take().is_some() {
                info!("stationary lock released");
                self.events.push(FusionEvent::StationaryLockChanged {
                    locked: false,
                    timestamp_ms: now_ms,
                });
            }
            return (position, false);
        }

        if let Some(locked) = self.locked_position {
            return (locked, true);
        }
        if accuracy_m <= self.config.target_accuracy_m {
            info!(accuracy_m, "stationary lock engaged");
            self.locked_position = Some(position);
            self.events.push(FusionEvent::StationaryLockChanged {
                locked: true,
                timestamp_ms: now_ms,
            });
            return (position, true);
        }
        (position, false)
    }

    /// Pull inertial state toward the absolute sources of this tick
    fn feed_back_inertial(&mut self, sources: &[SourceEstimate], confidence: f64) {
        let absolute: Vec<SourceEstimate> = sources.iter().filter(|s| s.source.is_absolute()).cloned().collect();
        let Some(anchor) = blend(&absolute) else {
            return;
        };

        let total: f64 = sources.iter().map(|s| s.weight).sum();
        let absolute_share = absolute.iter().map(|s| s.weight).sum::<f64>() / total;
        let trust = self.config.weights.inertial_feedback_gain * confidence * absolute_share;
        self.inertial.correct(&anchor.position, trust);
    }

    pub fn last_fused(&self) -> Option<&FusedPosition> {
        self.last_fused.as_ref()
    }

    /// Fused positions, oldest first
    pub fn history(&self) -> impl Iterator<Item = &FusedPosition> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn drain_events(&mut self) -> Vec<FusionEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_indoor(&self) -> bool {
        self.indoor
    }

    pub fn is_stationary_locked(&self) -> bool {
        self.locked_position.is_some()
    }

    pub fn frame(&self) -> Option<&LocalFrame> {
        self.gnss.frame()
    }

    pub fn inertial(&self) -> &InertialEstimator {
        &self.inertial
    }

    pub(crate) fn inertial_mut(&mut self) -> &mut InertialEstimator {
        &mut self.inertial
    }

    pub fn gnss(&self) -> &GnssSource {
        &self.gnss
    }

    pub fn ranging(&self) -> &RangingSource {
        &self.ranging
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn stats(&self) -> &FusionStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut FusionStats {
        &mut self.stats
    }

    /// Discard every filter, history and counter
    pub fn reset(&mut self) {
        PositionSource::reset(&mut self.gnss);
        PositionSource::reset(&mut self.ranging);
        self.inertial.reset();
        self.platform_state = None;
        self.motion_state = MotionState::Unknown;
        self.indoor = false;
        self.locked_position = None;
        self.last_fused = None;
        self.history.clear();
        self.events.clear();
        self.stats = FusionStats::new();
    }
}
