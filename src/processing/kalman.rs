use crate::core::{GeoPosition, TimestampMs, GEO_NOISE_SCALE};
use crate::utils::config::KalmanConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot of a scalar filter after at least one measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    pub estimate: f64,
    /// Variance of the estimate; never negative
    pub error_covariance: f64,
    pub last_update_ms: Option<TimestampMs>,
}

/// One-dimensional Kalman filter with a random-walk process model
///
/// The filter starts uninitialized. The first measurement seeds the estimate
/// (returned unfiltered) with the measurement noise as its covariance; every
/// later call runs predict (`P += Q`) and update (`K = P / (P + R)`).
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarKalmanFilter {
    process_noise: f64,
    state: Option<FilterState>,
}

impl ScalarKalmanFilter {
    pub fn new(process_noise: f64) -> Self {
        Self {
            process_noise: sanitize_noise(process_noise),
            state: None,
        }
    }

    /// Filter a measurement with noise variance `measurement_noise`
    pub fn update(&mut self, measurement: f64, measurement_noise: f64) -> f64 {
        self.apply(measurement, measurement_noise, None)
    }

    /// As [`update`](Self::update), recording when the measurement was taken
    pub fn update_at(&mut self, measurement: f64, measurement_noise: f64, timestamp_ms: TimestampMs) -> f64 {
        self.apply(measurement, measurement_noise, Some(timestamp_ms))
    }

    fn apply(&mut self, measurement: f64, measurement_noise: f64, timestamp_ms: Option<TimestampMs>) -> f64 {
        if !measurement.is_finite() {
            // Leave the state untouched; nothing sensible can be blended in
            return self.state.map_or(measurement, |s| s.estimate);
        }
        let r = sanitize_noise(measurement_noise);

        let Some(state) = self.state.as_mut() else {
            self.state = Some(FilterState {
                estimate: measurement,
                error_covariance: r,
                last_update_ms: timestamp_ms,
            });
            return measurement;
        };

        let predicted = state.error_covariance + self.process_noise;
        let denominator = predicted + r;
        let gain = if denominator > 0.0 { predicted / denominator } else { 0.0 };

        state.estimate += gain * (measurement - state.estimate);
        state.error_covariance = ((1.0 - gain) * predicted).max(0.0);
        if timestamp_ms.is_some() {
            state.last_update_ms = timestamp_ms;
        }
        state.estimate
    }

    /// Back to the uninitialized state; the next measurement reseeds
    pub fn reset(&mut self) {
        self.state = None;
    }

    pub fn state(&self) -> Option<FilterState> {
        self.state
    }

    pub fn estimate(&self) -> Option<f64> {
        self.state.map(|s| s.estimate)
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    pub fn process_noise(&self) -> f64 {
        self.process_noise
    }
}

fn sanitize_noise(noise: f64) -> f64 {
    if noise.is_finite() {
        noise.abs()
    } else {
        0.0
    }
}

/// Latitude, longitude and altitude smoothed by independent scalar filters
///
/// Horizontal noise is expressed in squared degrees, `R = (accuracy / 1e5)²`,
/// so a fix reporting 20 m accuracy is trusted far less than one reporting 3 m.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoKalmanFilter {
    latitude: ScalarKalmanFilter,
    longitude: ScalarKalmanFilter,
    altitude: ScalarKalmanFilter,
}

impl GeoKalmanFilter {
    pub fn new(config: &KalmanConfig) -> Self {
        Self {
            latitude: ScalarKalmanFilter::new(config.gnss_process_noise),
            longitude: ScalarKalmanFilter::new(config.gnss_process_noise),
            altitude: ScalarKalmanFilter::new(config.altitude_process_noise),
        }
    }

    pub fn update(&mut self, geo: &GeoPosition, accuracy_m: f64, timestamp_ms: TimestampMs) -> GeoPosition {
        let horizontal_noise = (accuracy_m / GEO_NOISE_SCALE).powi(2);
        let vertical_noise = accuracy_m.powi(2);

        GeoPosition {
            latitude: self.latitude.update_at(geo.latitude, horizontal_noise, timestamp_ms),
            longitude: self.longitude.update_at(geo.longitude, horizontal_noise, timestamp_ms),
            altitude: self.altitude.update_at(geo.altitude, vertical_noise, timestamp_ms),
        }
    }

    pub fn estimate(&self) -> Option<GeoPosition> {
        Some(GeoPosition {
            latitude: self.latitude.estimate()?,
            longitude: self.longitude.estimate()?,
            altitude: self.altitude.estimate()?,
        })
    }

    /// Horizontal 1σ of the smoothed estimate (meters)
    pub fn horizontal_sigma_m(&self) -> Option<f64> {
        let lat = self.latitude.state()?.error_covariance;
        let lon = self.longitude.state()?.error_covariance;
        Some(lat.max(lon).sqrt() * GEO_NOISE_SCALE)
    }

    pub fn reset(&mut self) {
        self.latitude.reset();
        self.longitude.reset();
        self.altitude.reset();
    }

    pub fn is_initialized(&self) -> bool {
        self.latitude.is_initialized()
    }
}

/// Per-anchor range smoothing; `R = quality²`
#[derive(Debug, Clone, Default)]
pub struct RangeSmoother {
    process_noise: f64,
    filters: HashMap<String, ScalarKalmanFilter>,
}

impl RangeSmoother {
    pub fn new(process_noise: f64) -> Self {
        Self {
            process_noise,
            filters: HashMap::new(),
        }
    }

    pub fn smooth(&mut self, anchor_id: &str, distance_m: f64, quality: f64, timestamp_ms: TimestampMs) -> f64 {
        let process_noise = self.process_noise;
        self.filters
            .entry(anchor_id.to_string())
            .or_insert_with(|| ScalarKalmanFilter::new(process_noise))
            .update_at(distance_m, quality * quality, timestamp_ms)
    }

    /// Smoothed range variance for an anchor
    pub fn variance(&self, anchor_id: &str) -> Option<f64> {
        self.filters.get(anchor_id)?.state().map(|s| s.error_covariance)
    }

    pub fn reset(&mut self) {
        self.filters.clear();
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_measurement_seeds_filter() {
        let mut filter = ScalarKalmanFilter::new(0.01);
        assert!(!filter.is_initialized());

        assert_eq!(filter.update(12.5, 4.0), 12.5);
        let state = filter.state().unwrap();
        assert_eq!(state.estimate, 12.5);
        assert_eq!(state.error_covariance, 4.0);
    }

    #[test]
    fn test_reset_then_single_measurement_is_unfiltered() {
        let mut filter = ScalarKalmanFilter::new(0.01);
        filter.update(1.0, 1.0);
        filter.update(2.0, 1.0);
        filter.update(3.0, 1.0);

        filter.reset();
        assert!(filter.state().is_none());
        assert_eq!(filter.update(-7.25, 1.0), -7.25);
    }

    #[test]
    fn test_covariance_strictly_decreases_without_process_noise() {
        let mut filter = ScalarKalmanFilter::new(0.0);
        filter.update(5.0, 1.0);

        let mut previous = filter.state().unwrap().error_covariance;
        for _ in 0..20 {
            filter.update(5.0, 1.0);
            let current = filter.state().unwrap().error_covariance;
            assert!(current < previous);
            assert!(current >= 0.0);
            previous = current;
        }
    }

    #[test]
    fn test_converges_monotonically_to_repeated_measurement() {
        let mut filter = ScalarKalmanFilter::new(0.001);
        filter.update(0.0, 1.0);

        let mut previous_error = f64::INFINITY;
        let mut previous_covariance = f64::INFINITY;
        for _ in 0..50 {
            let estimate = filter.update(10.0, 1.0);
            let error = (10.0 - estimate).abs();
            let covariance = filter.state().unwrap().error_covariance;
            assert!(error < previous_error);
            assert!(covariance <= previous_covariance + 1e-15);
            previous_error = error;
            previous_covariance = covariance;
        }
        assert!(previous_error < 0.5);
    }

    #[test]
    fn test_noisier_measurement_moves_estimate_less() {
        let mut trusted = ScalarKalmanFilter::new(0.0);
        let mut noisy = ScalarKalmanFilter::new(0.0);
        trusted.update(0.0, 1.0);
        noisy.update(0.0, 1.0);

        let a = trusted.update(10.0, 0.5);
        let b = noisy.update(10.0, 50.0);
        assert!(a > b);
    }

    #[test]
    fn test_non_finite_measurement_ignored() {
        let mut filter = ScalarKalmanFilter::new(0.01);
        filter.update(3.0, 1.0);
        let before = filter.state();

        assert_eq!(filter.update(f64::NAN, 1.0), 3.0);
        assert_eq!(filter.state(), before);
    }

    #[test]
    fn test_update_at_records_timestamp() {
        let mut filter = ScalarKalmanFilter::new(0.01);
        filter.update_at(1.0, 1.0, 100);
        filter.update_at(1.1, 1.0, 250);
        assert_eq!(filter.state().unwrap().last_update_ms, Some(250));
    }

    #[test]
    fn test_geo_filter_trusts_accurate_fixes_more() {
        let config = KalmanConfig::default();
        let start = GeoPosition::new(59.0, 18.0, 10.0);
        let moved = GeoPosition::new(59.0001, 18.0, 10.0);

        let mut accurate = GeoKalmanFilter::new(&config);
        accurate.update(&start, 5.0, 0);
        let a = accurate.update(&moved, 3.0, 1000);

        let mut poor = GeoKalmanFilter::new(&config);
        poor.update(&start, 5.0, 0);
        let b = poor.update(&moved, 40.0, 1000);

        assert!(a.latitude > b.latitude);
        assert!(poor.horizontal_sigma_m().unwrap() > accurate.horizontal_sigma_m().unwrap());
    }

    #[test]
    fn test_geo_filter_seeds_and_resets() {
        let mut filter = GeoKalmanFilter::new(&KalmanConfig::default());
        let fix = GeoPosition::new(40.0, -74.0, 5.0);

        assert_eq!(filter.update(&fix, 3.0, 0), fix);
        assert!((filter.horizontal_sigma_m().unwrap() - 3.0).abs() < 1e-9);

        filter.reset();
        assert!(filter.estimate().is_none());
    }

    #[test]
    fn test_range_smoother_keeps_anchors_separate() {
        let mut smoother = RangeSmoother::new(0.01);
        assert_eq!(smoother.smooth("a1", 4.0, 0.1, 0), 4.0);
        assert_eq!(smoother.smooth("a2", 9.0, 0.1, 0), 9.0);

        let smoothed = smoother.smooth("a1", 4.2, 0.1, 100);
        assert!(smoothed > 4.0 && smoothed < 4.2);
        assert_eq!(smoother.len(), 2);

        assert!(smoother.variance("a3").is_none());
        smoother.reset();
        assert!(smoother.is_empty());
    }
}
