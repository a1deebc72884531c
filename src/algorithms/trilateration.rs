//! Range-based position solver against fixed BLE/UWB anchors
//!
//! The solve is seeded with a quality-weighted centroid of the anchors in use
//! and then refined with a damped Gauss-Newton iteration on the weighted
//! range residuals. The residual error at the final candidate is reported as
//! an accuracy signal for the fusion layer, not as ground truth.

use crate::core::{Anchor, Vec3, MIN_RANGE_M};
use crate::utils::config::TrilaterationConfig;
use crate::validation::{FusionError, FusionResult};
use nalgebra::Matrix3;
use std::collections::HashMap;

/// Keeps `1 / quality` finite for perfect measurements
const QUALITY_EPSILON: f64 = 1e-3;

/// Refinement stops once the update is smaller than this (meters)
const CONVERGENCE_TOLERANCE_M: f64 = 1e-6;

/// One range against a known anchor
#[derive(Debug, Clone, PartialEq)]
pub struct RangeMeasurement {
    pub anchor_id: String,
    pub distance_m: f64,
    /// Range standard deviation (meters); smaller is better
    pub quality: f64,
}

impl RangeMeasurement {
    pub fn new(anchor_id: impl Into<String>, distance_m: f64, quality: f64) -> Self {
        Self {
            anchor_id: anchor_id.into(),
            distance_m,
            quality,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrilaterationResult {
    pub position: Vec3,
    /// Quality-weighted mean absolute range residual (meters)
    pub residual_error_m: f64,
    pub anchors_used: usize,
    pub iterations: usize,
}

/// Measurement paired with its anchor position
#[derive(Debug, Clone, Copy)]
struct Ranged {
    position: Vec3,
    distance: f64,
    weight: f64,
}

pub struct TrilaterationSolver {
    anchors: HashMap<String, Anchor>,
    config: TrilaterationConfig,
}

impl TrilaterationSolver {
    pub fn new(anchors: impl IntoIterator<Item = Anchor>, config: TrilaterationConfig) -> Self {
        Self {
            anchors: anchors.into_iter().map(|a| (a.id.clone(), a)).collect(),
            config,
        }
    }

    pub fn anchor(&self, anchor_id: &str) -> Option<&Anchor> {
        self.anchors.get(anchor_id)
    }

    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    /// Solve for position; `None` on fewer than 3 usable measurements or degenerate geometry
    pub fn solve(&self, measurements: &[RangeMeasurement]) -> Option<TrilaterationResult> {
        self.try_solve(measurements).ok()
    }

    /// Same as [`solve`](Self::solve) but reports why no solution exists
    pub fn try_solve(&self, measurements: &[RangeMeasurement]) -> FusionResult<TrilaterationResult> {
        let selected = self.select_measurements(measurements);
        if selected.len() < 3 {
            return Err(FusionError::DegenerateGeometry {
                reason: format!("{} usable measurements, at least 3 required", selected.len()),
            });
        }

        self.check_geometry(&selected)?;

        let seed = weighted_centroid(&selected);
        let (position, iterations) = refine(seed, &selected, self.config.max_iterations);
        if !position.iter().all(|v| v.is_finite()) {
            return Err(FusionError::DegenerateGeometry {
                reason: "solver diverged".to_string(),
            });
        }

        Ok(TrilaterationResult {
            position,
            residual_error_m: residual_error(&position, &selected),
            anchors_used: selected.len(),
            iterations,
        })
    }

    /// Keep the best-quality valid measurement per known anchor, best first
    fn select_measurements(&self, measurements: &[RangeMeasurement]) -> Vec<Ranged> {
        let mut best: HashMap<&str, (&RangeMeasurement, &Anchor)> = HashMap::new();
        for m in measurements {
            if !(m.distance_m.is_finite() && m.distance_m >= 0.0) {
                continue;
            }
            if !(m.quality.is_finite() && m.quality >= 0.0) {
                continue;
            }
            let Some(anchor) = self.anchors.get(&m.anchor_id) else {
                continue;
            };
            match best.get(m.anchor_id.as_str()) {
                Some((existing, _)) if existing.quality <= m.quality => {}
                _ => {
                    best.insert(m.anchor_id.as_str(), (m, anchor));
                }
            }
        }

        let mut ordered: Vec<(&RangeMeasurement, &Anchor)> = best.into_values().collect();
        ordered.sort_by(|a, b| {
            a.0.quality
                .total_cmp(&b.0.quality)
                .then_with(|| a.0.anchor_id.cmp(&b.0.anchor_id))
        });

        ordered
            .into_iter()
            .take(self.config.max_measurements)
            .map(|(m, anchor)| Ranged {
                position: anchor.position,
                distance: m.distance_m,
                weight: 1.0 / (m.quality + QUALITY_EPSILON),
            })
            .collect()
    }

    /// Reject anchors that are too close together or all on one line
    fn check_geometry(&self, selected: &[Ranged]) -> FusionResult<()> {
        let min_separation = self.config.min_anchor_separation_m;

        let mut widest = (0, 0, 0.0);
        for i in 0..selected.len() {
            for j in (i + 1)..selected.len() {
                let separation = (selected[i].position - selected[j].position).norm();
                if separation < min_separation {
                    return Err(FusionError::DegenerateGeometry {
                        reason: format!("anchors {:.2} m apart, minimum {:.2} m", separation, min_separation),
                    });
                }
                if separation > widest.2 {
                    widest = (i, j, separation);
                }
            }
        }

        let (a, b, span) = widest;
        let origin = selected[a].position;
        let direction = (selected[b].position - origin) / span;
        let max_offset = selected
            .iter()
            .map(|r| {
                let rel = r.position - origin;
                (rel - direction * rel.dot(&direction)).norm()
            })
            .fold(0.0_f64, f64::max);

        if max_offset < min_separation / 2.0 {
            return Err(FusionError::DegenerateGeometry {
                reason: format!("anchors collinear (max offset {:.3} m)", max_offset),
            });
        }
        Ok(())
    }
}

fn weighted_centroid(selected: &[Ranged]) -> Vec3 {
    let total: f64 = selected.iter().map(|r| r.weight).sum();
    selected
        .iter()
        .fold(Vec3::zeros(), |acc, r| acc + r.position * r.weight)
        / total
}

fn weighted_cost(position: &Vec3, selected: &[Ranged]) -> f64 {
    selected
        .iter()
        .map(|r| {
            let residual = r.distance - (position - r.position).norm();
            r.weight * residual * residual
        })
        .sum()
}

fn residual_error(position: &Vec3, selected: &[Ranged]) -> f64 {
    let total: f64 = selected.iter().map(|r| r.weight).sum();
    selected
        .iter()
        .map(|r| r.weight * (r.distance - (position - r.position).norm()).abs())
        .sum::<f64>()
        / total
}

/// Levenberg-damped Gauss-Newton on the weighted range residuals
fn refine(seed: Vec3, selected: &[Ranged], max_iterations: usize) -> (Vec3, usize) {
    let mut position = seed;
    let mut cost = weighted_cost(&position, selected);
    let mut lambda = 1e-3;
    let mut iterations = 0;

    for _ in 0..max_iterations {
        iterations += 1;

        let mut normal = Matrix3::zeros();
        let mut rhs = Vec3::zeros();
        for r in selected {
            let offset = position - r.position;
            let range = offset.norm();
            if range < 1e-9 {
                continue;
            }
            let jacobian = offset / range;
            let residual = r.distance - range;
            normal += jacobian * jacobian.transpose() * r.weight;
            rhs += jacobian * (r.weight * residual);
        }

        let scale = normal.trace().max(1e-12);
        let damped = normal + Matrix3::identity() * (lambda * scale);
        let Some(step) = damped.lu().solve(&rhs) else {
            break;
        };

        let candidate = position + step;
        let candidate_cost = weighted_cost(&candidate, selected);
        if candidate_cost <= cost {
            position = candidate;
            cost = candidate_cost;
            lambda = (lambda * 0.1).max(1e-9);
            if step.norm() < CONVERGENCE_TOLERANCE_M {
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e6 {
                break;
            }
        }
    }

    (position, iterations)
}

/// Log-distance path-loss model: `10^((reference - rssi) / (10 n))`, never below 0.1 m.
pub fn rssi_to_distance(rssi_dbm: f64, reference_rssi_dbm: f64, path_loss_exponent: f64) -> f64 {
    if !(rssi_dbm.is_finite() && reference_rssi_dbm.is_finite()) {
        return MIN_RANGE_M;
    }
    let exponent = if path_loss_exponent.is_finite() && path_loss_exponent > 0.0 {
        path_loss_exponent
    } else {
        2.0
    };

    let distance = 10f64.powf((reference_rssi_dbm - rssi_dbm) / (10.0 * exponent));
    if distance.is_finite() {
        distance.max(MIN_RANGE_M)
    } else {
        MIN_RANGE_M
    }
}
