//! Running counters for a tracking session

use crate::validation::FusionError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionStats {
    pub ticks: u64,
    /// Ticks with no active source
    pub empty_ticks: u64,
    pub fused_positions: u64,
    pub jump_rejections: u64,
    pub accuracy_rejections: u64,
    pub throttled_fixes: u64,
    pub invalid_timesteps: u64,
    pub degenerate_geometries: u64,
    pub invalid_samples: u64,
    /// Samples overwritten in the input queue before they were processed
    pub dropped_samples: u64,
    pub indoor_transitions: u64,
    pub motion_transitions: u64,
}

impl FusionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a rejected reading under its category
    pub fn record_error(&mut self, error: &FusionError) {
        match error {
            FusionError::JumpRejected { .. } => self.jump_rejections += 1,
            FusionError::AccuracyRejected { .. } => self.accuracy_rejections += 1,
            FusionError::Throttled { .. } => self.throttled_fixes += 1,
            FusionError::InvalidTimestep { .. } => self.invalid_timesteps += 1,
            FusionError::DegenerateGeometry { .. } => self.degenerate_geometries += 1,
            FusionError::InvalidSample { .. } | FusionError::UnknownAnchor { .. } => {
                self.invalid_samples += 1
            }
            FusionError::StaleInput { .. } | FusionError::Config(_) | FusionError::SessionClosed => {}
        }
    }

    /// Fraction of ticks that produced a fused position
    pub fn availability(&self) -> f64 {
        if self.ticks == 0 {
            0.0
        } else {
            self.fused_positions as f64 / self.ticks as f64
        }
    }
}
