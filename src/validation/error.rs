//! Error classification for the fusion engine
//!
//! Nothing here is fatal: the worst outcome of a bad input is that a sample is
//! skipped or a tick produces no fused position.

use crate::core::SourceKind;
use crate::utils::config::ConfigError;
use thiserror::Error;

/// Result type for fusion operations
pub type FusionResult<T> = Result<T, FusionError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FusionError {
    /// Source has no reading inside its staleness window
    #[error("{kind:?} source is stale")]
    StaleInput { kind: SourceKind },

    /// Fewer than 3 usable anchors, or anchors too close / collinear
    #[error("degenerate anchor geometry: {reason}")]
    DegenerateGeometry { reason: String },

    /// Absolute fix implies an implausible displacement since the last accepted fix
    #[error("position jump rejected: {distance_m:.1} m at {implied_speed_mps:.1} m/s")]
    JumpRejected { distance_m: f64, implied_speed_mps: f64 },

    /// Integration step outside `(0, max_dt]`
    #[error("invalid integration timestep: {dt_s} s")]
    InvalidTimestep { dt_s: f64 },

    /// Sample failed boundary validation
    #[error("invalid sample: {reason}")]
    InvalidSample { reason: String },

    /// GNSS fix accuracy worse than the configured ceiling
    #[error("fix accuracy {accuracy_m:.1} m exceeds {threshold_m:.1} m")]
    AccuracyRejected { accuracy_m: f64, threshold_m: f64 },

    /// GNSS fix arrived before the minimum update interval elapsed
    #[error("fix throttled: {elapsed_ms} ms since last accepted fix")]
    Throttled { elapsed_ms: u64 },

    #[error("unknown anchor: {anchor_id}")]
    UnknownAnchor { anchor_id: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Tracking session is no longer running
    #[error("tracking session closed")]
    SessionClosed,
}

impl FusionError {
    /// Rejections caused by a single bad reading, as opposed to configuration or lifecycle
    pub fn is_reading_rejection(&self) -> bool {
        matches!(
            self,
            FusionError::JumpRejected { .. }
                | FusionError::InvalidTimestep { .. }
                | FusionError::InvalidSample { .. }
                | FusionError::AccuracyRejected { .. }
                | FusionError::Throttled { .. }
                | FusionError::UnknownAnchor { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = FusionError::JumpRejected { distance_m: 120.0, implied_speed_mps: 120.0 };
        assert_eq!(err.to_string(), "position jump rejected: 120.0 m at 120.0 m/s");

        let err = FusionError::StaleInput { kind: SourceKind::Gnss };
        assert_eq!(err.to_string(), "Gnss source is stale");
    }

    #[test]
    fn test_reading_rejection_classification() {
        assert!(FusionError::InvalidTimestep { dt_s: 0.5 }.is_reading_rejection());
        assert!(!FusionError::SessionClosed.is_reading_rejection());
        assert!(!FusionError::DegenerateGeometry { reason: "collinear".into() }.is_reading_rejection());
    }
}
