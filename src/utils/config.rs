use crate::core::Vec3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Configuration loading and validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid {parameter} = {value}: {reason}")]
    InvalidParameter { parameter: String, value: String, reason: String },

    #[error("config I/O error: {message}")]
    Io { message: String },

    #[error("config serialization error: {message}")]
    Serialization { message: String },
}

/// Top-level tuning for one tracking session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// GNSS fixes reporting worse accuracy are dropped (meters)
    pub max_accuracy_threshold_m: f64,
    /// GNSS worse than this counts as unreliable for indoor detection (meters)
    pub indoor_accuracy_threshold_m: f64,
    /// Displacement always tolerated between consecutive fixes (meters)
    pub max_jump_distance_m: f64,
    /// Physically plausible agent speed (m/s)
    pub max_speed_mps: f64,
    /// Consecutive jump rejections after which the next fix reseeds the filter
    pub max_consecutive_rejections: u32,
    /// GNSS fixes closer together than this are ignored (milliseconds)
    pub min_update_interval_ms: u64,
    /// Accuracy needed before a stationary agent's position is locked (meters)
    pub target_accuracy_m: f64,
    pub fusion_tick_interval_ms: u64,
    /// Ticks run at the burst interval after the agent starts moving
    pub burst_ticks: u32,
    pub burst_tick_interval_ms: u64,
    /// Fused positions kept for analytics
    pub history_capacity: usize,
    /// Input samples buffered before the oldest are overwritten
    pub sample_queue_capacity: usize,
    /// Fused positions / motion events buffered for consumers
    pub output_queue_capacity: usize,
    pub enable_platform_motion_compensation: bool,
    pub platform: PlatformConfig,
    pub staleness: StalenessConfig,
    pub weights: WeightConfig,
    pub inertial: InertialConfig,
    pub trilateration: TrilaterationConfig,
    pub kalman: KalmanConfig,
    pub motion: MotionThresholds,
}

/// Per-source freshness windows (milliseconds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessConfig {
    pub gnss_ms: u64,
    pub ranging_ms: u64,
    pub inertial_ms: u64,
}

/// Source reliability weighting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    /// GNSS weight is `1 / (1 + accuracy / scale)`
    pub gnss_accuracy_scale_m: f64,
    /// GNSS weight multiplier while indoor mode is active
    pub indoor_gnss_factor: f64,
    /// Fraction of fused confidence used to pull inertial state toward the fix
    pub inertial_feedback_gain: f64,
    /// Anchor count at which trilateration reaches full weight
    pub trilateration_full_anchor_count: usize,
    /// Residual (meters) at which trilateration weight halves
    pub trilateration_residual_scale_m: f64,
}

/// Dead-reckoning integration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InertialConfig {
    /// Velocity multiplier applied every integration step
    pub velocity_damping: f64,
    /// Largest accepted integration step (seconds)
    pub max_dt_s: f64,
    pub initial_confidence: f64,
    /// Exponential confidence decay rate (1/s)
    pub confidence_decay_per_s: f64,
    pub min_confidence: f64,
    pub base_accuracy_m: f64,
    /// Accuracy growth per second without correction (meters)
    pub drift_accuracy_per_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrilaterationConfig {
    /// Best-quality measurements used per solve
    pub max_measurements: usize,
    /// Anchors closer than this make the geometry degenerate (meters)
    pub min_anchor_separation_m: f64,
    pub max_iterations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    /// Process noise added per GNSS update (degrees²)
    pub gnss_process_noise: f64,
    /// Process noise for the altitude channel (m²)
    pub altitude_process_noise: f64,
    /// Process noise for per-anchor range smoothing (m²)
    pub range_process_noise: f64,
}

/// Activity classification bands and hysteresis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionThresholds {
    /// Acceleration-magnitude variance ceiling for Stationary ((m/s²)²)
    pub stationary_max_accel_variance: f64,
    /// Gyroscope-magnitude variance ceiling for Stationary ((rad/s)²)
    pub stationary_max_gyro_variance: f64,
    pub stationary_max_step_frequency_hz: f64,
    /// Above either walking ceiling the vote is Running
    pub walking_max_accel_variance: f64,
    pub walking_max_step_frequency_hz: f64,
    pub votes_to_enter_stationary: u32,
    pub votes_to_leave_stationary: u32,
    pub votes_between_moving_states: u32,
    pub min_state_duration_ms: u64,
    /// Samples needed in the acceleration window before voting
    pub min_samples: usize,
    pub window_size: usize,
    pub classify_every_n_samples: usize,
    pub step_window_ms: u64,
    /// Magnitude above gravity that counts as a step peak (m/s²)
    pub step_peak_threshold: f64,
    pub step_min_interval_ms: u64,
}

/// Rigid platform (e.g. ship) the agent may be standing on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Rotation centre of the platform in the local frame
    pub pivot: Vec3,
    /// Platform bow direction, radians from east
    pub heading_rad: f64,
    pub length_m: f64,
    pub width_m: f64,
    pub height_m: f64,
    pub detector: PlatformDetectorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformDetectorConfig {
    pub window_s: f64,
    /// Shortest buffered span that may be evaluated
    pub min_window_s: f64,
    pub update_interval_ms: u64,
    pub min_frequency_hz: f64,
    pub max_frequency_hz: f64,
    pub min_roll_amplitude_rad: f64,
    pub min_heave_amplitude_m: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            max_accuracy_threshold_m: 100.0,
            indoor_accuracy_threshold_m: 25.0,
            max_jump_distance_m: 50.0,
            max_speed_mps: 12.0,
            max_consecutive_rejections: 5,
            min_update_interval_ms: 200,
            target_accuracy_m: 1.0,
            fusion_tick_interval_ms: 1000,
            burst_ticks: 10,
            burst_tick_interval_ms: 250,
            history_capacity: 100,
            sample_queue_capacity: 256,
            output_queue_capacity: 64,
            enable_platform_motion_compensation: false,
            platform: PlatformConfig::default(),
            staleness: StalenessConfig::default(),
            weights: WeightConfig::default(),
            inertial: InertialConfig::default(),
            trilateration: TrilaterationConfig::default(),
            kalman: KalmanConfig::default(),
            motion: MotionThresholds::default(),
        }
    }
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            gnss_ms: 5000,
            ranging_ms: 3000,
            inertial_ms: 1000,
        }
    }
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            gnss_accuracy_scale_m: 10.0,
            indoor_gnss_factor: 0.3,
            inertial_feedback_gain: 0.5,
            trilateration_full_anchor_count: 4,
            trilateration_residual_scale_m: 1.0,
        }
    }
}

impl Default for InertialConfig {
    fn default() -> Self {
        Self {
            velocity_damping: 0.95,
            max_dt_s: 0.1,
            initial_confidence: 0.9,
            confidence_decay_per_s: 0.1,
            min_confidence: 0.05,
            base_accuracy_m: 0.5,
            drift_accuracy_per_s: 0.5,
        }
    }
}

impl Default for TrilaterationConfig {
    fn default() -> Self {
        Self {
            max_measurements: 4,
            min_anchor_separation_m: 0.5,
            max_iterations: 10,
        }
    }
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            gnss_process_noise: 1e-10,
            altitude_process_noise: 0.01,
            range_process_noise: 0.01,
        }
    }
}

impl Default for MotionThresholds {
    fn default() -> Self {
        Self {
            stationary_max_accel_variance: 0.015,
            stationary_max_gyro_variance: 0.01,
            stationary_max_step_frequency_hz: 0.3,
            walking_max_accel_variance: 3.0,
            walking_max_step_frequency_hz: 2.5,
            votes_to_enter_stationary: 3,
            votes_to_leave_stationary: 5,
            votes_between_moving_states: 3,
            min_state_duration_ms: 2000,
            min_samples: 10,
            window_size: 50,
            classify_every_n_samples: 10,
            step_window_ms: 5000,
            step_peak_threshold: 1.5,
            step_min_interval_ms: 250,
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            pivot: Vec3::zeros(),
            heading_rad: 0.0,
            length_m: 100.0,
            width_m: 20.0,
            height_m: 30.0,
            detector: PlatformDetectorConfig::default(),
        }
    }
}

impl Default for PlatformDetectorConfig {
    fn default() -> Self {
        Self {
            window_s: 30.0,
            min_window_s: 10.0,
            update_interval_ms: 2000,
            min_frequency_hz: 0.05,
            max_frequency_hz: 0.5,
            min_roll_amplitude_rad: 0.02,
            min_heave_amplitude_m: 0.1,
        }
    }
}

fn invalid(parameter: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        parameter: parameter.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn ensure_positive(parameter: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(parameter, value, "must be a positive finite number"))
    }
}

fn ensure_unit_interval(parameter: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(parameter, value, "must be within [0, 1]"))
    }
}

fn ensure_nonzero(parameter: &str, value: u64) -> Result<(), ConfigError> {
    if value > 0 {
        Ok(())
    } else {
        Err(invalid(parameter, value, "must be greater than zero"))
    }
}

impl FusionConfig {
    /// Load and validate a JSON configuration file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::Io {
            message: format!("failed to read config file '{}': {}", path_str, e),
        })?;
        Self::from_json_str(&content)
    }

    /// Parse and validate a JSON document; absent fields take their defaults
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: FusionConfig = serde_json::from_str(content).map_err(|e| {
            ConfigError::Serialization {
                message: format!("failed to parse config: {}", e),
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            ConfigError::Serialization {
                message: format!("failed to serialize config: {}", e),
            }
        })?;
        fs::write(&path, content).map_err(|e| ConfigError::Io {
            message: format!("failed to write config file '{}': {}", path_str, e),
        })
    }

    /// Check every parameter; returns non-fatal warnings on success
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        ensure_positive("max_accuracy_threshold_m", self.max_accuracy_threshold_m)?;
        ensure_positive("indoor_accuracy_threshold_m", self.indoor_accuracy_threshold_m)?;
        ensure_positive("max_jump_distance_m", self.max_jump_distance_m)?;
        ensure_positive("max_speed_mps", self.max_speed_mps)?;
        ensure_positive("target_accuracy_m", self.target_accuracy_m)?;
        ensure_nonzero("fusion_tick_interval_ms", self.fusion_tick_interval_ms)?;
        ensure_nonzero("burst_tick_interval_ms", self.burst_tick_interval_ms)?;
        ensure_nonzero("history_capacity", self.history_capacity as u64)?;
        ensure_nonzero("sample_queue_capacity", self.sample_queue_capacity as u64)?;
        ensure_nonzero("output_queue_capacity", self.output_queue_capacity as u64)?;

        ensure_nonzero("staleness.gnss_ms", self.staleness.gnss_ms)?;
        ensure_nonzero("staleness.ranging_ms", self.staleness.ranging_ms)?;
        ensure_nonzero("staleness.inertial_ms", self.staleness.inertial_ms)?;

        ensure_positive("weights.gnss_accuracy_scale_m", self.weights.gnss_accuracy_scale_m)?;
        ensure_unit_interval("weights.indoor_gnss_factor", self.weights.indoor_gnss_factor)?;
        ensure_unit_interval("weights.inertial_feedback_gain", self.weights.inertial_feedback_gain)?;
        ensure_nonzero(
            "weights.trilateration_full_anchor_count",
            self.weights.trilateration_full_anchor_count as u64,
        )?;
        ensure_positive(
            "weights.trilateration_residual_scale_m",
            self.weights.trilateration_residual_scale_m,
        )?;

        let inertial = &self.inertial;
        if !(inertial.velocity_damping > 0.0 && inertial.velocity_damping <= 1.0) {
            return Err(invalid("inertial.velocity_damping", inertial.velocity_damping, "must be within (0, 1]"));
        }
        ensure_positive("inertial.max_dt_s", inertial.max_dt_s)?;
        ensure_unit_interval("inertial.initial_confidence", inertial.initial_confidence)?;
        ensure_unit_interval("inertial.min_confidence", inertial.min_confidence)?;
        if inertial.min_confidence > inertial.initial_confidence {
            return Err(invalid(
                "inertial.min_confidence",
                inertial.min_confidence,
                "must not exceed initial_confidence",
            ));
        }
        if !(inertial.confidence_decay_per_s >= 0.0 && inertial.confidence_decay_per_s.is_finite()) {
            return Err(invalid(
                "inertial.confidence_decay_per_s",
                inertial.confidence_decay_per_s,
                "must be a non-negative finite number",
            ));
        }
        ensure_positive("inertial.base_accuracy_m", inertial.base_accuracy_m)?;

        if self.trilateration.max_measurements < 3 {
            return Err(invalid(
                "trilateration.max_measurements",
                self.trilateration.max_measurements,
                "at least 3 measurements are needed to trilaterate",
            ));
        }
        ensure_positive("trilateration.min_anchor_separation_m", self.trilateration.min_anchor_separation_m)?;

        ensure_positive("kalman.gnss_process_noise", self.kalman.gnss_process_noise)?;
        ensure_positive("kalman.altitude_process_noise", self.kalman.altitude_process_noise)?;
        ensure_positive("kalman.range_process_noise", self.kalman.range_process_noise)?;

        self.validate_motion()?;
        self.validate_platform()?;

        let mut warnings = Vec::new();
        if self.indoor_accuracy_threshold_m > self.max_accuracy_threshold_m {
            warnings.push(format!(
                "indoor_accuracy_threshold_m ({}) exceeds max_accuracy_threshold_m ({}); poor GNSS is dropped before it can signal indoor mode",
                self.indoor_accuracy_threshold_m, self.max_accuracy_threshold_m
            ));
        }
        if self.burst_tick_interval_ms > self.fusion_tick_interval_ms {
            warnings.push("burst_tick_interval_ms is slower than fusion_tick_interval_ms".to_string());
        }
        if self.staleness.gnss_ms < self.fusion_tick_interval_ms {
            warnings.push("GNSS staleness window is shorter than one fusion tick".to_string());
        }
        Ok(warnings)
    }

    fn validate_motion(&self) -> Result<(), ConfigError> {
        let motion = &self.motion;
        ensure_positive("motion.stationary_max_accel_variance", motion.stationary_max_accel_variance)?;
        ensure_positive("motion.stationary_max_gyro_variance", motion.stationary_max_gyro_variance)?;
        ensure_positive("motion.walking_max_accel_variance", motion.walking_max_accel_variance)?;
        ensure_positive("motion.walking_max_step_frequency_hz", motion.walking_max_step_frequency_hz)?;
        if motion.walking_max_accel_variance <= motion.stationary_max_accel_variance {
            return Err(invalid(
                "motion.walking_max_accel_variance",
                motion.walking_max_accel_variance,
                "must exceed stationary_max_accel_variance",
            ));
        }
        ensure_nonzero("motion.votes_to_enter_stationary", motion.votes_to_enter_stationary as u64)?;
        ensure_nonzero("motion.votes_to_leave_stationary", motion.votes_to_leave_stationary as u64)?;
        ensure_nonzero("motion.votes_between_moving_states", motion.votes_between_moving_states as u64)?;
        ensure_nonzero("motion.min_samples", motion.min_samples as u64)?;
        ensure_nonzero("motion.classify_every_n_samples", motion.classify_every_n_samples as u64)?;
        ensure_nonzero("motion.step_window_ms", motion.step_window_ms)?;
        if motion.window_size < motion.min_samples {
            return Err(invalid("motion.window_size", motion.window_size, "must be at least min_samples"));
        }
        Ok(())
    }

    fn validate_platform(&self) -> Result<(), ConfigError> {
        let platform = &self.platform;
        ensure_positive("platform.length_m", platform.length_m)?;
        ensure_positive("platform.width_m", platform.width_m)?;
        ensure_positive("platform.height_m", platform.height_m)?;

        let detector = &platform.detector;
        ensure_positive("platform.detector.window_s", detector.window_s)?;
        ensure_positive("platform.detector.min_window_s", detector.min_window_s)?;
        ensure_nonzero("platform.detector.update_interval_ms", detector.update_interval_ms)?;
        ensure_positive("platform.detector.min_frequency_hz", detector.min_frequency_hz)?;
        if detector.max_frequency_hz <= detector.min_frequency_hz {
            return Err(invalid(
                "platform.detector.max_frequency_hz",
                detector.max_frequency_hz,
                "must exceed min_frequency_hz",
            ));
        }
        if detector.min_window_s > detector.window_s {
            return Err(invalid(
                "platform.detector.min_window_s",
                detector.min_window_s,
                "must not exceed window_s",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = FusionConfig::default();
        let warnings = config.validate().unwrap();
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
    }

    #[test]
    fn test_rejects_out_of_range_gain() {
        let mut config = FusionConfig::default();
        config.weights.indoor_gnss_factor = 1.5;

        match config.validate() {
            Err(ConfigError::InvalidParameter { parameter, .. }) => {
                assert_eq!(parameter, "weights.indoor_gnss_factor");
            }
            other => panic!("expected invalid parameter, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_vote_counts() {
        let mut config = FusionConfig::default();
        config.motion.votes_to_leave_stationary = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_damping() {
        let mut config = FusionConfig::default();
        config.inertial.velocity_damping = 0.0;
        assert!(config.validate().is_err());

        config.inertial.velocity_damping = 1.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = FusionConfig::from_json_str(
            r#"{ "target_accuracy_m": 0.5, "motion": { "votes_to_leave_stationary": 8 } }"#,
        )
        .unwrap();

        assert_eq!(config.target_accuracy_m, 0.5);
        assert_eq!(config.motion.votes_to_leave_stationary, 8);
        assert_eq!(config.motion.votes_to_enter_stationary, 3);
        assert_eq!(config.fusion_tick_interval_ms, 1000);
    }

    #[test]
    fn test_malformed_json() {
        let result = FusionConfig::from_json_str("{ not json");
        assert!(matches!(result, Err(ConfigError::Serialization { .. })));
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("fusion-config-{}.json", std::process::id()));
        let mut config = FusionConfig::default();
        config.enable_platform_motion_compensation = true;
        config.platform.length_m = 180.0;

        config.to_json_file(&path).unwrap();
        let loaded = FusionConfig::from_json_file(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert!(loaded.enable_platform_motion_compensation);
        assert_eq!(loaded.platform.length_m, 180.0);
        assert_eq!(loaded.motion.votes_to_leave_stationary, config.motion.votes_to_leave_stationary);
        assert_eq!(loaded.staleness, config.staleness);
    }

    #[test]
    fn test_missing_file() {
        let result = FusionConfig::from_json_file("/nonexistent/fusion.json");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_warns_on_inverted_thresholds() {
        let mut config = FusionConfig::default();
        config.indoor_accuracy_threshold_m = 150.0;
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
    }
}
