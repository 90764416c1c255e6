//! Engine configuration.
//!
//! [`EngineConfig`] holds every threshold, weight and timing constant used by
//! the engine. Defaults reproduce the reference rule set. The configuration is
//! serializable so it can be tuned offline and loaded from a JSON file without
//! touching engine code; this includes the confirmation decoder's transition
//! matrix.
//!
//! # Example
//!
//! ```rust
//! use sleep_sensing::config::EngineConfig;
//!
//! let cfg = EngineConfig::default();
//! cfg.validate().expect("default config is valid");
//! assert_eq!(cfg.hop_sec, 5.0);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::Stage;

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Feature aggregation window (seconds). Every channel buffer retains this much.
    pub epoch_sec: f64,
    /// Minimum interval between two emitted rows (seconds).
    pub hop_sec: f64,
    /// Signal quality floor below which the engine emits poor-quality rows.
    pub min_quality: f64,

    /// Rate EOG is decimated to (Hz).
    pub eog_target_rate_hz: f64,
    /// EOG is available iff a sample was retained within this many seconds.
    pub eog_available_window_sec: f64,
    /// Source rate assumed when a producer gives no hint (Hz).
    pub eog_default_source_rate_hz: f64,

    /// Offset of the three acceleration axes within the raw motion vector.
    pub motion_accel_offset: usize,
    /// Treat all-zero power vectors as missing data.
    pub skip_all_zero_power: bool,
    /// Number of emitted rows kept in the engine history.
    pub history_capacity: usize,

    pub classifier: ClassifierConfig,
    pub smoother: SmootherConfig,
    pub decoder: DecoderConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            epoch_sec: 30.0,
            hop_sec: 5.0,
            min_quality: 0.3,
            eog_target_rate_hz: 50.0,
            eog_available_window_sec: 10.0,
            eog_default_source_rate_hz: 200.0,
            motion_accel_offset: 9,
            skip_all_zero_power: true,
            history_capacity: 720,
            classifier: ClassifierConfig::default(),
            smoother: SmootherConfig::default(),
            decoder: DecoderConfig::default(),
        }
    }
}

/// Largest accepted offset of the acceleration axes in a motion vector.
pub const MAX_MOTION_ACCEL_OFFSET: usize = 1024;

/// Largest accepted row history (one week of rows at a 1 s hop).
pub const MAX_HISTORY_CAPACITY: usize = 604_800;

impl EngineConfig {
    /// Validates every field, including nested configs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("epoch_sec", self.epoch_sec)?;
        positive("hop_sec", self.hop_sec)?;
        if !(0.0..=1.0).contains(&self.min_quality) {
            return Err(ConfigError::invalid_value(
                "min_quality",
                format!("must be within [0, 1], got {}", self.min_quality),
            ));
        }
        positive("eog_target_rate_hz", self.eog_target_rate_hz)?;
        positive("eog_available_window_sec", self.eog_available_window_sec)?;
        positive("eog_default_source_rate_hz", self.eog_default_source_rate_hz)?;
        if self.motion_accel_offset > MAX_MOTION_ACCEL_OFFSET {
            return Err(ConfigError::invalid_value(
                "motion_accel_offset",
                format!("must be <= {MAX_MOTION_ACCEL_OFFSET}, got {}", self.motion_accel_offset),
            ));
        }
        if self.history_capacity > MAX_HISTORY_CAPACITY {
            return Err(ConfigError::invalid_value(
                "history_capacity",
                format!("must be <= {MAX_HISTORY_CAPACITY}, got {}", self.history_capacity),
            ));
        }

        self.classifier.validate()?;
        self.smoother.validate()?;
        self.decoder.validate()?;

        if self.decoder.enabled && self.decoder.micro_window_sec > self.epoch_sec {
            return Err(ConfigError::invalid_value(
                "decoder.micro_window_sec",
                "must not exceed epoch_sec (buffers only retain epoch_sec of data)",
            ));
        }
        Ok(())
    }

    /// Loads and validates a configuration from a JSON file.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: EngineConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Writes this configuration as pretty-printed JSON.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, json).map_err(|source| ConfigError::FileWrite {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Thresholds and weights of the rule classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// θ/α at or above which the epoch looks sleep-like.
    pub theta_alpha_sleep: f64,
    /// θ/α below which the epoch looks wake-like.
    pub theta_alpha_wake: f64,
    /// Maximum motion for sleep-like and REM predicates.
    pub motion_sleep_max: f64,
    /// Motion above which the epoch looks wake-like.
    pub motion_wake_min: f64,
    /// Maximum motion for the Deep predicate.
    pub motion_deep_max: f64,
    /// Maximum relative beta for the Deep predicate.
    pub beta_deep_max: f64,
    /// Relative beta that lets a weaker saccade rate count as REM.
    pub beta_rem_assist_min: f64,
    /// Relative beta required by the no-EOG REM fallback.
    pub beta_rem_fallback_min: f64,
    /// Facial rate the no-EOG REM fallback must exceed.
    pub facial_rem_fallback_min: f64,
    pub saccade_rem_min: f64,
    pub saccade_rem_assist_min: f64,
    /// Saccade rate that earns the REM bonus.
    pub saccade_strong: f64,

    pub w_wake: f64,
    pub w_light: f64,
    pub w_rem_eog: f64,
    pub w_rem_fallback: f64,
    pub w_deep: f64,
    pub w_saccade_strong_bonus: f64,
    /// Light score forced when no predicate fires.
    pub w_fallback_light: f64,
    /// When the Deep predicate fires, withhold the sleep-like Light vote.
    pub deep_overrides_light: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            theta_alpha_sleep: 1.2,
            theta_alpha_wake: 1.0,
            motion_sleep_max: 0.15,
            motion_wake_min: 0.25,
            motion_deep_max: 0.10,
            beta_deep_max: 0.22,
            beta_rem_assist_min: 0.30,
            beta_rem_fallback_min: 0.35,
            facial_rem_fallback_min: 0.02,
            saccade_rem_min: 0.3,
            saccade_rem_assist_min: 0.2,
            saccade_strong: 0.6,
            w_wake: 0.7,
            w_light: 0.6,
            w_rem_eog: 0.6,
            w_rem_fallback: 0.3,
            w_deep: 0.4,
            w_saccade_strong_bonus: 0.2,
            w_fallback_light: 0.5,
            deep_overrides_light: true,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("classifier.theta_alpha_sleep", self.theta_alpha_sleep),
            ("classifier.theta_alpha_wake", self.theta_alpha_wake),
            ("classifier.motion_sleep_max", self.motion_sleep_max),
            ("classifier.motion_wake_min", self.motion_wake_min),
            ("classifier.motion_deep_max", self.motion_deep_max),
            ("classifier.beta_deep_max", self.beta_deep_max),
            ("classifier.beta_rem_assist_min", self.beta_rem_assist_min),
            ("classifier.beta_rem_fallback_min", self.beta_rem_fallback_min),
            ("classifier.facial_rem_fallback_min", self.facial_rem_fallback_min),
            ("classifier.saccade_rem_min", self.saccade_rem_min),
            ("classifier.saccade_rem_assist_min", self.saccade_rem_assist_min),
            ("classifier.saccade_strong", self.saccade_strong),
            ("classifier.w_wake", self.w_wake),
            ("classifier.w_light", self.w_light),
            ("classifier.w_rem_eog", self.w_rem_eog),
            ("classifier.w_rem_fallback", self.w_rem_fallback),
            ("classifier.w_deep", self.w_deep),
            ("classifier.w_saccade_strong_bonus", self.w_saccade_strong_bonus),
            ("classifier.w_fallback_light", self.w_fallback_light),
        ];
        for (field, value) in fields {
            non_negative(field, value)?;
        }
        Ok(())
    }
}

/// Hysteresis smoother parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherConfig {
    /// Hold time after an accepted stage (seconds).
    pub hold_min_sec: f64,
    /// Confidence needed to change stage inside the hold window.
    pub hold_override_confidence: f64,
    /// Confidence needed for Wake → REM.
    pub wake_to_rem_confidence: f64,
    /// Confidence needed to enter Deep.
    pub deep_entry_confidence: f64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            hold_min_sec: 20.0,
            hold_override_confidence: 0.8,
            wake_to_rem_confidence: 0.9,
            deep_entry_confidence: 0.7,
        }
    }
}

impl SmootherConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("smoother.hold_min_sec", self.hold_min_sec)?;
        unit("smoother.hold_override_confidence", self.hold_override_confidence)?;
        unit("smoother.wake_to_rem_confidence", self.wake_to_rem_confidence)?;
        unit("smoother.deep_entry_confidence", self.deep_entry_confidence)
    }
}

/// Confirmation decoder parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub enabled: bool,
    /// Interval between micro-epochs (seconds).
    pub micro_hop_sec: f64,
    /// Feature window of one micro-epoch (seconds).
    pub micro_window_sec: f64,
    /// Span of observations decoded per call (seconds).
    pub decode_window_sec: f64,
    /// Micro-epochs kept per robust baseline.
    pub baseline_capacity: usize,
    /// Emission probability of the observed label at zero confidence.
    pub emission_base: f64,
    /// Added to `emission_base` per unit of raw confidence.
    pub emission_confidence_gain: f64,
    /// Row-stochastic stage transition probabilities, indexed `[from][to]`
    /// in [`Stage::ALL`] order.
    pub transition: [[f64; Stage::COUNT]; Stage::COUNT],
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            micro_hop_sec: 2.0,
            micro_window_sec: 10.0,
            decode_window_sec: 30.0,
            baseline_capacity: 40,
            emission_base: 0.55,
            emission_confidence_gain: 0.4,
            transition: [
                // Wake   Light  REM    Deep
                [0.70, 0.25, 0.03, 0.02],
                [0.10, 0.70, 0.10, 0.10],
                [0.10, 0.15, 0.72, 0.03],
                [0.03, 0.20, 0.02, 0.75],
            ],
        }
    }
}

/// Tolerance on transition row sums.
const ROW_SUM_TOLERANCE: f64 = 1e-6;

impl DecoderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("decoder.micro_hop_sec", self.micro_hop_sec)?;
        positive("decoder.micro_window_sec", self.micro_window_sec)?;
        positive("decoder.decode_window_sec", self.decode_window_sec)?;
        if self.decode_window_sec < self.micro_hop_sec {
            return Err(ConfigError::invalid_value(
                "decoder.decode_window_sec",
                "must be at least micro_hop_sec",
            ));
        }
        if self.baseline_capacity == 0 {
            return Err(ConfigError::invalid_value(
                "decoder.baseline_capacity",
                "must be > 0",
            ));
        }
        let top = self.emission_base + self.emission_confidence_gain;
        if !(self.emission_base > 0.0 && self.emission_confidence_gain >= 0.0 && top <= 1.0) {
            return Err(ConfigError::invalid_value(
                "decoder.emission_base",
                "emission probability must stay within (0, 1]",
            ));
        }
        for (from, row) in self.transition.iter().enumerate() {
            if row.iter().any(|p| !p.is_finite() || *p < 0.0) {
                return Err(ConfigError::invalid_value(
                    "decoder.transition",
                    format!("row {from} has a negative or non-finite entry"),
                ));
            }
            let sum: f64 = row.iter().sum();
            if (sum - 1.0).abs() > ROW_SUM_TOLERANCE {
                return Err(ConfigError::invalid_value(
                    "decoder.transition",
                    format!("row {from} sums to {sum}, expected 1"),
                ));
            }
        }
        Ok(())
    }

    /// Natural log of the transition matrix.
    pub fn log_transition(&self) -> [[f64; Stage::COUNT]; Stage::COUNT] {
        let mut out = [[0.0; Stage::COUNT]; Stage::COUNT];
        for (from, row) in self.transition.iter().enumerate() {
            for (to, p) in row.iter().enumerate() {
                out[from][to] = p.ln();
            }
        }
        out
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid_value(field, format!("must be > 0, got {value}")))
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid_value(field, format!("must be >= 0, got {value}")))
    }
}

fn unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid_value(field, format!("must be within [0, 1], got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.epoch_sec, 30.0);
        assert_eq!(cfg.min_quality, 0.3);
        assert_eq!(cfg.smoother.hold_min_sec, 20.0);
    }

    #[test]
    fn test_zero_hop_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.hop_sec = 0.0;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "hop_sec", .. }));
    }

    #[test]
    fn test_min_quality_out_of_range() {
        let mut cfg = EngineConfig::default();
        cfg.min_quality = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_transition_rows_must_sum_to_one() {
        let mut cfg = EngineConfig::default();
        cfg.decoder.transition[2] = [0.5, 0.5, 0.5, 0.0];
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("row 2"));
    }

    #[test]
    fn test_transition_negative_entry_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.decoder.transition[0] = [1.1, -0.1, 0.0, 0.0];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_emission_parameters_bounded() {
        let mut cfg = EngineConfig::default();
        cfg.decoder.emission_confidence_gain = 0.6;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_micro_window_within_epoch() {
        let mut cfg = EngineConfig::default();
        cfg.decoder.micro_window_sec = 45.0;
        assert!(cfg.validate().is_err());
        cfg.decoder.enabled = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"hop_sec": 10.0, "smoother": {"hold_min_sec": 5.0}}"#).unwrap();
        assert_eq!(cfg.hop_sec, 10.0);
        assert_eq!(cfg.smoother.hold_min_sec, 5.0);
        assert_eq!(cfg.smoother.deep_entry_confidence, 0.7);
        assert_eq!(cfg.classifier, ClassifierConfig::default());
    }

    #[test]
    fn test_json_file_roundtrip() {
        let dir = std::env::temp_dir().join(format!("sleep-sensing-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("engine.json");

        let mut cfg = EngineConfig::default();
        cfg.decoder.enabled = false;
        cfg.to_json(&path).unwrap();
        let loaded = EngineConfig::from_json(&path).unwrap();
        assert_eq!(loaded, cfg);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = EngineConfig::from_json(Path::new("/nonexistent/engine.json")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn test_write_failure_reports_file_write() {
        let path = Path::new("/nonexistent-sleep-sensing-dir/engine.json");
        let err = EngineConfig::default().to_json(path).unwrap_err();
        assert!(matches!(err, ConfigError::FileWrite { .. }));
        assert!(err.to_string().starts_with("Cannot write config file"));
    }

    #[test]
    fn test_unbounded_sizes_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.motion_accel_offset = usize::MAX;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "motion_accel_offset", .. }));

        let mut cfg = EngineConfig::default();
        cfg.history_capacity = usize::MAX;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "history_capacity", .. }));

        let mut cfg = EngineConfig::default();
        cfg.motion_accel_offset = MAX_MOTION_ACCEL_OFFSET;
        cfg.history_capacity = MAX_HISTORY_CAPACITY;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_log_transition() {
        let cfg = DecoderConfig::default();
        let log = cfg.log_transition();
        assert!((log[0][0] - 0.70f64.ln()).abs() < 1e-12);
    }
}
