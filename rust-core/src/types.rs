//! Core data types for the sleep-stage engine.
//!
//! This module defines the fundamental types shared by every stage of the
//! epoch inference pipeline: stages, canonical samples, feature vectors and
//! the rows the engine emits.
//!
//! Design principle: types make intent obvious. Vendor payload shapes never
//! reach the core; [`crate::ingest`] normalizes them into the canonical
//! shapes defined here before they are pushed.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Sleep-stage candidate label.
///
/// The engine only ever produces *candidate* labels. Enumeration order
/// (Wake, Light, REM, Deep) is also the classifier's tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Awake: alpha-dominant or moving.
    #[serde(rename = "Wake")]
    Wake,
    /// Light NREM candidate: theta rising, body still.
    #[serde(rename = "Light_NREM_candidate")]
    LightNrem,
    /// REM candidate: still body with eye-movement activity.
    #[serde(rename = "REM_candidate")]
    Rem,
    /// Deep (slow-wave) candidate: very still, low beta.
    #[serde(rename = "Deep_candidate")]
    Deep,
}

impl Stage {
    /// Number of stages.
    pub const COUNT: usize = 4;

    /// All stages in enumeration order.
    pub const ALL: [Stage; Stage::COUNT] = [Stage::Wake, Stage::LightNrem, Stage::Rem, Stage::Deep];

    /// Position in [`Stage::ALL`].
    pub fn index(&self) -> usize {
        match self {
            Stage::Wake => 0,
            Stage::LightNrem => 1,
            Stage::Rem => 2,
            Stage::Deep => 3,
        }
    }

    /// Inverse of [`Stage::index`].
    pub fn from_index(idx: usize) -> Option<Self> {
        Stage::ALL.get(idx).copied()
    }

    /// Stable output label.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Wake => "Wake",
            Stage::LightNrem => "Light_NREM_candidate",
            Stage::Rem => "REM_candidate",
            Stage::Deep => "Deep_candidate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Input channel a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Spectral band power vector (~0.5 Hz).
    Power,
    /// Raw motion vector (up to 128 Hz).
    Motion,
    /// Device contact/signal quality scalar (sporadic).
    Quality,
    /// Facial-muscle action events (sporadic).
    Facial,
    /// External eye-movement telemetry (up to 200 Hz).
    Eog,
}

/// How a facial action contributes to activity scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacialActionClass {
    /// Left/right gaze shift. Primary REM indicator.
    Directional,
    /// A recognised facial expression (wink, blink, brow).
    Named,
    /// Any other reported action.
    Generic,
}

/// Canonical facial action label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FacialAction {
    LookLeft,
    LookRight,
    WinkLeft,
    WinkRight,
    Blink,
    FurrowBrow,
    RaiseBrow,
    /// Any other non-neutral label, kept verbatim.
    Other(String),
}

impl FacialAction {
    /// Parse a vendor label. Empty, `neutral` and whitespace-only labels mean
    /// "no action" and yield `None`.
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim();
        if label.is_empty() || label.eq_ignore_ascii_case("neutral") {
            return None;
        }
        let action = match label {
            "look_left" | "lookLeft" => FacialAction::LookLeft,
            "look_right" | "lookRight" => FacialAction::LookRight,
            "wink_left" | "winkLeft" => FacialAction::WinkLeft,
            "wink_right" | "winkRight" => FacialAction::WinkRight,
            "blink" => FacialAction::Blink,
            "furrow_brow" | "furrowBrow" => FacialAction::FurrowBrow,
            "raise_brow" | "raiseBrow" => FacialAction::RaiseBrow,
            other => FacialAction::Other(other.to_string()),
        };
        Some(action)
    }

    /// Canonical label.
    pub fn label(&self) -> &str {
        match self {
            FacialAction::LookLeft => "look_left",
            FacialAction::LookRight => "look_right",
            FacialAction::WinkLeft => "wink_left",
            FacialAction::WinkRight => "wink_right",
            FacialAction::Blink => "blink",
            FacialAction::FurrowBrow => "furrow_brow",
            FacialAction::RaiseBrow => "raise_brow",
            FacialAction::Other(label) => label,
        }
    }

    pub fn class(&self) -> FacialActionClass {
        match self {
            FacialAction::LookLeft | FacialAction::LookRight => FacialActionClass::Directional,
            FacialAction::WinkLeft
            | FacialAction::WinkRight
            | FacialAction::Blink
            | FacialAction::FurrowBrow
            | FacialAction::RaiseBrow => FacialActionClass::Named,
            FacialAction::Other(_) => FacialActionClass::Generic,
        }
    }
}

impl Serialize for FacialAction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Power at or above which a facial action counts as strong.
pub const FACIAL_STRONG_POWER: f64 = 0.5;

/// Power at or above which any reported action counts as weak activity.
pub const FACIAL_WEAK_POWER: f64 = 0.3;

/// Activity score of one facial event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FacialScore {
    /// No activity (score 0).
    None,
    /// Weak generic activity (score 0.5).
    Weak,
    /// Strong named facial action (score 1).
    Named,
    /// Strong directional eye movement (score 2).
    Directional,
}

impl FacialScore {
    /// Raw score value (0, 0.5, 1, 2).
    pub fn value(&self) -> f64 {
        match self {
            FacialScore::None => 0.0,
            FacialScore::Weak => 0.5,
            FacialScore::Named => 1.0,
            FacialScore::Directional => 2.0,
        }
    }

    /// Contribution to the facial activity rate.
    pub fn weight(&self) -> f64 {
        match self {
            FacialScore::None => 0.0,
            FacialScore::Weak => 0.3,
            FacialScore::Named => 0.6,
            FacialScore::Directional => 1.0,
        }
    }
}

/// Canonical facial event, independent of vendor firmware generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacialEvent {
    /// Reported action, `None` when neutral or absent.
    #[serde(default, deserialize_with = "deserialize_action")]
    pub action: Option<FacialAction>,
    /// Upper-face action power.
    #[serde(default)]
    pub upper_power: f64,
    /// Lower-face action power.
    #[serde(default)]
    pub lower_power: f64,
}

fn deserialize_action<'de, D: Deserializer<'de>>(d: D) -> Result<Option<FacialAction>, D::Error> {
    let label: Option<String> = Option::deserialize(d)?;
    Ok(label.as_deref().and_then(FacialAction::parse))
}

impl FacialEvent {
    /// Creates an event, zeroing non-finite powers.
    pub fn new(action: Option<FacialAction>, upper_power: f64, lower_power: f64) -> Self {
        Self {
            action,
            upper_power: finite_or_zero(upper_power),
            lower_power: finite_or_zero(lower_power),
        }
    }

    /// Creates an event from a raw label.
    pub fn from_label(label: Option<&str>, upper_power: f64, lower_power: f64) -> Self {
        Self::new(label.and_then(FacialAction::parse), upper_power, lower_power)
    }

    /// Stronger of the two powers.
    pub fn peak_power(&self) -> f64 {
        self.upper_power.max(self.lower_power)
    }

    /// Scores this event for the facial activity rate.
    pub fn score(&self) -> FacialScore {
        let Some(action) = &self.action else {
            return FacialScore::None;
        };
        let peak = self.peak_power();
        let strong = peak >= FACIAL_STRONG_POWER;
        match action.class() {
            FacialActionClass::Directional if strong => FacialScore::Directional,
            FacialActionClass::Named if strong => FacialScore::Named,
            _ if peak >= FACIAL_WEAK_POWER => FacialScore::Weak,
            _ => FacialScore::None,
        }
    }
}

/// Channel-specific payload of a [`Sample`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum SamplePayload {
    /// Band powers in band-layout order.
    Power {
        #[serde(default)]
        values: Vec<f64>,
    },
    /// Raw motion vector; acceleration axes sit at a fixed offset.
    Motion {
        #[serde(default)]
        values: Vec<f64>,
    },
    /// Contact/signal quality in [0, 1].
    Quality { value: f64 },
    /// Facial action event.
    Facial(FacialEvent),
    /// One EOG amplitude sample with an optional source-rate hint.
    Eog {
        value: f64,
        #[serde(default)]
        source_rate_hz: Option<f64>,
    },
}

/// A timestamped sample on one channel.
///
/// This is the canonical record carried by the actor queue and by replay
/// files. Timestamps are seconds on the producer's clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Timestamp in seconds.
    pub t: f64,
    #[serde(flatten)]
    pub payload: SamplePayload,
}

impl Sample {
    pub fn new(t: f64, payload: SamplePayload) -> Self {
        Self { t, payload }
    }

    /// The channel this sample belongs to.
    pub fn channel(&self) -> Channel {
        match self.payload {
            SamplePayload::Power { .. } => Channel::Power,
            SamplePayload::Motion { .. } => Channel::Motion,
            SamplePayload::Quality { .. } => Channel::Quality,
            SamplePayload::Facial(_) => Channel::Facial,
            SamplePayload::Eog { .. } => Channel::Eog,
        }
    }
}

/// Per-tick feature summary. All fields are finite.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Mean theta power over mean alpha power.
    pub theta_alpha_ratio: f64,
    /// Mean beta power over mean total power.
    pub beta_relative_power: f64,
    /// Median 3-axis acceleration magnitude.
    pub motion_rms: f64,
    /// Weighted facial activity in [0, 1].
    pub facial_activity_rate: f64,
    /// Saccade events per second (0 when EOG is unavailable).
    pub eog_saccade_rate: f64,
    /// Population variance of the retained EOG window (0 when unavailable).
    pub eog_variance: f64,
    /// Whether EOG was retained recently enough to be trusted.
    pub eog_available: bool,
    /// Latest device-reported signal quality.
    pub signal_quality: f64,
}

impl FeatureVector {
    /// Copy with every numeric field rounded to `decimals` places.
    pub fn rounded(&self, decimals: i32) -> Self {
        Self {
            theta_alpha_ratio: round_to(self.theta_alpha_ratio, decimals),
            beta_relative_power: round_to(self.beta_relative_power, decimals),
            motion_rms: round_to(self.motion_rms, decimals),
            facial_activity_rate: round_to(self.facial_activity_rate, decimals),
            eog_saccade_rate: round_to(self.eog_saccade_rate, decimals),
            eog_variance: round_to(self.eog_variance, decimals),
            eog_available: self.eog_available,
            signal_quality: round_to(self.signal_quality, decimals),
        }
    }
}

/// A classified stage with its heuristic confidence.
///
/// Confidence is clipped to [0, 1]; it is not a calibrated probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredStage {
    pub stage: Stage,
    pub confidence: f64,
}

impl ScoredStage {
    pub fn new(stage: Stage, confidence: f64) -> Self {
        Self {
            stage,
            confidence: finite_or_zero(confidence).clamp(0.0, 1.0),
        }
    }
}

/// Marker attached to degraded rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityMarker {
    #[serde(rename = "poor_quality")]
    PoorQuality,
}

/// One emitted evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Evaluation time in seconds.
    pub t: f64,
    /// Smoothed stage; `None` on poor-quality rows.
    pub stage: Option<Stage>,
    /// Rule classifier output before smoothing.
    pub raw_stage: Option<Stage>,
    /// Raw classifier confidence, rounded to 3 decimals.
    pub confidence: f64,
    #[serde(flatten)]
    pub features: FeatureVector,
    /// Most recent non-neutral facial action label.
    pub eye_action: Option<String>,
    pub note: Option<QualityMarker>,
}

impl Row {
    /// Degraded row emitted while signal quality is below the floor.
    pub fn poor_quality(t: f64, signal_quality: f64, eye_action: Option<String>) -> Self {
        Self {
            t,
            stage: None,
            raw_stage: None,
            confidence: 0.0,
            features: FeatureVector {
                signal_quality,
                ..FeatureVector::default()
            },
            eye_action,
            note: Some(QualityMarker::PoorQuality),
        }
    }

    pub fn is_poor_quality(&self) -> bool {
        self.note == Some(QualityMarker::PoorQuality)
    }
}

/// Robust z-scores of the baseline-tracked features for one micro-epoch.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BaselineZScores {
    pub theta_alpha_ratio: f64,
    pub beta_relative_power: f64,
    pub motion_rms: f64,
    pub facial_activity_rate: f64,
}

/// Output of one confirmation decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedEpoch {
    /// Midpoint of the decoded observation window (seconds).
    pub t_center: f64,
    /// Final state of the most likely path.
    pub stage: Stage,
    /// Softmax of the final Viterbi scores at `stage`.
    pub posterior_confidence: f64,
    /// Number of micro-epoch observations decoded.
    pub observations: usize,
    /// Z-scores of the most recent micro-epoch.
    pub z_scores: BaselineZScores,
}

/// Replace NaN and infinities by zero.
pub(crate) fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

/// Round half away from zero to `decimals` places.
pub(crate) fn round_to(x: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (x * scale).round() / scale
}
