//! Real-time sleep-stage epoch inference engine.
//!
//! This module orchestrates the full data flow from pushed channel samples
//! through feature extraction, quality gating, rule classification and
//! hysteresis smoothing to the emitted [`Row`]s, with the confirmation
//! decoder running alongside on its own micro-epoch cadence.
//!
//! # Architecture
//!
//! ```text
//! push_* ──► per-channel WindowedBuffers
//!                     │
//! evaluate(now) ──► Quality Gate ──► micro-epoch ──► hop throttle
//!                     │                  │
//!                     ▼                  ▼
//!             FeatureExtractor    ConfirmationDecoder
//!                     │
//!              RuleClassifier ──► HysteresisSmoother ──► Row
//! ```
//!
//! # Contract
//! - Pushes never fail: malformed payloads are defaulted and logged at debug.
//! - `evaluate` returns the poor-quality row on every call while quality is
//!   below the floor, otherwise at most one row per hop interval.
//! - Missing power or motion data yields `None` ("try again next tick").
//!
//! The engine is a plain owned value with no interior mutability. Concurrent
//! producers go through [`crate::actor`].

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::bands::BandLayout;
use crate::classifier::RuleClassifier;
use crate::config::EngineConfig;
use crate::decoder::ConfirmationDecoder;
use crate::error::ConfigError;
use crate::features::{accel_magnitude, ChannelBuffers, EogDecimator, FeatureExtractor};
use crate::smoother::HysteresisSmoother;
use crate::types::{
    finite_or_zero, round_to, ConfirmedEpoch, FacialEvent, Row, Sample, SamplePayload, Stage,
};

/// Decimal places of the reported confidence.
const CONFIDENCE_DECIMALS: i32 = 3;
/// Decimal places of reported feature values.
const FEATURE_DECIMALS: i32 = 4;

/// Last facial action label seen, for dashboards.
#[derive(Debug, Clone, PartialEq)]
pub struct EyeAction {
    pub label: String,
    pub t: f64,
}

/// Sleep-stage inference engine for one session.
#[derive(Debug, Clone)]
pub struct SleepEngine {
    config: EngineConfig,
    layout: BandLayout,

    // Ingestion state
    buffers: ChannelBuffers,
    eog: EogDecimator,
    signal_quality: f64,
    last_eye_action: Option<EyeAction>,

    // Processing stages
    extractor: FeatureExtractor,
    classifier: RuleClassifier,
    smoother: HysteresisSmoother,
    decoder: Option<ConfirmationDecoder>,

    // Evaluation tracking
    last_epoch_time: Option<f64>,
    prev_eog_available: Option<bool>,
    history: VecDeque<Row>,
}

impl SleepEngine {
    /// Creates an engine after validating `config`.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: EngineConfig) -> Self {
        let decoder = config
            .decoder
            .enabled
            .then(|| ConfirmationDecoder::new(config.decoder.clone()));

        Self {
            layout: BandLayout::default(),
            buffers: ChannelBuffers::new(config.epoch_sec),
            eog: EogDecimator::new(config.eog_target_rate_hz, config.eog_available_window_sec),
            signal_quality: 1.0,
            last_eye_action: None,
            extractor: FeatureExtractor::new(config.eog_target_rate_hz),
            classifier: RuleClassifier::new(config.classifier.clone()),
            smoother: HysteresisSmoother::new(config.smoother.clone()),
            decoder,
            last_epoch_time: None,
            prev_eog_available: None,
            history: VecDeque::new(),
            config,
        }
    }

    /// Derives the band layout from the vendor's power channel labels.
    ///
    /// May be called again when the transport re-announces its layout.
    pub fn configure<S: AsRef<str>>(&mut self, labels: &[S]) {
        self.layout = BandLayout::from_labels(labels);
        if self.layout.is_empty() {
            warn!(
                labels = labels.len(),
                "band layout has no theta/alpha/beta channels, band ratios will be zero"
            );
        } else {
            info!(
                theta = self.layout.theta.len(),
                alpha = self.layout.alpha.len(),
                beta = self.layout.beta.len(),
                "band layout configured"
            );
        }
    }

    // ---- Push API -------------------------------------------------------

    /// Buffers one band-power vector. Non-finite entries become zero; an
    /// all-zero vector is treated as missing when configured so.
    pub fn push_power(&mut self, t: f64, values: &[f64]) {
        if self.config.skip_all_zero_power && values.iter().all(|v| *v == 0.0 || !v.is_finite()) {
            debug!(t, len = values.len(), "all-zero power vector skipped");
            return;
        }
        if values.iter().any(|v| !v.is_finite()) {
            debug!(t, "non-finite power entries zeroed");
        }
        let sanitized: Vec<f64> = values.iter().copied().map(finite_or_zero).collect();
        self.buffers.power.push(t, sanitized);
    }

    /// Buffers the acceleration magnitude of one raw motion vector.
    ///
    /// A vector too short to hold the acceleration axes counts as no motion.
    pub fn push_motion(&mut self, t: f64, values: &[f64]) {
        let offset = self.config.motion_accel_offset;
        if offset.checked_add(3).map_or(true, |end| values.len() < end) {
            debug!(t, len = values.len(), "short motion vector treated as zero");
        }
        self.buffers.motion.push(t, accel_magnitude(values, offset));
    }

    /// Updates the latest device signal quality.
    pub fn push_quality(&mut self, t: f64, value: f64) {
        if !value.is_finite() {
            debug!(t, "non-finite signal quality ignored");
            return;
        }
        self.signal_quality = value;
    }

    /// Buffers one scored facial event and remembers its action label.
    pub fn push_facial(&mut self, t: f64, event: FacialEvent) {
        if let Some(action) = &event.action {
            self.last_eye_action = Some(EyeAction {
                label: action.label().to_string(),
                t,
            });
        }
        self.buffers.facial.push(t, event.score());
    }

    /// Feeds one EOG sample through decimation.
    ///
    /// `source_rate_hz` defaults to the configured source rate when absent.
    pub fn push_eog(&mut self, t: f64, value: f64, source_rate_hz: Option<f64>) {
        let rate = source_rate_hz.unwrap_or(self.config.eog_default_source_rate_hz);
        let value = if value.is_finite() {
            value
        } else {
            debug!(t, "non-finite EOG value zeroed");
            0.0
        };
        if self.eog.accept(rate) && self.buffers.eog.push(t, value) {
            self.eog.mark_retained(t);
        }
    }

    /// Dispatches a canonical sample to its channel's push method.
    pub fn push_sample(&mut self, sample: Sample) {
        let t = sample.t;
        match sample.payload {
            SamplePayload::Power { values } => self.push_power(t, &values),
            SamplePayload::Motion { values } => self.push_motion(t, &values),
            SamplePayload::Quality { value } => self.push_quality(t, value),
            SamplePayload::Facial(event) => self.push_facial(t, event),
            SamplePayload::Eog {
                value,
                source_rate_hz,
            } => self.push_eog(t, value, source_rate_hz),
        }
    }

    // ---- Evaluation -----------------------------------------------------

    /// Evaluates one tick at time `now`.
    ///
    /// Returns the poor-quality row while quality is below the floor, `None`
    /// inside the hop interval or when power/motion data is missing, and a
    /// classified row otherwise.
    pub fn evaluate(&mut self, now: f64) -> Option<Row> {
        // Stage 1: Quality Gate
        if self.signal_quality < self.config.min_quality {
            return Some(Row::poor_quality(
                now,
                self.signal_quality,
                self.eye_action_label(),
            ));
        }

        // Stage 2: Micro-epoch for the confirmation decoder
        self.record_micro_epoch(now);

        // Stage 3: Hop throttle
        if let Some(last) = self.last_epoch_time {
            if now - last < self.config.hop_sec {
                return None;
            }
        }
        self.last_epoch_time = Some(now);

        // Stage 4: Feature extraction
        let eog_on = self.eog_available(now);
        let Some(features) =
            self.extractor
                .extract(&self.buffers, &self.layout, eog_on, self.signal_quality, None)
        else {
            debug!(now, "insufficient power or motion data, tick skipped");
            return None;
        };

        // Stage 5: Classification and smoothing
        let raw = self.classifier.classify(&features);
        let smoothed = self.smoother.smooth(now, raw);

        let row = Row {
            t: now,
            stage: Some(smoothed.stage),
            raw_stage: Some(raw.stage),
            confidence: round_to(raw.confidence, CONFIDENCE_DECIMALS),
            features: features.rounded(FEATURE_DECIMALS),
            eye_action: self.eye_action_label(),
            note: None,
        };
        self.remember(row.clone());
        Some(row)
    }

    /// Latest confirmed stage from the decoder, independent of `evaluate`.
    ///
    /// `None` when the decoder is disabled or has no recent observation.
    pub fn confirmed_stage(&self, now: f64) -> Option<ConfirmedEpoch> {
        self.decoder.as_ref()?.decode(now)
    }

    fn record_micro_epoch(&mut self, now: f64) {
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };
        if !decoder.is_due(now) {
            return;
        }
        let since = now - decoder.config().micro_window_sec;
        let eog_on = self.eog.is_available(now);
        match self
            .extractor
            .extract(&self.buffers, &self.layout, eog_on, self.signal_quality, Some(since))
        {
            Some(features) => {
                let raw = self.classifier.classify(&features);
                decoder.record(now, raw, &features);
            }
            None => decoder.skip(now),
        }
    }

    /// Current EOG availability; logs every change.
    fn eog_available(&mut self, now: f64) -> bool {
        let available = self.eog.is_available(now);
        if self.prev_eog_available != Some(available) {
            info!(
                previous = ?self.prev_eog_available,
                available,
                "EOG availability changed"
            );
            self.prev_eog_available = Some(available);
        }
        available
    }

    fn remember(&mut self, row: Row) {
        if self.config.history_capacity == 0 {
            return;
        }
        if self.history.len() == self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(row);
    }

    fn eye_action_label(&self) -> Option<String> {
        self.last_eye_action.as_ref().map(|a| a.label.clone())
    }

    // ---- Accessors ------------------------------------------------------

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn band_layout(&self) -> &BandLayout {
        &self.layout
    }

    pub fn signal_quality(&self) -> f64 {
        self.signal_quality
    }

    /// Most recently adopted smoothed stage.
    pub fn current_stage(&self) -> Option<Stage> {
        self.smoother.current_stage()
    }

    pub fn last_eye_action(&self) -> Option<&EyeAction> {
        self.last_eye_action.as_ref()
    }

    /// Emitted classified rows, oldest first, bounded by `history_capacity`.
    pub fn history(&self) -> &VecDeque<Row> {
        &self.history
    }

    pub fn buffers(&self) -> &ChannelBuffers {
        &self.buffers
    }
}

impl Default for SleepEngine {
    fn default() -> Self {
        Self::from_valid_config(EngineConfig::default())
    }
}
