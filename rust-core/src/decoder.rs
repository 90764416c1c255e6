//! Confirmation decoder: Viterbi re-decoding of recent raw classifications.
//!
//! Architecture:
//! ```text
//! micro-epoch features ──► BaselineSet (median/MAD) ──► z-scores
//!          │
//! raw ScoredStage ──► MicroObservation ──► observation window ──► Viterbi ──► ConfirmedEpoch
//! ```
//!
//! Each micro-epoch contributes one discrete observation: its raw rule label
//! and confidence. The decoder runs a 4-state Viterbi over the observations of
//! the last `decode_window_sec` with a configurable transition matrix and an
//! emission model in which the observed label gets `base + gain·confidence`
//! and the remaining mass is spread evenly over the other three stages.
//!
//! Cost is O(window × states²) per decode.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::DecoderConfig;
use crate::features::{mad, median};
use crate::types::{BaselineZScores, ConfirmedEpoch, FeatureVector, ScoredStage, Stage};

/// MAD to standard-deviation scale for normally distributed data.
pub const MAD_SCALE: f64 = 1.4826;

/// Floor on the robust spread used as z-score denominator.
pub const MIN_SPREAD: f64 = 1e-6;

/// Floor on emission probabilities before taking the log.
const MIN_EMISSION: f64 = 1e-12;

/// Rolling median/MAD baseline over the last `capacity` values.
#[derive(Debug, Clone)]
pub struct RobustBaseline {
    capacity: usize,
    values: VecDeque<f64>,
}

impl RobustBaseline {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            values: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Adds a value, evicting the oldest once full. Non-finite values are ignored.
    pub fn push(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(x);
    }

    /// `(median, MAD)` of the retained values.
    pub fn stats(&self) -> (f64, f64) {
        let xs: Vec<f64> = self.values.iter().copied().collect();
        let m = median(&xs);
        (m, mad(&xs, m))
    }

    /// Robust z-score of `x`; zero until two values are retained.
    pub fn zscore(&self, x: f64) -> f64 {
        if self.values.len() < 2 || !x.is_finite() {
            return 0.0;
        }
        let (m, spread) = self.stats();
        (x - m) / (MAD_SCALE * spread).max(MIN_SPREAD)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One baseline per tracked feature.
#[derive(Debug, Clone)]
pub struct BaselineSet {
    pub theta_alpha_ratio: RobustBaseline,
    pub beta_relative_power: RobustBaseline,
    pub motion_rms: RobustBaseline,
    pub facial_activity_rate: RobustBaseline,
}

impl BaselineSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            theta_alpha_ratio: RobustBaseline::new(capacity),
            beta_relative_power: RobustBaseline::new(capacity),
            motion_rms: RobustBaseline::new(capacity),
            facial_activity_rate: RobustBaseline::new(capacity),
        }
    }

    /// Z-scores `f` against the current baselines, then folds `f` into them.
    pub fn score_and_update(&mut self, f: &FeatureVector) -> BaselineZScores {
        let z = BaselineZScores {
            theta_alpha_ratio: self.theta_alpha_ratio.zscore(f.theta_alpha_ratio),
            beta_relative_power: self.beta_relative_power.zscore(f.beta_relative_power),
            motion_rms: self.motion_rms.zscore(f.motion_rms),
            facial_activity_rate: self.facial_activity_rate.zscore(f.facial_activity_rate),
        };
        self.theta_alpha_ratio.push(f.theta_alpha_ratio);
        self.beta_relative_power.push(f.beta_relative_power);
        self.motion_rms.push(f.motion_rms);
        self.facial_activity_rate.push(f.facial_activity_rate);
        z
    }
}

/// A raw micro-epoch classification, the decoder's discrete observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MicroObservation {
    pub t: f64,
    pub stage: Stage,
    pub confidence: f64,
    pub z_scores: BaselineZScores,
}

/// Most likely state path and the final Viterbi score vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ViterbiPath {
    pub states: Vec<Stage>,
    /// Log scores of each state at the last step.
    pub final_scores: [f64; Stage::COUNT],
}

impl ViterbiPath {
    /// Final state of the path.
    pub fn last(&self) -> Option<Stage> {
        self.states.last().copied()
    }

    /// Softmax of the final scores evaluated at `stage`.
    pub fn posterior(&self, stage: Stage) -> f64 {
        let max = self
            .final_scores
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return 0.0;
        }
        let total: f64 = self.final_scores.iter().map(|s| (s - max).exp()).sum();
        (self.final_scores[stage.index()] - max).exp() / total
    }
}

/// Keeps micro-epoch observations and baselines; decodes on demand.
#[derive(Debug, Clone)]
pub struct ConfirmationDecoder {
    config: DecoderConfig,
    log_transition: [[f64; Stage::COUNT]; Stage::COUNT],
    baselines: BaselineSet,
    observations: VecDeque<MicroObservation>,
    last_micro_t: Option<f64>,
}

impl ConfirmationDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            log_transition: config.log_transition(),
            baselines: BaselineSet::new(config.baseline_capacity),
            observations: VecDeque::new(),
            last_micro_t: None,
            config,
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// True when a micro-epoch should be recorded at `now`.
    pub fn is_due(&self, now: f64) -> bool {
        match self.last_micro_t {
            Some(last) => now - last >= self.config.micro_hop_sec,
            None => true,
        }
    }

    /// Marks a micro-epoch tick at `now` without recording an observation.
    ///
    /// Used when the micro window holds too little data to classify.
    pub fn skip(&mut self, now: f64) {
        self.last_micro_t = Some(now);
    }

    /// Records one micro-epoch classification and its features.
    pub fn record(&mut self, t: f64, scored: ScoredStage, features: &FeatureVector) -> MicroObservation {
        let z_scores = self.baselines.score_and_update(features);
        let obs = MicroObservation {
            t,
            stage: scored.stage,
            confidence: scored.confidence,
            z_scores,
        };
        self.observations.push_back(obs);
        self.last_micro_t = Some(t);

        let horizon = t - self.config.decode_window_sec;
        while let Some(front) = self.observations.front() {
            if front.t <= horizon {
                self.observations.pop_front();
            } else {
                break;
            }
        }
        obs
    }

    /// Observations inside the decode window ending at `now`, oldest first.
    pub fn window(&self, now: f64) -> Vec<MicroObservation> {
        let horizon = now - self.config.decode_window_sec;
        self.observations
            .iter()
            .filter(|o| o.t > horizon && o.t <= now)
            .copied()
            .collect()
    }

    /// Decodes the current window. `None` when it holds no observation.
    pub fn decode(&self, now: f64) -> Option<ConfirmedEpoch> {
        let window = self.window(now);
        let (first, last) = (window.first()?, window.last()?);
        let path = self.viterbi(&window)?;
        let stage = path.last()?;
        let posterior_confidence = path.posterior(stage);

        debug!(
            stage = %stage,
            posterior = posterior_confidence,
            observations = window.len(),
            "confirmation decode"
        );

        Some(ConfirmedEpoch {
            t_center: 0.5 * (first.t + last.t),
            stage,
            posterior_confidence,
            observations: window.len(),
            z_scores: last.z_scores,
        })
    }

    /// Most likely state path for `observations` under a uniform initial
    /// distribution. `None` for an empty sequence.
    pub fn viterbi(&self, observations: &[MicroObservation]) -> Option<ViterbiPath> {
        let (head, tail) = observations.split_first()?;
        let init = (1.0 / Stage::COUNT as f64).ln();

        let mut delta = [0.0; Stage::COUNT];
        for s in Stage::ALL {
            delta[s.index()] = init + self.log_emission(s, head);
        }
        let mut backpointers: Vec<[usize; Stage::COUNT]> = Vec::with_capacity(tail.len());

        for obs in tail {
            let mut next = [f64::NEG_INFINITY; Stage::COUNT];
            let mut back = [0usize; Stage::COUNT];
            for to in Stage::ALL {
                let (best_from, best_score) = best_predecessor(&delta, &self.log_transition, to.index());
                next[to.index()] = best_score + self.log_emission(to, obs);
                back[to.index()] = best_from;
            }
            delta = next;
            backpointers.push(back);
        }

        let mut state = argmax(&delta);
        let mut states = vec![state; observations.len()];
        for (step, back) in backpointers.iter().enumerate().rev() {
            state = back[state];
            states[step] = state;
        }

        Some(ViterbiPath {
            states: states.into_iter().filter_map(Stage::from_index).collect(),
            final_scores: delta,
        })
    }

    /// Log probability of emitting `obs` from hidden `state`.
    fn log_emission(&self, state: Stage, obs: &MicroObservation) -> f64 {
        let hit = (self.config.emission_base + self.config.emission_confidence_gain * obs.confidence)
            .clamp(0.0, 1.0);
        let p = if state == obs.stage {
            hit
        } else {
            (1.0 - hit) / (Stage::COUNT - 1) as f64
        };
        p.max(MIN_EMISSION).ln()
    }

    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    pub fn baselines(&self) -> &BaselineSet {
        &self.baselines
    }
}

fn best_predecessor(
    delta: &[f64; Stage::COUNT],
    log_transition: &[[f64; Stage::COUNT]; Stage::COUNT],
    to: usize,
) -> (usize, f64) {
    let mut best = (0, f64::NEG_INFINITY);
    for (from, score) in delta.iter().enumerate() {
        let candidate = score + log_transition[from][to];
        if candidate > best.1 {
            best = (from, candidate);
        }
    }
    best
}

/// Index of the maximum; the first wins ties.
fn argmax(xs: &[f64; Stage::COUNT]) -> usize {
    let mut best = 0;
    for i in 1..xs.len() {
        if xs[i] > xs[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn obs(t: f64, stage: Stage, confidence: f64) -> MicroObservation {
        MicroObservation {
            t,
            stage,
            confidence,
            z_scores: BaselineZScores::default(),
        }
    }

    fn decoder() -> ConfirmationDecoder {
        ConfirmationDecoder::new(DecoderConfig::default())
    }

    #[test]
    fn test_baseline_zscore() {
        let mut b = RobustBaseline::new(40);
        b.push(1.0);
        assert_eq!(b.zscore(10.0), 0.0);
        for x in [2.0, 3.0, 4.0, 5.0] {
            b.push(x);
        }
        assert_eq!(b.stats(), (3.0, 1.0));
        assert_relative_eq!(b.zscore(6.0), 3.0 / MAD_SCALE, epsilon = 1e-12);
    }

    #[test]
    fn test_baseline_capacity_evicts_oldest() {
        let mut b = RobustBaseline::new(3);
        for x in [100.0, 1.0, 2.0, 3.0] {
            b.push(x);
        }
        assert_eq!(b.len(), 3);
        assert_eq!(b.stats().0, 2.0);
    }

    #[test]
    fn test_flat_baseline_uses_spread_floor() {
        let mut b = RobustBaseline::new(10);
        b.push(1.0);
        b.push(1.0);
        assert_relative_eq!(b.zscore(1.0 + 1e-6), 1e-6 / MIN_SPREAD, epsilon = 1e-3);
    }

    #[test]
    fn test_zscores_computed_before_update() {
        let mut set = BaselineSet::new(40);
        let f = FeatureVector {
            motion_rms: 0.1,
            ..FeatureVector::default()
        };
        assert_eq!(set.score_and_update(&f).motion_rms, 0.0);
        assert_eq!(set.score_and_update(&f).motion_rms, 0.0);
        assert_eq!(set.motion_rms.len(), 2);
    }

    #[test]
    fn test_single_observation_posterior() {
        let dec = decoder();
        let path = dec.viterbi(&[obs(0.0, Stage::Wake, 1.0)]).unwrap();
        assert_eq!(path.last(), Some(Stage::Wake));
        // Uniform prior: the posterior equals the emission probability.
        assert_relative_eq!(path.posterior(Stage::Wake), 0.95, epsilon = 1e-9);
    }

    #[test]
    fn test_isolated_outlier_smoothed() {
        let dec = decoder();
        let labels = [
            Stage::LightNrem,
            Stage::LightNrem,
            Stage::Wake,
            Stage::LightNrem,
            Stage::LightNrem,
        ];
        let seq: Vec<_> = labels
            .iter()
            .enumerate()
            .map(|(i, s)| obs(i as f64 * 2.0, *s, 0.6))
            .collect();
        let path = dec.viterbi(&seq).unwrap();
        assert!(path.states.iter().all(|s| *s == Stage::LightNrem));
    }

    #[test]
    fn test_persistent_change_followed() {
        let dec = decoder();
        let mut seq = Vec::new();
        for i in 0..5 {
            seq.push(obs(i as f64 * 2.0, Stage::LightNrem, 0.6));
        }
        for i in 5..10 {
            seq.push(obs(i as f64 * 2.0, Stage::Rem, 0.6));
        }
        let path = dec.viterbi(&seq).unwrap();
        assert_eq!(path.last(), Some(Stage::Rem));
        assert_eq!(path.states[0], Stage::LightNrem);
    }

    #[test]
    fn test_decode_empty_window() {
        let dec = decoder();
        assert!(dec.decode(100.0).is_none());
    }

    #[test]
    fn test_decode_window_and_center() {
        let mut dec = decoder();
        let f = FeatureVector::default();
        for i in 0..30 {
            let t = i as f64 * 2.0;
            dec.record(t, ScoredStage::new(Stage::Deep, 0.4), &f);
        }
        // Window (28, 58]: observations at 30..=58.
        let confirmed = dec.decode(58.0).unwrap();
        assert_eq!(confirmed.stage, Stage::Deep);
        assert_eq!(confirmed.observations, 15);
        assert_relative_eq!(confirmed.t_center, 44.0);
        assert!(confirmed.posterior_confidence > 0.5);

        assert!(dec.decode(200.0).is_none());
    }

    #[test]
    fn test_record_prunes_old_observations() {
        let mut dec = decoder();
        let f = FeatureVector::default();
        for i in 0..100 {
            dec.record(i as f64 * 2.0, ScoredStage::new(Stage::Wake, 0.7), &f);
        }
        assert_eq!(dec.observation_count(), 15);
    }

    #[test]
    fn test_micro_epoch_cadence() {
        let mut dec = decoder();
        assert!(dec.is_due(0.0));
        dec.record(0.0, ScoredStage::new(Stage::Wake, 0.7), &FeatureVector::default());
        assert!(!dec.is_due(1.5));
        assert!(dec.is_due(2.0));
        dec.skip(2.0);
        assert!(!dec.is_due(3.0));
    }

    #[test]
    fn test_zero_transition_entries_tolerated() {
        let mut cfg = DecoderConfig::default();
        cfg.transition[0] = [1.0, 0.0, 0.0, 0.0];
        let dec = ConfirmationDecoder::new(cfg);
        let seq = [obs(0.0, Stage::Wake, 0.9), obs(2.0, Stage::Rem, 0.9)];
        let path = dec.viterbi(&seq).unwrap();
        assert_eq!(path.states.len(), 2);
        let p = path.posterior(path.last().unwrap());
        assert!(p.is_finite());
    }

    fn stage_strategy() -> impl Strategy<Value = Stage> {
        (0usize..Stage::COUNT).prop_map(|i| Stage::from_index(i).unwrap_or(Stage::Wake))
    }

    proptest! {
        #[test]
        fn prop_posterior_within_unit_interval(
            labels in prop::collection::vec((stage_strategy(), 0.0f64..=1.0), 1..40),
        ) {
            let dec = decoder();
            let seq: Vec<_> = labels
                .iter()
                .enumerate()
                .map(|(i, (s, c))| obs(i as f64, *s, *c))
                .collect();
            let path = dec.viterbi(&seq).unwrap();
            prop_assert_eq!(path.states.len(), seq.len());
            let p = path.posterior(path.last().unwrap());
            prop_assert!((0.25..=1.0).contains(&p));
        }
    }
}
