//! Rule-based sleep-stage classification.
//!
//! Deterministic multi-criteria scoring over a [`FeatureVector`]. Each
//! predicate that fires adds its weight to one stage; the highest score wins
//! and ties go to the stage that comes first in [`Stage::ALL`] order.
//!
//! The winning score, clipped to [0, 1], is reported as confidence. It is a
//! heuristic strength, not a calibrated probability.

use crate::config::ClassifierConfig;
use crate::types::{FeatureVector, ScoredStage, Stage};

/// Which predicates fired for one feature vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Predicates {
    pub sleep_like: bool,
    pub wake_like: bool,
    /// REM via saccade evidence (EOG available).
    pub rem_eog: bool,
    /// REM via beta and facial activity (EOG unavailable).
    pub rem_fallback: bool,
    pub deep_like: bool,
}

impl Predicates {
    pub fn any(&self) -> bool {
        self.sleep_like || self.wake_like || self.rem_eog || self.rem_fallback || self.deep_like
    }
}

/// Accumulated per-stage scores, indexed by [`Stage::index`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageScores([f64; Stage::COUNT]);

impl StageScores {
    pub fn add(&mut self, stage: Stage, weight: f64) {
        self.0[stage.index()] += weight;
    }

    pub fn set(&mut self, stage: Stage, score: f64) {
        self.0[stage.index()] = score;
    }

    pub fn get(&self, stage: Stage) -> f64 {
        self.0[stage.index()]
    }

    /// Highest-scoring stage; the first in enumeration order wins ties.
    pub fn argmax(&self) -> (Stage, f64) {
        let mut best = (Stage::Wake, self.get(Stage::Wake));
        for stage in &Stage::ALL[1..] {
            let score = self.get(*stage);
            if score > best.1 {
                best = (*stage, score);
            }
        }
        best
    }
}

/// Scores the four stage candidates from a feature vector.
#[derive(Debug, Clone)]
pub struct RuleClassifier {
    config: ClassifierConfig,
}

impl RuleClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Evaluates every predicate.
    pub fn predicates(&self, f: &FeatureVector) -> Predicates {
        let c = &self.config;
        let th_al = f.theta_alpha_ratio;
        let motion = f.motion_rms;
        let beta = f.beta_relative_power;
        let sacc = f.eog_saccade_rate;
        let still = motion <= c.motion_sleep_max;

        let (rem_eog, rem_fallback) = if f.eog_available {
            let rem = still
                && (sacc >= c.saccade_rem_min
                    || (sacc >= c.saccade_rem_assist_min && beta >= c.beta_rem_assist_min));
            (rem, false)
        } else {
            let rem = still
                && beta >= c.beta_rem_fallback_min
                && f.facial_activity_rate > c.facial_rem_fallback_min;
            (false, rem)
        };

        Predicates {
            sleep_like: th_al >= c.theta_alpha_sleep && still,
            wake_like: th_al < c.theta_alpha_wake || motion > c.motion_wake_min,
            rem_eog,
            rem_fallback,
            deep_like: motion <= c.motion_deep_max && beta <= c.beta_deep_max,
        }
    }

    /// Accumulates weighted scores for the fired predicates.
    pub fn scores(&self, f: &FeatureVector) -> StageScores {
        let c = &self.config;
        let p = self.predicates(f);
        let mut scores = StageScores::default();

        if p.wake_like {
            scores.add(Stage::Wake, c.w_wake);
        }
        // Deep is a refinement of NREM: its evidence replaces the generic
        // sleep-like vote instead of competing with it.
        if p.sleep_like && !(p.deep_like && c.deep_overrides_light) {
            scores.add(Stage::LightNrem, c.w_light);
        }
        if p.rem_eog {
            scores.add(Stage::Rem, c.w_rem_eog);
            if f.eog_saccade_rate >= c.saccade_strong {
                scores.add(Stage::Rem, c.w_saccade_strong_bonus);
            }
        }
        if p.rem_fallback {
            scores.add(Stage::Rem, c.w_rem_fallback);
        }
        if p.deep_like {
            scores.add(Stage::Deep, c.w_deep);
        }
        if !p.any() {
            scores.set(Stage::LightNrem, c.w_fallback_light);
        }
        scores
    }

    /// Classifies one feature vector.
    pub fn classify(&self, f: &FeatureVector) -> ScoredStage {
        let (stage, score) = self.scores(f).argmax();
        ScoredStage::new(stage, score)
    }
}

impl Default for RuleClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}
