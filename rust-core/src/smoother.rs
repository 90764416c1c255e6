//! Hysteresis smoothing of raw stage classifications.
//!
//! A small state machine over the four stages plus an uninitialized start.
//! It damps label flicker with a hold timer and guards two implausible
//! transitions with higher confidence floors:
//! - inside the hold window a change needs high confidence
//! - Wake → REM needs very high confidence (spurious REM right after waking)
//! - entering Deep needs moderate confidence (noise-driven Deep flips)
//!
//! The smoother exclusively owns its state; nothing else mutates it.

use tracing::debug;

use crate::config::SmootherConfig;
use crate::types::{ScoredStage, Stage};

/// Why a proposed stage was not adopted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Change proposed inside the hold window with too little confidence.
    HoldWindow,
    /// Wake → REM below the Wake → REM floor.
    WakeToRem,
    /// Deep proposed below the Deep entry floor.
    DeepEntry,
}

impl RejectReason {
    pub fn description(&self) -> &'static str {
        match self {
            RejectReason::HoldWindow => "low-confidence change inside hold window",
            RejectReason::WakeToRem => "wake to REM below confidence floor",
            RejectReason::DeepEntry => "deep entry below confidence floor",
        }
    }
}

/// What the smoother did with one classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmoothingDecision {
    /// First classification, accepted unconditionally.
    Seeded,
    /// Proposed stage adopted and hold timer reset.
    Accepted,
    /// Previous stage kept.
    Rejected(RejectReason),
}

/// Smoother state: last adopted stage and the end of its hold window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SmootherState {
    pub last_stage: Option<Stage>,
    pub hold_until: f64,
}

/// Output of one smoothing step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothedStage {
    pub stage: Stage,
    pub decision: SmoothingDecision,
}

/// Hysteresis smoother over stage classifications.
#[derive(Debug, Clone)]
pub struct HysteresisSmoother {
    config: SmootherConfig,
    state: SmootherState,
}

impl HysteresisSmoother {
    pub fn new(config: SmootherConfig) -> Self {
        Self {
            config,
            state: SmootherState::default(),
        }
    }

    /// Applies the transition function to a raw classification at time `now`.
    pub fn smooth(&mut self, now: f64, proposed: ScoredStage) -> SmoothedStage {
        let Some(prev) = self.state.last_stage else {
            self.adopt(now, proposed.stage);
            return SmoothedStage {
                stage: proposed.stage,
                decision: SmoothingDecision::Seeded,
            };
        };

        if let Some(reason) = self.rejection(now, prev, proposed) {
            debug!(
                previous = %prev,
                proposed = %proposed.stage,
                confidence = proposed.confidence,
                reason = reason.description(),
                "stage change rejected"
            );
            return SmoothedStage {
                stage: prev,
                decision: SmoothingDecision::Rejected(reason),
            };
        }

        self.adopt(now, proposed.stage);
        SmoothedStage {
            stage: proposed.stage,
            decision: SmoothingDecision::Accepted,
        }
    }

    fn rejection(&self, now: f64, prev: Stage, proposed: ScoredStage) -> Option<RejectReason> {
        let c = &self.config;
        let conf = proposed.confidence;
        if now < self.state.hold_until && conf < c.hold_override_confidence && proposed.stage != prev {
            return Some(RejectReason::HoldWindow);
        }
        if prev == Stage::Wake && proposed.stage == Stage::Rem && conf < c.wake_to_rem_confidence {
            return Some(RejectReason::WakeToRem);
        }
        if proposed.stage == Stage::Deep && conf < c.deep_entry_confidence {
            return Some(RejectReason::DeepEntry);
        }
        None
    }

    fn adopt(&mut self, now: f64, stage: Stage) {
        self.state.last_stage = Some(stage);
        self.state.hold_until = now + self.config.hold_min_sec;
    }

    /// Last adopted stage, `None` before the first classification.
    pub fn current_stage(&self) -> Option<Stage> {
        self.state.last_stage
    }

    pub fn state(&self) -> SmootherState {
        self.state
    }
}

impl Default for HysteresisSmoother {
    fn default() -> Self {
        Self::new(SmootherConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(stage: Stage, confidence: f64) -> ScoredStage {
        ScoredStage::new(stage, confidence)
    }

    #[test]
    fn test_first_classification_seeds_state() {
        let mut smoother = HysteresisSmoother::default();
        assert_eq!(smoother.current_stage(), None);

        let out = smoother.smooth(100.0, scored(Stage::Deep, 0.1));
        assert_eq!(out.stage, Stage::Deep);
        assert_eq!(out.decision, SmoothingDecision::Seeded);
        assert_eq!(smoother.state().hold_until, 120.0);
    }

    #[test]
    fn test_low_confidence_change_held() {
        let mut smoother = HysteresisSmoother::default();
        smoother.smooth(0.0, scored(Stage::LightNrem, 0.85));

        let out = smoother.smooth(5.0, scored(Stage::Wake, 0.7));
        assert_eq!(out.stage, Stage::LightNrem);
        assert_eq!(out.decision, SmoothingDecision::Rejected(RejectReason::HoldWindow));
    }

    #[test]
    fn test_high_confidence_change_overrides_hold() {
        let mut smoother = HysteresisSmoother::default();
        smoother.smooth(0.0, scored(Stage::LightNrem, 0.6));

        let out = smoother.smooth(5.0, scored(Stage::Wake, 0.85));
        assert_eq!(out.stage, Stage::Wake);
        assert_eq!(out.decision, SmoothingDecision::Accepted);
        assert_eq!(smoother.state().hold_until, 25.0);
    }

    #[test]
    fn test_change_accepted_after_hold_expires() {
        let mut smoother = HysteresisSmoother::default();
        smoother.smooth(0.0, scored(Stage::LightNrem, 0.6));

        let out = smoother.smooth(20.0, scored(Stage::Wake, 0.7));
        assert_eq!(out.stage, Stage::Wake);
    }

    #[test]
    fn test_wake_to_rem_needs_high_confidence() {
        let mut smoother = HysteresisSmoother::default();
        smoother.smooth(0.0, scored(Stage::Wake, 0.7));

        let out = smoother.smooth(60.0, scored(Stage::Rem, 0.8));
        assert_eq!(out.stage, Stage::Wake);
        assert_eq!(out.decision, SmoothingDecision::Rejected(RejectReason::WakeToRem));

        let out = smoother.smooth(65.0, scored(Stage::Rem, 0.9));
        assert_eq!(out.stage, Stage::Rem);
    }

    #[test]
    fn test_light_to_rem_not_guarded() {
        let mut smoother = HysteresisSmoother::default();
        smoother.smooth(0.0, scored(Stage::LightNrem, 0.6));
        let out = smoother.smooth(60.0, scored(Stage::Rem, 0.6));
        assert_eq!(out.stage, Stage::Rem);
    }

    #[test]
    fn test_deep_entry_needs_confidence() {
        let mut smoother = HysteresisSmoother::default();
        smoother.smooth(0.0, scored(Stage::LightNrem, 0.6));

        let out = smoother.smooth(60.0, scored(Stage::Deep, 0.4));
        assert_eq!(out.stage, Stage::LightNrem);
        assert_eq!(out.decision, SmoothingDecision::Rejected(RejectReason::DeepEntry));

        let out = smoother.smooth(65.0, scored(Stage::Deep, 0.7));
        assert_eq!(out.stage, Stage::Deep);
    }

    #[test]
    fn test_same_stage_refreshes_hold() {
        let mut smoother = HysteresisSmoother::default();
        smoother.smooth(0.0, scored(Stage::Wake, 0.7));
        smoother.smooth(15.0, scored(Stage::Wake, 0.7));
        assert_eq!(smoother.state().hold_until, 35.0);
    }
}
