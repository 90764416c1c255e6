//! Sleep Sensing Engine Library
//!
//! A real-time epoch inference kernel that turns several independently timed
//! biosignal streams (band power, motion, signal quality, facial activity and
//! optional external EOG) into sleep-stage *candidate* labels with a
//! confidence score.
//!
//! # Design Philosophy
//!
//! - **Candidates, not diagnoses**: labels are heuristic; confidence is a
//!   rule strength, not a calibrated probability.
//! - **Degrade, never fail**: malformed input is defaulted, poor signal yields
//!   an explicit poor-quality row, missing data yields "no result".
//! - **One owner per session**: a [`SleepEngine`] holds all state; concurrent
//!   producers go through the [`actor`] queue instead of sharing buffers.
//! - **Tunable offline**: every threshold, weight and the decoder's
//!   transition matrix lives in [`EngineConfig`].
//!
//! # Example
//!
//! ```rust
//! use sleep_sensing::{SleepEngine, Stage};
//!
//! let mut engine = SleepEngine::default();
//! engine.configure(&["AF3/theta", "AF3/alpha", "AF3/betaL", "AF3/betaH"]);
//!
//! let mut motion = vec![0.0; 12];
//! motion[9] = 0.5;
//! engine.push_power(0.0, &[1.0, 2.0, 1.0, 1.0]);
//! engine.push_motion(0.0, &motion);
//!
//! let row = engine.evaluate(5.0).expect("power and motion are buffered");
//! assert_eq!(row.stage, Some(Stage::Wake));
//! ```

pub mod actor;
pub mod bands;
pub mod buffer;
pub mod classifier;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod features;
pub mod ingest;
pub mod smoother;
pub mod types;

#[cfg(test)]
mod integration_tests;

// Re-export commonly used types
pub use config::{ClassifierConfig, DecoderConfig, EngineConfig, SmootherConfig};
pub use engine::SleepEngine;
pub use error::{ActorError, ConfigError};
pub use types::{
    ConfirmedEpoch, FacialAction, FacialEvent, FeatureVector, QualityMarker, Row, Sample,
    SamplePayload, ScoredStage, Stage,
};
