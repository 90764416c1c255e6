//! Integration tests for the complete sleep engine.
//!
//! Drives synthetic multi-rate sessions (power every 2 s, motion at 10 Hz,
//! EOG at 200 Hz, sporadic facial events) through `SleepEngine` the way a
//! live transport would: push each sample, then evaluate at its timestamp.

use serde_json::json;

use crate::config::EngineConfig;
use crate::engine::SleepEngine;
use crate::ingest::{sample_from_stream, EogReading};
use crate::types::*;

const LABELS: [&str; 5] = ["AF3/theta", "AF3/alpha", "AF3/betaL", "AF3/betaH", "AF3/gamma"];

/// Simulation grid step (seconds), the EOG source period.
const STEP: f64 = 0.005;
/// Grid steps between power vectors (2 s).
const POWER_EVERY: usize = 400;
/// Grid steps between motion vectors (10 Hz).
const MOTION_EVERY: usize = 20;
/// Grid steps between saccades (1.5 s) and their width (40 ms).
const SACCADE_EVERY: usize = 300;
const SACCADE_WIDTH: usize = 8;

/// Signal characteristics of one session phase.
#[derive(Debug, Clone, Copy)]
struct PhaseProfile {
    /// theta, alpha, betaL, betaH, gamma
    power: [f64; 5],
    motion: f64,
    eog: bool,
    facial: bool,
}

/// θ/α 0.5, high motion.
const WAKE: PhaseProfile = PhaseProfile {
    power: [1.0, 2.0, 1.0, 1.0, 0.5],
    motion: 0.5,
    eog: false,
    facial: false,
};

/// θ/α 1.5, still but above the Deep motion ceiling, high beta.
const LIGHT: PhaseProfile = PhaseProfile {
    power: [3.0, 2.0, 1.5, 1.5, 0.5],
    motion: 0.12,
    eog: false,
    facial: false,
};

/// θ/α 1.5, very still, relative beta ≈ 0.18.
const DEEP: PhaseProfile = PhaseProfile {
    power: [3.0, 2.0, 0.2, 0.2, 0.1],
    motion: 0.05,
    eog: false,
    facial: false,
};

/// θ/α 1.1, still, saccades on EOG.
const REM_EOG: PhaseProfile = PhaseProfile {
    power: [2.2, 2.0, 1.5, 1.5, 0.5],
    motion: 0.05,
    eog: true,
    facial: false,
};

/// θ/α 1.1, still, high beta, facial eye movements, no EOG.
const REM_FACIAL: PhaseProfile = PhaseProfile {
    facial: true,
    eog: false,
    ..REM_EOG
};

/// REM-like spectrum without any eye-movement evidence.
const REM_QUIET: PhaseProfile = PhaseProfile {
    eog: false,
    ..REM_EOG
};

/// Helper: motion vector with the acceleration magnitude on the x axis.
fn motion_vector(magnitude: f64) -> Vec<f64> {
    let mut v = vec![0.0; 12];
    v[9] = magnitude;
    v
}

/// Helper: samples of one phase in time order.
fn phase_samples(profile: &PhaseProfile, start: f64, duration: f64) -> Vec<Sample> {
    let steps = (duration / STEP).round() as usize;
    let mut out = Vec::new();
    for k in 0..steps {
        let t = start + k as f64 * STEP;
        if k % POWER_EVERY == 0 {
            out.push(Sample::new(t, SamplePayload::Power { values: profile.power.to_vec() }));
        }
        if k % MOTION_EVERY == 0 {
            out.push(Sample::new(t, SamplePayload::Motion { values: motion_vector(profile.motion) }));
        }
        if profile.facial && k % POWER_EVERY == POWER_EVERY / 2 {
            let event = if (k / POWER_EVERY) % 2 == 0 {
                FacialEvent::new(Some(FacialAction::LookLeft), 0.8, 0.0)
            } else {
                FacialEvent::new(None, 0.0, 0.0)
            };
            out.push(Sample::new(t, SamplePayload::Facial(event)));
        }
        if profile.eog {
            let value = if k % SACCADE_EVERY < SACCADE_WIDTH { 10.0 } else { 0.0 };
            out.push(Sample::new(t, SamplePayload::Eog { value, source_rate_hz: Some(200.0) }));
        }
    }
    out
}

/// Helper: a session made of consecutive phases.
fn session(phases: &[(PhaseProfile, f64)]) -> Vec<Sample> {
    let mut start = 0.0;
    let mut out = Vec::new();
    for (profile, duration) in phases {
        out.extend(phase_samples(profile, start, *duration));
        start += duration;
    }
    out
}

/// Helper: push each sample and evaluate at its timestamp.
fn run_session(engine: &mut SleepEngine, samples: Vec<Sample>) -> Vec<Row> {
    let mut rows = Vec::new();
    for sample in samples {
        let t = sample.t;
        engine.push_sample(sample);
        if let Some(row) = engine.evaluate(t) {
            rows.push(row);
        }
    }
    rows
}

fn configured_engine() -> SleepEngine {
    let mut engine = SleepEngine::default();
    engine.configure(&LABELS);
    engine
}

#[test]
fn test_quality_gate_then_recovery() {
    let mut engine = configured_engine();
    run_session(&mut engine, session(&[(WAKE, 10.0)]));

    engine.push_quality(10.0, 0.1);
    let row = engine.evaluate(10.0).unwrap();
    assert_eq!(row.stage, None);
    assert_eq!(row.confidence, 0.0);
    assert_eq!(row.note, Some(QualityMarker::PoorQuality));

    engine.push_quality(11.0, 0.9);
    let row = engine.evaluate(20.0).unwrap();
    assert_eq!(row.stage, Some(Stage::Wake));
    assert!(row.note.is_none());
    assert_eq!(row.features.signal_quality, 0.9);
}

#[test]
fn test_hop_idempotence_without_new_data() {
    let mut engine = configured_engine();
    run_session(&mut engine, session(&[(WAKE, 3.0)]));
    assert!(engine.evaluate(100.0).is_some());
    assert!(engine.evaluate(101.0).is_none());
    assert!(engine.evaluate(104.99).is_none());
}

#[test]
fn test_rows_emitted_on_hop_cadence() {
    let mut engine = configured_engine();
    let rows = run_session(&mut engine, session(&[(WAKE, 60.0)]));
    // The tick at t=0 sees power before motion and only starts the hop clock.
    assert_eq!(rows.len(), 11);
    for pair in rows.windows(2) {
        assert!(pair[1].t - pair[0].t >= 5.0 - 1e-9);
    }
    assert!(rows.iter().all(|r| r.stage == Some(Stage::Wake)));
}

#[test]
fn test_wake_to_light_respects_hold() {
    let mut engine = configured_engine();
    let rows = run_session(&mut engine, session(&[(WAKE, 90.0), (LIGHT, 90.0)]));

    let last = rows.last().unwrap();
    assert_eq!(last.raw_stage, Some(Stage::LightNrem));
    assert_eq!(last.stage, Some(Stage::LightNrem));

    // The smoothed label lags the raw label by at least one hold period.
    let first_raw = rows
        .iter()
        .find(|r| r.raw_stage == Some(Stage::LightNrem))
        .map(|r| r.t)
        .unwrap();
    let first_smoothed = rows
        .iter()
        .find(|r| r.stage == Some(Stage::LightNrem))
        .map(|r| r.t)
        .unwrap();
    assert!(first_smoothed > first_raw);
    assert!(first_smoothed - first_raw <= 20.0 + 1e-9);
}

#[test]
fn test_deep_scenario_raw_classification() {
    let mut engine = configured_engine();
    let rows = run_session(&mut engine, session(&[(DEEP, 40.0)]));
    let last = rows.last().unwrap();
    assert_eq!(last.raw_stage, Some(Stage::Deep));
    assert_eq!(last.confidence, 0.4);
    // First classification seeds the smoother unconditionally.
    assert_eq!(last.stage, Some(Stage::Deep));
}

#[test]
fn test_deep_entry_guarded_after_wake() {
    let mut engine = configured_engine();
    let rows = run_session(&mut engine, session(&[(WAKE, 60.0), (DEEP, 90.0)]));
    let last = rows.last().unwrap();
    assert_eq!(last.raw_stage, Some(Stage::Deep));
    assert_ne!(last.stage, Some(Stage::Deep));
}

#[test]
fn test_rem_via_eog_session() {
    let mut engine = configured_engine();
    let rows = run_session(&mut engine, session(&[(LIGHT, 90.0), (REM_EOG, 90.0)]));

    let last = rows.last().unwrap();
    assert!(last.features.eog_available);
    assert!(last.features.eog_saccade_rate >= 0.6);
    assert!(last.features.eog_variance > 0.0);
    assert_eq!(last.raw_stage, Some(Stage::Rem));
    assert!(last.confidence >= 0.6);
    assert_eq!(last.stage, Some(Stage::Rem));
}

#[test]
fn test_rem_fallback_without_eog() {
    let mut engine = configured_engine();
    let rows = run_session(&mut engine, session(&[(REM_FACIAL, 60.0)]));

    let last = rows.last().unwrap();
    assert!(!last.features.eog_available);
    assert!(last.features.facial_activity_rate > 0.02);
    assert_eq!(last.raw_stage, Some(Stage::Rem));
    assert_eq!(last.confidence, 0.3);
    assert_eq!(last.stage, Some(Stage::Rem));
    assert_eq!(last.eye_action.as_deref(), Some("look_left"));
}

#[test]
fn test_eog_dropout_zeroes_eog_features() {
    let mut engine = configured_engine();
    let rows = run_session(&mut engine, session(&[(REM_EOG, 60.0), (REM_QUIET, 40.0)]));

    let during = rows.iter().find(|r| r.t >= 55.0).unwrap();
    assert!(during.features.eog_available);

    let last = rows.last().unwrap();
    assert!(!last.features.eog_available);
    assert_eq!(last.features.eog_saccade_rate, 0.0);
    assert_eq!(last.features.eog_variance, 0.0);
    assert_ne!(last.raw_stage, Some(Stage::Rem));
}

#[test]
fn test_unset_layout_yields_zero_ratios() {
    let mut engine = SleepEngine::default();
    let rows = run_session(&mut engine, session(&[(LIGHT, 20.0)]));
    for row in &rows {
        assert_eq!(row.features.theta_alpha_ratio, 0.0);
        assert_eq!(row.features.beta_relative_power, 0.0);
    }
}

#[test]
fn test_confirmed_stage_tracks_sustained_stage() {
    let mut engine = configured_engine();
    run_session(&mut engine, session(&[(LIGHT, 90.0)]));

    let confirmed = engine.confirmed_stage(90.0).unwrap();
    assert_eq!(confirmed.stage, Stage::LightNrem);
    assert!(confirmed.posterior_confidence > 0.5);
    assert!(confirmed.posterior_confidence <= 1.0);
    assert!(confirmed.observations >= 10);

    run_session(&mut engine, phase_samples(&WAKE, 90.0, 60.0));
    let confirmed = engine.confirmed_stage(150.0).unwrap();
    assert_eq!(confirmed.stage, Stage::Wake);
}

#[test]
fn test_confirmed_stage_independent_of_quality_gate() {
    let mut engine = configured_engine();
    run_session(&mut engine, session(&[(LIGHT, 30.0)]));
    engine.push_quality(30.0, 0.0);
    assert!(engine.evaluate(31.0).unwrap().is_poor_quality());
    assert!(engine.confirmed_stage(31.0).is_some());
}

#[test]
fn test_vendor_payloads_through_ingest() {
    let mut engine = configured_engine();
    let records = [
        ("pow", json!({"time": 0.0, "pow": [1.0, 2.0, 1.0, 1.0, 0.5]})),
        ("mot", json!({"time": 0.0, "mot": motion_vector(0.5)})),
        ("dev", json!({"time": 0.0, "signal": 0.8})),
        ("fac", json!({"time": 0.5, "eyeAct": "lookRight", "uPow": 0.9, "lPow": 0.1})),
    ];
    for (stream, record) in &records {
        engine.push_sample(sample_from_stream(stream, record, 0.0).unwrap());
    }
    for line in ["0.6,1.0", "0.605,1.5", "garbage"] {
        if let Some(reading) = EogReading::from_csv_line(line) {
            engine.push_sample(reading.into_sample(Some(50.0)));
        }
    }

    let row = engine.evaluate(1.0).unwrap();
    assert_eq!(row.stage, Some(Stage::Wake));
    assert_eq!(row.features.signal_quality, 0.8);
    assert_eq!(row.eye_action.as_deref(), Some("look_right"));
    assert!(row.features.eog_available);
    assert_eq!(engine.buffers().eog.len(), 2);
}

#[test]
fn test_config_overrides_thresholds() {
    let mut cfg = EngineConfig::default();
    cfg.smoother.deep_entry_confidence = 0.3;
    let mut engine = SleepEngine::new(cfg).unwrap();
    engine.configure(&LABELS);
    let rows = run_session(&mut engine, session(&[(WAKE, 60.0), (DEEP, 90.0)]));
    assert_eq!(rows.last().unwrap().stage, Some(Stage::Deep));
}

#[test]
fn test_row_serializes_flat() {
    let mut engine = configured_engine();
    let rows = run_session(&mut engine, session(&[(WAKE, 10.0)]));
    let value = serde_json::to_value(&rows[0]).unwrap();
    assert_eq!(value["stage"], "Wake");
    assert_eq!(value["raw_stage"], "Wake");
    assert!(value.get("theta_alpha_ratio").is_some());
    assert!(value.get("features").is_none());
}
