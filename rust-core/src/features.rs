//! Epoch feature extraction.
//!
//! Reduces the per-channel windowed buffers into one [`FeatureVector`] per
//! evaluation tick:
//! - Band ratios from the component-wise average of all buffered power vectors
//! - Motion as the median acceleration magnitude (robust to transient spikes)
//! - Facial activity as a weighted rate of scored events
//! - Saccade rate and variance from the decimated EOG window
//!
//! Extraction never fails. Missing power or motion data yields `None`, which
//! callers treat as "skip this tick".

use crate::bands::BandLayout;
use crate::buffer::WindowedBuffer;
use crate::types::{finite_or_zero, FacialScore, FeatureVector};

/// Fewer retained EOG samples than this give a zero saccade rate.
pub const MIN_EOG_SAMPLES: usize = 5;

/// Saccade threshold in standard deviations above the mean difference.
pub const SACCADE_THRESHOLD_SD: f64 = 2.5;

/// Dead time after each detected saccade (seconds).
pub const SACCADE_REFRACTORY_SEC: f64 = 0.1;

/// One windowed buffer per channel. Quality is a scalar, not buffered.
#[derive(Debug, Clone)]
pub struct ChannelBuffers {
    /// Raw band-power vectors.
    pub power: WindowedBuffer<Vec<f64>>,
    /// Acceleration magnitudes.
    pub motion: WindowedBuffer<f64>,
    /// Scored facial events.
    pub facial: WindowedBuffer<FacialScore>,
    /// Decimated EOG amplitudes.
    pub eog: WindowedBuffer<f64>,
}

impl ChannelBuffers {
    pub fn new(window_seconds: f64) -> Self {
        Self {
            power: WindowedBuffer::new(window_seconds),
            motion: WindowedBuffer::new(window_seconds),
            facial: WindowedBuffer::new(window_seconds),
            eog: WindowedBuffer::new(window_seconds),
        }
    }
}

/// Decimates heterogeneous EOG sources to a common rate and tracks availability.
#[derive(Debug, Clone)]
pub struct EogDecimator {
    target_rate_hz: f64,
    available_window_sec: f64,
    counter: u64,
    last_retained_t: Option<f64>,
}

impl EogDecimator {
    pub fn new(target_rate_hz: f64, available_window_sec: f64) -> Self {
        Self {
            target_rate_hz,
            available_window_sec,
            counter: 0,
            last_retained_t: None,
        }
    }

    /// Decimation factor for a source rate: `floor(source / target)`, at least 1.
    pub fn factor(&self, source_rate_hz: f64) -> u64 {
        if !source_rate_hz.is_finite() || source_rate_hz <= 0.0 {
            return 1;
        }
        ((source_rate_hz / self.target_rate_hz).floor() as u64).max(1)
    }

    /// Counts one incoming sample and reports whether decimation keeps it.
    pub fn accept(&mut self, source_rate_hz: f64) -> bool {
        self.counter += 1;
        self.counter % self.factor(source_rate_hz) == 0
    }

    /// Notes that a sample at `t` was retained in the EOG buffer.
    ///
    /// Availability follows the newest retained sample, so a delayed
    /// sample never moves it backwards.
    pub fn mark_retained(&mut self, t: f64) {
        self.last_retained_t = Some(match self.last_retained_t {
            Some(prev) => prev.max(t),
            None => t,
        });
    }

    /// EOG is available iff a sample was retained within the availability window.
    pub fn is_available(&self, now: f64) -> bool {
        match self.last_retained_t {
            Some(t) => now - t <= self.available_window_sec,
            None => false,
        }
    }

    pub fn last_retained_t(&self) -> Option<f64> {
        self.last_retained_t
    }

    pub fn target_rate_hz(&self) -> f64 {
        self.target_rate_hz
    }
}

/// Stateless reducer from channel buffers to a feature vector.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    eog_rate_hz: f64,
}

impl FeatureExtractor {
    /// `eog_rate_hz` is the post-decimation EOG rate.
    pub fn new(eog_rate_hz: f64) -> Self {
        Self { eog_rate_hz }
    }

    /// Extracts features from every buffered sample newer than `since`
    /// (all retained samples when `since` is `None`).
    ///
    /// Returns `None` when the power or motion window is empty.
    pub fn extract(
        &self,
        buffers: &ChannelBuffers,
        layout: &BandLayout,
        eog_available: bool,
        signal_quality: f64,
        since: Option<f64>,
    ) -> Option<FeatureVector> {
        let since = since.unwrap_or(f64::NEG_INFINITY);

        let power: Vec<&Vec<f64>> = buffers.power.values_since(since).collect();
        let motion: Vec<f64> = buffers.motion.values_since(since).copied().collect();
        if power.is_empty() || motion.is_empty() {
            return None;
        }

        let avg = average_power(&power);
        let facial: Vec<FacialScore> = buffers.facial.values_since(since).copied().collect();

        let (eog_saccade_rate, eog_variance) = if eog_available {
            let eog: Vec<f64> = buffers.eog.values_since(since).copied().collect();
            if eog.is_empty() {
                (0.0, 0.0)
            } else {
                (saccade_rate(&eog, self.eog_rate_hz), variance(&eog))
            }
        } else {
            (0.0, 0.0)
        };

        Some(FeatureVector {
            theta_alpha_ratio: finite_or_zero(layout.theta_alpha_ratio(&avg)),
            beta_relative_power: finite_or_zero(layout.beta_relative_power(&avg)),
            motion_rms: finite_or_zero(median(&motion)),
            facial_activity_rate: facial_activity_rate(&facial),
            eog_saccade_rate: finite_or_zero(eog_saccade_rate),
            eog_variance: finite_or_zero(eog_variance),
            eog_available,
            signal_quality,
        })
    }
}

/// Component-wise mean of power vectors.
///
/// The first vector fixes the length; shorter vectors contribute zero to the
/// components they lack, longer ones are truncated.
pub fn average_power(vectors: &[&Vec<f64>]) -> Vec<f64> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let len = first.len();
    let mut avg = vec![0.0; len];
    for v in vectors {
        for (acc, x) in avg.iter_mut().zip(v.iter()) {
            *acc += x;
        }
    }
    let n = vectors.len() as f64;
    avg.iter_mut().for_each(|x| *x /= n);
    avg
}

/// Euclidean norm of the three axes starting at `offset`; zero when the vector
/// is too short.
pub fn accel_magnitude(values: &[f64], offset: usize) -> f64 {
    match offset.checked_add(3).and_then(|end| values.get(offset..end)) {
        Some(axes) => axes
            .iter()
            .map(|x| finite_or_zero(*x).powi(2))
            .sum::<f64>()
            .sqrt(),
        None => 0.0,
    }
}

/// Weighted facial activity rate, clipped to [0, 1].
pub fn facial_activity_rate(scores: &[FacialScore]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let weighted: f64 = scores.iter().map(FacialScore::weight).sum();
    (weighted / scores.len() as f64).min(1.0)
}

/// Saccade events per second in an EOG window sampled at `fs` Hz.
///
/// A saccade is a successive absolute difference above
/// `mean + 2.5·sd` of all differences; each detection is followed by a 100 ms
/// refractory skip.
pub fn saccade_rate(xs: &[f64], fs: f64) -> f64 {
    if xs.len() < MIN_EOG_SAMPLES || !(fs > 0.0) {
        return 0.0;
    }
    let diffs: Vec<f64> = xs.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let m = mean(&diffs);
    let sd = variance(&diffs).sqrt();
    if sd < 1e-9 {
        return 0.0;
    }
    let threshold = m + SACCADE_THRESHOLD_SD * sd;
    let refractory = ((SACCADE_REFRACTORY_SEC * fs) as usize).max(1);

    let mut events = 0usize;
    let mut i = 0;
    while i < diffs.len() {
        if diffs[i] > threshold {
            events += 1;
            i += refractory;
        } else {
            i += 1;
        }
    }
    events as f64 / (xs.len() as f64 / fs)
}

pub(crate) fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

/// Population variance.
pub(crate) fn variance(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let m = mean(xs);
    xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / xs.len() as f64
}

pub(crate) fn median(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}

/// Median absolute deviation around `center`.
pub(crate) fn mad(xs: &[f64], center: f64) -> f64 {
    let deviations: Vec<f64> = xs.iter().map(|x| (x - center).abs()).collect();
    median(&deviations)
}
