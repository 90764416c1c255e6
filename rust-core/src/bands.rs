//! Band layout: which power-vector indices feed each spectral metric.
//!
//! The vendor announces its power channels as labels such as `AF3/theta` or
//! `T7/betaH`. The layout is derived once per session by suffix match and then
//! reused for every evaluation. An unset layout is valid and simply yields
//! zero band ratios.

use serde::{Deserialize, Serialize};

/// Index sets of the theta, alpha and beta bands within a power vector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandLayout {
    pub theta: Vec<usize>,
    pub alpha: Vec<usize>,
    /// Low and high beta combined.
    pub beta: Vec<usize>,
}

impl BandLayout {
    /// Derives the layout from channel labels.
    ///
    /// Labels ending `/theta`, `/alpha`, `/betaL` or `/betaH` contribute their
    /// position; anything else (gamma, unknown) is ignored.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Self {
        let mut layout = BandLayout::default();
        for (i, label) in labels.iter().enumerate() {
            let label = label.as_ref();
            if label.ends_with("/theta") {
                layout.theta.push(i);
            } else if label.ends_with("/alpha") {
                layout.alpha.push(i);
            } else if label.ends_with("/betaL") || label.ends_with("/betaH") {
                layout.beta.push(i);
            }
        }
        layout
    }

    /// True when no band has any index.
    pub fn is_empty(&self) -> bool {
        self.theta.is_empty() && self.alpha.is_empty() && self.beta.is_empty()
    }

    /// θ/α ratio of an averaged power vector.
    ///
    /// Zero when either band has no usable index or mean alpha is not positive.
    pub fn theta_alpha_ratio(&self, avg: &[f64]) -> f64 {
        if self.theta.is_empty() || self.alpha.is_empty() {
            return 0.0;
        }
        let theta = band_mean(avg, &self.theta);
        let alpha = band_mean(avg, &self.alpha);
        if alpha > 0.0 {
            theta / alpha.max(RATIO_FLOOR)
        } else {
            0.0
        }
    }

    /// Mean beta power relative to mean total power of an averaged vector.
    pub fn beta_relative_power(&self, avg: &[f64]) -> f64 {
        if self.beta.is_empty() {
            return 0.0;
        }
        let beta = band_mean(avg, &self.beta);
        let total = if avg.is_empty() {
            1.0
        } else {
            avg.iter().sum::<f64>() / avg.len() as f64
        };
        beta / total.max(RATIO_FLOOR)
    }
}

/// Denominator floor for band ratios.
pub const RATIO_FLOOR: f64 = 1e-9;

/// Mean of the in-range indices of `vec`; zero when none are in range.
fn band_mean(vec: &[f64], indices: &[usize]) -> f64 {
    let (sum, n) = indices
        .iter()
        .filter_map(|&i| vec.get(i))
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}
