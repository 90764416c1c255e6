//! Time-windowed per-channel sample buffer.
//!
//! Retains only samples whose timestamp lies within `window_seconds` of the
//! newest timestamp ever pushed. The reference time is the sample clock, never
//! wall-clock time, so replaying the same stream always retains the same
//! entries.
//!
//! - O(1) amortized push for in-order streams: eviction is monotonic from the front
//! - Late samples are inserted in time order; samples already older than the
//!   window are dropped on arrival

use std::collections::VecDeque;

/// Windowed buffer of `(t, value)` pairs ordered by time.
#[derive(Debug, Clone)]
pub struct WindowedBuffer<T> {
    window_seconds: f64,
    entries: VecDeque<(f64, T)>,
    newest_t: Option<f64>,
}

impl<T> WindowedBuffer<T> {
    /// Creates an empty buffer retaining `window_seconds` of history.
    pub fn new(window_seconds: f64) -> Self {
        Self {
            window_seconds,
            entries: VecDeque::new(),
            newest_t: None,
        }
    }

    /// Appends a sample and evicts everything older than the window.
    ///
    /// Returns whether the sample was retained. Non-finite timestamps and
    /// samples already older than the window are not.
    pub fn push(&mut self, t: f64, value: T) -> bool {
        if !t.is_finite() {
            return false;
        }
        let newest = match self.newest_t {
            Some(n) if n >= t => n,
            _ => t,
        };
        self.newest_t = Some(newest);

        if newest - t > self.window_seconds {
            return false;
        }

        match self.entries.back() {
            Some(&(last_t, _)) if last_t > t => {
                let pos = self.entries.partition_point(|&(et, _)| et <= t);
                self.entries.insert(pos, (t, value));
            }
            _ => self.entries.push_back((t, value)),
        }

        self.trim(newest);
        true
    }

    fn trim(&mut self, now: f64) {
        while let Some(&(front_t, _)) = self.entries.front() {
            if now - front_t > self.window_seconds {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Retained values in time order.
    pub fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.entries.iter().map(|(_, v)| v)
    }

    /// Retained values with timestamp strictly after `since`, in time order.
    pub fn values_since(&self, since: f64) -> impl Iterator<Item = &T> + '_ {
        let start = self.entries.partition_point(|&(t, _)| t <= since);
        self.entries.range(start..).map(|(_, v)| v)
    }

    /// Retained `(t, value)` pairs in time order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &T)> + '_ {
        self.entries.iter().map(|(t, v)| (*t, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest timestamp ever pushed.
    pub fn newest_t(&self) -> Option<f64> {
        self.newest_t
    }

    pub fn window_seconds(&self) -> f64 {
        self.window_seconds
    }
}
