use parking_lot::RwLock;
use std::collections::VecDeque;

use crate::config::{BIAS_MIN_SAMPLES, BIAS_WINDOW};

/// Keeps a sliding window of recent residuals (actual - predicted) and the
/// additive correction derived from them.
///
/// The window sum is recomputed from the buffer on every push, so a large
/// residual leaving the window takes its rounding error with it.
#[derive(Debug, Clone)]
pub struct BiasTracker {
    /// Number of residuals to keep in the window
    window_size: usize,
    /// Observations required before the correction becomes non-zero
    min_samples: usize,
    /// Sliding window of residuals, oldest first
    residuals: VecDeque<f64>,
    /// Sum of `residuals`
    sum: f64,
    /// Total observations ever recorded
    observed: u64,
    /// Current correction
    correction: f64,
}

impl BiasTracker {
    pub fn new(window_size: usize, min_samples: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            window_size,
            min_samples,
            residuals: VecDeque::with_capacity(window_size),
            sum: 0.0,
            observed: 0,
            correction: 0.0,
        }
    }

    /// Add one (predicted, actual) observation and refresh the correction.
    ///
    /// Returns the new correction.
    pub fn record(&mut self, predicted: f64, actual: f64) -> f64 {
        let residual = actual - predicted;
        if !residual.is_finite() {
            return self.correction;
        }

        if self.residuals.len() >= self.window_size {
            self.residuals.pop_front();
        }
        self.residuals.push_back(residual);
        self.sum = self.residuals.iter().sum();
        self.observed += 1;

        if self.residuals.len() >= self.min_samples {
            self.correction = self.sum / self.residuals.len() as f64;
        }
        self.correction
    }

    pub fn correction(&self) -> f64 {
        self.correction
    }

    pub fn observed(&self) -> u64 {
        self.observed
    }

    /// Get the current window length
    pub fn window_len(&self) -> usize {
        self.residuals.len()
    }

    pub fn reset(&mut self) {
        self.residuals.clear();
        self.sum = 0.0;
        self.observed = 0;
        self.correction = 0.0;
    }
}

impl Default for BiasTracker {
    fn default() -> Self {
        Self::new(BIAS_WINDOW, BIAS_MIN_SAMPLES)
    }
}

/// A `BiasTracker` owned by one predictor instance.
///
/// Writers are serialised by the lock; a reader sees the correction from
/// before or after an update, never a torn one.
#[derive(Debug, Default)]
pub struct SharedBias {
    inner: RwLock<BiasTracker>,
}

impl SharedBias {
    pub fn new(tracker: BiasTracker) -> Self {
        Self {
            inner: RwLock::new(tracker),
        }
    }

    pub fn correction(&self) -> f64 {
        self.inner.read().correction()
    }

    pub fn observed(&self) -> u64 {
        self.inner.read().observed()
    }

    pub fn record(&self, predicted: f64, actual: f64) -> f64 {
        self.inner.write().record(predicted, actual)
    }

    pub fn reset(&self) {
        self.inner.write().reset();
    }
}
