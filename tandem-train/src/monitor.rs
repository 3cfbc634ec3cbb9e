//! Loss history and convergence detection.
//!
//! The loop only risks a dataset reload once training has settled. Settling
//! is measured on the first differences of the recent loss window: the
//! differencing removes the downward trend of the curve, leaving the
//! step-to-step noise. Once that noise has a population standard deviation
//! below the threshold, the loop is considered stable.
//!
//! The statistic is recomputed from the window on every call rather than
//! maintained incrementally; windows are small and recomputation does not
//! accumulate rounding drift.

use std::collections::VecDeque;

/// Default loss window size.
pub const DEFAULT_WINDOW: usize = 32;
/// Default dispersion threshold below which training counts as stable.
pub const DEFAULT_THRESHOLD: f32 = 0.10;

/// Bounded, append-only history of per-iteration loss values.
#[derive(Debug, Clone)]
pub struct LossHistory {
    samples: VecDeque<f32>,
    capacity: usize,
    total_recorded: u64,
}

impl LossHistory {
    /// Create an empty history holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            total_recorded: 0,
        }
    }

    /// Append a sample, evicting the oldest once the window is full.
    pub fn push(&mut self, loss: f32) {
        self.samples.push_back(loss);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        self.total_recorded += 1;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of samples ever pushed, including evicted ones.
    pub fn total_recorded(&self) -> u64 {
        self.total_recorded
    }

    /// Whether more samples have been seen than the window holds.
    pub fn has_cycled(&self) -> bool {
        self.total_recorded > self.capacity as u64
    }

    pub fn latest(&self) -> Option<f32> {
        self.samples.back().copied()
    }

    /// Samples in iteration order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        self.samples.iter().copied()
    }

    /// Population standard deviation of the window's first differences.
    ///
    /// `None` with fewer than two samples.
    pub fn difference_std_dev(&self) -> Option<f32> {
        first_difference_std_dev(self.samples.iter().copied())
    }
}

/// Population standard deviation of consecutive differences of `values`.
pub fn first_difference_std_dev(values: impl IntoIterator<Item = f32>) -> Option<f32> {
    let values: Vec<f64> = values.into_iter().map(f64::from).collect();
    if values.len() < 2 {
        return None;
    }

    let diffs: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let n = diffs.len() as f64;
    let mean = diffs.iter().sum::<f64>() / n;
    let variance = diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
    Some(variance.sqrt() as f32)
}

/// Classifies a loss history as stable or still decaying.
#[derive(Debug, Clone, Copy)]
pub struct ConvergenceMonitor {
    threshold: f32,
}

impl ConvergenceMonitor {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Stable once the window has cycled at least once and the difference
    /// dispersion is below the threshold.
    pub fn is_stable(&self, history: &LossHistory) -> bool {
        if !history.has_cycled() {
            return false;
        }
        history
            .difference_std_dev()
            .is_some_and(|dispersion| dispersion < self.threshold)
    }
}

impl Default for ConvergenceMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}
