//! Running metric accumulators scoped to one training or evaluation phase.
//!
//! Both accumulators start from their identity state (no observations, a
//! result of `0.0`) and return to it on [`MetricSet::reset_all`].

use serde::{Deserialize, Serialize};

/// Running mean of scalar observations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mean {
    total: f64,
    count: usize,
}

impl Mean {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one observation
    pub fn update(&mut self, value: f64) {
        self.total += value;
        self.count += 1;
    }

    /// Mean of the observations so far, `0.0` when there are none
    pub fn result(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Fraction of samples whose predicted class matches the target class
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoricalAccuracy {
    correct: usize,
    total: usize,
}

impl CategoricalAccuracy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a batch with `correct` hits out of `total` samples
    pub fn update(&mut self, correct: usize, total: usize) {
        self.correct += correct.min(total);
        self.total += total;
    }

    /// Accuracy so far, `0.0` when nothing has been observed
    pub fn result(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    pub fn count(&self) -> usize {
        self.total
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// The metrics tracked by the classifier: mean loss and accuracy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    pub loss: Mean,
    pub accuracy: CategoricalAccuracy,
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one step: its loss and its classification hits
    pub fn update(&mut self, loss: f64, correct: usize, total: usize) {
        self.loss.update(loss);
        self.accuracy.update(correct, total);
    }

    /// Clears both accumulators back to their identity state
    pub fn reset_all(&mut self) {
        self.loss.reset();
        self.accuracy.reset();
    }

    /// True when no step has been recorded since the last reset
    pub fn is_empty(&self) -> bool {
        self.loss.count() == 0 && self.accuracy.count() == 0
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            loss: self.loss.result(),
            accuracy: self.accuracy.result(),
        }
    }
}

/// Current values of a [`MetricSet`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub loss: f64,
    pub accuracy: f64,
}

impl MetricsSnapshot {
    /// Metric names paired with their values, in a stable order
    pub fn entries(&self) -> [(&'static str, f64); 2] {
        [("loss", self.loss), ("accuracy", self.accuracy)]
    }

    /// One-line summary such as `val_loss: 0.6931, val_accuracy: 0.5000`
    pub fn summary(&self, prefix: &str) -> String {
        self.entries()
            .iter()
            .map(|(name, value)| format!("{prefix}{name}: {value:.4}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_accumulates() {
        let mut mean = Mean::new();
        mean.update(1.0);
        mean.update(2.0);
        mean.update(6.0);
        assert_eq!(mean.count(), 3);
        assert!((mean.result() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_accuracy_accumulates() {
        let mut acc = CategoricalAccuracy::new();
        acc.update(3, 4);
        acc.update(1, 4);
        assert_eq!(acc.count(), 8);
        assert!((acc.result() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_reset_restores_identity() {
        let mut metrics = MetricSet::new();
        metrics.update(1.25, 1, 1);
        assert!(!metrics.is_empty());
        assert_eq!(metrics.snapshot().accuracy, 1.0);

        metrics.reset_all();
        assert!(metrics.is_empty());
        assert_eq!(metrics.loss.count(), 0);
        assert_eq!(metrics.accuracy.count(), 0);
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_summary_prefix() {
        let snapshot = MetricsSnapshot {
            loss: 0.5,
            accuracy: 0.75,
        };
        assert_eq!(snapshot.summary(""), "loss: 0.5000, accuracy: 0.7500");
        assert_eq!(
            snapshot.summary("val_"),
            "val_loss: 0.5000, val_accuracy: 0.7500"
        );
    }
}
