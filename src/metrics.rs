//! Training-progress metrics.
//!
//! The core does not render progress itself; it hands a [`BatchMetrics`]
//! record to a caller-supplied [`MetricsSink`] after every batch. [`LogSink`]
//! is the minimal in-tree sink, emitting one `log` line per batch.

use crate::labeling;

/// Per-batch training figures handed to a [`MetricsSink`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchMetrics {
    /// Epoch index, `0..epochs_total`.
    pub epoch: usize,
    pub epochs_total: usize,
    /// Batch index within the epoch, `0..batches_per_epoch`.
    pub batch: usize,
    pub batches_per_epoch: usize,
    /// Mean training loss over this batch.
    pub loss_train: f32,
    /// Mean loss over the validation set (0 when there is none).
    pub loss_validation: f32,
    /// Mean training accuracy over this batch.
    pub accuracy_train: f32,
    /// Mean accuracy over the validation set (0 when there is none).
    pub accuracy_validation: f32,
}

/// Consumer of per-batch training metrics.
pub trait MetricsSink {
    fn record_batch(&mut self, metrics: &BatchMetrics);
}

/// Sink that reports batches through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn record_batch(&mut self, m: &BatchMetrics) {
        log::info!(
            "epoch {}/{} batch {}/{} | Tloss: {:8.4} Tacc: {:6.2}% | Vloss: {:8.4} Vacc: {:6.2}%",
            m.epoch + 1,
            m.epochs_total,
            m.batch + 1,
            m.batches_per_epoch,
            m.loss_train,
            m.accuracy_train * 100.0,
            m.loss_validation,
            m.accuracy_validation * 100.0
        );
    }
}

/// Categorical / binary accuracy between a prediction and its target.
///
/// When the target row marks more than one class (multi-hot), both rows are
/// thresholded; otherwise the prediction counts as the argmax class alone.
/// Returns the fraction of indices whose membership matches.
pub fn accuracy(predicted: &[f32], expected: &[f32], threshold: f32) -> f32 {
    if predicted.is_empty() {
        log::error!("accuracy over an empty output");
        return 0.0;
    }
    debug_assert_eq!(predicted.len(), expected.len());

    let expected_labels = labeling::output_to_labels(expected, threshold);
    let predicted_labels = if expected_labels.len() > 1 {
        labeling::output_to_labels(predicted, threshold)
    } else {
        vec![labeling::argmax(predicted) as u32]
    };

    let mut matches = 0;
    for i in 0..predicted.len() as u32 {
        let want = expected_labels.contains(&i);
        let got = predicted_labels.contains(&i);
        if want == got {
            matches += 1;
        }
    }
    matches as f32 / predicted.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_single_label_prediction() {
        let predicted = [0.1, 0.8, 0.1];
        let expected = [0.0, 1.0, 0.0];
        assert_eq!(accuracy(&predicted, &expected, 0.5), 1.0);
    }

    #[test]
    fn wrong_single_label_prediction_misses_two_indices() {
        let predicted = [0.8, 0.1, 0.1];
        let expected = [0.0, 1.0, 0.0];
        // Index 0 is a false positive and index 1 a false negative.
        assert!((accuracy(&predicted, &expected, 0.5) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn multi_label_rows_are_thresholded() {
        let predicted = [0.9, 0.2, 0.7, 0.1];
        let expected = [1.0, 0.0, 1.0, 0.0];
        assert_eq!(accuracy(&predicted, &expected, 0.5), 1.0);

        let predicted = [0.9, 0.6, 0.2, 0.1];
        // One wrong-on, one wrong-off.
        assert_eq!(accuracy(&predicted, &expected, 0.5), 0.5);
    }

    #[test]
    fn argmax_wins_even_below_threshold() {
        // Single-label target: the predicted class is the argmax even though
        // no prediction clears the threshold.
        let predicted = [0.4, 0.3, 0.3];
        let expected = [1.0, 0.0, 0.0];
        assert_eq!(accuracy(&predicted, &expected, 0.5), 1.0);
    }
}
