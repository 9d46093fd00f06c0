//! Classification metrics for validation and patient-level evaluation.
//!
//! Class 0 = COVID negative, class 1 = COVID positive.

use lungfusion_core::CovidStatus;

/// Running confusion matrix over binary predictions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    pub fn_count: usize,
}

impl ConfusionMatrix {
    pub fn record(&mut self, predicted: CovidStatus, actual: CovidStatus) {
        match (predicted, actual) {
            (CovidStatus::Positive, CovidStatus::Positive) => self.tp += 1,
            (CovidStatus::Positive, CovidStatus::Negative) => self.fp += 1,
            (CovidStatus::Negative, CovidStatus::Negative) => self.tn += 1,
            (CovidStatus::Negative, CovidStatus::Positive) => self.fn_count += 1,
        }
    }

    /// Record class indices as produced by `argmax`.
    pub fn record_indices(&mut self, predictions: &[u32], labels: &[u32]) {
        for (&pred, &label) in predictions.iter().zip(labels) {
            self.record(
                CovidStatus::from_class_index(pred as usize),
                CovidStatus::from_class_index(label as usize),
            );
        }
    }

    pub fn total(&self) -> usize {
        self.tp + self.fp + self.tn + self.fn_count
    }

    pub fn correct(&self) -> usize {
        self.tp + self.tn
    }

    pub fn metrics(&self) -> ValidationMetrics {
        let ratio = |num: usize, den: usize| {
            if den > 0 {
                num as f64 / den as f64
            } else {
                0.0
            }
        };
        let precision = ratio(self.tp, self.tp + self.fp);
        let recall = ratio(self.tp, self.tp + self.fn_count);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        ValidationMetrics {
            accuracy: ratio(self.correct(), self.total()),
            precision,
            recall,
            f1,
            fpr: ratio(self.fp, self.fp + self.tn),
            confusion: *self,
        }
    }
}

/// Metrics derived from a [`ConfusionMatrix`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ValidationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub fpr: f64,
    pub confusion: ConfusionMatrix,
}

/// Compute metrics from predicted and ground-truth class indices.
pub fn compute_validation_metrics(predictions: &[u32], labels: &[u32]) -> ValidationMetrics {
    let mut confusion = ConfusionMatrix::default();
    confusion.record_indices(predictions, labels);
    confusion.metrics()
}

impl std::fmt::Display for ValidationMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = &self.confusion;
        write!(
            f,
            "acc={:.4} prec={:.4} rec={:.4} f1={:.4} fpr={:.4} (tp={} fp={} tn={} fn={})",
            self.accuracy,
            self.precision,
            self.recall,
            self.f1,
            self.fpr,
            c.tp,
            c.fp,
            c.tn,
            c.fn_count,
        )
    }
}
