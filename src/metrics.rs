//! Binary classification metrics for a held-out partition.

use std::fmt;

use serde::Serialize;
use smartcore::metrics::{accuracy, roc_auc_score};

use crate::error::{PipelineError, Result, Stage};
use crate::records::ClassLabel;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub true_negative: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub true_positive: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(labels: &[ClassLabel], predicted: &[ClassLabel]) -> Self {
        let mut matrix = ConfusionMatrix::default();
        for (actual, predicted) in labels.iter().zip(predicted) {
            match (actual, predicted) {
                (ClassLabel::Negative, ClassLabel::Negative) => matrix.true_negative += 1,
                (ClassLabel::Negative, ClassLabel::Positive) => matrix.false_positive += 1,
                (ClassLabel::Positive, ClassLabel::Negative) => matrix.false_negative += 1,
                (ClassLabel::Positive, ClassLabel::Positive) => matrix.true_positive += 1,
            }
        }
        matrix
    }

    /// Zero when nothing was predicted positive.
    pub fn precision(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_positive)
    }

    /// Zero when there are no positive samples.
    pub fn recall(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_negative)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub threshold: f64,
    pub support: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Absent when the labels hold a single class.
    pub roc_auc: Option<f64>,
    pub confusion: ConfusionMatrix,
}

/// Score positive-class probabilities against true labels. A probability at
/// or above `threshold` predicts the positive class.
pub fn evaluate(labels: &[ClassLabel], probabilities: &[f64], threshold: f64) -> Result<EvaluationReport> {
    if labels.len() != probabilities.len() {
        return Err(PipelineError::schema(
            Stage::Training,
            "predictions",
            format!("{} label(s) but {} prediction(s)", labels.len(), probabilities.len()),
        ));
    }
    if labels.is_empty() {
        return Err(PipelineError::insufficient(Stage::Training, "predictions", 1, 0));
    }

    let predicted: Vec<ClassLabel> = probabilities
        .iter()
        .map(|p| if *p >= threshold { ClassLabel::Positive } else { ClassLabel::Negative })
        .collect();
    let confusion = ConfusionMatrix::from_predictions(labels, &predicted);

    let y_true: Vec<f64> = labels.iter().map(|l| l.as_f64()).collect();
    // smartcore's accuracy requires `Ord`, so it is computed on class indices.
    let true_idx: Vec<usize> = labels.iter().map(|l| l.index()).collect();
    let pred_idx: Vec<usize> = predicted.iter().map(|l| l.index()).collect();
    let both_classes = confusion.true_positive + confusion.false_negative > 0
        && confusion.true_negative + confusion.false_positive > 0;
    let roc_auc = if both_classes {
        Some(roc_auc_score(&y_true, &probabilities.to_vec()))
    } else {
        None
    };

    Ok(EvaluationReport {
        threshold,
        support: labels.len(),
        accuracy: accuracy(&true_idx, &pred_idx),
        precision: confusion.precision(),
        recall: confusion.recall(),
        f1: confusion.f1(),
        roc_auc,
        confusion,
    })
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "samples:   {}", self.support)?;
        writeln!(f, "accuracy:  {:.4}", self.accuracy)?;
        writeln!(f, "precision: {:.4}", self.precision)?;
        writeln!(f, "recall:    {:.4}", self.recall)?;
        writeln!(f, "f1:        {:.4}", self.f1)?;
        match self.roc_auc {
            Some(auc) => writeln!(f, "roc_auc:   {:.4}", auc)?,
            None => writeln!(f, "roc_auc:   n/a")?,
        }
        write!(
            f,
            "confusion: [[{}, {}], [{}, {}]]",
            self.confusion.true_negative,
            self.confusion.false_positive,
            self.confusion.false_negative,
            self.confusion.true_positive
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ClassLabel::{Negative as N, Positive as P};

    #[test]
    fn counts_and_rates() {
        let labels = [P, P, P, N, N, N, N, N];
        let probabilities = [0.9, 0.8, 0.3, 0.6, 0.1, 0.2, 0.4, 0.05];
        let report = evaluate(&labels, &probabilities, 0.5).unwrap();
        assert_eq!(
            report.confusion,
            ConfusionMatrix {
                true_negative: 4,
                false_positive: 1,
                false_negative: 1,
                true_positive: 2,
            }
        );
        assert!((report.accuracy - 0.75).abs() < 1e-12);
        assert!((report.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((report.recall - 2.0 / 3.0).abs() < 1e-12);
        assert!((report.f1 - 2.0 / 3.0).abs() < 1e-12);
        let auc = report.roc_auc.unwrap();
        assert!(auc > 0.5 && auc <= 1.0);
    }

    #[test]
    fn perfect_ranking_has_unit_auc() {
        let labels = [N, N, P, P];
        let report = evaluate(&labels, &[0.1, 0.2, 0.7, 0.9], 0.5).unwrap();
        assert_eq!(report.accuracy, 1.0);
        assert!((report.roc_auc.unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn single_class_has_no_auc_and_zero_precision() {
        let report = evaluate(&[N, N, N], &[0.1, 0.2, 0.3], 0.5).unwrap();
        assert_eq!(report.roc_auc, None);
        assert_eq!(report.precision, 0.0);
        assert_eq!(report.recall, 0.0);
        assert_eq!(report.f1, 0.0);
        assert_eq!(report.accuracy, 1.0);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        assert!(evaluate(&[N, P], &[0.5], 0.5).is_err());
        assert!(evaluate(&[], &[], 0.5).is_err());
    }
}
