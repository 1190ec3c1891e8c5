//! Sequence classifier contract and a logistic baseline.

use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result, Stage};
use crate::records::ClassLabel;
use crate::reshape::SequenceBatch;

/// Per-class loss multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassWeights {
    pub negative: f64,
    pub positive: f64,
}

impl Default for ClassWeights {
    fn default() -> Self {
        Self {
            negative: 1.0,
            positive: 1.0,
        }
    }
}

impl ClassWeights {
    /// `n / (2 * count_c)` for each class.
    pub fn balanced(labels: &[ClassLabel]) -> Result<Self> {
        let n = labels.len();
        let positives = labels.iter().filter(|l| **l == ClassLabel::Positive).count();
        let negatives = n - positives;
        if positives == 0 || negatives == 0 {
            return Err(PipelineError::insufficient(
                Stage::Training,
                "class_weight",
                1,
                positives.min(negatives),
            ));
        }
        Ok(Self {
            negative: n as f64 / (2.0 * negatives as f64),
            positive: n as f64 / (2.0 * positives as f64),
        })
    }

    pub fn weight(&self, label: ClassLabel) -> f64 {
        match label {
            ClassLabel::Negative => self.negative,
            ClassLabel::Positive => self.positive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub class_weight: ClassWeights,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 32,
            class_weight: ClassWeights::default(),
        }
    }
}

impl FitOptions {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(PipelineError::configuration("epochs", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::configuration("batch_size", "must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    pub fn final_val_accuracy(&self) -> Option<f64> {
        self.last().and_then(|m| m.val_accuracy)
    }
}

/// A binary classifier over single-step sequences.
pub trait SequenceClassifier {
    fn fit(
        &mut self,
        train: &SequenceBatch,
        labels: &[ClassLabel],
        options: &FitOptions,
        validation: Option<(&SequenceBatch, &[ClassLabel])>,
    ) -> Result<TrainingHistory>;

    /// Positive-class probability of every sample.
    fn predict(&self, batch: &SequenceBatch) -> Result<Vec<f64>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Sgd,
    Adam,
    #[serde(rename = "rmsprop")]
    #[value(name = "rmsprop")]
    RmsProp,
}

impl OptimizerKind {
    pub const ALL: [OptimizerKind; 3] = [OptimizerKind::Sgd, OptimizerKind::Adam, OptimizerKind::RmsProp];
}

impl std::fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OptimizerKind::Sgd => "sgd",
            OptimizerKind::Adam => "adam",
            OptimizerKind::RmsProp => "rmsprop",
        })
    }
}

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const RHO: f64 = 0.9;
const EPSILON: f64 = 1e-7;

/// Moment buffers of one optimiser over a flat parameter vector.
#[derive(Debug, Clone)]
struct OptimizerState {
    kind: OptimizerKind,
    learning_rate: f64,
    first: Vec<f64>,
    second: Vec<f64>,
    steps: i32,
}

impl OptimizerState {
    fn new(kind: OptimizerKind, learning_rate: f64, size: usize) -> Self {
        Self {
            kind,
            learning_rate,
            first: vec![0.0; size],
            second: vec![0.0; size],
            steps: 0,
        }
    }

    fn step(&mut self, params: &mut [f64], grads: &[f64]) {
        self.steps += 1;
        let lr = self.learning_rate;
        match self.kind {
            OptimizerKind::Sgd => {
                for (p, g) in params.iter_mut().zip(grads) {
                    *p -= lr * g;
                }
            }
            OptimizerKind::Adam => {
                let correction1 = 1.0 - BETA1.powi(self.steps);
                let correction2 = 1.0 - BETA2.powi(self.steps);
                for i in 0..params.len() {
                    self.first[i] = BETA1 * self.first[i] + (1.0 - BETA1) * grads[i];
                    self.second[i] = BETA2 * self.second[i] + (1.0 - BETA2) * grads[i] * grads[i];
                    let m = self.first[i] / correction1;
                    let v = self.second[i] / correction2;
                    params[i] -= lr * m / (v.sqrt() + EPSILON);
                }
            }
            OptimizerKind::RmsProp => {
                for i in 0..params.len() {
                    self.second[i] = RHO * self.second[i] + (1.0 - RHO) * grads[i] * grads[i];
                    params[i] -= lr * grads[i] / (self.second[i].sqrt() + EPSILON);
                }
            }
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn binary_cross_entropy(p: f64, y: f64) -> f64 {
    let p = p.clamp(EPSILON, 1.0 - EPSILON);
    -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
}

/// Weighted logistic regression trained by mini-batch gradient descent.
#[derive(Debug, Clone)]
pub struct LogisticSequenceClassifier {
    width: usize,
    /// Feature weights followed by the bias.
    params: Vec<f64>,
    optimizer: OptimizerKind,
    learning_rate: f64,
    seed: u64,
}

impl LogisticSequenceClassifier {
    pub fn new(width: usize, optimizer: OptimizerKind, learning_rate: f64, seed: u64) -> Self {
        Self {
            width,
            params: vec![0.0; width + 1],
            optimizer,
            learning_rate,
            seed,
        }
    }

    pub fn weights(&self) -> &[f64] {
        &self.params[..self.width]
    }

    pub fn bias(&self) -> f64 {
        self.params[self.width]
    }

    fn probability(&self, x: &[f64]) -> f64 {
        let z: f64 = self.bias() + self.weights().iter().zip(x).map(|(w, v)| w * v).sum::<f64>();
        sigmoid(z)
    }

    fn check_width(&self, batch: &SequenceBatch) -> Result<()> {
        if batch.width() != self.width {
            return Err(PipelineError::schema(
                Stage::Training,
                "features",
                format!("model expects {} feature(s), batch has {}", self.width, batch.width()),
            ));
        }
        Ok(())
    }

    fn evaluate(&self, rows: &[Vec<f64>], labels: &[ClassLabel], weights: &ClassWeights) -> (f64, f64) {
        if rows.is_empty() {
            return (0.0, 0.0);
        }
        let mut loss = 0.0;
        let mut correct = 0;
        for (x, label) in rows.iter().zip(labels) {
            let p = self.probability(x);
            loss += weights.weight(*label) * binary_cross_entropy(p, label.as_f64());
            if (p >= 0.5) == (*label == ClassLabel::Positive) {
                correct += 1;
            }
        }
        let n = rows.len() as f64;
        (loss / n, correct as f64 / n)
    }
}

fn check_labels(batch: &SequenceBatch, labels: &[ClassLabel]) -> Result<()> {
    if batch.len() != labels.len() {
        return Err(PipelineError::schema(
            Stage::Training,
            "labels",
            format!("{} sample(s) but {} label(s)", batch.len(), labels.len()),
        ));
    }
    Ok(())
}

impl SequenceClassifier for LogisticSequenceClassifier {
    fn fit(
        &mut self,
        train: &SequenceBatch,
        labels: &[ClassLabel],
        options: &FitOptions,
        validation: Option<(&SequenceBatch, &[ClassLabel])>,
    ) -> Result<TrainingHistory> {
        options.validate()?;
        self.check_width(train)?;
        check_labels(train, labels)?;
        if train.is_empty() {
            return Err(PipelineError::insufficient(Stage::Training, "*", 1, 0));
        }
        let validation = match validation {
            Some((batch, labels)) => {
                self.check_width(batch)?;
                check_labels(batch, labels)?;
                Some((batch.flatten(), labels))
            }
            None => None,
        };

        let rows = train.flatten();
        let mut order: Vec<usize> = (0..rows.len()).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut optimizer = OptimizerState::new(self.optimizer, self.learning_rate, self.params.len());
        let mut grads = vec![0.0; self.params.len()];
        let mut history = TrainingHistory::default();

        for epoch in 1..=options.epochs {
            order.shuffle(&mut rng);
            for batch in order.chunks(options.batch_size) {
                grads.iter_mut().for_each(|g| *g = 0.0);
                for i in batch {
                    let label = labels[*i];
                    let error = options.class_weight.weight(label)
                        * (self.probability(&rows[*i]) - label.as_f64());
                    for (g, x) in grads.iter_mut().zip(&rows[*i]) {
                        *g += error * x;
                    }
                    grads[self.width] += error;
                }
                let size = batch.len() as f64;
                grads.iter_mut().for_each(|g| *g /= size);
                optimizer.step(&mut self.params, &grads);
            }

            let (loss, accuracy) = self.evaluate(&rows, labels, &options.class_weight);
            let (val_loss, val_accuracy) = match &validation {
                Some((rows, labels)) => {
                    let (l, a) = self.evaluate(rows, labels, &ClassWeights::default());
                    (Some(l), Some(a))
                }
                None => (None, None),
            };
            debug!(
                "epoch {}/{}: loss {:.4}, accuracy {:.4}, val_accuracy {:?}",
                epoch, options.epochs, loss, accuracy, val_accuracy
            );
            history.epochs.push(EpochMetrics {
                epoch,
                loss,
                accuracy,
                val_loss,
                val_accuracy,
            });
        }
        Ok(history)
    }

    fn predict(&self, batch: &SequenceBatch) -> Result<Vec<f64>> {
        self.check_width(batch)?;
        Ok(batch
            .steps()
            .outer_iter()
            .map(|row| match row.as_slice() {
                Some(x) => self.probability(x),
                None => self.probability(&row.to_vec()),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable(n: usize) -> (SequenceBatch, Vec<ClassLabel>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..n {
            let positive = i % 2 == 0;
            let x = if positive { 1.0 + (i % 5) as f64 * 0.1 } else { -1.0 - (i % 7) as f64 * 0.1 };
            rows.push(vec![x, 0.5]);
            labels.push(if positive { ClassLabel::Positive } else { ClassLabel::Negative });
        }
        (SequenceBatch::from_rows(&rows, 2).unwrap(), labels)
    }

    #[test]
    fn balanced_weights_are_inverse_frequency() {
        let labels = [ClassLabel::Negative, ClassLabel::Negative, ClassLabel::Negative, ClassLabel::Positive];
        let weights = ClassWeights::balanced(&labels).unwrap();
        assert!((weights.negative - 4.0 / 6.0).abs() < 1e-12);
        assert!((weights.positive - 2.0).abs() < 1e-12);
        assert!(ClassWeights::balanced(&labels[..3]).is_err());
    }

    #[test]
    fn every_optimizer_learns_a_separable_problem() {
        let (batch, labels) = separable(60);
        for kind in OptimizerKind::ALL {
            let mut model = LogisticSequenceClassifier::new(2, kind, 0.1, 2);
            let options = FitOptions {
                epochs: 30,
                batch_size: 8,
                class_weight: ClassWeights::default(),
            };
            let history = model.fit(&batch, &labels, &options, Some((&batch, &labels))).unwrap();
            assert_eq!(history.epochs.len(), 30);
            assert_eq!(history.final_val_accuracy(), Some(1.0), "optimizer {}", kind);

            let probabilities = model.predict(&batch).unwrap();
            assert!(probabilities.iter().all(|p| (0.0..=1.0).contains(p)));
            assert!(probabilities[0] > 0.5);
            assert!(probabilities[1] < 0.5);
        }
    }

    #[test]
    fn training_is_reproducible() {
        let (batch, labels) = separable(40);
        let options = FitOptions {
            epochs: 5,
            batch_size: 4,
            class_weight: ClassWeights::balanced(&labels).unwrap(),
        };
        let mut a = LogisticSequenceClassifier::new(2, OptimizerKind::Adam, 0.01, 9);
        let mut b = LogisticSequenceClassifier::new(2, OptimizerKind::Adam, 0.01, 9);
        assert_eq!(
            a.fit(&batch, &labels, &options, None).unwrap(),
            b.fit(&batch, &labels, &options, None).unwrap()
        );
        assert_eq!(a.weights(), b.weights());
    }

    #[test]
    fn width_mismatch_is_rejected() {
        let (batch, labels) = separable(10);
        let mut model = LogisticSequenceClassifier::new(3, OptimizerKind::Sgd, 0.1, 1);
        assert!(model.fit(&batch, &labels, &FitOptions::default(), None).is_err());
        assert!(model.predict(&batch).is_err());
    }

    #[test]
    fn zero_epochs_is_a_configuration_error() {
        let (batch, labels) = separable(10);
        let mut model = LogisticSequenceClassifier::new(2, OptimizerKind::Sgd, 0.1, 1);
        let options = FitOptions {
            epochs: 0,
            ..FitOptions::default()
        };
        assert!(matches!(
            model.fit(&batch, &labels, &options, None),
            Err(PipelineError::Configuration { .. })
        ));
    }
}
