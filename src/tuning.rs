//! Random hyperparameter search over a sequence-classifier builder.

use std::path::Path;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result, Stage};
use crate::model::{ClassWeights, FitOptions, OptimizerKind, SequenceClassifier};
use crate::records::ClassLabel;
use crate::reshape::SequenceBatch;

/// Inclusive integer range sampled on a grid of `step`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntRange {
    pub min: usize,
    pub max: usize,
    pub step: usize,
}

impl IntRange {
    fn validate(&self, parameter: &str) -> Result<()> {
        if self.step == 0 || self.min > self.max {
            return Err(PipelineError::configuration(
                parameter,
                format!("invalid range {}..={} step {}", self.min, self.max, self.step),
            ));
        }
        Ok(())
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> usize {
        let steps = (self.max - self.min) / self.step;
        self.min + rng.gen_range(0..=steps) * self.step
    }
}

/// Inclusive float range sampled on a grid of `step`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl FloatRange {
    fn validate(&self, parameter: &str) -> Result<()> {
        if !(self.step > 0.0) || !(self.min <= self.max) {
            return Err(PipelineError::configuration(
                parameter,
                format!("invalid range {}..={} step {}", self.min, self.max, self.step),
            ));
        }
        Ok(())
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        let steps = ((self.max - self.min) / self.step + 1e-9).floor() as usize;
        let value = self.min + rng.gen_range(0..=steps) as f64 * self.step;
        (value * 1e6).round() / 1e6
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSpace {
    pub layers: IntRange,
    pub units: IntRange,
    pub dropout: FloatRange,
    pub optimizers: Vec<OptimizerKind>,
    pub learning_rates: Vec<f64>,
    pub epochs: Vec<usize>,
    pub batch_sizes: Vec<usize>,
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            layers: IntRange { min: 1, max: 3, step: 1 },
            units: IntRange { min: 32, max: 512, step: 32 },
            dropout: FloatRange { min: 0.0, max: 0.5, step: 0.1 },
            optimizers: OptimizerKind::ALL.to_vec(),
            learning_rates: vec![0.001, 0.01],
            epochs: vec![50],
            batch_sizes: vec![32],
        }
    }
}

impl SearchSpace {
    pub fn validate(&self) -> Result<()> {
        self.layers.validate("search.layers")?;
        self.units.validate("search.units")?;
        self.dropout.validate("search.dropout")?;
        if self.dropout.min < 0.0 || self.dropout.max >= 1.0 {
            return Err(PipelineError::configuration("search.dropout", "must lie in [0, 1)"));
        }
        if self.layers.min == 0 {
            return Err(PipelineError::configuration("search.layers", "must be at least 1"));
        }
        let empty = [
            ("search.optimizers", self.optimizers.is_empty()),
            ("search.learning_rates", self.learning_rates.is_empty()),
            ("search.epochs", self.epochs.is_empty()),
            ("search.batch_sizes", self.batch_sizes.is_empty()),
        ];
        if let Some((parameter, _)) = empty.iter().find(|(_, empty)| *empty) {
            return Err(PipelineError::configuration(*parameter, "needs at least one choice"));
        }
        if self.learning_rates.iter().any(|lr| !(*lr > 0.0)) {
            return Err(PipelineError::configuration("search.learning_rates", "must be positive"));
        }
        if self.epochs.contains(&0) || self.batch_sizes.contains(&0) {
            return Err(PipelineError::configuration("search", "epochs and batch sizes must be positive"));
        }
        Ok(())
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> TrialConfig {
        let layers = self.layers.sample(rng);
        let units = (0..layers).map(|_| self.units.sample(rng)).collect();
        let dropout = (0..layers).map(|_| self.dropout.sample(rng)).collect();
        TrialConfig {
            layers,
            units,
            dropout,
            optimizer: *pick(&self.optimizers, rng),
            learning_rate: *pick(&self.learning_rates, rng),
            epochs: *pick(&self.epochs, rng),
            batch_size: *pick(&self.batch_sizes, rng),
            seed: 0,
        }
    }
}

// Callers validate that `choices` is non-empty.
fn pick<'a, T, R: Rng>(choices: &'a [T], rng: &mut R) -> &'a T {
    &choices[rng.gen_range(0..choices.len())]
}

/// One sampled point of the search space. `units` and `dropout` hold one
/// entry per layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialConfig {
    pub layers: usize,
    pub units: Vec<usize>,
    pub dropout: Vec<f64>,
    pub optimizer: OptimizerKind,
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    /// Seed handed to the model of one execution.
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialResult {
    pub trial: usize,
    pub config: TrialConfig,
    pub scores: Vec<f64>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub best: TrialConfig,
    pub best_score: f64,
    pub trials: Vec<TrialResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomSearch {
    pub max_trials: usize,
    pub executions_per_trial: usize,
    pub seed: u64,
}

impl Default for RandomSearch {
    fn default() -> Self {
        Self {
            max_trials: 5,
            executions_per_trial: 3,
            seed: 2,
        }
    }
}

impl RandomSearch {
    /// Sample `max_trials` configurations, train `executions_per_trial` models
    /// for each and score a trial by its mean final validation accuracy. Ties
    /// keep the earlier trial.
    pub fn search<C, F>(
        &self,
        space: &SearchSpace,
        build: F,
        train: (&SequenceBatch, &[ClassLabel]),
        validation: (&SequenceBatch, &[ClassLabel]),
        class_weight: ClassWeights,
    ) -> Result<SearchOutcome>
    where
        C: SequenceClassifier,
        F: Fn(&TrialConfig) -> Result<C>,
    {
        if self.max_trials == 0 || self.executions_per_trial == 0 {
            return Err(PipelineError::configuration(
                "search",
                "max_trials and executions_per_trial must be at least 1",
            ));
        }
        space.validate()?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut trials: Vec<TrialResult> = Vec::with_capacity(self.max_trials);
        for trial in 0..self.max_trials {
            let mut config = space.sample(&mut rng);
            let mut scores = Vec::with_capacity(self.executions_per_trial);
            for execution in 0..self.executions_per_trial {
                config.seed = rng.gen();
                let mut model = build(&config)?;
                let options = FitOptions {
                    epochs: config.epochs,
                    batch_size: config.batch_size,
                    class_weight,
                };
                let history = model.fit(train.0, train.1, &options, Some(validation))?;
                let score = history.final_val_accuracy().ok_or_else(|| PipelineError::Numerical {
                    stage: Stage::Tuning,
                    reason: "classifier reported no validation accuracy".to_string(),
                })?;
                debug!("trial {} execution {}: val_accuracy {:.4}", trial, execution, score);
                scores.push(score);
            }
            let score = scores.iter().sum::<f64>() / scores.len() as f64;
            info!(
                "trial {}: {} layer(s), {} optimizer, score {:.4}",
                trial, config.layers, config.optimizer, score
            );
            trials.push(TrialResult {
                trial,
                config,
                scores,
                score,
            });
        }

        let mut best = 0;
        for (i, result) in trials.iter().enumerate().skip(1) {
            if result.score > trials[best].score {
                best = i;
            }
        }
        info!("search: best trial {} with score {:.4}", best, trials[best].score);
        Ok(SearchOutcome {
            best: trials[best].config.clone(),
            best_score: trials[best].score,
            trials,
        })
    }
}

#[derive(Serialize)]
struct TrialRow<'a> {
    trial: usize,
    layers: usize,
    units: String,
    dropout: String,
    optimizer: &'a OptimizerKind,
    learning_rate: f64,
    epochs: usize,
    batch_size: usize,
    score: f64,
}

fn join<T: ToString>(values: &[T]) -> String {
    values.iter().map(ToString::to_string).collect::<Vec<_>>().join(";")
}

/// One CSV row per trial; per-layer values are `;`-separated.
pub fn write_trials_csv<P: AsRef<Path>>(path: P, trials: &[TrialResult]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for result in trials {
        writer.serialize(TrialRow {
            trial: result.trial,
            layers: result.config.layers,
            units: join(&result.config.units),
            dropout: join(&result.config.dropout),
            optimizer: &result.config.optimizer,
            learning_rate: result.config.learning_rate,
            epochs: result.config.epochs,
            batch_size: result.config.batch_size,
            score: result.score,
        })?;
    }
    writer.flush()?;
    Ok(())
}
