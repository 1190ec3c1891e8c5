//! Stage 8: seeded train/test partitioning.

use log::info;
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{PipelineError, Result, Stage};
use crate::records::{ClassLabel, LabeledMatrix};
use crate::reshape::SequenceBatch;

/// One row of the balanced set, keyed by its position in that set.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSample {
    pub index: usize,
    pub features: Vec<f64>,
    pub label: ClassLabel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub feature_names: Vec<String>,
    pub samples: Vec<LabeledSample>,
}

pub type TrainSet = Partition;
pub type TestSet = Partition;

impl Partition {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.index).collect()
    }

    pub fn features(&self) -> Vec<Vec<f64>> {
        self.samples.iter().map(|s| s.features.clone()).collect()
    }

    pub fn labels(&self) -> Vec<ClassLabel> {
        self.samples.iter().map(|s| s.label).collect()
    }

    pub fn to_sequences(&self) -> Result<SequenceBatch> {
        SequenceBatch::from_rows(&self.features(), self.feature_names.len())
    }

    /// `index`, one column per feature, then `label`.
    pub fn to_frame(&self) -> Result<DataFrame> {
        let mut columns = Vec::with_capacity(self.feature_names.len() + 2);
        columns.push(Series::new(
            "index",
            self.samples.iter().map(|s| s.index as u64).collect::<Vec<_>>(),
        ));
        for (j, name) in self.feature_names.iter().enumerate() {
            columns.push(Series::new(
                name,
                self.samples.iter().map(|s| s.features[j]).collect::<Vec<_>>(),
            ));
        }
        columns.push(Series::new(
            "label",
            self.samples.iter().map(|s| s.label.index() as i32).collect::<Vec<_>>(),
        ));
        Ok(DataFrame::new(columns)?)
    }
}

/// Shuffle with `seed`, then hold out `ceil(n * test_ratio)` samples.
pub fn split(matrix: LabeledMatrix, test_ratio: f64, seed: u64) -> Result<(TrainSet, TestSet)> {
    if !(test_ratio > 0.0 && test_ratio < 1.0) {
        return Err(PipelineError::configuration(
            "test_ratio",
            format!("{} must lie in (0, 1)", test_ratio),
        ));
    }
    let n = matrix.len();
    let n_test = (n as f64 * test_ratio).ceil() as usize;
    let n_train = n.saturating_sub(n_test);
    if n_test == 0 || n_train == 0 {
        return Err(PipelineError::insufficient(Stage::Splitting, "*", 2, n));
    }

    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let LabeledMatrix {
        feature_names,
        rows,
        labels,
    } = matrix;
    let mut slots: Vec<Option<(Vec<f64>, ClassLabel)>> =
        rows.into_iter().zip(labels).map(Some).collect();
    let mut take = |index: usize| {
        slots[index].take().map(|(features, label)| LabeledSample {
            index,
            features,
            label,
        })
    };
    let test: Vec<LabeledSample> = order[..n_test].iter().filter_map(|i| take(*i)).collect();
    let train: Vec<LabeledSample> = order[n_test..].iter().filter_map(|i| take(*i)).collect();

    info!("splitting: {} train, {} test (seed {})", train.len(), test.len(), seed);
    Ok((
        Partition {
            feature_names: feature_names.clone(),
            samples: train,
        },
        Partition {
            feature_names,
            samples: test,
        },
    ))
}
