use std::fmt;

use polars::prelude::PolarsError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The pipeline stage an error or report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Load,
    Schema,
    Outliers,
    Imputation,
    Encoding,
    FeatureSelection,
    Balancing,
    Normalization,
    Splitting,
    Reshaping,
    Training,
    Tuning,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Schema => "schema",
            Stage::Outliers => "outliers",
            Stage::Imputation => "imputation",
            Stage::Encoding => "encoding",
            Stage::FeatureSelection => "feature_selection",
            Stage::Balancing => "balancing",
            Stage::Normalization => "normalization",
            Stage::Splitting => "splitting",
            Stage::Reshaping => "reshaping",
            Stage::Training => "training",
            Stage::Tuning => "tuning",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("schema error in stage {stage}, attribute {attribute:?}: {reason}")]
    Schema {
        stage: Stage,
        attribute: String,
        reason: String,
    },
    #[error("insufficient samples in stage {stage}, attribute {attribute:?}: needed {needed}, found {found}")]
    InsufficientSamples {
        stage: Stage,
        attribute: String,
        needed: usize,
        found: usize,
    },
    #[error("invalid configuration {parameter:?}: {reason}")]
    Configuration { parameter: String, reason: String },
    #[error("numerical failure in stage {stage}: {reason}")]
    Numerical { stage: Stage, reason: String },
    #[error(transparent)]
    Polars(#[from] PolarsError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

impl PipelineError {
    pub fn schema(stage: Stage, attribute: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::Schema {
            stage,
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::Configuration {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    pub fn insufficient(
        stage: Stage,
        attribute: impl Into<String>,
        needed: usize,
        found: usize,
    ) -> Self {
        PipelineError::InsufficientSamples {
            stage,
            attribute: attribute.into(),
            needed,
            found,
        }
    }

    /// Stage that raised the error, when it is known.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Schema { stage, .. }
            | PipelineError::InsufficientSamples { stage, .. }
            | PipelineError::Numerical { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
