//! Data preparation for stroke prediction: the healthcare stroke dataset is
//! cleaned, encoded, reduced to significant features, rebalanced, normalised,
//! split and reshaped into single-step sequences for a sequence classifier.

pub mod balance;
pub mod config;
pub mod encode;
pub mod error;
pub mod impute;
pub mod io;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod outliers;
pub mod pipeline;
pub mod records;
pub mod reshape;
pub mod schema;
pub mod select;
pub mod split;
pub mod stats;
pub mod tuning;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result, Stage};
pub use pipeline::{CleanedDataset, Pipeline, PipelineReport, PreparedData};
pub use records::{ClassLabel, DatasetSchema, LabeledMatrix};
