//! The nine preparation stages chained in their required order.

use log::info;
use polars::prelude::DataFrame;
use serde::Serialize;

use crate::balance::{balance, BalanceReport};
use crate::config::PipelineConfig;
use crate::encode::{encode_categoricals, EncodingReport};
use crate::error::Result;
use crate::impute::{impute, ImputationReport};
use crate::normalize::normalize_rows;
use crate::outliers::{filter_outliers, OutlierReport};
use crate::reshape::SequenceBatch;
use crate::schema::{normalize_schema, SchemaReport};
use crate::select::{feature_matrix, select_features, SelectionReport};
use crate::split::{split, TestSet, TrainSet};

/// Output of stages 1 to 4: a fully numeric frame with no missing values.
#[derive(Debug, Clone)]
pub struct CleanedDataset {
    pub frame: DataFrame,
    pub schema: SchemaReport,
    pub outliers: OutlierReport,
    pub imputation: ImputationReport,
    pub encoding: EncodingReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    pub schema: SchemaReport,
    pub outliers: OutlierReport,
    pub imputation: ImputationReport,
    pub encoding: EncodingReport,
    pub selection: SelectionReport,
    pub balance: BalanceReport,
}

#[derive(Debug, Clone)]
pub struct PreparedData {
    pub train: TrainSet,
    pub test: TestSet,
    pub train_sequences: SequenceBatch,
    pub test_sequences: SequenceBatch,
    pub report: PipelineReport,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Fails on an invalid configuration before any data is read.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn clean(&self, raw: DataFrame) -> Result<CleanedDataset> {
        let config = &self.config;
        let (df, schema) = normalize_schema(
            raw,
            &config.schema,
            config.min_category_count,
            config.drop_duplicate_ids,
        )?;
        let (df, outliers) = filter_outliers(df, &config.outlier_ranges)?;
        let (df, imputation) = impute(df, &config.schema, &config.imputation)?;
        let (frame, encoding) = encode_categoricals(df, &config.schema)?;
        Ok(CleanedDataset {
            frame,
            schema,
            outliers,
            imputation,
            encoding,
        })
    }

    pub fn run(&self, raw: DataFrame) -> Result<PreparedData> {
        info!("pipeline: {} raw rows, seed {}", raw.height(), self.config.seed);
        let cleaned = self.clean(raw)?;
        self.finish(cleaned)
    }

    /// Stages 5 to 9 on the output of [`Pipeline::clean`].
    pub fn finish(&self, cleaned: CleanedDataset) -> Result<PreparedData> {
        let config = &self.config;
        let matrix = feature_matrix(&cleaned.frame, &config.schema)?;
        let (matrix, selection) = select_features(matrix, &config.selection)?;
        let (matrix, balance) = balance(matrix, config.balancing.k_neighbors, config.seed)?;
        let matrix = normalize_rows(matrix);
        let (train, test) = split(matrix, config.test_ratio, config.seed)?;
        let train_sequences = train.to_sequences()?;
        let test_sequences = test.to_sequences()?;
        info!(
            "pipeline: train {:?}, test {:?}",
            train_sequences.shape(),
            test_sequences.shape()
        );

        Ok(PreparedData {
            train,
            test,
            train_sequences,
            test_sequences,
            report: PipelineReport {
                schema: cleaned.schema,
                outliers: cleaned.outliers,
                imputation: cleaned.imputation,
                encoding: cleaned.encoding,
                selection,
                balance,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::NamedFrom;
    use crate::error::PipelineError;

    #[test]
    fn invalid_config_is_rejected_before_any_stage() {
        let config = PipelineConfig {
            test_ratio: 1.5,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            Pipeline::new(config),
            Err(PipelineError::Configuration { .. })
        ));
    }

    #[test]
    fn clean_requires_the_full_schema() {
        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let raw = polars::df!("id" => &[1, 2], "age" => &[3.0, 4.0]).unwrap();
        let err = pipeline.clean(raw).unwrap_err();
        assert_eq!(err.stage(), Some(crate::error::Stage::Schema));
    }
}
