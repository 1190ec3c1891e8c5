//! Pipeline configuration.
//!
//! `PipelineConfig::default()` reproduces the decisions of the exploratory
//! analysis of the stroke dataset: singleton categories are
//! discarded, BMI above 70 is an outlier, missing BMI is mean-imputed,
//! "unknown" smoking status is kept as its own category and the balanced set
//! is split 80/20 with seed 2. Every value can be overridden from a JSON file.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::records::{AttributeKind, DatasetSchema};

/// Closed acceptance range of a continuous attribute. A missing bound is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRange {
    pub attribute: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl AttributeRange {
    pub fn at_most(attribute: &str, max: f64) -> Self {
        Self {
            attribute: attribute.to_string(),
            min: None,
            max: Some(max),
        }
    }

    pub fn between(attribute: &str, min: f64, max: f64) -> Self {
        Self {
            attribute: attribute.to_string(),
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

/// What to do with missing continuous values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingValuePolicy {
    /// Fill with the mean of the present values.
    #[default]
    Impute,
    /// Drop the records with a missing value.
    Delete,
}

/// Treatment of a placeholder category such as "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownCategoryPolicy {
    /// Encode the placeholder like any other category.
    #[default]
    KeepAsCategory,
    /// Replace the placeholder with the most frequent known value.
    ImputeMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImputationConfig {
    pub policy: MissingValuePolicy,
    /// Missing rate above which a policy warning is raised.
    pub missing_rate_threshold: f64,
    pub unknown_policy: UnknownCategoryPolicy,
    pub unknown_token: String,
    pub unknown_attributes: Vec<String>,
}

impl Default for ImputationConfig {
    fn default() -> Self {
        Self {
            policy: MissingValuePolicy::Impute,
            missing_rate_threshold: 0.05,
            unknown_policy: UnknownCategoryPolicy::KeepAsCategory,
            unknown_token: "unknown".to_string(),
            unknown_attributes: vec!["smoking_status".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub enabled: bool,
    /// Features whose OLS p-value exceeds this are dropped.
    pub significance_level: f64,
    /// Pairs whose absolute correlation exceeds this keep a single member.
    pub correlation_threshold: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            significance_level: 0.05,
            correlation_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancingConfig {
    /// Neighbours considered when interpolating a synthetic sample.
    pub k_neighbors: usize,
}

impl Default for BalancingConfig {
    fn default() -> Self {
        Self { k_neighbors: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub schema: DatasetSchema,
    /// Categories seen fewer times than this are discarded with their records.
    pub min_category_count: usize,
    pub drop_duplicate_ids: bool,
    pub outlier_ranges: Vec<AttributeRange>,
    pub imputation: ImputationConfig,
    pub selection: SelectionConfig,
    pub balancing: BalancingConfig,
    /// Fraction of the balanced set held out for evaluation.
    pub test_ratio: f64,
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            schema: DatasetSchema::stroke(),
            min_category_count: 2,
            drop_duplicate_ids: true,
            outlier_ranges: vec![AttributeRange::at_most("bmi", 70.0)],
            imputation: ImputationConfig::default(),
            selection: SelectionConfig::default(),
            balancing: BalancingConfig::default(),
            test_ratio: 0.2,
            seed: 2,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reject parameters no stage could honour. Runs before any data is touched.
    pub fn validate(&self) -> Result<()> {
        self.schema.validate()?;

        if !(self.test_ratio > 0.0 && self.test_ratio < 1.0) {
            return Err(PipelineError::configuration(
                "test_ratio",
                format!("{} must lie in (0, 1)", self.test_ratio),
            ));
        }
        if self.min_category_count == 0 {
            return Err(PipelineError::configuration(
                "min_category_count",
                "must be at least 1",
            ));
        }
        if self.balancing.k_neighbors == 0 {
            return Err(PipelineError::configuration(
                "balancing.k_neighbors",
                "must be at least 1",
            ));
        }

        let imputation = &self.imputation;
        if !(0.0..=1.0).contains(&imputation.missing_rate_threshold) {
            return Err(PipelineError::configuration(
                "imputation.missing_rate_threshold",
                format!("{} must lie in [0, 1]", imputation.missing_rate_threshold),
            ));
        }
        for attribute in &imputation.unknown_attributes {
            self.expect_kind(
                "imputation.unknown_attributes",
                attribute,
                AttributeKind::Categorical,
            )?;
        }

        let selection = &self.selection;
        if !(selection.significance_level > 0.0 && selection.significance_level <= 1.0) {
            return Err(PipelineError::configuration(
                "selection.significance_level",
                format!("{} must lie in (0, 1]", selection.significance_level),
            ));
        }
        if !(selection.correlation_threshold > 0.0 && selection.correlation_threshold <= 1.0) {
            return Err(PipelineError::configuration(
                "selection.correlation_threshold",
                format!("{} must lie in (0, 1]", selection.correlation_threshold),
            ));
        }

        for range in &self.outlier_ranges {
            self.expect_kind("outlier_ranges", &range.attribute, AttributeKind::Continuous)?;
            if let (Some(min), Some(max)) = (range.min, range.max) {
                if min > max {
                    return Err(PipelineError::configuration(
                        "outlier_ranges",
                        format!("{}: min {} exceeds max {}", range.attribute, min, max),
                    ));
                }
            }
            if range.min.map_or(false, f64::is_nan) || range.max.map_or(false, f64::is_nan) {
                return Err(PipelineError::configuration(
                    "outlier_ranges",
                    format!("{}: bounds must be numbers", range.attribute),
                ));
            }
        }
        Ok(())
    }

    fn expect_kind(&self, parameter: &str, attribute: &str, kind: AttributeKind) -> Result<()> {
        match self.schema.get(attribute) {
            Some(spec) if spec.kind == kind => Ok(()),
            Some(spec) => Err(PipelineError::configuration(
                parameter,
                format!("{} is {:?}, expected {:?}", attribute, spec.kind, kind),
            )),
            None => Err(PipelineError::configuration(
                parameter,
                format!("{} is not part of the schema", attribute),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn split_ratio_outside_unit_interval_is_rejected() {
        for ratio in [0.0, 1.0, -0.5, 1.5] {
            let config = PipelineConfig {
                test_ratio: ratio,
                ..PipelineConfig::default()
            };
            match config.validate() {
                Err(PipelineError::Configuration { parameter, .. }) => {
                    assert_eq!(parameter, "test_ratio")
                }
                other => panic!("unexpected result {:?}", other),
            }
        }
    }

    #[test]
    fn range_on_categorical_attribute_is_rejected() {
        let mut config = PipelineConfig::default();
        config.outlier_ranges.push(AttributeRange::at_most("gender", 1.0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let mut config = PipelineConfig::default();
        config.outlier_ranges = vec![AttributeRange::between("age", 10.0, 1.0)];
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "seed": 7, "imputation": { "policy": "delete" } }"#).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.imputation.policy, MissingValuePolicy::Delete);
        assert_eq!(config.imputation.missing_rate_threshold, 0.05);
        assert_eq!(config.balancing.k_neighbors, 5);
    }

    #[test]
    fn json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = PipelineConfig::default();
        config.selection.enabled = false;
        config.save_json(&path).unwrap();
        assert_eq!(PipelineConfig::from_json_file(&path).unwrap(), config);
    }

    #[test]
    fn range_contains_closed_bounds() {
        let range = AttributeRange::between("bmi", 9.0, 70.0);
        assert!(range.contains(9.0));
        assert!(range.contains(70.0));
        assert!(!range.contains(70.1));
        assert!(AttributeRange::at_most("bmi", 70.0).contains(-1.0));
    }
}
