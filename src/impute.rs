//! Stage 3: missing values and placeholder categories.

use std::collections::HashMap;

use log::{debug, info, warn};
use polars::prelude::*;
use serde::Serialize;

use crate::config::{ImputationConfig, MissingValuePolicy, UnknownCategoryPolicy};
use crate::error::{PipelineError, Result, Stage};
use crate::records::{AttributeKind, DatasetSchema};

/// Raised when an attribute's missing rate is above the configured comfort
/// threshold. Not fatal: the caller may switch to [`MissingValuePolicy::Delete`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImputationPolicyWarning {
    pub attribute: String,
    pub missing_rate: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImputedAttribute {
    pub attribute: String,
    pub mean: f64,
    pub filled: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplacedCategory {
    pub attribute: String,
    pub token: String,
    pub replacement: String,
    pub replaced: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImputationReport {
    pub imputed: Vec<ImputedAttribute>,
    pub deleted_rows: usize,
    pub warnings: Vec<ImputationPolicyWarning>,
    pub replaced_categories: Vec<ReplacedCategory>,
}

impl ImputationReport {
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Fill or delete missing continuous values and apply the placeholder policy
/// to the configured categorical attributes.
pub fn impute(
    mut df: DataFrame,
    schema: &DatasetSchema,
    config: &ImputationConfig,
) -> Result<(DataFrame, ImputationReport)> {
    let mut report = ImputationReport {
        imputed: Vec::new(),
        deleted_rows: 0,
        warnings: Vec::new(),
        replaced_categories: Vec::new(),
    };

    if config.unknown_policy == UnknownCategoryPolicy::ImputeMode {
        for attribute in &config.unknown_attributes {
            let column = df.column(attribute).map_err(|_| {
                PipelineError::schema(Stage::Imputation, attribute, "column is missing")
            })?;
            let (replaced, replacement) = replace_with_mode(column, &config.unknown_token)?;
            if let Some(replacement) = replacement {
                let count = column
                    .utf8()?
                    .into_iter()
                    .filter(|v| *v == Some(config.unknown_token.as_str()))
                    .count();
                debug!(
                    "{}: {} {:?} value(s) replaced by {:?}",
                    attribute, count, config.unknown_token, replacement
                );
                report.replaced_categories.push(ReplacedCategory {
                    attribute: attribute.clone(),
                    token: config.unknown_token.clone(),
                    replacement,
                    replaced: count,
                });
                df.with_column(replaced)?;
            }
        }
    }

    for name in schema.names_of(AttributeKind::Continuous) {
        let column = df.column(name).map_err(|_| {
            PipelineError::schema(Stage::Imputation, name, "column is missing")
        })?;
        let missing = column.null_count();
        if missing == 0 {
            continue;
        }

        let missing_rate = missing as f64 / df.height() as f64;
        if missing_rate > config.missing_rate_threshold {
            warn!(
                "{}: {:.2}% missing exceeds the {:.2}% threshold, deletion may be preferable",
                name,
                missing_rate * 100.0,
                config.missing_rate_threshold * 100.0
            );
            report.warnings.push(ImputationPolicyWarning {
                attribute: name.to_string(),
                missing_rate,
                threshold: config.missing_rate_threshold,
            });
        }

        match config.policy {
            MissingValuePolicy::Impute => {
                let mean = column.mean().ok_or_else(|| {
                    PipelineError::schema(Stage::Imputation, name, "no present values to average")
                })?;
                let filled = column.fill_null(FillNullStrategy::Mean)?;
                debug!("{}: {} missing value(s) filled with {}", name, missing, mean);
                report.imputed.push(ImputedAttribute {
                    attribute: name.to_string(),
                    mean,
                    filled: missing,
                });
                df.with_column(filled)?;
            }
            MissingValuePolicy::Delete => {
                let before = df.height();
                df = df.lazy().filter(col(name).is_not_null()).collect()?;
                debug!("{}: deleted {} record(s)", name, before - df.height());
                report.deleted_rows += before - df.height();
            }
        }
    }

    info!(
        "imputation: {} attribute(s) imputed, {} row(s) deleted, {} warning(s)",
        report.imputed.len(),
        report.deleted_rows,
        report.warnings.len()
    );
    Ok((df, report))
}

/// Replace `token` with the most frequent other value. Ties go to the value
/// seen first. Returns `None` when the token does not occur.
fn replace_with_mode(column: &Series, token: &str) -> Result<(Series, Option<String>)> {
    let values = column.utf8()?;
    if !values.into_iter().any(|v| v == Some(token)) {
        return Ok((column.clone(), None));
    }

    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in values.into_iter().flatten().filter(|v| *v != token) {
        let count = counts.entry(value).or_insert(0);
        if *count == 0 {
            order.push(value);
        }
        *count += 1;
    }
    let mut mode: Option<(&str, usize)> = None;
    for value in order {
        let count = counts[value];
        if mode.map_or(true, |(_, best)| count > best) {
            mode = Some((value, count));
        }
    }
    let (mode, _) = mode.ok_or_else(|| {
        PipelineError::schema(
            Stage::Imputation,
            column.name(),
            format!("only {:?} values, nothing to impute from", token),
        )
    })?;

    let replaced: Vec<Option<&str>> = values
        .into_iter()
        .map(|v| if v == Some(token) { Some(mode) } else { v })
        .collect();
    Ok((Series::new(column.name(), replaced), Some(mode.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(bmi: &[Option<f64>]) -> DataFrame {
        let n = bmi.len();
        let smoking: Vec<&str> = ["smokes", "unknown", "never smoked", "never smoked"]
            .iter()
            .cycle()
            .take(n)
            .copied()
            .collect();
        polars::df!(
            "age" => &vec![50.0; n],
            "avg_glucose_level" => &vec![100.0; n],
            "bmi" => bmi,
            "smoking_status" => &smoking
        )
        .unwrap()
    }

    fn schema() -> DatasetSchema {
        DatasetSchema::stroke()
    }

    #[test]
    fn fills_with_exact_mean_of_present_values() {
        let config = ImputationConfig {
            missing_rate_threshold: 0.5,
            ..ImputationConfig::default()
        };
        let (df, report) = impute(frame(&[Some(10.0), Some(20.0), None]), &schema(), &config).unwrap();
        let bmi: Vec<Option<f64>> = df.column("bmi").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(bmi, vec![Some(10.0), Some(20.0), Some(15.0)]);
        assert_eq!(report.imputed[0].mean, 15.0);
        assert_eq!(report.imputed[0].filled, 1);
        assert!(!report.has_warnings());
    }

    #[test]
    fn high_missing_rate_raises_a_warning_but_still_imputes() {
        let (df, report) = impute(
            frame(&[Some(10.0), Some(20.0), None]),
            &schema(),
            &ImputationConfig::default(),
        )
        .unwrap();
        assert_eq!(df.column("bmi").unwrap().null_count(), 0);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].attribute, "bmi");
        assert!((report.warnings[0].missing_rate - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn delete_policy_drops_incomplete_records() {
        let config = ImputationConfig {
            policy: MissingValuePolicy::Delete,
            ..ImputationConfig::default()
        };
        let (df, report) = impute(
            frame(&[Some(10.0), None, Some(30.0), None]),
            &schema(),
            &config,
        )
        .unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(report.deleted_rows, 2);
        assert!(report.imputed.is_empty());
    }

    #[test]
    fn unknown_is_kept_by_default() {
        let (df, report) = impute(frame(&[Some(1.0); 4]), &schema(), &ImputationConfig::default()).unwrap();
        let smoking: Vec<&str> = df
            .column("smoking_status")
            .unwrap()
            .utf8()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert!(smoking.contains(&"unknown"));
        assert!(report.replaced_categories.is_empty());
    }

    #[test]
    fn unknown_can_be_replaced_by_mode() {
        let config = ImputationConfig {
            unknown_policy: UnknownCategoryPolicy::ImputeMode,
            ..ImputationConfig::default()
        };
        let (df, report) = impute(frame(&[Some(1.0); 4]), &schema(), &config).unwrap();
        let smoking: Vec<&str> = df
            .column("smoking_status")
            .unwrap()
            .utf8()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(smoking, vec!["smokes", "never smoked", "never smoked", "never smoked"]);
        assert_eq!(report.replaced_categories[0].replacement, "never smoked");
        assert_eq!(report.replaced_categories[0].replaced, 1);
    }
}
