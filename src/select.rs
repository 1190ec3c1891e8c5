//! Stage 5: feature matrix extraction and significance-based selection.

use log::{debug, info};
use polars::prelude::*;
use serde::Serialize;

use crate::config::SelectionConfig;
use crate::error::{PipelineError, Result, Stage};
use crate::records::{ClassLabel, DatasetSchema, LabeledMatrix};
use crate::stats::{self, OlsError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureStatistic {
    pub name: String,
    pub coefficient: f64,
    pub std_error: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelatedPair {
    pub kept: String,
    pub dropped: String,
    pub correlation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionReport {
    pub statistics: Vec<FeatureStatistic>,
    pub dropped_constant: Vec<String>,
    pub dropped_correlated: Vec<CorrelatedPair>,
    pub dropped_insignificant: Vec<String>,
    pub retained: Vec<String>,
}

/// Every non-target column as a feature, in frame order, with labels from the
/// schema's target attribute.
pub fn feature_matrix(df: &DataFrame, schema: &DatasetSchema) -> Result<LabeledMatrix> {
    let target = schema.target()?.name.as_str();
    let labels = df
        .column(target)
        .map_err(|_| PipelineError::schema(Stage::FeatureSelection, target, "column is missing"))?
        .cast(&DataType::Int64)?
        .i64()?
        .into_iter()
        .map(|v| {
            v.and_then(ClassLabel::from_value).ok_or_else(|| {
                PipelineError::schema(Stage::FeatureSelection, target, "target must be 0 or 1")
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut feature_names = Vec::new();
    let mut columns: Vec<Vec<f64>> = Vec::new();
    for series in df.get_columns() {
        if series.name() == target {
            continue;
        }
        let values = series.cast(&DataType::Float64).map_err(|e| {
            PipelineError::schema(Stage::FeatureSelection, series.name(), e.to_string())
        })?;
        if values.null_count() > 0 {
            return Err(PipelineError::schema(
                Stage::FeatureSelection,
                series.name(),
                "missing values reached feature extraction",
            ));
        }
        feature_names.push(series.name().to_string());
        columns.push(values.f64()?.into_no_null_iter().collect());
    }

    let rows = (0..df.height())
        .map(|i| columns.iter().map(|c| c[i]).collect())
        .collect();
    Ok(LabeledMatrix {
        feature_names,
        rows,
        labels,
    })
}

/// Drop constant features, then one member of every highly correlated pair,
/// then every feature whose OLS p-value exceeds the significance level.
pub fn select_features(
    matrix: LabeledMatrix,
    config: &SelectionConfig,
) -> Result<(LabeledMatrix, SelectionReport)> {
    matrix.check_shape(Stage::FeatureSelection)?;
    let mut report = SelectionReport {
        statistics: Vec::new(),
        dropped_constant: Vec::new(),
        dropped_correlated: Vec::new(),
        dropped_insignificant: Vec::new(),
        retained: matrix.feature_names.clone(),
    };
    if !config.enabled {
        info!("selection: disabled, keeping {} feature(s)", matrix.width());
        return Ok((matrix, report));
    }

    let width = matrix.width();
    let columns: Vec<Vec<f64>> = (0..width)
        .map(|j| matrix.rows.iter().map(|r| r[j]).collect())
        .collect();
    let target: Vec<f64> = matrix.labels.iter().map(|l| l.as_f64()).collect();

    let mut active = vec![true; width];
    for j in 0..width {
        if stats::std_dev(&columns[j]) == 0.0 {
            active[j] = false;
            report.dropped_constant.push(matrix.feature_names[j].clone());
        }
    }

    let target_corr: Vec<f64> = columns
        .iter()
        .map(|c| stats::pearson(c, &target).abs())
        .collect();
    for i in 0..width {
        if !active[i] {
            continue;
        }
        for j in (i + 1)..width {
            if !active[j] {
                continue;
            }
            let r = stats::pearson(&columns[i], &columns[j]);
            if r.abs() <= config.correlation_threshold {
                continue;
            }
            let (kept, dropped) = if target_corr[j] > target_corr[i] { (j, i) } else { (i, j) };
            active[dropped] = false;
            debug!(
                "{} and {} correlate at {:.3}, dropping {}",
                matrix.feature_names[i], matrix.feature_names[j], r, matrix.feature_names[dropped]
            );
            report.dropped_correlated.push(CorrelatedPair {
                kept: matrix.feature_names[kept].clone(),
                dropped: matrix.feature_names[dropped].clone(),
                correlation: r,
            });
            if dropped == i {
                break;
            }
        }
    }

    let candidates: Vec<usize> = (0..width).filter(|j| active[*j]).collect();
    let design: Vec<Vec<f64>> = candidates.iter().map(|j| columns[*j].clone()).collect();
    let fit = stats::ols(&design, &target).map_err(|e| match e {
        OlsError::TooFewRows { rows, needed } => {
            PipelineError::insufficient(Stage::FeatureSelection, "*", needed, rows)
        }
        OlsError::ZeroVariance { column } => PipelineError::Numerical {
            stage: Stage::FeatureSelection,
            reason: format!("{} has no variance", matrix.feature_names[candidates[column]]),
        },
        OlsError::Singular => PipelineError::Numerical {
            stage: Stage::FeatureSelection,
            reason: "normal equations are singular; inputs are collinear".to_string(),
        },
    })?;

    let mut retained = Vec::new();
    for (position, j) in candidates.iter().enumerate() {
        let name = &matrix.feature_names[*j];
        let coefficient = &fit.coefficients[position];
        report.statistics.push(FeatureStatistic {
            name: name.clone(),
            coefficient: coefficient.estimate,
            std_error: coefficient.std_error,
            p_value: coefficient.p_value,
        });
        if coefficient.p_value > config.significance_level {
            debug!("{}: p = {:.4}, dropped", name, coefficient.p_value);
            report.dropped_insignificant.push(name.clone());
        } else {
            retained.push(*j);
        }
    }

    if retained.is_empty() {
        return Err(PipelineError::schema(
            Stage::FeatureSelection,
            "*",
            "no feature is significant at the configured level",
        ));
    }

    report.retained = retained
        .iter()
        .map(|j| matrix.feature_names[*j].clone())
        .collect();
    info!(
        "selection: retained {:?} of {} feature(s)",
        report.retained, width
    );

    let rows = matrix
        .rows
        .iter()
        .map(|row| retained.iter().map(|j| row[*j]).collect())
        .collect();
    Ok((
        LabeledMatrix {
            feature_names: report.retained.clone(),
            rows,
            labels: matrix.labels,
        },
        report,
    ))
}
