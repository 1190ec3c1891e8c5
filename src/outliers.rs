//! Stage 2: domain-range outlier removal.
//!
//! Runs before imputation so that out-of-range values never reach the
//! statistics imputation is computed from.

use log::{debug, info};
use polars::prelude::*;
use serde::Serialize;

use crate::config::AttributeRange;
use crate::error::{PipelineError, Result, Stage};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeViolations {
    pub attribute: String,
    pub violations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlierReport {
    pub rows_in: usize,
    pub violations: Vec<RangeViolations>,
    pub rows_out: usize,
}

impl OutlierReport {
    pub fn removed(&self) -> usize {
        self.rows_in - self.rows_out
    }
}

/// Remove every record with a present value outside its attribute's range.
/// Missing values are left for the imputer.
pub fn filter_outliers(df: DataFrame, ranges: &[AttributeRange]) -> Result<(DataFrame, OutlierReport)> {
    let rows_in = df.height();
    let mut violations = Vec::with_capacity(ranges.len());
    let mut predicate = lit(true);

    for range in ranges {
        let column = df.column(&range.attribute).map_err(|_| {
            PipelineError::schema(Stage::Outliers, &range.attribute, "column is missing")
        })?;
        let values = column.cast(&DataType::Float64)?;
        let count = values
            .f64()?
            .into_iter()
            .flatten()
            .filter(|v| !range.contains(*v))
            .count();
        debug!(
            "{}: {} value(s) outside [{:?}, {:?}]",
            range.attribute, count, range.min, range.max
        );
        violations.push(RangeViolations {
            attribute: range.attribute.clone(),
            violations: count,
        });
        predicate = predicate.and(within(range));
    }

    let df = if ranges.is_empty() {
        df
    } else {
        df.lazy().filter(predicate).collect()?
    };

    let report = OutlierReport {
        rows_in,
        violations,
        rows_out: df.height(),
    };
    info!("outliers: removed {} of {} rows", report.removed(), rows_in);
    Ok((df, report))
}

fn within(range: &AttributeRange) -> Expr {
    let name = range.attribute.as_str();
    let mut bounded = lit(true);
    if let Some(min) = range.min {
        bounded = bounded.and(col(name).gt_eq(lit(min)));
    }
    if let Some(max) = range.max {
        bounded = bounded.and(col(name).lt_eq(lit(max)));
    }
    col(name).is_null().or(bounded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> DataFrame {
        polars::df!(
            "age" => &[3.0, 45.0, 81.0, 60.0, 0.08],
            "bmi" => &[Some(18.0), None, Some(97.6), Some(70.0), Some(150.0)]
        )
        .unwrap()
    }

    #[test]
    fn keeps_values_inside_range_and_missing_values() {
        let ranges = vec![AttributeRange::at_most("bmi", 70.0)];
        let (df, report) = filter_outliers(frame(), &ranges).unwrap();
        assert_eq!(df.height(), 3);
        assert_eq!(report.removed(), 2);
        assert_eq!(report.violations[0].violations, 2);

        let bmi = df.column("bmi").unwrap().f64().unwrap();
        assert_eq!(bmi.null_count(), 1);
        assert!(bmi.into_iter().flatten().all(|v| v <= 70.0));
    }

    #[test]
    fn every_range_is_enforced() {
        let ranges = vec![
            AttributeRange::at_most("bmi", 70.0),
            AttributeRange::between("age", 1.0, 100.0),
        ];
        let (df, _) = filter_outliers(frame(), &ranges).unwrap();
        let ages: Vec<f64> = df.column("age").unwrap().f64().unwrap().into_no_null_iter().collect();
        assert_eq!(ages, vec![3.0, 45.0, 60.0]);
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let ranges = vec![AttributeRange::between("bmi", 10.0, 70.0)];
        let (once, _) = filter_outliers(frame(), &ranges).unwrap();
        let (twice, report) = filter_outliers(once.clone(), &ranges).unwrap();
        assert!(once.frame_equal_missing(&twice));
        assert_eq!(report.removed(), 0);
    }

    #[test]
    fn unknown_attribute_is_a_schema_error() {
        let ranges = vec![AttributeRange::at_most("glucose", 200.0)];
        let err = filter_outliers(frame(), &ranges).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Outliers));
    }
}
