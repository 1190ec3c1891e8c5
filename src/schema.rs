//! Stage 1: schema validation and normalisation.

use std::collections::{HashMap, HashSet};

use log::{debug, info};
use polars::prelude::*;
use serde::Serialize;

use crate::error::{PipelineError, Result, Stage};
use crate::records::{AttributeKind, DatasetSchema};

/// A category removed because it was too rare to support inference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscardedCategory {
    pub attribute: String,
    pub value: String,
    pub occurrences: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaReport {
    pub rows_in: usize,
    pub discarded_categories: Vec<DiscardedCategory>,
    pub degenerate_rows: usize,
    pub duplicate_rows: usize,
    pub rows_out: usize,
    pub dropped_columns: Vec<String>,
}

/// Validate types against `schema`, canonicalise categorical values to lowercase,
/// discard rare categories and duplicate identifiers, and drop identifier columns.
pub fn normalize_schema(
    mut df: DataFrame,
    schema: &DatasetSchema,
    min_category_count: usize,
    drop_duplicate_ids: bool,
) -> Result<(DataFrame, SchemaReport)> {
    let rows_in = df.height();

    let lowered: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.trim().to_lowercase())
        .collect();
    df.set_column_names(&lowered)?;

    for attribute in &schema.attributes {
        let column = df.column(&attribute.name).map_err(|_| {
            PipelineError::schema(Stage::Schema, &attribute.name, "column is missing")
        })?;
        let typed = cast_attribute(column, attribute.kind, attribute.optional)?;
        df.with_column(typed)?;
    }

    for name in schema.names_of(AttributeKind::Categorical) {
        let lowered = lowercase(df.column(name)?)?;
        df.with_column(lowered)?;
    }

    let mut keep = vec![true; df.height()];

    let mut discarded_categories = Vec::new();
    for name in schema.names_of(AttributeKind::Categorical) {
        let values = df.column(name)?.utf8()?;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for value in values.into_iter().flatten() {
            *counts.entry(value).or_insert(0) += 1;
        }
        let rare: HashSet<&str> = counts
            .iter()
            .filter(|(_, count)| **count < min_category_count)
            .map(|(value, _)| *value)
            .collect();
        if rare.is_empty() {
            continue;
        }
        for (row, value) in values.into_iter().enumerate() {
            if value.map_or(false, |v| rare.contains(v)) {
                keep[row] = false;
            }
        }
        let mut found: Vec<DiscardedCategory> = rare
            .iter()
            .map(|value| DiscardedCategory {
                attribute: name.to_string(),
                value: value.to_string(),
                occurrences: counts[value],
            })
            .collect();
        found.sort_by(|a, b| a.value.cmp(&b.value));
        for category in &found {
            debug!(
                "discarding {} record(s) with {} = {:?}",
                category.occurrences, category.attribute, category.value
            );
        }
        discarded_categories.extend(found);
    }
    let degenerate_rows = keep.iter().filter(|k| !**k).count();

    let mut duplicate_rows = 0;
    if drop_duplicate_ids {
        for name in schema.names_of(AttributeKind::Identifier) {
            let ids = df.column(name)?.utf8()?;
            let mut seen = HashSet::new();
            for (row, id) in ids.into_iter().enumerate() {
                if let Some(id) = id {
                    if !seen.insert(id) && keep[row] {
                        keep[row] = false;
                        duplicate_rows += 1;
                    }
                }
            }
        }
    }

    if keep.iter().any(|k| !*k) {
        df = df.filter(&BooleanChunked::from_slice("keep", &keep))?;
    }

    let expected: HashSet<&str> = schema.attributes.iter().map(|a| a.name.as_str()).collect();
    let mut dropped_columns: Vec<String> = df
        .get_column_names()
        .iter()
        .filter(|name| !expected.contains(*name))
        .map(|name| name.to_string())
        .collect();
    dropped_columns.extend(
        schema
            .names_of(AttributeKind::Identifier)
            .into_iter()
            .map(str::to_string),
    );
    let retained: Vec<&str> = schema
        .attributes
        .iter()
        .filter(|a| a.kind != AttributeKind::Identifier)
        .map(|a| a.name.as_str())
        .collect();
    let df = df.select(retained)?;

    let report = SchemaReport {
        rows_in,
        discarded_categories,
        degenerate_rows,
        duplicate_rows,
        rows_out: df.height(),
        dropped_columns,
    };
    info!(
        "schema: {} -> {} rows ({} degenerate, {} duplicate), dropped columns {:?}",
        report.rows_in,
        report.rows_out,
        report.degenerate_rows,
        report.duplicate_rows,
        report.dropped_columns
    );
    Ok((df, report))
}

fn cast_attribute(column: &Series, kind: AttributeKind, optional: bool) -> Result<Series> {
    let name = column.name().to_string();
    let nulls_before = column.null_count();
    let flag = matches!(kind, AttributeKind::Binary | AttributeKind::Target);
    // Flags go through Float64 so that 0.5 is rejected instead of truncated.
    let read_as = if flag { DataType::Float64 } else { kind.dtype() };
    let typed = column
        .cast(&read_as)
        .map_err(|e| PipelineError::schema(Stage::Schema, &name, e.to_string()))?;

    if !optional {
        if typed.null_count() > nulls_before {
            return Err(PipelineError::schema(
                Stage::Schema,
                &name,
                format!("values cannot be read as {}", kind.dtype()),
            ));
        }
        if typed.null_count() > 0 {
            return Err(PipelineError::schema(
                Stage::Schema,
                &name,
                format!("{} missing value(s) in a required attribute", typed.null_count()),
            ));
        }
    }

    if !flag {
        return Ok(typed);
    }
    if let Some(bad) = typed.f64()?.into_iter().flatten().find(|v| *v != 0.0 && *v != 1.0) {
        return Err(PipelineError::schema(
            Stage::Schema,
            &name,
            format!("expected 0 or 1, found {}", bad),
        ));
    }
    Ok(typed.cast(&kind.dtype())?)
}

fn lowercase(column: &Series) -> Result<Series> {
    let values: Vec<Option<String>> = column
        .utf8()?
        .into_iter()
        .map(|v| v.map(|s| s.trim().to_lowercase()))
        .collect();
    Ok(Series::new(column.name(), values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> DataFrame {
        polars::df!(
            "ID" => &["1", "2", "3", "3", "5"],
            "Gender" => &["Male", "female", "Other", "FEMALE", "male"],
            "age" => &[60.0, 45.0, 30.0, 30.0, 70.0],
            "hypertension" => &[0, 1, 0, 0, 1],
            "heart_disease" => &[0, 0, 0, 0, 1],
            "ever_married" => &["Yes", "No", "Yes", "Yes", "No"],
            "work_type" => &["Private", "Private", "Private", "Private", "Private"],
            "Residence_type" => &["Urban", "Rural", "Urban", "Urban", "Rural"],
            "avg_glucose_level" => &[100.0, 90.0, 85.0, 85.0, 200.0],
            "bmi" => &[Some(30.0), None, Some(22.0), Some(22.0), Some(28.0)],
            "smoking_status" => &["never smoked", "smokes", "Unknown", "smokes", "never smoked"],
            "stroke" => &[1, 0, 0, 0, 1]
        )
        .unwrap()
    }

    #[test]
    fn canonicalises_and_discards_singletons() {
        let schema = DatasetSchema::stroke();
        let (df, report) = normalize_schema(frame(), &schema, 2, true).unwrap();

        // "other" and "unknown" are singletons on the same row; the next row
        // repeats its id and goes as a duplicate.
        assert_eq!(report.rows_in, 5);
        assert_eq!(report.degenerate_rows, 1);
        assert_eq!(report.duplicate_rows, 1);
        assert_eq!(df.height(), 3);
        assert_eq!(report.rows_out, 3);

        let genders: Vec<&str> = df.column("gender").unwrap().utf8().unwrap().into_no_null_iter().collect();
        assert_eq!(genders, vec!["male", "female", "male"]);
        assert!(df.column("id").is_err());
        assert!(df.column("residence_type").is_ok());
        assert!(report.dropped_columns.contains(&"id".to_string()));
        assert_eq!(
            report
                .discarded_categories
                .iter()
                .map(|c| c.value.as_str())
                .collect::<Vec<_>>(),
            vec!["other", "unknown"]
        );
    }

    #[test]
    fn missing_column_is_a_schema_error() {
        let df = frame().drop("smoking_status").unwrap();
        match normalize_schema(df, &DatasetSchema::stroke(), 2, true) {
            Err(PipelineError::Schema { stage, attribute, .. }) => {
                assert_eq!(stage, Stage::Schema);
                assert_eq!(attribute, "smoking_status");
            }
            other => panic!("unexpected result {:?}", other.map(|(_, r)| r)),
        }
    }

    #[test]
    fn non_binary_flag_is_rejected() {
        let mut df = frame();
        df.with_column(Series::new("hypertension", &[0, 2, 0, 0, 1])).unwrap();
        let err = normalize_schema(df, &DatasetSchema::stroke(), 2, true).unwrap_err();
        assert!(err.to_string().contains("hypertension"));
    }

    #[test]
    fn fractional_flag_and_label_are_rejected() {
        let mut df = frame();
        df.with_column(Series::new("hypertension", &[0.0, 0.5, 0.0, 0.0, 1.0])).unwrap();
        let err = normalize_schema(df, &DatasetSchema::stroke(), 2, true).unwrap_err();
        assert!(matches!(err, PipelineError::Schema { ref attribute, .. } if attribute == "hypertension"));

        let mut df = frame();
        df.with_column(Series::new("stroke", &[0.0, 1.7, 0.0, 0.0, 1.0])).unwrap();
        let err = normalize_schema(df, &DatasetSchema::stroke(), 2, true).unwrap_err();
        assert!(matches!(err, PipelineError::Schema { ref attribute, .. } if attribute == "stroke"));
    }

    #[test]
    fn integral_float_flags_are_accepted() {
        let mut df = frame();
        df.with_column(Series::new("stroke", &[1.0, 0.0, 0.0, 0.0, 1.0])).unwrap();
        let (df, _) = normalize_schema(df, &DatasetSchema::stroke(), 1, false).unwrap();
        assert_eq!(df.column("stroke").unwrap().dtype(), &DataType::Int32);
    }

    #[test]
    fn unreadable_required_value_is_rejected() {
        let mut df = frame();
        df.with_column(Series::new("age", &["60", "45", "old", "30", "70"])).unwrap();
        let err = normalize_schema(df, &DatasetSchema::stroke(), 2, true).unwrap_err();
        assert!(matches!(err, PipelineError::Schema { ref attribute, .. } if attribute == "age"));
    }

    #[test]
    fn unreadable_optional_value_becomes_missing() {
        let mut df = frame();
        df.with_column(Series::new("bmi", &["30.0", "N/A", "22.0", "22.0", "28.0"])).unwrap();
        let (df, _) = normalize_schema(df, &DatasetSchema::stroke(), 1, false).unwrap();
        assert_eq!(df.column("bmi").unwrap().null_count(), 1);
        assert_eq!(df.column("bmi").unwrap().dtype(), &DataType::Float64);
    }
}
