//! Stage 4: categorical label encoding.

use std::collections::HashMap;

use log::{debug, info};
use polars::prelude::*;
use serde::Serialize;

use crate::error::{PipelineError, Result, Stage};
use crate::records::{AttributeKind, DatasetSchema};

/// Category list of one attribute; a category's code is its position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryMapping {
    pub attribute: String,
    pub categories: Vec<String>,
}

impl CategoryMapping {
    pub fn code_of(&self, value: &str) -> Option<u32> {
        self.categories
            .iter()
            .position(|c| c == value)
            .map(|p| p as u32)
    }

    pub fn value_of(&self, code: u32) -> Option<&str> {
        self.categories.get(code as usize).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodingReport {
    pub mappings: Vec<CategoryMapping>,
}

impl EncodingReport {
    pub fn mapping(&self, attribute: &str) -> Option<&CategoryMapping> {
        self.mappings.iter().find(|m| m.attribute == attribute)
    }
}

/// Assign codes in order of first appearance, starting at 0.
pub fn encode_values<'a, I>(values: I) -> (Vec<u32>, Vec<String>)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut map: HashMap<&'a str, u32> = HashMap::new();
    let mut categories = Vec::new();
    let mut encoded = Vec::new();
    for value in values {
        let code = match map.get(value) {
            Some(code) => *code,
            None => {
                let code = map.len() as u32;
                map.insert(value, code);
                categories.push(value.to_string());
                code
            }
        };
        encoded.push(code);
    }
    (encoded, categories)
}

/// Replace every categorical column of `schema` by its integer codes.
pub fn encode_categoricals(
    mut df: DataFrame,
    schema: &DatasetSchema,
) -> Result<(DataFrame, EncodingReport)> {
    let mut mappings = Vec::new();
    for name in schema.names_of(AttributeKind::Categorical) {
        let column = df.column(name).map_err(|_| {
            PipelineError::schema(Stage::Encoding, name, "column is missing")
        })?;
        if column.null_count() > 0 {
            return Err(PipelineError::schema(
                Stage::Encoding,
                name,
                "missing categorical values cannot be encoded",
            ));
        }
        let (encoded, categories) = encode_values(column.utf8()?.into_no_null_iter());
        debug!("{}: {:?}", name, categories);
        mappings.push(CategoryMapping {
            attribute: name.to_string(),
            categories,
        });
        df.with_column(Series::new(name, encoded))?;
    }
    info!("encoding: {} categorical attribute(s) encoded", mappings.len());
    Ok((df, EncodingReport { mappings }))
}
