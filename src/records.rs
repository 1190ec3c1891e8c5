use std::collections::HashSet;
use std::fmt;

use lazy_static::lazy_static;
use polars::prelude::{DataType, Field, Schema};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result, Stage};

/// Semantic type of a dataset column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Identifier,
    Categorical,
    Binary,
    Continuous,
    Target,
}

impl AttributeKind {
    /// Column type a validated dataset carries for this kind.
    pub fn dtype(self) -> DataType {
        match self {
            AttributeKind::Identifier | AttributeKind::Categorical => DataType::Utf8,
            AttributeKind::Binary | AttributeKind::Target => DataType::Int32,
            AttributeKind::Continuous => DataType::Float64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    pub kind: AttributeKind,
    /// Only continuous attributes may be optional; nulls are filled by imputation.
    #[serde(default)]
    pub optional: bool,
}

impl AttributeSpec {
    fn new(name: &str, kind: AttributeKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            optional: false,
        }
    }

    fn optional(name: &str, kind: AttributeKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            optional: true,
        }
    }
}

lazy_static! {
    static ref STROKE_ATTRIBUTES: Vec<AttributeSpec> = vec![
        AttributeSpec::new("id", AttributeKind::Identifier),
        AttributeSpec::new("gender", AttributeKind::Categorical),
        AttributeSpec::new("age", AttributeKind::Continuous),
        AttributeSpec::new("hypertension", AttributeKind::Binary),
        AttributeSpec::new("heart_disease", AttributeKind::Binary),
        AttributeSpec::new("ever_married", AttributeKind::Categorical),
        AttributeSpec::new("work_type", AttributeKind::Categorical),
        AttributeSpec::new("residence_type", AttributeKind::Categorical),
        AttributeSpec::new("avg_glucose_level", AttributeKind::Continuous),
        AttributeSpec::optional("bmi", AttributeKind::Continuous),
        AttributeSpec::new("smoking_status", AttributeKind::Categorical),
        AttributeSpec::new("stroke", AttributeKind::Target),
    ];
}

/// Column layout the pipeline expects, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSchema {
    pub attributes: Vec<AttributeSpec>,
}

impl Default for DatasetSchema {
    fn default() -> Self {
        Self::stroke()
    }
}

impl DatasetSchema {
    /// Layout of the healthcare stroke dataset.
    pub fn stroke() -> Self {
        Self {
            attributes: STROKE_ATTRIBUTES.clone(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn names_of(&self, kind: AttributeKind) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|a| a.kind == kind)
            .map(|a| a.name.as_str())
            .collect()
    }

    pub fn target(&self) -> Result<&AttributeSpec> {
        self.attributes
            .iter()
            .find(|a| a.kind == AttributeKind::Target)
            .ok_or_else(|| PipelineError::configuration("schema", "no target attribute"))
    }

    /// Typed polars schema of a validated dataset.
    pub fn raw_schema(&self) -> Schema {
        Schema::from_iter(
            self.attributes
                .iter()
                .map(|a| Field::new(&a.name, a.kind.dtype())),
        )
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for attribute in &self.attributes {
            if attribute.name.is_empty() {
                return Err(PipelineError::configuration("schema", "empty attribute name"));
            }
            if attribute.name != attribute.name.to_lowercase() {
                return Err(PipelineError::configuration(
                    "schema",
                    format!("attribute {:?} must be lowercase", attribute.name),
                ));
            }
            if !seen.insert(attribute.name.as_str()) {
                return Err(PipelineError::configuration(
                    "schema",
                    format!("attribute {:?} listed twice", attribute.name),
                ));
            }
            if attribute.optional && attribute.kind != AttributeKind::Continuous {
                return Err(PipelineError::configuration(
                    "schema",
                    format!("only continuous attributes may be optional, not {:?}", attribute.name),
                ));
            }
        }
        let targets = self.names_of(AttributeKind::Target).len();
        if targets != 1 {
            return Err(PipelineError::configuration(
                "schema",
                format!("expected exactly one target attribute, found {}", targets),
            ));
        }
        Ok(())
    }
}

/// Binary outcome derived from the target attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ClassLabel {
    Negative,
    Positive,
}

impl ClassLabel {
    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(ClassLabel::Negative),
            1 => Some(ClassLabel::Positive),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        match self {
            ClassLabel::Negative => 0,
            ClassLabel::Positive => 1,
        }
    }

    pub fn as_f64(self) -> f64 {
        self.index() as f64
    }

    pub fn other(self) -> Self {
        match self {
            ClassLabel::Negative => ClassLabel::Positive,
            ClassLabel::Positive => ClassLabel::Negative,
        }
    }
}

impl From<ClassLabel> for u8 {
    fn from(label: ClassLabel) -> u8 {
        label.index() as u8
    }
}

impl TryFrom<u8> for ClassLabel {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        ClassLabel::from_value(value as i64).ok_or_else(|| format!("invalid class label {}", value))
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// Feature vectors and labels shared by the numeric stages.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMatrix {
    pub feature_names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub labels: Vec<ClassLabel>,
}

impl LabeledMatrix {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.feature_names.len()
    }

    pub fn class_count(&self, label: ClassLabel) -> usize {
        self.labels.iter().filter(|l| **l == label).count()
    }

    /// Every row holds one value per feature name and one label.
    pub fn check_shape(&self, stage: Stage) -> Result<()> {
        if self.labels.len() != self.rows.len() {
            return Err(PipelineError::schema(
                stage,
                "labels",
                format!("{} label(s) for {} row(s)", self.labels.len(), self.rows.len()),
            ));
        }
        let width = self.width();
        match self.rows.iter().position(|row| row.len() != width) {
            Some(i) => Err(PipelineError::schema(
                stage,
                format!("row {}", i),
                format!("expected {} value(s), found {}", width, self.rows[i].len()),
            )),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stroke_schema_is_valid() {
        let schema = DatasetSchema::stroke();
        schema.validate().unwrap();
        assert_eq!(schema.target().unwrap().name, "stroke");
        assert_eq!(
            schema.names_of(AttributeKind::Categorical),
            vec!["gender", "ever_married", "work_type", "residence_type", "smoking_status"]
        );
        assert!(schema.get("bmi").unwrap().optional);
    }

    #[test]
    fn raw_schema_types_follow_kinds() {
        let schema = DatasetSchema::stroke().raw_schema();
        assert_eq!(schema.get("gender"), Some(&DataType::Utf8));
        assert_eq!(schema.get("bmi"), Some(&DataType::Float64));
        assert_eq!(schema.get("stroke"), Some(&DataType::Int32));
    }

    #[test]
    fn optional_categorical_is_rejected() {
        let mut schema = DatasetSchema::stroke();
        schema.attributes[1].optional = true;
        assert!(matches!(
            schema.validate(),
            Err(PipelineError::Configuration { .. })
        ));
    }

    #[test]
    fn class_label_round_trips_through_u8() {
        let json = serde_json::to_string(&ClassLabel::Positive).unwrap();
        assert_eq!(json, "1");
        let label: ClassLabel = serde_json::from_str("0").unwrap();
        assert_eq!(label, ClassLabel::Negative);
        assert!(serde_json::from_str::<ClassLabel>("2").is_err());
    }

    #[test]
    fn ragged_matrix_fails_the_shape_check() {
        let mut matrix = LabeledMatrix {
            feature_names: vec!["a".into(), "b".into()],
            rows: vec![vec![1.0, 2.0], vec![3.0, 4.0]],
            labels: vec![ClassLabel::Negative, ClassLabel::Positive],
        };
        matrix.check_shape(Stage::Balancing).unwrap();

        matrix.rows[1].pop();
        match matrix.check_shape(Stage::Balancing) {
            Err(PipelineError::Schema { stage, attribute, .. }) => {
                assert_eq!(stage, Stage::Balancing);
                assert_eq!(attribute, "row 1");
            }
            other => panic!("unexpected result {:?}", other),
        }

        matrix.rows[1].push(4.0);
        matrix.labels.pop();
        assert!(matrix.check_shape(Stage::Balancing).is_err());
    }
}
