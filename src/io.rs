//! Reading raw datasets and writing prepared partitions.

use std::fs::{self, File};
use std::path::Path;

use log::debug;
use polars::prelude::*;
use polars_io::parquet::ParquetWriter;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result, Stage};

/// Tokens read as missing in addition to empty cells.
pub const NULL_TOKENS: [&str; 1] = ["N/A"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Csv,
    Parquet,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Parquet => "parquet",
        }
    }
}

pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        PipelineError::schema(Stage::Load, path.display().to_string(), e.to_string())
    })?;
    let df = CsvReader::new(file)
        .has_header(true)
        .infer_schema(None)
        .with_null_values(Some(NullValues::AllColumns(
            NULL_TOKENS.iter().map(|t| t.to_string()).collect(),
        )))
        .finish()?;
    debug!("read {} rows x {} columns from {}", df.height(), df.width(), path.display());
    Ok(df)
}

pub fn read_parquet<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        PipelineError::schema(Stage::Load, path.display().to_string(), e.to_string())
    })?;
    let df = ParquetReader::new(file).finish()?;
    debug!("read {} rows x {} columns from {}", df.height(), df.width(), path.display());
    Ok(df)
}

/// Parquet by extension, delimited text otherwise.
pub fn read_dataset<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some("parquet") => read_parquet(path),
        _ => read_csv(path),
    }
}

fn create(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(File::create(path)?)
}

pub fn write_csv<P: AsRef<Path>>(path: P, df: &mut DataFrame) -> Result<()> {
    let mut file = create(path.as_ref())?;
    CsvWriter::new(&mut file).has_header(true).finish(df)?;
    Ok(())
}

pub fn write_parquet<P: AsRef<Path>>(path: P, df: &mut DataFrame) -> Result<()> {
    let mut file = create(path.as_ref())?;
    ParquetWriter::new(&mut file).finish(df)?;
    Ok(())
}

pub fn write_frame<P: AsRef<Path>>(path: P, df: &mut DataFrame, format: ExportFormat) -> Result<()> {
    match format {
        ExportFormat::Csv => write_csv(path, df),
        ExportFormat::Parquet => write_parquet(path, df),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_missing_tokens_become_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        fs::write(&path, "id,bmi,gender\n1,30.5,Male\n2,N/A,Female\n3,,Male\n").unwrap();
        let df = read_dataset(&path).unwrap();
        assert_eq!(df.height(), 3);
        let bmi = df.column("bmi").unwrap();
        assert_eq!(bmi.dtype(), &DataType::Float64);
        assert_eq!(bmi.null_count(), 2);
    }

    #[test]
    fn parquet_round_trip_preserves_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("frame.parquet");
        let mut df = polars::df!(
            "index" => &[0u64, 1, 2],
            "age" => &[0.1, 0.2, 0.3],
            "label" => &[0, 1, 1]
        )
        .unwrap();
        write_frame(&path, &mut df, ExportFormat::Parquet).unwrap();
        let read = read_dataset(&path).unwrap();
        assert!(read.frame_equal(&df));
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let err = read_csv("/nonexistent/stroke.csv").unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Load));
    }
}
