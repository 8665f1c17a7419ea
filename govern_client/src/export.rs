//! In-memory JSON and CSV exports of record lists.

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV rows must be objects, row {0} is not")]
    NotARecord(usize),

    #[error("writing export failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Export {
    pub file_name: String,
    pub format: ExportFormat,
    pub bytes: Vec<u8>,
}

impl Export {
    /// Writes the document into `dir` under its file name.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&self.file_name);
        crate::utils::save_bytes(&self.bytes, &path)?;
        Ok(path)
    }
}

pub fn file_name(feature: &str, format: ExportFormat, at: DateTime<Utc>) -> String {
    format!("{}_{}.{}", feature, at.format("%Y%m%d_%H%M%S"), format.extension())
}

pub fn export<T: Serialize>(feature: &str, rows: &[T], format: ExportFormat) -> Result<Export, ExportError> {
    export_at(feature, rows, format, Utc::now())
}

pub fn export_at<T: Serialize>(
    feature: &str,
    rows: &[T],
    format: ExportFormat,
    at: DateTime<Utc>,
) -> Result<Export, ExportError> {
    let bytes = match format {
        ExportFormat::Json => serde_json::to_vec_pretty(rows)?,
        ExportFormat::Csv => to_csv(rows)?,
    };
    Ok(Export {
        file_name: file_name(feature, format, at),
        format,
        bytes,
    })
}

/// Columns are the union of top-level keys in first-seen order; nested values are written as JSON.
pub fn to_csv<T: Serialize>(rows: &[T]) -> Result<Vec<u8>, ExportError> {
    let mut records = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        match serde_json::to_value(row)? {
            Value::Object(map) => records.push(map),
            _ => return Err(ExportError::NotARecord(i)),
        }
    }

    let mut columns: Vec<String> = Vec::new();
    for record in &records {
        for key in record.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    if !columns.is_empty() {
        writer.write_record(&columns)?;
    }
    for record in &records {
        writer.write_record(columns.iter().map(|c| cell(record.get(c))))?;
    }
    writer
        .into_inner()
        .map_err(|e| ExportError::Io(e.into_error()))
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
