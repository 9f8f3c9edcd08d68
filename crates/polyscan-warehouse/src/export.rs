use crate::error::{IngestError, Result};
use crate::schema::stock::tickers::Record;
use chrono::Local;
use polyscan_util::{timestamped_name, write_atomic};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub static FILE_PREFIX: &str = "stock_tickers";

/// Which keys become columns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SchemaMode {
    /// Keys of the first record, then any key first seen on a later record.
    #[default]
    Union,
    /// Keys of the first record only; keys that only later records carry are dropped.
    First,
}

/// A finished CSV file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Export {
    pub path: PathBuf,
    pub rows: usize,
    pub columns: Vec<String>,
}

/// `<dir>/stock_tickers_<YYYYMMDD>_<HHMMSS>.csv`, stamped with the current local time.
pub fn default_path(dir: &Path) -> PathBuf {
    dir.join(timestamped_name(FILE_PREFIX, "csv", &Local::now()))
}

/// The column header for `records`.
pub fn header(records: &[Record], mode: SchemaMode) -> Vec<String> {
    let Some(first) = records.first() else {
        return Vec::new();
    };
    let mut columns: Vec<String> = first.keys().cloned().collect();
    if mode == SchemaMode::First {
        return columns;
    }

    let mut seen: HashSet<String> = columns.iter().cloned().collect();
    for record in &records[1..] {
        for key in record.keys() {
            if seen.insert(key.clone()) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

/// Write `records` to `path` as CSV, one row per record in order.
///
/// Nothing is written for an empty slice, nor when the header comes out
/// empty because the records carry no fields. The file appears only once it is
/// complete; a failure part-way leaves no file behind.
pub fn write_csv(records: &[Record], path: &Path, mode: SchemaMode) -> Result<Export> {
    if records.is_empty() {
        error!("No data to save");
        return Err(IngestError::EmptyDataset);
    }

    let columns = header(records, mode);
    if columns.is_empty() {
        error!("No fields to save: every record is empty");
        return Err(IngestError::EmptyDataset);
    }
    if mode == SchemaMode::First {
        let drifted = records
            .iter()
            .filter(|record| record.keys().any(|key| !columns.contains(key)))
            .count();
        if drifted > 0 {
            warn!("{drifted} records carry fields missing from the header; those fields are dropped");
        }
    }
    debug!("writing {} columns: {columns:?}", columns.len());

    write_atomic(path, |file| -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(file);
        writer.write_record(&columns)?;
        for record in records {
            writer.write_record(columns.iter().map(|column| cell(record.get(column))))?;
        }
        writer.flush()?;
        Ok(())
    })
    .map_err(|e| {
        error!("Error saving to CSV: {e}");
        e
    })?;

    info!("Data saved to {}", path.display());
    info!("Total records: {}", records.len());

    Ok(Export {
        path: path.to_path_buf(),
        rows: records.len(),
        columns,
    })
}

// Scalars as plain text, nested values as compact JSON, null & absent as empty
fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
