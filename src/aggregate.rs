//! Cross-document accumulation: aggregated rows and the batch ledger.
//!
//! An [`AggregateStore`] is owned by the caller (one per session) and passed
//! by `&mut` into [`crate::Extractor::run_batch`]. It only grows until
//! [`AggregateStore::reset`] clears both collections.
//!
//! Snapshots flatten the store into string tables; the CSV exporters write
//! those snapshots comma-delimited, UTF-8 with a BOM so spreadsheet tools
//! pick the right encoding.

use crate::error::ExtractError;
use crate::pipeline::normalize::NormalizedRow;
use chrono::{Local, NaiveDateTime};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Provenance columns appended to every row snapshot.
pub const SOURCE_COLUMN: &str = "_source_pdf";
pub const PAGE_COLUMN: &str = "_page_idx";
pub const TABLE_NAME_COLUMN: &str = "_table_name";
/// Per-row table tag from consolidation.
pub const ROW_TABLE_COLUMN: &str = "_table";

/// Ledger columns, in order.
pub const LEDGER_COLUMNS: [&str; 4] = ["document", "status", "rows", "error"];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Status of one document in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Empty,
    Ok,
    Error,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Empty => "empty",
            BatchStatus::Ok => "ok",
            BatchStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchStatus::Pending)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReportEntry {
    pub document: String,
    pub status: BatchStatus,
    pub row_count: usize,
    pub error: Option<String>,
}

/// A normalised row with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedRow {
    pub source_document: String,
    pub page_index: usize,
    pub table_name: String,
    pub row: NormalizedRow,
}

/// Headers plus stringified records, ready for export or display.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TabularSnapshot {
    pub headers: Vec<String>,
    pub records: Vec<Vec<String>>,
}

impl TabularSnapshot {
    /// Write as CSV: UTF-8 BOM, comma-delimited, header line first.
    pub fn write_csv(&self, path: &Path) -> Result<(), ExtractError> {
        let export_err = |detail: String| ExtractError::ExportFailed {
            path: path.to_path_buf(),
            detail,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| export_err(e.to_string()))?;
        }
        let mut file = std::fs::File::create(path).map_err(|e| export_err(e.to_string()))?;
        file.write_all(UTF8_BOM)
            .map_err(|e| export_err(e.to_string()))?;

        let mut writer = WriterBuilder::new().delimiter(b',').from_writer(file);
        writer
            .write_record(&self.headers)
            .map_err(|e| export_err(e.to_string()))?;
        for record in &self.records {
            writer
                .write_record(record)
                .map_err(|e| export_err(e.to_string()))?;
        }
        writer.flush().map_err(|e| export_err(e.to_string()))?;

        debug!("Wrote {} records to {}", self.records.len(), path.display());
        Ok(())
    }
}

/// Session-lifetime store of extracted rows and batch status.
#[derive(Debug, Clone, Default)]
pub struct AggregateStore {
    rows: Vec<AggregatedRow>,
    ledger: Vec<BatchReportEntry>,
}

impl AggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `rows`, stamped with provenance. No deduplication.
    pub fn add_rows(
        &mut self,
        rows: impl IntoIterator<Item = NormalizedRow>,
        source_document: &str,
        page_index: usize,
        table_name: &str,
    ) {
        let before = self.rows.len();
        self.rows.extend(rows.into_iter().map(|row| AggregatedRow {
            source_document: source_document.to_string(),
            page_index,
            table_name: table_name.to_string(),
            row,
        }));
        debug!(
            "Aggregated {} rows from {}",
            self.rows.len() - before,
            source_document
        );
    }

    /// Append a ledger entry and return its index.
    pub fn add_report_entry(
        &mut self,
        document: &str,
        status: BatchStatus,
        row_count: usize,
        error: Option<String>,
    ) -> usize {
        self.ledger.push(BatchReportEntry {
            document: document.to_string(),
            status,
            row_count,
            error,
        });
        self.ledger.len() - 1
    }

    /// Move a pending entry to its terminal status. Each entry moves once.
    pub fn finish_entry(
        &mut self,
        index: usize,
        status: BatchStatus,
        row_count: usize,
        error: Option<String>,
    ) -> Result<(), ExtractError> {
        let entry = self.ledger.get_mut(index).ok_or_else(|| {
            ExtractError::Internal(format!("no ledger entry at index {index}"))
        })?;
        if entry.status.is_terminal() {
            return Err(ExtractError::Internal(format!(
                "ledger entry for {} is already {}",
                entry.document, entry.status
            )));
        }
        if !status.is_terminal() {
            return Err(ExtractError::Internal(format!(
                "ledger entry for {} cannot finish as {status}",
                entry.document
            )));
        }
        entry.status = status;
        entry.row_count = row_count;
        entry.error = error;
        Ok(())
    }

    /// Clear rows and ledger. Files already exported are untouched.
    pub fn reset(&mut self) {
        info!(
            "Resetting aggregate store ({} rows, {} ledger entries)",
            self.rows.len(),
            self.ledger.len()
        );
        self.rows.clear();
        self.ledger.clear();
    }

    pub fn rows(&self) -> &[AggregatedRow] {
        &self.rows
    }

    pub fn entries(&self) -> &[BatchReportEntry] {
        &self.ledger
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.ledger.is_empty()
    }

    /// Rows as a flat table: sorted data columns, the row's table tag, then
    /// source, page and table-name provenance.
    pub fn rows_snapshot(&self) -> TabularSnapshot {
        let data_columns: BTreeSet<&str> = self
            .rows
            .iter()
            .flat_map(|r| r.row.fields.keys().map(String::as_str))
            .collect();

        let mut headers: Vec<String> = data_columns.iter().map(|c| c.to_string()).collect();
        headers.extend(
            [ROW_TABLE_COLUMN, SOURCE_COLUMN, PAGE_COLUMN, TABLE_NAME_COLUMN]
                .iter()
                .map(|c| c.to_string()),
        );

        let records = self
            .rows
            .iter()
            .map(|r| {
                let mut record: Vec<String> = data_columns
                    .iter()
                    .map(|c| r.row.fields.get(*c).map(cell_text).unwrap_or_default())
                    .collect();
                record.push(r.row.table.clone());
                record.push(r.source_document.clone());
                record.push(r.page_index.to_string());
                record.push(r.table_name.clone());
                record
            })
            .collect();

        TabularSnapshot { headers, records }
    }

    /// Ledger as a flat table with [`LEDGER_COLUMNS`].
    pub fn ledger_snapshot(&self) -> TabularSnapshot {
        TabularSnapshot {
            headers: LEDGER_COLUMNS.iter().map(|c| c.to_string()).collect(),
            records: self
                .ledger
                .iter()
                .map(|e| {
                    vec![
                        e.document.clone(),
                        e.status.to_string(),
                        e.row_count.to_string(),
                        e.error.clone().unwrap_or_default(),
                    ]
                })
                .collect(),
        }
    }

    /// Write `all_extracted_<timestamp>.csv` into `dir`.
    pub fn export_rows(&self, dir: &Path) -> Result<PathBuf, ExtractError> {
        self.export_rows_at(dir, Local::now().naive_local())
    }

    /// Write `batch_report_<timestamp>.csv` into `dir`.
    pub fn export_ledger(&self, dir: &Path) -> Result<PathBuf, ExtractError> {
        self.export_ledger_at(dir, Local::now().naive_local())
    }

    pub fn export_rows_at(&self, dir: &Path, at: NaiveDateTime) -> Result<PathBuf, ExtractError> {
        let path = dir.join(export_file_name("all_extracted", at));
        self.rows_snapshot().write_csv(&path)?;
        info!("Exported {} rows to {}", self.rows.len(), path.display());
        Ok(path)
    }

    pub fn export_ledger_at(&self, dir: &Path, at: NaiveDateTime) -> Result<PathBuf, ExtractError> {
        let path = dir.join(export_file_name("batch_report", at));
        self.ledger_snapshot().write_csv(&path)?;
        info!("Exported batch report to {}", path.display());
        Ok(path)
    }
}

fn export_file_name(prefix: &str, at: NaiveDateTime) -> String {
    format!("{prefix}_{}.csv", at.format(TIMESTAMP_FORMAT))
}

fn cell_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
