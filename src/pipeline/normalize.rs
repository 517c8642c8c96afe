//! Payload shapes and table normalisation.
//!
//! The model is asked for `{"tables":[...]}` but older prompts produced a
//! bare list of row objects, and both still show up. The parsed JSON is
//! resolved once into an [`ExtractionPayload`] variant; everything after that
//! matches on the variant instead of probing the JSON again.
//!
//! ## Consolidation
//!
//! All tables in one payload are merged into a single [`ConsolidatedTable`]:
//!
//! * nested objects are flattened into dotted field names (`peso.total`)
//! * every row is tagged with its sanitised table name
//! * the six [`CANONICAL_COLUMNS`] are always present
//! * the column list is the sorted union of every row's fields, and each
//!   row carries every column (`null` where its table had no such field)
//!
//! This union is the only multi-table policy. [`is_empty`] is defined on it,
//! so "empty" means the same thing to the ledger as to the exports.

use crate::aggregate::{PAGE_COLUMN, ROW_TABLE_COLUMN, SOURCE_COLUMN, TABLE_NAME_COLUMN};
use crate::prompts::{CANONICAL_COLUMNS, DEFAULT_TABLE_NAME};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// One row as the model returned it.
pub type Row = Map<String, Value>;

/// Column names the pipeline writes itself. A model field with one of
/// these names is kept under [`SOURCE_FIELD_PREFIX`] instead.
pub const RESERVED_FIELDS: [&str; 4] = [ROW_TABLE_COLUMN, SOURCE_COLUMN, PAGE_COLUMN, TABLE_NAME_COLUMN];

/// Prefix for model fields that collide with [`RESERVED_FIELDS`].
pub const SOURCE_FIELD_PREFIX: &str = "src";

/// Separator for flattened nested field names.
pub const NESTED_SEPARATOR: &str = ".";

/// A table inside the `tables` envelope.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ExtractedTable {
    pub name: Option<String>,
    pub columns_detected: Vec<String>,
    pub rows: Vec<Row>,
}

/// Structured model output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExtractionPayload {
    /// A bare JSON list of row objects.
    LegacyRowList(Vec<Row>),
    /// `{"tables":[{"name", "columns_detected", "rows"}]}`.
    EnvelopedTables { tables: Vec<ExtractedTable> },
}

impl ExtractionPayload {
    /// Number of rows across all tables.
    pub fn row_count(&self) -> usize {
        match self {
            ExtractionPayload::LegacyRowList(rows) => rows.len(),
            ExtractionPayload::EnvelopedTables { tables } => {
                tables.iter().map(|t| t.rows.len()).sum()
            }
        }
    }

    /// `(name, rows)` for each table; a legacy list is one unnamed table.
    fn tables(&self) -> Vec<(Option<&str>, &[Row])> {
        match self {
            ExtractionPayload::LegacyRowList(rows) => vec![(None, rows.as_slice())],
            ExtractionPayload::EnvelopedTables { tables } => tables
                .iter()
                .map(|t| (t.name.as_deref(), t.rows.as_slice()))
                .collect(),
        }
    }
}

/// Resolve parsed JSON into a payload variant.
///
/// Never fails. Anything that is neither a list nor an object with a
/// `tables` list becomes an envelope with no tables; non-object rows and
/// tables are skipped.
impl From<Value> for ExtractionPayload {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => ExtractionPayload::LegacyRowList(objects(items)),
            Value::Object(mut map) => {
                let tables = match map.remove("tables") {
                    Some(Value::Array(tables)) => tables
                        .into_iter()
                        .filter_map(|t| match t {
                            Value::Object(t) => Some(table_from_map(t)),
                            _ => None,
                        })
                        .collect(),
                    _ => Vec::new(),
                };
                ExtractionPayload::EnvelopedTables { tables }
            }
            other => {
                debug!("Payload is a bare {}; treating as no tables", json_kind(&other));
                ExtractionPayload::EnvelopedTables { tables: Vec::new() }
            }
        }
    }
}

fn table_from_map(mut t: Map<String, Value>) -> ExtractedTable {
    let name = t.remove("name").and_then(|v| match v {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    let columns_detected = match t.remove("columns_detected") {
        Some(Value::Array(cols)) => cols
            .into_iter()
            .filter_map(|c| match c {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        _ => Vec::new(),
    };
    let rows = match t.remove("rows") {
        Some(Value::Array(rows)) => objects(rows),
        _ => Vec::new(),
    };
    ExtractedTable {
        name,
        columns_detected,
        rows,
    }
}

fn objects(items: Vec<Value>) -> Vec<Row> {
    items
        .into_iter()
        .filter_map(|v| match v {
            Value::Object(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// True when there is nothing to aggregate: no payload, no tables, or no rows.
pub fn is_empty(payload: Option<&ExtractionPayload>) -> bool {
    payload.is_none_or(|p| p.row_count() == 0)
}

/// The first table's declared name, or [`DEFAULT_TABLE_NAME`].
pub fn get_table_name(payload: Option<&ExtractionPayload>) -> String {
    match payload {
        Some(ExtractionPayload::EnvelopedTables { tables }) => tables
            .first()
            .and_then(|t| t.name.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_TABLE_NAME)
            .to_string(),
        _ => DEFAULT_TABLE_NAME.to_string(),
    }
}

/// Trim, lowercase, collapse whitespace runs to `_`.
pub fn sanitize_table_name(name: &str) -> String {
    let cleaned = name
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_");
    if cleaned.is_empty() {
        DEFAULT_TABLE_NAME.to_string()
    } else {
        cleaned
    }
}

/// A row conforming to the consolidated column set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRow {
    /// Sanitised name of the table the row came from.
    #[serde(rename = "_table")]
    pub table: String,
    /// Every consolidated column, `null` where absent.
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

/// All tables of one payload merged under one schema.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ConsolidatedTable {
    /// Sorted union of field names, canonical columns included.
    pub columns: Vec<String>,
    pub rows: Vec<NormalizedRow>,
}

impl ConsolidatedTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Merge every table of `payload` into one row set.
pub fn consolidate(payload: &ExtractionPayload) -> ConsolidatedTable {
    let mut columns: BTreeSet<String> = CANONICAL_COLUMNS.iter().map(|c| c.to_string()).collect();
    let mut rows = Vec::with_capacity(payload.row_count());

    for (name, table_rows) in payload.tables() {
        let table = sanitize_table_name(name.unwrap_or(DEFAULT_TABLE_NAME));
        for row in table_rows {
            let mut fields = BTreeMap::new();
            flatten_into(row, "", &mut fields);
            columns.extend(fields.keys().cloned());
            rows.push(NormalizedRow {
                table: table.clone(),
                fields,
            });
        }
    }

    for row in &mut rows {
        for col in &columns {
            row.fields.entry(col.clone()).or_insert(Value::Null);
        }
    }

    debug!("Consolidated {} rows × {} columns", rows.len(), columns.len());
    ConsolidatedTable {
        columns: columns.into_iter().collect(),
        rows,
    }
}

/// The consolidated rows of `payload`.
pub fn normalize(payload: &ExtractionPayload) -> Vec<NormalizedRow> {
    consolidate(payload).rows
}

fn flatten_into(obj: &Row, prefix: &str, out: &mut BTreeMap<String, Value>) {
    for (key, value) in obj {
        let key = if prefix.is_empty() {
            if RESERVED_FIELDS.contains(&key.as_str()) {
                format!("{SOURCE_FIELD_PREFIX}{NESTED_SEPARATOR}{key}")
            } else {
                key.clone()
            }
        } else {
            format!("{prefix}{NESTED_SEPARATOR}{key}")
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_into(inner, &key, out),
            Value::Object(_) => {
                out.insert(key, Value::Null);
            }
            other => {
                out.insert(key, other.clone());
            }
        }
    }
}
