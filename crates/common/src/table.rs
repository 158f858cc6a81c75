use indexmap::IndexMap;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Ordered key → values mapping.
///
/// Keys keep first-insertion order.  [`Metadata::add`] never stores the same
/// value twice for a key, so handlers can feed it every annotation they see
/// without producing duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata(IndexMap<String, Vec<String>>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` under `key` unless that exact value is already there.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        let values = self.0.entry(key.into()).or_default();
        if !values.contains(&value) {
            values.push(value);
        }
    }

    /// Replace every value of `key` with `value`.  An existing key keeps its
    /// position.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let values = self.0.entry(key.into()).or_default();
        values.clear();
        values.push(value.into());
    }

    /// First value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.0.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, values) in &self.0 {
            match values.as_slice() {
                [single] => map.serialize_entry(key, single)?,
                many => map.serialize_entry(key, many)?,
            }
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub key: String,
    pub name: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("cannot add column '{0}' after rows were appended")]
    ColumnsAfterRows(String),
    #[error("row has {got} values, table has {expected} columns")]
    RowWidth { expected: usize, got: usize },
}

/// Canonical parse result shared by every format handler.
///
/// Columns are declared first, then rows are appended; every row holds
/// exactly one value per column.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    /// Raw source lines, verbatim and in order.
    pub header: Vec<String>,
    pub metadata: Metadata,
    columns: Vec<Column>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_column(&mut self, key: impl Into<String>, name: impl Into<String>) -> Result<(), TableError> {
        let key = key.into();
        if !self.rows.is_empty() {
            return Err(TableError::ColumnsAfterRows(key));
        }
        self.columns.push(Column { key, name: name.into() });
        Ok(())
    }

    pub fn push_row(&mut self, row: Vec<String>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidth { expected: self.columns.len(), got: row.len() });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Values of column `index`, top to bottom.
    pub fn column_values(&self, index: usize) -> Option<Vec<&str>> {
        if index >= self.columns.len() {
            return None;
        }
        Some(self.rows.iter().map(|r| r[index].as_str()).collect())
    }

    /// Record the actual row and column counts in the metadata.
    pub fn set_dimensions(&mut self) {
        self.metadata.set("rows", self.rows.len().to_string());
        self.metadata.set("columns", self.columns.len().to_string());
    }
}

/// The one rule for turning a parsed value into a cell string.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(stringify).collect::<Vec<_>>().join(", "),
        Value::Object(_) => value.to_string(),
    }
}

/// Render a per-sample list of already stringified values.
pub fn join_values<S: AsRef<str>>(values: &[S]) -> String {
    values.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(", ")
}
