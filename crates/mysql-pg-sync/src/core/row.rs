//! Rows as ordered column/value mappings.

use std::sync::Arc;

use super::key::{KeyValue, RowKey};
use super::value::SqlValue;

/// A single table row.
///
/// Column names are shared between all rows read in one query, so a large
/// table does not repeat its column list per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Create a row from a shared column list and matching values.
    ///
    /// Extra values beyond the column list are dropped; missing ones are NULL.
    pub fn new(columns: Arc<[String]>, mut values: Vec<SqlValue>) -> Self {
        values.resize(columns.len(), SqlValue::Null);
        Self { columns, values }
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<SqlValue>,
    {
        let (columns, values): (Vec<String>, Vec<SqlValue>) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self {
            columns: columns.into(),
            values,
        }
    }

    /// Column names, in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values, in column order.
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Iterate over `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Look up a value by column name.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Extract the identity key for the given key columns.
    ///
    /// Returns the name of the first missing column on failure.
    pub fn key(&self, key_columns: &[String]) -> std::result::Result<RowKey, String> {
        key_columns
            .iter()
            .map(|col| {
                self.get(col)
                    .map(KeyValue::from)
                    .ok_or_else(|| col.clone())
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(RowKey)
    }
}
