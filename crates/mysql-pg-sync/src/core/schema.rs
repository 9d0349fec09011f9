//! Resolved table metadata.
//!
//! A [`TableHandle`] is what a store hands back when a registry entry is
//! resolved against a live database: the table's actual column list, with
//! each column's database type, plus the registry's key definition. Handles
//! are resolved once per run and reused for every call against that table.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::registry::TableDescriptor;

/// Column metadata as reported by one side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Database type as the store reports it (e.g. `int`, `varchar`,
    /// `timestamp(3) without time zone`).
    pub data_type: String,

    /// Whether the column is nullable.
    pub is_nullable: bool,

    /// Whether the store marks the column as auto-generated.
    pub is_identity: bool,
}

impl Column {
    /// Create a nullable, non-identity column.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            is_identity: false,
        }
    }

    /// Mark the column as fed by an identity generator.
    pub fn identity(mut self) -> Self {
        self.is_identity = true;
        self.is_nullable = false;
        self
    }
}

/// A table resolved against one store.
#[derive(Debug, Clone)]
pub struct TableHandle {
    /// Table name.
    pub name: String,

    /// Schema (database for MySQL, namespace for PostgreSQL).
    pub schema: String,

    /// Identity key columns, from the registry.
    pub key_columns: Vec<String>,

    /// Columns as they exist on this side, in ordinal order.
    pub columns: Vec<Column>,

    /// Shared column names for rows read through this handle.
    column_names: Arc<[String]>,
}

impl TableHandle {
    /// Build a handle from a registry descriptor and the columns found live.
    pub fn new(descriptor: &TableDescriptor, schema: impl Into<String>, columns: Vec<Column>) -> Self {
        let column_names: Arc<[String]> = columns
            .iter()
            .map(|c| c.name.clone())
            .collect::<Vec<_>>()
            .into();
        Self {
            name: descriptor.name.clone(),
            schema: schema.into(),
            key_columns: descriptor.key_columns.clone(),
            columns,
            column_names,
        }
    }

    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Whether the identity key spans more than one column.
    pub fn is_composite(&self) -> bool {
        self.key_columns.len() > 1
    }

    /// Shared column-name list for building rows.
    pub fn column_names(&self) -> Arc<[String]> {
        Arc::clone(&self.column_names)
    }

    /// Find a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Key columns that do not exist on this side.
    pub fn missing_key_columns(&self) -> Vec<String> {
        self.key_columns
            .iter()
            .filter(|k| self.column(k).is_none())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_columns() {
        let desc = TableDescriptor::composite("ItemTag", ["itemId", "tagId"], 10);
        let handle = TableHandle::new(
            &desc,
            "public",
            vec![Column::new("id", "integer"), Column::new("itemId", "integer")],
        );
        assert!(handle.is_composite());
        assert_eq!(handle.missing_key_columns(), vec!["tagId".to_string()]);
        assert_eq!(handle.full_name(), "public.ItemTag");
        assert_eq!(handle.column_names().len(), 2);
    }
}
