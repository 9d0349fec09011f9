//! Table descriptor registry.
//!
//! The registry is the static, ordered list of tables a run migrates. Each
//! entry names its identity key and its dependency rank. Tables are visited
//! in ascending rank; within a rank, in declaration order.
//!
//! The registry is resolved once per run against both stores (see
//! [`crate::store::RowSource::resolve`]). A name that is not in the registry
//! is rejected with [`MigrateError::Schema`] rather than discovered at
//! query time.

mod builtin;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

pub use builtin::BUILTIN_TABLES;

/// One table in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Table name as it exists in both databases.
    pub name: String,

    /// Identity key columns. One column for a simple primary key, two or
    /// more for association tables keyed on a tuple.
    #[serde(default = "default_key_columns")]
    pub key_columns: Vec<String>,

    /// Position in referential order.
    pub dependency_rank: u32,

    /// Tables this one holds foreign keys to. Each must have a strictly
    /// lower rank.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
}

impl TableDescriptor {
    /// A table keyed on a single `id` column.
    pub fn simple(name: impl Into<String>, dependency_rank: u32) -> Self {
        Self {
            name: name.into(),
            key_columns: default_key_columns(),
            dependency_rank,
            references: Vec::new(),
        }
    }

    /// A table keyed on a tuple of columns.
    pub fn composite<I, S>(name: impl Into<String>, key_columns: I, dependency_rank: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            key_columns: key_columns.into_iter().map(Into::into).collect(),
            dependency_rank,
            references: Vec::new(),
        }
    }

    /// Declare the tables this one references.
    pub fn with_references<I, S>(mut self, references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.references = references.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the identity key spans more than one column.
    pub fn is_composite(&self) -> bool {
        self.key_columns.len() > 1
    }
}

fn default_key_columns() -> Vec<String> {
    vec!["id".to_string()]
}

/// Ordered, validated set of table descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRegistry {
    tables: Vec<TableDescriptor>,
}

impl TableRegistry {
    /// Build a registry, validating it and ordering it by rank.
    ///
    /// The sort is stable, so tables sharing a rank keep their declaration
    /// order and logs stay reproducible between runs.
    pub fn new(mut tables: Vec<TableDescriptor>) -> Result<Self> {
        validate(&tables)?;
        tables.sort_by_key(|t| t.dependency_rank);
        Ok(Self { tables })
    }

    /// The registry of the production schema.
    pub fn builtin() -> Self {
        Self {
            tables: builtin::descriptors(),
        }
    }

    /// Tables in processing order.
    pub fn tables(&self) -> &[TableDescriptor] {
        &self.tables
    }

    /// Number of tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Look up a table by name.
    pub fn get(&self, name: &str) -> Result<&TableDescriptor> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| MigrateError::schema(name, "table is not in the registry"))
    }

    /// Restrict the registry to `include` (if non-empty) minus `exclude`.
    ///
    /// Every name in either list must exist in the registry.
    pub fn filter(&self, include: &[String], exclude: &[String]) -> Result<Self> {
        if let Some(unknown) = include
            .iter()
            .chain(exclude)
            .find(|name| self.get(name).is_err())
        {
            return Err(MigrateError::Config(format!(
                "table filter names unknown table '{}'",
                unknown
            )));
        }

        let tables = self
            .tables
            .iter()
            .filter(|t| include.is_empty() || include.contains(&t.name))
            .filter(|t| !exclude.contains(&t.name))
            .cloned()
            .collect();

        Ok(Self { tables })
    }
}

impl Default for TableRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Check registry invariants: unique names, non-empty keys, and references
/// pointing at known tables of strictly lower rank.
fn validate(tables: &[TableDescriptor]) -> Result<()> {
    if tables.is_empty() {
        return Err(MigrateError::Config("table registry is empty".into()));
    }

    let mut ranks: HashMap<&str, u32> = HashMap::new();
    for table in tables {
        if table.name.trim().is_empty() {
            return Err(MigrateError::Config("table name must not be empty".into()));
        }
        if ranks.insert(&table.name, table.dependency_rank).is_some() {
            return Err(MigrateError::Config(format!(
                "table '{}' is registered twice",
                table.name
            )));
        }
        if table.key_columns.is_empty() {
            return Err(MigrateError::Config(format!(
                "table '{}' has no key columns",
                table.name
            )));
        }
        let unique: HashSet<&String> = table.key_columns.iter().collect();
        if unique.len() != table.key_columns.len() {
            return Err(MigrateError::Config(format!(
                "table '{}' repeats a key column",
                table.name
            )));
        }
    }

    for table in tables {
        for parent in &table.references {
            let parent_rank = ranks.get(parent.as_str()).ok_or_else(|| {
                MigrateError::Config(format!(
                    "table '{}' references unknown table '{}'",
                    table.name, parent
                ))
            })?;
            if *parent_rank >= table.dependency_rank {
                return Err(MigrateError::Config(format!(
                    "table '{}' (rank {}) references '{}' (rank {}); referencing tables need a higher rank",
                    table.name, table.dependency_rank, parent, parent_rank
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orders_by_rank_stably() {
        let registry = TableRegistry::new(vec![
            TableDescriptor::simple("Invoice", 2),
            TableDescriptor::simple("Tag", 1),
            TableDescriptor::simple("Company", 0),
            TableDescriptor::simple("Lead", 1),
        ])
        .unwrap();

        let names: Vec<&str> = registry.tables().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Company", "Tag", "Lead", "Invoice"]);
    }

    #[test]
    fn test_rejects_reference_to_same_or_higher_rank() {
        let result = TableRegistry::new(vec![
            TableDescriptor::simple("Company", 1),
            TableDescriptor::simple("User", 1).with_references(["Company"]),
        ]);
        assert!(matches!(result, Err(MigrateError::Config(_))));
    }

    #[test]
    fn test_rejects_unknown_reference_and_duplicates() {
        let unknown = TableRegistry::new(vec![
            TableDescriptor::simple("User", 1).with_references(["Company"]),
        ]);
        assert!(unknown.is_err());

        let duplicate = TableRegistry::new(vec![
            TableDescriptor::simple("User", 1),
            TableDescriptor::simple("User", 2),
        ]);
        assert!(duplicate.is_err());

        let no_keys = TableRegistry::new(vec![TableDescriptor::composite(
            "ItemTag",
            Vec::<String>::new(),
            1,
        )]);
        assert!(no_keys.is_err());
    }

    #[test]
    fn test_get_unknown_is_schema_error() {
        let registry = TableRegistry::builtin();
        assert!(registry.get("Company").is_ok());
        assert!(matches!(
            registry.get("NoSuchModel"),
            Err(MigrateError::Schema { .. })
        ));
    }

    #[test]
    fn test_filter() {
        let registry = TableRegistry::builtin();
        let only = registry
            .filter(&["User".to_string(), "Company".to_string()], &[])
            .unwrap();
        let names: Vec<&str> = only.tables().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Company", "User"]);

        let without = registry.filter(&[], &["ItemTag".to_string()]).unwrap();
        assert_eq!(without.len(), registry.len() - 1);
        assert!(without.get("ItemTag").is_err());

        assert!(registry.filter(&["Nope".to_string()], &[]).is_err());
    }

    #[test]
    fn test_descriptor_yaml_defaults() {
        let yaml = "name: Company\ndependency_rank: 0\n";
        let desc: TableDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(desc.key_columns, vec!["id".to_string()]);
        assert!(desc.references.is_empty());
        assert!(!desc.is_composite());
    }
}
