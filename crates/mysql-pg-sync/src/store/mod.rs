//! Row store capabilities.
//!
//! The migration core never talks to a database client directly. It sees
//! the source through [`RowSource`] and the target through [`RowSink`]:
//!
//! - [`MysqlStore`]: MySQL via `sqlx`
//! - [`PostgresStore`]: PostgreSQL via `deadpool-postgres`
//! - [`MemoryStore`]: in-process tables with call counters and fault
//!   injection, used by tests and dry experiments

mod memory;
mod mysql;
mod postgres;
mod tls;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Row, RowKey, TableHandle};
use crate::error::{MigrateError, Result};
use crate::registry::TableDescriptor;

pub use memory::{CallCounts, MemoryStore};
pub use mysql::MysqlStore;
pub use postgres::PostgresStore;
pub use tls::SslMode;

/// Identity generator backing a target column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generator {
    /// Column fed by the generator.
    pub column: String,
    /// Generator (sequence) name, qualified where the store needs it.
    pub name: String,
}

/// Read access to a store.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Store type identifier (e.g. "mysql", "postgres", "memory").
    fn db_type(&self) -> &str;

    /// Verify the store is reachable.
    async fn ping(&self) -> Result<()>;

    /// Resolve a registry entry into a handle for this store.
    ///
    /// Fails with [`MigrateError::Schema`] when the table or one of its key
    /// columns does not exist.
    async fn resolve(&self, descriptor: &TableDescriptor) -> Result<TableHandle>;

    /// Number of rows in the table.
    async fn count(&self, table: &TableHandle) -> Result<u64>;

    /// Every row of the table, ordered by identity key.
    async fn list_all(&self, table: &TableHandle) -> Result<Vec<Row>>;

    /// Identity keys of every row in the table.
    async fn list_keys(&self, table: &TableHandle) -> Result<Vec<RowKey>> {
        self.list_all(table)
            .await?
            .iter()
            .map(|row| extract_key(table, row))
            .collect()
    }

    /// Whether a row with this key exists (simple-key tables).
    async fn exists(&self, table: &TableHandle, key: &RowKey) -> Result<bool>;

    /// Find the row matching every component of a composite key.
    async fn find_by_composite_key(&self, table: &TableHandle, key: &RowKey)
        -> Result<Option<Row>>;

    /// Release connections.
    async fn close(&self);
}

/// Write access to the target store.
#[async_trait]
pub trait RowSink: RowSource {
    /// Insert one row and return it as stored.
    ///
    /// Duplicate keys and foreign key violations fail with
    /// [`MigrateError::Constraint`].
    async fn insert(&self, table: &TableHandle, row: &Row) -> Result<Row>;

    /// Identity generators attached to the table's columns.
    async fn list_generators(&self, table: &TableHandle) -> Result<Vec<Generator>>;

    /// Largest value stored in an integer column, `None` when the table is
    /// empty.
    async fn max_value(&self, table: &TableHandle, column: &str) -> Result<Option<i64>>;

    /// Make the generator hand out `next_value` next.
    async fn set_generator(&self, name: &str, next_value: i64) -> Result<()>;
}

/// Extract a row's identity key, failing with a schema error when a key
/// column is absent from the row.
pub fn extract_key(table: &TableHandle, row: &Row) -> Result<RowKey> {
    row.key(&table.key_columns).map_err(|column| {
        MigrateError::schema(
            &table.name,
            format!("key column '{}' missing from row", column),
        )
    })
}

/// Quote a MySQL identifier with backticks.
pub(crate) fn quote_mysql(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quote a PostgreSQL identifier with double quotes.
pub(crate) fn quote_pg(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_quoting() {
        assert_eq!(quote_mysql("Group"), "`Group`");
        assert_eq!(quote_mysql("we`ird"), "`we``ird`");
        assert_eq!(quote_pg("itemId"), "\"itemId\"");
        assert_eq!(quote_pg("a\"b"), "\"a\"\"b\"");
    }
}
