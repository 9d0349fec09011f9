//! In-process row store.
//!
//! `MemoryStore` keeps tables as plain row vectors and behaves like the SQL
//! stores where the migration depends on it: duplicate keys and dangling
//! foreign keys are rejected, identity generators hand out values
//! independently of explicitly inserted keys, and an unreachable store
//! fails every call with a connection error.
//!
//! Every trait call is counted so tests can assert which operations a run
//! issued. Faults can be injected per key (insert rejected) or per table
//! (reads fail).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{extract_key, Generator, RowSink, RowSource};
use crate::core::{Column, KeyValue, Row, RowKey, SqlValue, TableHandle};
use crate::error::{MigrateError, Result};
use crate::registry::TableDescriptor;

/// Snapshot of the calls a [`MemoryStore`] has served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub ping: usize,
    pub count: usize,
    pub list_all: usize,
    pub list_keys: usize,
    pub exists: usize,
    pub find_by_composite_key: usize,
    pub insert: usize,
    pub max_value: usize,
    pub set_generator: usize,
    pub close: usize,
}

#[derive(Default)]
struct Counters {
    ping: AtomicUsize,
    count: AtomicUsize,
    list_all: AtomicUsize,
    list_keys: AtomicUsize,
    exists: AtomicUsize,
    find_by_composite_key: AtomicUsize,
    insert: AtomicUsize,
    max_value: AtomicUsize,
    set_generator: AtomicUsize,
    close: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct ForeignKey {
    column: String,
    parent: String,
    parent_column: String,
}

struct MemGenerator {
    column: String,
    name: String,
    next: i64,
}

struct MemTable {
    columns: Vec<String>,
    rows: Vec<Row>,
    foreign_keys: Vec<ForeignKey>,
    generators: Vec<MemGenerator>,
    rejected: HashSet<RowKey>,
    failing_reads: bool,
}

impl MemTable {
    fn column_set(&self) -> Arc<[String]> {
        self.columns.clone().into()
    }
}

#[derive(Default)]
struct Tables {
    tables: HashMap<String, MemTable>,
}

impl Tables {
    fn table(&self, name: &str) -> Result<&MemTable> {
        self.tables
            .get(name)
            .ok_or_else(|| MigrateError::schema(name, "table does not exist"))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| MigrateError::schema(name, "table does not exist"))
    }

    fn readable(&self, name: &str) -> Result<&MemTable> {
        let table = self.table(name)?;
        if table.failing_reads {
            return Err(MigrateError::connection(
                "injected read failure",
                format!("reading {}", name),
            ));
        }
        Ok(table)
    }
}

/// In-memory implementation of [`RowSource`] and [`RowSink`].
pub struct MemoryStore {
    label: String,
    state: Mutex<Tables>,
    available: AtomicBool,
    counters: Counters,
}

impl MemoryStore {
    /// Create an empty store. The label appears in error contexts.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(Tables::default()),
            available: AtomicBool::new(true),
            counters: Counters::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self, operation: &str) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MigrateError::connection(
                format!("{} store is unavailable", self.label),
                operation.to_string(),
            ))
        }
    }

    /// Create (or replace) a table with the given columns.
    pub fn create_table(&self, name: &str, columns: &[&str]) -> &Self {
        self.lock().tables.insert(
            name.to_string(),
            MemTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: Vec::new(),
                foreign_keys: Vec::new(),
                generators: Vec::new(),
                rejected: HashSet::new(),
                failing_reads: false,
            },
        );
        self
    }

    /// Attach an identity generator to a column. `next` is the value it
    /// hands out next.
    pub fn add_generator(&self, table: &str, column: &str, name: &str, next: i64) -> &Self {
        if let Some(t) = self.lock().tables.get_mut(table) {
            t.generators.push(MemGenerator {
                column: column.to_string(),
                name: name.to_string(),
                next,
            });
        }
        self
    }

    /// Enforce that non-null values of `column` exist in `parent.parent_column`.
    pub fn add_foreign_key(&self, table: &str, column: &str, parent: &str, parent_column: &str) -> &Self {
        if let Some(t) = self.lock().tables.get_mut(table) {
            t.foreign_keys.push(ForeignKey {
                column: column.to_string(),
                parent: parent.to_string(),
                parent_column: parent_column.to_string(),
            });
        }
        self
    }

    /// Load rows directly, bypassing constraints and call counters.
    pub fn seed(&self, table: &str, rows: Vec<Row>) -> &Self {
        if let Some(t) = self.lock().tables.get_mut(table) {
            t.rows.extend(rows);
        }
        self
    }

    /// Make every insert of `key` into `table` fail with a constraint error.
    pub fn reject_key(&self, table: &str, key: RowKey) -> &Self {
        if let Some(t) = self.lock().tables.get_mut(table) {
            t.rejected.insert(key);
        }
        self
    }

    /// Make reads of `table` fail with a connection error.
    pub fn fail_reads(&self, table: &str) -> &Self {
        if let Some(t) = self.lock().tables.get_mut(table) {
            t.failing_reads = true;
        }
        self
    }

    /// Simulate the whole store going away (or coming back).
    pub fn set_available(&self, available: bool) -> &Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    /// Current rows of a table, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Number of rows in a table (0 for unknown tables).
    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, |t| t.rows.len())
    }

    /// Value the named generator hands out next.
    pub fn generator_value(&self, name: &str) -> Option<i64> {
        self.lock()
            .tables
            .values()
            .flat_map(|t| t.generators.iter())
            .find(|g| g.name == name)
            .map(|g| g.next)
    }

    /// Calls served so far.
    pub fn calls(&self) -> CallCounts {
        let c = &self.counters;
        let load = |a: &AtomicUsize| a.load(Ordering::Relaxed);
        CallCounts {
            ping: load(&c.ping),
            count: load(&c.count),
            list_all: load(&c.list_all),
            list_keys: load(&c.list_keys),
            exists: load(&c.exists),
            find_by_composite_key: load(&c.find_by_composite_key),
            insert: load(&c.insert),
            max_value: load(&c.max_value),
            set_generator: load(&c.set_generator),
            close: load(&c.close),
        }
    }

    fn sorted_rows(table: &MemTable, handle: &TableHandle) -> Result<Vec<Row>> {
        let mut keyed = table
            .rows
            .iter()
            .map(|row| extract_key(handle, row).map(|key| (key, row.clone())))
            .collect::<Result<Vec<_>>>()?;
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }

    fn find_row(table: &MemTable, handle: &TableHandle, key: &RowKey) -> Result<Option<Row>> {
        for row in &table.rows {
            if &extract_key(handle, row)? == key {
                return Ok(Some(row.clone()));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl RowSource for MemoryStore {
    fn db_type(&self) -> &str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        bump(&self.counters.ping);
        self.check_available("ping")
    }

    async fn resolve(&self, descriptor: &TableDescriptor) -> Result<TableHandle> {
        self.check_available("resolving table")?;
        let state = self.lock();
        let table = state.table(&descriptor.name)?;
        let generated: HashSet<&str> = table.generators.iter().map(|g| g.column.as_str()).collect();
        let columns = table
            .columns
            .iter()
            .map(|name| {
                let column = Column::new(name.clone(), "any");
                if generated.contains(name.as_str()) {
                    column.identity()
                } else {
                    column
                }
            })
            .collect();

        let handle = TableHandle::new(descriptor, self.label.clone(), columns);
        let missing = handle.missing_key_columns();
        if !missing.is_empty() {
            return Err(MigrateError::schema(
                &descriptor.name,
                format!("key columns not found: {}", missing.join(", ")),
            ));
        }
        Ok(handle)
    }

    async fn count(&self, table: &TableHandle) -> Result<u64> {
        bump(&self.counters.count);
        self.check_available("counting rows")?;
        Ok(self.lock().readable(&table.name)?.rows.len() as u64)
    }

    async fn list_all(&self, table: &TableHandle) -> Result<Vec<Row>> {
        bump(&self.counters.list_all);
        self.check_available("listing rows")?;
        let state = self.lock();
        Self::sorted_rows(state.readable(&table.name)?, table)
    }

    async fn list_keys(&self, table: &TableHandle) -> Result<Vec<RowKey>> {
        bump(&self.counters.list_keys);
        self.check_available("listing keys")?;
        let state = self.lock();
        state
            .readable(&table.name)?
            .rows
            .iter()
            .map(|row| extract_key(table, row))
            .collect()
    }

    async fn exists(&self, table: &TableHandle, key: &RowKey) -> Result<bool> {
        bump(&self.counters.exists);
        self.check_available("checking row existence")?;
        let state = self.lock();
        Ok(Self::find_row(state.readable(&table.name)?, table, key)?.is_some())
    }

    async fn find_by_composite_key(
        &self,
        table: &TableHandle,
        key: &RowKey,
    ) -> Result<Option<Row>> {
        bump(&self.counters.find_by_composite_key);
        self.check_available("looking up composite key")?;
        let state = self.lock();
        Self::find_row(state.readable(&table.name)?, table, key)
    }

    async fn close(&self) {
        bump(&self.counters.close);
    }
}

#[async_trait]
impl RowSink for MemoryStore {
    async fn insert(&self, table: &TableHandle, row: &Row) -> Result<Row> {
        bump(&self.counters.insert);
        self.check_available("inserting row")?;
        let mut state = self.lock();

        let target = state.table(&table.name)?;
        let columns = target.column_set();
        let mut values = Vec::with_capacity(columns.len());
        for column in columns.iter() {
            values.push(row.get(column).cloned().unwrap_or(SqlValue::Null));
        }
        if let Some(unknown) = row.columns().iter().find(|c| !columns.contains(c)) {
            return Err(MigrateError::schema(
                &table.name,
                format!("column '{}' does not exist", unknown),
            ));
        }

        // Fill identity columns the row leaves empty, as a database default would.
        let mut stored = Row::new(Arc::clone(&columns), values);
        let fills: Vec<(usize, i64)> = target
            .generators
            .iter()
            .filter_map(|g| {
                let idx = columns.iter().position(|c| c == &g.column)?;
                stored.values()[idx].is_null().then_some((idx, g.next))
            })
            .collect();
        if !fills.is_empty() {
            let mut values = stored.values().to_vec();
            for (idx, value) in &fills {
                values[*idx] = SqlValue::I64(*value);
            }
            stored = Row::new(Arc::clone(&columns), values);
        }

        let key = extract_key(table, &stored)?;
        if target.rejected.contains(&key) {
            return Err(MigrateError::constraint(
                &table.name,
                format!("row {} rejected by check constraint", key),
            ));
        }
        if Self::find_row(target, table, &key)?.is_some() {
            return Err(MigrateError::constraint(
                &table.name,
                format!("duplicate key {}", key),
            ));
        }

        for fk in &target.foreign_keys {
            let Some(value) = stored.get(&fk.column).filter(|v| !v.is_null()) else {
                continue;
            };
            let wanted = KeyValue::from(value);
            let parent = state.table(&fk.parent)?;
            let found = parent.rows.iter().any(|r| {
                r.get(&fk.parent_column)
                    .map(|v| KeyValue::from(v) == wanted)
                    .unwrap_or(false)
            });
            if !found {
                return Err(MigrateError::constraint(
                    &table.name,
                    format!(
                        "foreign key {} = {} has no match in {}.{}",
                        fk.column, wanted, fk.parent, fk.parent_column
                    ),
                ));
            }
        }

        let target = state.table_mut(&table.name)?;
        for g in target.generators.iter_mut() {
            if fills.iter().any(|(idx, _)| columns[*idx] == g.column) {
                g.next += 1;
            }
        }
        target.rows.push(stored.clone());
        Ok(stored)
    }

    async fn list_generators(&self, table: &TableHandle) -> Result<Vec<Generator>> {
        self.check_available("listing generators")?;
        let state = self.lock();
        Ok(state
            .table(&table.name)?
            .generators
            .iter()
            .map(|g| Generator {
                column: g.column.clone(),
                name: g.name.clone(),
            })
            .collect())
    }

    async fn max_value(&self, table: &TableHandle, column: &str) -> Result<Option<i64>> {
        bump(&self.counters.max_value);
        self.check_available("reading max value")?;
        let state = self.lock();
        let t = state.readable(&table.name)?;
        if !t.columns.iter().any(|c| c == column) {
            return Err(MigrateError::schema(
                &table.name,
                format!("column '{}' does not exist", column),
            ));
        }
        Ok(t.rows
            .iter()
            .filter_map(|r| r.get(column).and_then(SqlValue::as_i64))
            .max())
    }

    async fn set_generator(&self, name: &str, next_value: i64) -> Result<()> {
        bump(&self.counters.set_generator);
        self.check_available("setting generator")?;
        let mut state = self.lock();
        let generator = state
            .tables
            .values_mut()
            .flat_map(|t| t.generators.iter_mut())
            .find(|g| g.name == name)
            .ok_or_else(|| MigrateError::schema(name, "generator does not exist"))?;
        generator.next = next_value;
        Ok(())
    }
}
