//! MySQL row store.
//!
//! Read side of a migration. Uses SQLx for connection pooling and async
//! query execution. Values are decoded according to each column's
//! `COLUMN_TYPE`, so `tinyint(1)` booleans and unsigned integers keep their
//! meaning on the way to PostgreSQL.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{MySql, Row as _, ValueRef};
use tracing::{debug, info};

use super::tls::SslMode;
use super::{quote_mysql, RowSource};
use crate::config::SourceConfig;
use crate::core::{Column, KeyValue, Row, RowKey, SqlValue, TableHandle};
use crate::error::{MigrateError, Result};
use crate::registry::TableDescriptor;

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// MySQL implementation of [`RowSource`].
pub struct MysqlStore {
    pool: MySqlPool,
    database: String,
}

impl MysqlStore {
    /// Open a pool from configuration and verify it with a round trip.
    pub async fn connect(config: &SourceConfig, max_conns: usize) -> Result<Self> {
        let ssl_mode = SslMode::parse(&config.ssl_mode)?;

        let options = match &config.url {
            Some(url) => MySqlConnectOptions::from_str(url)
                .map_err(|e| MigrateError::Config(format!("invalid MySQL URL: {}", e)))?,
            None => MySqlConnectOptions::new()
                .host(&config.host)
                .port(config.port)
                .database(&config.database)
                .username(&config.user)
                .password(&config.password)
                .ssl_mode(ssl_mode.to_mysql()),
        };

        let pool = MySqlPoolOptions::new()
            .max_connections(max_conns.max(1) as u32)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| MigrateError::connection(e, "connecting to MySQL source"))?;

        let database: Option<String> = sqlx::query_scalar("SELECT DATABASE()")
            .fetch_one(&pool)
            .await
            .map_err(|e| MigrateError::connection(e, "selecting MySQL source database"))?;
        let database = database.ok_or_else(|| {
            MigrateError::Config("MySQL source connection has no default database".into())
        })?;

        info!(
            "Connected to MySQL source: {}:{}/{}",
            config.host, config.port, database
        );

        Ok(Self { pool, database })
    }

    fn table_ref(&self, table: &TableHandle) -> String {
        format!("{}.{}", quote_mysql(&self.database), quote_mysql(&table.name))
    }

    /// Select list that casts types SQLx cannot decode directly to text or
    /// integers.
    fn select_list(columns: &[Column]) -> String {
        columns
            .iter()
            .map(|c| {
                let quoted = quote_mysql(&c.name);
                match base_type(&c.data_type) {
                    "json" => format!("CAST({0} AS CHAR) AS {0}", quoted),
                    "year" => format!("CAST({0} AS SIGNED) AS {0}", quoted),
                    "bit" if c.data_type != "bit(1)" => format!("CAST({0} AS UNSIGNED) AS {0}", quoted),
                    _ => quoted,
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn key_columns<'a>(table: &'a TableHandle) -> Vec<&'a Column> {
        table
            .key_columns
            .iter()
            .filter_map(|k| table.column(k))
            .collect()
    }

    fn key_predicate(table: &TableHandle, key: &RowKey) -> String {
        table
            .key_columns
            .iter()
            .zip(key.values())
            .map(|(col, value)| match value {
                KeyValue::Null => format!("{} IS NULL", quote_mysql(col)),
                _ => format!("{} = ?", quote_mysql(col)),
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn decode_row(table: &TableHandle, row: &MySqlRow) -> Result<Row> {
        let values = table
            .columns
            .iter()
            .enumerate()
            .map(|(i, col)| decode_value(&table.name, row, i, col))
            .collect::<Result<Vec<_>>>()?;
        Ok(Row::new(table.column_names(), values))
    }

    async fn fetch_rows(&self, table: &TableHandle, sql: &str, key: Option<&RowKey>) -> Result<Vec<MySqlRow>> {
        let mut query = sqlx::query(sql);
        if let Some(key) = key {
            query = bind_key(query, key);
        }
        query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(&table.name, e))
    }
}

#[async_trait]
impl RowSource for MysqlStore {
    fn db_type(&self) -> &str {
        "mysql"
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigrateError::connection(e, "pinging MySQL source"))?;
        Ok(())
    }

    async fn resolve(&self, descriptor: &TableDescriptor) -> Result<TableHandle> {
        // CAST to CHAR to sidestep information_schema collation differences.
        let query = r#"
            SELECT
                CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
                CAST(LOWER(COLUMN_TYPE) AS CHAR(255)) AS COLUMN_TYPE,
                IF(IS_NULLABLE = 'YES', 1, 0) AS is_nullable,
                IF(EXTRA LIKE '%auto_increment%', 1, 0) AS is_identity
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .bind(&self.database)
            .bind(&descriptor.name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(&descriptor.name, e))?;

        if rows.is_empty() {
            return Err(MigrateError::schema(
                &descriptor.name,
                format!("table does not exist in MySQL database {}", self.database),
            ));
        }

        let columns = rows
            .iter()
            .map(|row| {
                Ok(Column {
                    name: row.try_get("COLUMN_NAME")?,
                    data_type: row.try_get("COLUMN_TYPE")?,
                    is_nullable: row.try_get::<i64, _>("is_nullable")? == 1,
                    is_identity: row.try_get::<i64, _>("is_identity")? == 1,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| map_sqlx_error(&descriptor.name, e))?;

        let handle = TableHandle::new(descriptor, self.database.clone(), columns);
        let missing = handle.missing_key_columns();
        if !missing.is_empty() {
            return Err(MigrateError::schema(
                &descriptor.name,
                format!("key columns not found in MySQL: {}", missing.join(", ")),
            ));
        }

        debug!("Resolved MySQL table {} ({} columns)", handle.full_name(), handle.columns.len());
        Ok(handle)
    }

    async fn count(&self, table: &TableHandle) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) AS cnt FROM {}", self.table_ref(table));
        let count: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(&table.name, e))?;
        Ok(count.max(0) as u64)
    }

    async fn list_all(&self, table: &TableHandle) -> Result<Vec<Row>> {
        let order_by = table
            .key_columns
            .iter()
            .map(|k| quote_mysql(k))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            Self::select_list(&table.columns),
            self.table_ref(table),
            order_by
        );

        let rows = self.fetch_rows(table, &sql, None).await?;
        debug!("Read {} rows from MySQL table {}", rows.len(), table.name);
        rows.iter().map(|row| Self::decode_row(table, row)).collect()
    }

    async fn list_keys(&self, table: &TableHandle) -> Result<Vec<RowKey>> {
        let key_columns: Vec<Column> = Self::key_columns(table).into_iter().cloned().collect();
        let sql = format!(
            "SELECT {} FROM {}",
            Self::select_list(&key_columns),
            self.table_ref(table)
        );

        let rows = self.fetch_rows(table, &sql, None).await?;
        rows.iter()
            .map(|row| {
                key_columns
                    .iter()
                    .enumerate()
                    .map(|(i, col)| decode_value(&table.name, row, i, col).map(|v| KeyValue::from(&v)))
                    .collect::<Result<Vec<_>>>()
                    .map(RowKey)
            })
            .collect()
    }

    async fn exists(&self, table: &TableHandle, key: &RowKey) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE {} LIMIT 1",
            self.table_ref(table),
            Self::key_predicate(table, key)
        );
        Ok(!self.fetch_rows(table, &sql, Some(key)).await?.is_empty())
    }

    async fn find_by_composite_key(
        &self,
        table: &TableHandle,
        key: &RowKey,
    ) -> Result<Option<Row>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            Self::select_list(&table.columns),
            self.table_ref(table),
            Self::key_predicate(table, key)
        );
        let rows = self.fetch_rows(table, &sql, Some(key)).await?;
        rows.first().map(|row| Self::decode_row(table, row)).transpose()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Bind the non-null components of a key, in key-column order.
fn bind_key<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    key: &RowKey,
) -> Query<'q, MySql, MySqlArguments> {
    for value in key.values() {
        query = match value {
            KeyValue::Null => query,
            KeyValue::Bool(b) => query.bind(*b),
            KeyValue::Int(v) => query.bind(*v),
            KeyValue::Text(s) => query.bind(s.clone()),
            KeyValue::Bytes(b) => query.bind(b.clone()),
        };
    }
    query
}

/// Base type name of a `COLUMN_TYPE` such as `int unsigned` or `varchar(191)`.
fn base_type(column_type: &str) -> &str {
    column_type
        .split(|c: char| c == '(' || c == ' ')
        .next()
        .unwrap_or(column_type)
}

/// Decode one column of a MySQL row.
fn decode_value(table: &str, row: &MySqlRow, idx: usize, col: &Column) -> Result<SqlValue> {
    let decode_err = |e: sqlx::Error| MigrateError::Decode {
        table: table.to_string(),
        column: col.name.clone(),
        message: e.to_string(),
    };

    let raw = row.try_get_raw(idx).map_err(decode_err)?;
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }

    let column_type = col.data_type.as_str();
    let unsigned = column_type.contains("unsigned");

    let value = match base_type(column_type) {
        "tinyint" if column_type.starts_with("tinyint(1)") => {
            SqlValue::Bool(row.try_get::<bool, _>(idx).map_err(decode_err)?)
        }
        "tinyint" if unsigned => SqlValue::I16(i16::from(row.try_get::<u8, _>(idx).map_err(decode_err)?)),
        "tinyint" => SqlValue::I16(i16::from(row.try_get::<i8, _>(idx).map_err(decode_err)?)),
        "smallint" if unsigned => SqlValue::I32(i32::from(row.try_get::<u16, _>(idx).map_err(decode_err)?)),
        "smallint" => SqlValue::I16(row.try_get::<i16, _>(idx).map_err(decode_err)?),
        "mediumint" | "int" | "integer" if unsigned => {
            SqlValue::I64(i64::from(row.try_get::<u32, _>(idx).map_err(decode_err)?))
        }
        "mediumint" | "int" | "integer" => SqlValue::I32(row.try_get::<i32, _>(idx).map_err(decode_err)?),
        "bigint" if unsigned => SqlValue::U64(row.try_get::<u64, _>(idx).map_err(decode_err)?),
        "bigint" | "year" => SqlValue::I64(row.try_get::<i64, _>(idx).map_err(decode_err)?),
        "bit" if column_type == "bit(1)" => SqlValue::Bool(row.try_get::<bool, _>(idx).map_err(decode_err)?),
        "bit" => SqlValue::U64(row.try_get::<u64, _>(idx).map_err(decode_err)?),
        "float" => SqlValue::F32(row.try_get::<f32, _>(idx).map_err(decode_err)?),
        "double" | "real" => SqlValue::F64(row.try_get::<f64, _>(idx).map_err(decode_err)?),
        "decimal" | "numeric" => SqlValue::Decimal(row.try_get::<Decimal, _>(idx).map_err(decode_err)?),
        "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" => {
            SqlValue::Bytes(row.try_get::<Vec<u8>, _>(idx).map_err(decode_err)?)
        }
        "date" => SqlValue::Date(row.try_get::<NaiveDate, _>(idx).map_err(decode_err)?),
        "time" => SqlValue::Time(row.try_get::<NaiveTime, _>(idx).map_err(decode_err)?),
        "datetime" | "timestamp" => {
            SqlValue::DateTime(row.try_get::<NaiveDateTime, _>(idx).map_err(decode_err)?)
        }
        // char, varchar, text, enum, set, and json (cast to CHAR in the select list)
        _ => SqlValue::Text(row.try_get::<String, _>(idx).map_err(decode_err)?),
    };

    Ok(value)
}

/// Classify a SQLx error for the table it occurred on.
fn map_sqlx_error(table: &str, err: sqlx::Error) -> MigrateError {
    match &err {
        sqlx::Error::Database(db) => {
            if matches!(
                db.kind(),
                sqlx::error::ErrorKind::UniqueViolation
                    | sqlx::error::ErrorKind::ForeignKeyViolation
                    | sqlx::error::ErrorKind::NotNullViolation
                    | sqlx::error::ErrorKind::CheckViolation
            ) {
                return MigrateError::constraint(table, db.message());
            }
            match db.code().as_deref() {
                // ER_NO_SUCH_TABLE / ER_BAD_FIELD_ERROR
                Some("42S02") | Some("42S22") => MigrateError::schema(table, db.message()),
                _ => MigrateError::transfer(table, db.message()),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => MigrateError::Decode {
            table: table.to_string(),
            column: String::new(),
            message: err.to_string(),
        },
        sqlx::Error::ColumnNotFound(_) | sqlx::Error::RowNotFound => {
            MigrateError::schema(table, err.to_string())
        }
        _ => MigrateError::connection(err, format!("querying MySQL table {}", table)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_type() {
        assert_eq!(base_type("int unsigned"), "int");
        assert_eq!(base_type("varchar(191)"), "varchar");
        assert_eq!(base_type("enum('a','b')"), "enum");
        assert_eq!(base_type("json"), "json");
    }

    #[test]
    fn test_select_list_casts() {
        let cols = vec![
            Column::new("id", "int"),
            Column::new("meta", "json"),
            Column::new("flags", "bit(8)"),
        ];
        assert_eq!(
            MysqlStore::select_list(&cols),
            "`id`, CAST(`meta` AS CHAR) AS `meta`, CAST(`flags` AS UNSIGNED) AS `flags`"
        );
    }

    #[test]
    fn test_key_predicate_simple_key() {
        let handle = TableHandle::new(
            &TableDescriptor::simple("Lead", 0),
            "app",
            vec![Column::new("id", "int"), Column::new("name", "varchar(191)")],
        );
        assert_eq!(
            MysqlStore::key_predicate(&handle, &RowKey::single(42i64)),
            "`id` = ?"
        );
    }

    #[test]
    fn test_key_predicate_handles_null_component() {
        let desc = TableDescriptor::composite("ItemTag", ["itemId", "tagId"], 1);
        let handle = TableHandle::new(
            &desc,
            "app",
            vec![Column::new("itemId", "int"), Column::new("tagId", "int")],
        );
        let key = RowKey(vec![KeyValue::Int(1), KeyValue::Null]);
        assert_eq!(
            MysqlStore::key_predicate(&handle, &key),
            "`itemId` = ? AND `tagId` IS NULL"
        );
    }
}
