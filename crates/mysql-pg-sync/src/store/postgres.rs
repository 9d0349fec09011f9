//! PostgreSQL row store.
//!
//! Write side of a migration. Uses deadpool-postgres for connection pooling.
//!
//! Values cross the wire as text in both directions: reads select
//! `column::text` and parse by the column's `format_type`, writes bind text
//! parameters cast to the column type (`$1::text::timestamp(3) without
//! time zone`). One encoding then covers enums, JSON, UUIDs and MySQL booleans
//! stored as `tinyint(1)`.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use rust_decimal::Decimal;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::tls::SslMode;
use super::{quote_pg, Generator, RowSink, RowSource};
use crate::config::TargetConfig;
use crate::core::{Column, KeyValue, Row, RowKey, SqlValue, TableHandle};
use crate::error::{MigrateError, Result};
use crate::registry::TableDescriptor;

/// Connection timeout for new pool connections.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgreSQL implementation of [`RowSource`] and [`RowSink`].
pub struct PostgresStore {
    pool: Pool,
    schema: String,
}

impl PostgresStore {
    /// Open a pool from configuration and verify it with a round trip.
    pub async fn connect(config: &TargetConfig, max_conns: usize) -> Result<Self> {
        let mut ssl_mode = SslMode::parse(&config.ssl_mode)?;

        let mut pg_config = match &config.url {
            Some(url) => {
                let parsed = PgConfig::from_str(url)
                    .map_err(|e| MigrateError::Config(format!("invalid PostgreSQL URL: {}", e)))?;
                // An sslmode in the URL wins over the default.
                if ssl_mode == SslMode::Disable {
                    ssl_mode = match parsed.get_ssl_mode() {
                        tokio_postgres::config::SslMode::Disable => SslMode::Disable,
                        tokio_postgres::config::SslMode::Prefer => SslMode::Preferred,
                        _ => SslMode::Require,
                    };
                }
                parsed
            }
            None => {
                let mut pg_config = PgConfig::new();
                pg_config.host(&config.host);
                pg_config.port(config.port);
                pg_config.dbname(&config.database);
                pg_config.user(&config.user);
                pg_config.password(&config.password);
                pg_config
            }
        };
        pg_config.ssl_mode(ssl_mode.to_postgres());
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = match ssl_mode.postgres_connector()? {
            Some(connector) => Manager::from_config(pg_config, connector, mgr_config),
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
            }
        };
        let pool = Pool::builder(mgr)
            .max_size(max_conns.max(1))
            .build()
            .map_err(|e| MigrateError::connection(e, "creating PostgreSQL target pool"))?;

        let store = Self {
            pool,
            schema: config.schema.clone(),
        };
        store.ping().await?;

        info!(
            "Connected to PostgreSQL target: {}:{}/{} (schema {})",
            config.host, config.port, config.database, store.schema
        );

        Ok(store)
    }

    async fn client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::connection(e, "getting PostgreSQL connection"))
    }

    fn table_ref(&self, table: &TableHandle) -> String {
        format!("{}.{}", quote_pg(&self.schema), quote_pg(&table.name))
    }

    fn text_list(columns: &[&Column]) -> String {
        columns
            .iter()
            .map(|c| format!("{}::text", quote_pg(&c.name)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn all_columns(table: &TableHandle) -> Vec<&Column> {
        table.columns.iter().collect()
    }

    fn key_columns(table: &TableHandle) -> Vec<&Column> {
        table
            .key_columns
            .iter()
            .filter_map(|k| table.column(k))
            .collect()
    }

    /// `WHERE` clause matching a key, plus the text parameters it binds.
    fn key_predicate(table: &TableHandle, key: &RowKey) -> (String, Vec<Option<String>>) {
        let mut params = Vec::new();
        let clauses = Self::key_columns(table)
            .into_iter()
            .zip(key.values())
            .map(|(col, value)| match value.to_param_text() {
                None => format!("{} IS NULL", quote_pg(&col.name)),
                Some(text) => {
                    params.push(Some(text));
                    format!("{} = ${}::text::{}", quote_pg(&col.name), params.len(), col.data_type)
                }
            })
            .collect::<Vec<_>>();
        (clauses.join(" AND "), params)
    }

    fn decode_row(table: &TableHandle, row: &tokio_postgres::Row) -> Result<Row> {
        let values = table
            .columns
            .iter()
            .enumerate()
            .map(|(i, col)| decode_text(&table.name, col, row.get::<_, Option<String>>(i)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Row::new(table.column_names(), values))
    }

    async fn query(
        &self,
        table: &TableHandle,
        sql: &str,
        params: &[Option<String>],
    ) -> Result<Vec<tokio_postgres::Row>> {
        let client = self.client().await?;
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        client
            .query(sql, &refs)
            .await
            .map_err(|e| map_pg_error(&table.name, e))
    }
}

#[async_trait]
impl RowSource for PostgresStore {
    fn db_type(&self) -> &str {
        "postgres"
    }

    async fn ping(&self) -> Result<()> {
        let client = self.client().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| MigrateError::connection(e, "pinging PostgreSQL target"))?;
        Ok(())
    }

    async fn resolve(&self, descriptor: &TableDescriptor) -> Result<TableHandle> {
        let client = self.client().await?;
        let sql = r#"
            SELECT
                a.attname::text,
                format_type(a.atttypid, a.atttypmod),
                NOT a.attnotnull,
                a.attidentity <> '' OR COALESCE(pg_get_expr(d.adbin, d.adrelid) LIKE 'nextval(%', false)
            FROM pg_attribute a
            JOIN pg_class c ON c.oid = a.attrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
            WHERE n.nspname = $1 AND c.relname = $2 AND c.relkind IN ('r', 'p')
              AND a.attnum > 0 AND NOT a.attisdropped
            ORDER BY a.attnum
        "#;

        let rows = client
            .query(sql, &[&self.schema, &descriptor.name])
            .await
            .map_err(|e| map_pg_error(&descriptor.name, e))?;

        if rows.is_empty() {
            return Err(MigrateError::schema(
                &descriptor.name,
                format!("table does not exist in PostgreSQL schema {}", self.schema),
            ));
        }

        let columns = rows
            .iter()
            .map(|r| Column {
                name: r.get(0),
                data_type: r.get(1),
                is_nullable: r.get(2),
                is_identity: r.get(3),
            })
            .collect();

        let handle = TableHandle::new(descriptor, self.schema.clone(), columns);
        let missing = handle.missing_key_columns();
        if !missing.is_empty() {
            return Err(MigrateError::schema(
                &descriptor.name,
                format!("key columns not found in PostgreSQL: {}", missing.join(", ")),
            ));
        }

        debug!("Resolved PostgreSQL table {} ({} columns)", handle.full_name(), handle.columns.len());
        Ok(handle)
    }

    async fn count(&self, table: &TableHandle) -> Result<u64> {
        let sql = format!("SELECT COUNT(*)::int8 FROM {}", self.table_ref(table));
        let rows = self.query(table, &sql, &[]).await?;
        let count: i64 = rows.first().map(|r| r.get(0)).unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    async fn list_all(&self, table: &TableHandle) -> Result<Vec<Row>> {
        let order_by = table
            .key_columns
            .iter()
            .map(|k| quote_pg(k))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            Self::text_list(&Self::all_columns(table)),
            self.table_ref(table),
            order_by
        );
        let rows = self.query(table, &sql, &[]).await?;
        rows.iter().map(|r| Self::decode_row(table, r)).collect()
    }

    async fn list_keys(&self, table: &TableHandle) -> Result<Vec<RowKey>> {
        let key_columns = Self::key_columns(table);
        let sql = format!(
            "SELECT {} FROM {}",
            Self::text_list(&key_columns),
            self.table_ref(table)
        );
        let rows = self.query(table, &sql, &[]).await?;
        rows.iter()
            .map(|r| {
                key_columns
                    .iter()
                    .enumerate()
                    .map(|(i, col)| {
                        decode_text(&table.name, col, r.get::<_, Option<String>>(i))
                            .map(|v| KeyValue::from(&v))
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(RowKey)
            })
            .collect()
    }

    async fn exists(&self, table: &TableHandle, key: &RowKey) -> Result<bool> {
        let (predicate, params) = Self::key_predicate(table, key);
        let sql = format!(
            "SELECT 1 FROM {} WHERE {} LIMIT 1",
            self.table_ref(table),
            predicate
        );
        Ok(!self.query(table, &sql, &params).await?.is_empty())
    }

    async fn find_by_composite_key(
        &self,
        table: &TableHandle,
        key: &RowKey,
    ) -> Result<Option<Row>> {
        let (predicate, params) = Self::key_predicate(table, key);
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            Self::text_list(&Self::all_columns(table)),
            self.table_ref(table),
            predicate
        );
        let rows = self.query(table, &sql, &params).await?;
        rows.first().map(|r| Self::decode_row(table, r)).transpose()
    }

    async fn close(&self) {
        self.pool.close();
    }
}

#[async_trait]
impl RowSink for PostgresStore {
    async fn insert(&self, table: &TableHandle, row: &Row) -> Result<Row> {
        let mut columns = Vec::with_capacity(row.len());
        let mut placeholders = Vec::with_capacity(row.len());
        let mut params: Vec<Option<String>> = Vec::with_capacity(row.len());

        for (name, value) in row.iter() {
            let column = table.column(name).ok_or_else(|| {
                MigrateError::schema(
                    &table.name,
                    format!("column '{}' does not exist in PostgreSQL", name),
                )
            })?;
            params.push(value.to_pg_text());
            columns.push(quote_pg(name));
            placeholders.push(format!("${}::text::{}", params.len(), column.data_type));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            self.table_ref(table),
            columns.join(", "),
            placeholders.join(", "),
            Self::text_list(&Self::all_columns(table))
        );

        let rows = self.query(table, &sql, &params).await?;
        let stored = rows
            .first()
            .ok_or_else(|| MigrateError::transfer(&table.name, "INSERT returned no row"))?;
        Self::decode_row(table, stored)
    }

    async fn list_generators(&self, table: &TableHandle) -> Result<Vec<Generator>> {
        let qualified = self.table_ref(table);
        let mut generators = Vec::new();
        let client = self.client().await?;
        for column in &table.columns {
            let row = client
                .query_one(
                    "SELECT pg_get_serial_sequence($1, $2)",
                    &[&qualified, &column.name],
                )
                .await
                .map_err(|e| map_pg_error(&table.name, e))?;
            if let Some(name) = row.get::<_, Option<String>>(0) {
                generators.push(Generator {
                    column: column.name.clone(),
                    name,
                });
            }
        }
        Ok(generators)
    }

    async fn max_value(&self, table: &TableHandle, column: &str) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT MAX({})::int8 FROM {}",
            quote_pg(column),
            self.table_ref(table)
        );
        let rows = self.query(table, &sql, &[]).await?;
        Ok(rows.first().and_then(|r| r.get::<_, Option<i64>>(0)))
    }

    async fn set_generator(&self, name: &str, next_value: i64) -> Result<()> {
        let client = self.client().await?;
        // is_called = false: the next nextval() returns exactly next_value.
        client
            .query_one("SELECT setval($1::text::regclass, $2, false)", &[&name, &next_value])
            .await
            .map_err(|e| map_pg_error(name, e))?;
        debug!("Set sequence {} to {}", name, next_value);
        Ok(())
    }
}

/// Parse PostgreSQL text output for a column of the given `format_type`.
fn decode_text(table: &str, col: &Column, text: Option<String>) -> Result<SqlValue> {
    let Some(text) = text else {
        return Ok(SqlValue::Null);
    };

    let decode_err = |message: String| MigrateError::Decode {
        table: table.to_string(),
        column: col.name.clone(),
        message,
    };

    let data_type = col.data_type.as_str();
    let base = data_type
        .split('(')
        .next()
        .unwrap_or(data_type)
        .trim()
        .trim_end_matches(" without time zone")
        .trim_end_matches(" with time zone");

    let value = match base {
        "smallint" => SqlValue::I16(text.parse::<i16>().map_err(|e| decode_err(e.to_string()))?),
        "integer" => SqlValue::I32(text.parse::<i32>().map_err(|e| decode_err(e.to_string()))?),
        "bigint" => SqlValue::I64(text.parse::<i64>().map_err(|e| decode_err(e.to_string()))?),
        "real" => SqlValue::F32(text.parse::<f32>().map_err(|e| decode_err(e.to_string()))?),
        "double precision" => SqlValue::F64(text.parse::<f64>().map_err(|e| decode_err(e.to_string()))?),
        "numeric" => SqlValue::Decimal(
            Decimal::from_str(&text).map_err(|e| decode_err(e.to_string()))?,
        ),
        "boolean" => match text.as_str() {
            "t" | "true" => SqlValue::Bool(true),
            "f" | "false" => SqlValue::Bool(false),
            other => return Err(decode_err(format!("invalid boolean '{}'", other))),
        },
        "uuid" => SqlValue::Uuid(Uuid::parse_str(&text).map_err(|e| decode_err(e.to_string()))?),
        "bytea" => {
            let hex_part = text.strip_prefix("\\x").unwrap_or(&text);
            SqlValue::Bytes(hex::decode(hex_part).map_err(|e| decode_err(e.to_string()))?)
        }
        "date" => SqlValue::Date(
            NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|e| decode_err(e.to_string()))?,
        ),
        "timestamp" if data_type.contains("with time zone") => SqlValue::DateTimeOffset(
            DateTime::parse_from_str(&format!("{}00", text), "%Y-%m-%d %H:%M:%S%.f%z")
                .or_else(|_| DateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f%:z"))
                .map_err(|e| decode_err(e.to_string()))?,
        ),
        "timestamp" => SqlValue::DateTime(
            NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f")
                .map_err(|e| decode_err(e.to_string()))?,
        ),
        "time" if !data_type.contains("with time zone") => SqlValue::Time(
            NaiveTime::parse_from_str(&text, "%H:%M:%S%.f").map_err(|e| decode_err(e.to_string()))?,
        ),
        // text, varchar, json(b), enums, arrays and anything else stay textual
        _ => SqlValue::Text(text),
    };

    Ok(value)
}

/// Classify a tokio-postgres error for the table it occurred on.
fn map_pg_error(table: &str, err: tokio_postgres::Error) -> MigrateError {
    let Some(code) = err.code() else {
        return MigrateError::connection(err, format!("querying PostgreSQL table {}", table));
    };

    let message = err
        .as_db_error()
        .map(|db| db.message().to_string())
        .unwrap_or_else(|| err.to_string());

    if *code == SqlState::UNIQUE_VIOLATION
        || *code == SqlState::FOREIGN_KEY_VIOLATION
        || *code == SqlState::NOT_NULL_VIOLATION
        || *code == SqlState::CHECK_VIOLATION
    {
        MigrateError::constraint(table, message)
    } else if *code == SqlState::UNDEFINED_TABLE || *code == SqlState::UNDEFINED_COLUMN {
        MigrateError::schema(table, message)
    } else if *code == SqlState::INVALID_TEXT_REPRESENTATION
        || *code == SqlState::DATETIME_FIELD_OVERFLOW
        || *code == SqlState::NUMERIC_VALUE_OUT_OF_RANGE
    {
        MigrateError::Decode {
            table: table.to_string(),
            column: String::new(),
            message,
        }
    } else {
        MigrateError::transfer(table, message)
    }
}
