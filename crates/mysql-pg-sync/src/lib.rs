//! # mysql-pg-sync
//!
//! Incremental, idempotent MySQL to PostgreSQL row synchronization.
//!
//! For every table of a fixed registry, in dependency order, the library
//! finds the source rows whose identity key is absent from the target and
//! inserts them:
//!
//! - **Set difference planning** per table, keyed on simple or composite keys
//! - **Chunked inserts** with a bounded worker pool and per-row isolation
//! - **Sequence realignment** so target generators continue past copied keys
//! - **No state file**: running again resumes wherever the last run stopped
//!
//! ## Example
//!
//! ```rust,no_run
//! use mysql_pg_sync::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> mysql_pg_sync::Result<()> {
//!     let config = Config::from_env()?.with_auto_tuning();
//!     let orchestrator = Orchestrator::connect(config).await?;
//!     let result = orchestrator.run(None, false).await?;
//!     println!("Migrated {} rows", result.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod registry;
pub mod sequence;
pub mod store;

// Re-exports for convenient access
pub use batch::{BatchMigrator, ChunkResult, RowFailure};
pub use config::{Config, MigrationConfig, SourceConfig, TargetConfig};
pub use core::{Column, KeyValue, Row, RowKey, SqlValue, TableHandle};
pub use error::{ErrorKind, MigrateError, Result};
pub use orchestrator::{
    HealthCheckResult, MigrationResult, Orchestrator, RunPhase, TableCountCheck,
    TableMigrationReport, TableStatus,
};
pub use plan::{DiffPlanner, MigrationPlan, PlanStrategy, PlannerOptions, ResolvedTable};
pub use registry::{TableDescriptor, TableRegistry};
pub use sequence::{SequenceOutcome, SequenceRealigner, SequenceReport, SequenceState};
pub use store::{
    CallCounts, Generator, MemoryStore, MysqlStore, PostgresStore, RowSink, RowSource, SslMode,
};
