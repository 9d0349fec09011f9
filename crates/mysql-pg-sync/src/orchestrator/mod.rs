//! Migration orchestrator - main workflow coordinator.

use crate::batch::{BatchMigrator, RowFailure};
use crate::config::Config;
use crate::error::{ErrorKind, MigrateError, Result};
use crate::plan::{DiffPlanner, MigrationPlan, PlanStrategy, PlannerOptions, ResolvedTable};
use crate::registry::{TableDescriptor, TableRegistry};
use crate::sequence::{SequenceRealigner, SequenceReport};
use crate::store::{MysqlStore, PostgresStore, RowSink, RowSource};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    NotStarted,
    ConnectingSources,
    ConnectingTarget,
    MigratingTables,
    SyncingSequences,
    Completed,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::NotStarted => "not started",
            RunPhase::ConnectingSources => "connecting to source",
            RunPhase::ConnectingTarget => "connecting to target",
            RunPhase::MigratingTables => "migrating tables",
            RunPhase::SyncingSequences => "syncing sequences",
            RunPhase::Completed => "completed",
            RunPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    registry: TableRegistry,
    source: Arc<dyn RowSource>,
    target: Arc<dyn RowSink>,
    phase: RunPhase,
}

/// Per-table outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    /// Every pending row was inserted (or nothing was pending).
    Completed,
    /// Some rows were inserted, some failed.
    Partial,
    /// The table could not be processed, or every pending row failed.
    Failed,
    /// Not attempted because the run was cancelled.
    Skipped,
    /// Dry run: planned only.
    Planned,
}

/// Report for one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableMigrationReport {
    pub table: String,
    pub status: TableStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<PlanStrategy>,
    /// Rows found in the source.
    pub total_source: u64,
    /// Rows in the target before this run touched the table.
    pub total_target_before: u64,
    /// Source rows missing from the target.
    pub pending: u64,
    /// Rows inserted by this run.
    pub migrated: u64,
    /// Source rows already present in the target.
    pub skipped: u64,
    pub failures: Vec<RowFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub duration_ms: u64,
}

impl TableMigrationReport {
    fn empty(table: &str, status: TableStatus) -> Self {
        Self {
            table: table.to_string(),
            status,
            strategy: None,
            total_source: 0,
            total_target_before: 0,
            pending: 0,
            migrated: 0,
            skipped: 0,
            failures: Vec::new(),
            error: None,
            error_kind: None,
            duration_ms: 0,
        }
    }

    fn failed(table: &str, err: &MigrateError) -> Self {
        Self::with_error(table, TableStatus::Failed, err)
    }

    fn skipped(table: &str) -> Self {
        Self::with_error(table, TableStatus::Skipped, &MigrateError::Cancelled)
    }

    fn with_error(table: &str, status: TableStatus, err: &MigrateError) -> Self {
        Self {
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            ..Self::empty(table, status)
        }
    }

    fn from_plan(plan: &MigrationPlan, status: TableStatus) -> Self {
        Self {
            strategy: Some(plan.strategy),
            total_source: plan.total_source,
            total_target_before: plan.total_target_before,
            pending: plan.pending_rows.len() as u64,
            skipped: plan.already_present(),
            ..Self::empty(&plan.table, status)
        }
    }
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: "completed", "cancelled" or "dry_run".
    pub status: String,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Total tables in the run.
    pub tables_total: usize,

    /// Tables fully migrated.
    pub tables_success: usize,

    /// Tables with some failed rows.
    pub tables_partial: usize,

    /// Tables that failed.
    pub tables_failed: usize,

    /// Rows found in the source across all tables.
    pub rows_found: u64,

    /// Rows inserted into the target.
    pub rows_transferred: u64,

    /// Rows already present in the target.
    pub rows_skipped: u64,

    /// Rows that failed to insert.
    pub rows_failed: u64,

    /// Average throughput (rows/second).
    pub rows_per_second: u64,

    /// Names of tables that failed or partially failed.
    pub failed_tables: Vec<String>,

    /// Per-table reports in processing order.
    pub tables: Vec<TableMigrationReport>,

    /// Generator realignment results.
    pub sequences: Vec<SequenceReport>,

    /// Last phase the run reached.
    pub phase: RunPhase,
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Row count comparison for one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableCountCheck {
    pub table: String,
    pub source_count: u64,
    pub target_count: u64,
    pub matches: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Connectivity of both stores.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
    pub healthy: bool,
}

impl Orchestrator {
    /// Open both stores from the configuration.
    ///
    /// When the target cannot be reached the already-open source is closed
    /// before the error is returned.
    pub async fn connect(config: Config) -> Result<Self> {
        let registry = config.registry()?;

        info!("Phase: {}", RunPhase::ConnectingSources);
        let source_conns = config.migration.get_max_source_connections();
        let source = MysqlStore::connect(&config.source, source_conns)
            .await
            .map_err(|e| {
                error!("Phase: {} ({})", RunPhase::Failed, e);
                e
            })?;

        info!("Phase: {}", RunPhase::ConnectingTarget);
        let target_conns = config.migration.get_max_target_connections();
        let target = match PostgresStore::connect(&config.target, target_conns).await {
            Ok(target) => target,
            Err(e) => {
                error!("Phase: {} ({})", RunPhase::Failed, e);
                source.close().await;
                return Err(e);
            }
        };

        Ok(Self::with_stores(
            config,
            registry,
            Arc::new(source),
            Arc::new(target),
        ))
    }

    /// Build an orchestrator over already-constructed stores.
    pub fn with_stores(
        config: Config,
        registry: TableRegistry,
        source: Arc<dyn RowSource>,
        target: Arc<dyn RowSink>,
    ) -> Self {
        Self {
            config,
            registry,
            source,
            target,
            phase: RunPhase::NotStarted,
        }
    }

    /// Tables this orchestrator processes, in order.
    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    fn enter(&mut self, phase: RunPhase) {
        self.phase = phase;
        info!("Phase: {}", phase);
    }

    /// Run the migration. Both stores are closed before this returns.
    ///
    /// Only an unreachable store is an error; everything that goes wrong
    /// after both stores answered ends up in the result.
    pub async fn run(
        mut self,
        cancel: Option<CancellationToken>,
        dry_run: bool,
    ) -> Result<MigrationResult> {
        let result = self
            .run_inner(cancel.unwrap_or_else(CancellationToken::new), dry_run)
            .await;
        self.close().await;
        result
    }

    async fn run_inner(&mut self, cancel: CancellationToken, dry_run: bool) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let start = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting migration run: {}", run_id);

        self.enter(RunPhase::ConnectingSources);
        if let Err(e) = self.source.ping().await {
            self.enter(RunPhase::Failed);
            error!("Source {} is unreachable: {}", self.source.db_type(), e);
            return Err(as_connection_error(e, "connecting to source"));
        }

        self.enter(RunPhase::ConnectingTarget);
        if let Err(e) = self.target.ping().await {
            self.enter(RunPhase::Failed);
            error!("Target {} is unreachable: {}", self.target.db_type(), e);
            return Err(as_connection_error(e, "connecting to target"));
        }

        self.enter(RunPhase::MigratingTables);
        let planner = DiffPlanner::new(
            self.source.clone(),
            self.target.clone(),
            PlannerOptions {
                trust_equal_counts: self.config.migration.trust_equal_counts,
                composite_lookup_max_rows: self.config.migration.composite_lookup_max_rows,
            },
        );
        let migrator = BatchMigrator::new(
            self.target.clone(),
            self.config.migration.get_chunk_size(),
            self.config.migration.get_max_concurrent_chunks(),
        );

        let descriptors = self.registry.tables().to_vec();
        info!("Found {} tables to migrate", descriptors.len());

        let mut reports = Vec::with_capacity(descriptors.len());
        let mut cancelled = false;

        for descriptor in &descriptors {
            if cancel.is_cancelled() {
                if !cancelled {
                    warn!("Migration cancelled, remaining tables skipped");
                    cancelled = true;
                }
                reports.push(TableMigrationReport::skipped(&descriptor.name));
                continue;
            }

            let table = match self.resolve(descriptor).await {
                Ok(table) => table,
                Err(e) => {
                    warn!("{}: {}", descriptor.name, e);
                    reports.push(TableMigrationReport::failed(&descriptor.name, &e));
                    continue;
                }
            };

            let report = self
                .migrate_table(&planner, &migrator, &table, dry_run)
                .await;
            reports.push(report);
        }

        let sequences = if dry_run || !self.config.migration.sync_sequences {
            Vec::new()
        } else {
            self.enter(RunPhase::SyncingSequences);
            let reports = SequenceRealigner::new(self.target.clone())
                .realign_descriptors(&descriptors)
                .await;
            log_sequence_summary(&reports);
            reports
        };

        self.enter(RunPhase::Completed);

        let status = if cancelled {
            "cancelled"
        } else if dry_run {
            "dry_run"
        } else {
            "completed"
        };
        let result = summarize(run_id, status, started_at, start, reports, sequences, self.phase);
        info!(
            "Migration {}: {}/{} tables, {} rows migrated, {} skipped, {} failed",
            result.status,
            result.tables_success,
            result.tables_total,
            result.rows_transferred,
            result.rows_skipped,
            result.rows_failed
        );
        Ok(result)
    }

    async fn resolve(&self, descriptor: &TableDescriptor) -> Result<ResolvedTable> {
        let source = self.source.resolve(descriptor).await?;
        let target = self.target.resolve(descriptor).await?;
        Ok(ResolvedTable {
            descriptor: descriptor.clone(),
            source,
            target,
        })
    }

    async fn migrate_table(
        &self,
        planner: &DiffPlanner,
        migrator: &BatchMigrator,
        table: &ResolvedTable,
        dry_run: bool,
    ) -> TableMigrationReport {
        let start = Instant::now();
        let mut report = match self.migrate_table_inner(planner, migrator, table, dry_run).await {
            Ok(report) => report,
            Err(e) => {
                warn!("{}: table failed: {}", table.name(), e);
                TableMigrationReport::failed(table.name(), &e)
            }
        };
        report.duration_ms = start.elapsed().as_millis() as u64;
        report
    }

    async fn migrate_table_inner(
        &self,
        planner: &DiffPlanner,
        migrator: &BatchMigrator,
        table: &ResolvedTable,
        dry_run: bool,
    ) -> Result<TableMigrationReport> {
        let plan = planner.plan(table).await?;
        info!(
            "{}: found {} rows, {} already in target, {} to migrate",
            table.name(),
            plan.total_source,
            plan.already_present(),
            plan.pending_rows.len()
        );

        if dry_run {
            return Ok(TableMigrationReport::from_plan(&plan, TableStatus::Planned));
        }

        let mut report = TableMigrationReport::from_plan(&plan, TableStatus::Completed);
        let chunks = migrator.migrate(&table.target, plan.pending_rows).await?;
        for chunk in chunks {
            report.migrated += chunk.succeeded as u64;
            report.failures.extend(chunk.failed);
        }

        report.status = match (report.failures.is_empty(), report.migrated) {
            (true, _) => TableStatus::Completed,
            (false, 0) => TableStatus::Failed,
            (false, _) => TableStatus::Partial,
        };

        if report.failures.is_empty() {
            info!("{}: migrated {}", table.name(), report.migrated);
        } else {
            warn!(
                "{}: migrated {}, failed {}",
                table.name(),
                report.migrated,
                report.failures.len()
            );
        }
        Ok(report)
    }

    /// Compare source and target row counts for every table.
    pub async fn validate(&self) -> Result<Vec<TableCountCheck>> {
        let mut results = Vec::with_capacity(self.registry.len());

        for descriptor in self.registry.tables() {
            let check = match self.count_both(descriptor).await {
                Ok((source_count, target_count)) => TableCountCheck {
                    table: descriptor.name.clone(),
                    source_count,
                    target_count,
                    matches: source_count == target_count,
                    error: None,
                },
                Err(e) => TableCountCheck {
                    table: descriptor.name.clone(),
                    source_count: 0,
                    target_count: 0,
                    matches: false,
                    error: Some(e.to_string()),
                },
            };

            if check.matches {
                info!("{}: {} rows (match)", check.table, check.source_count);
            } else if let Some(ref err) = check.error {
                warn!("{}: {}", check.table, err);
            } else {
                warn!(
                    "{}: source={} target={} (MISMATCH)",
                    check.table, check.source_count, check.target_count
                );
            }
            results.push(check);
        }

        Ok(results)
    }

    async fn count_both(&self, descriptor: &TableDescriptor) -> Result<(u64, u64)> {
        let source = self.source.resolve(descriptor).await?;
        let target = self.target.resolve(descriptor).await?;
        Ok((
            self.source.count(&source).await?,
            self.target.count(&target).await?,
        ))
    }

    /// Ping both stores and report latency.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let start = Instant::now();
        let source = self.source.ping().await;
        let source_latency_ms = start.elapsed().as_millis() as u64;

        let start = Instant::now();
        let target = self.target.ping().await;
        let target_latency_ms = start.elapsed().as_millis() as u64;

        Ok(HealthCheckResult {
            source_connected: source.is_ok(),
            source_latency_ms,
            target_connected: target.is_ok(),
            target_latency_ms,
            healthy: source.is_ok() && target.is_ok(),
            source_error: source.err().map(|e| e.to_string()),
            target_error: target.err().map(|e| e.to_string()),
        })
    }

    /// Release both stores.
    pub async fn close(&self) {
        self.source.close().await;
        self.target.close().await;
    }
}

fn as_connection_error(err: MigrateError, context: &str) -> MigrateError {
    match err {
        MigrateError::Connection { .. } => err,
        other => MigrateError::connection(other, context),
    }
}

fn log_sequence_summary(reports: &[SequenceReport]) {
    let failed = reports.iter().filter(|r| r.is_failure()).count();
    if failed > 0 {
        warn!("Sequence sync finished with {} failures", failed);
    } else {
        info!("Sequence sync finished for {} generators", reports.len());
    }
}

fn summarize(
    run_id: String,
    status: &str,
    started_at: DateTime<Utc>,
    start: Instant,
    tables: Vec<TableMigrationReport>,
    sequences: Vec<SequenceReport>,
    phase: RunPhase,
) -> MigrationResult {
    let duration = start.elapsed().as_secs_f64();
    let rows_transferred: u64 = tables.iter().map(|t| t.migrated).sum();
    let rows_per_second = if duration > 0.0 {
        (rows_transferred as f64 / duration) as u64
    } else {
        0
    };

    MigrationResult {
        run_id,
        status: status.to_string(),
        duration_seconds: duration,
        started_at,
        completed_at: Utc::now(),
        tables_total: tables.len(),
        tables_success: tables
            .iter()
            .filter(|t| matches!(t.status, TableStatus::Completed | TableStatus::Planned))
            .count(),
        tables_partial: tables
            .iter()
            .filter(|t| t.status == TableStatus::Partial)
            .count(),
        tables_failed: tables
            .iter()
            .filter(|t| t.status == TableStatus::Failed)
            .count(),
        rows_found: tables.iter().map(|t| t.total_source).sum(),
        rows_transferred,
        rows_skipped: tables.iter().map(|t| t.skipped).sum(),
        rows_failed: tables.iter().map(|t| t.failures.len() as u64).sum(),
        rows_per_second,
        failed_tables: tables
            .iter()
            .filter(|t| matches!(t.status, TableStatus::Failed | TableStatus::Partial))
            .map(|t| t.table.clone())
            .collect(),
        tables,
        sequences,
        phase,
    }
}
