//! Diff planning: which source rows are missing from the target.
//!
//! Nothing is persisted between runs. Each run re-derives the pending set
//! from actual row presence, so a run interrupted at any point resumes by
//! simply running again.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::core::{Row, RowKey, TableHandle};
use crate::error::Result;
use crate::registry::TableDescriptor;
use crate::store::{extract_key, RowSink, RowSource};

/// A registry entry resolved against both stores.
#[derive(Debug, Clone)]
pub struct ResolvedTable {
    pub descriptor: TableDescriptor,
    pub source: TableHandle,
    pub target: TableHandle,
}

impl ResolvedTable {
    /// Table name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

/// How the pending set was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStrategy {
    /// Counts matched and were trusted; no rows were listed.
    FastPathEqualCounts,
    /// Source rows minus the set of target keys.
    SetDifference,
    /// One target lookup per source row (small composite-key tables).
    PointLookup,
}

/// Planner tuning.
#[derive(Debug, Clone, Copy)]
pub struct PlannerOptions {
    /// Skip listing when source and target counts are equal.
    pub trust_equal_counts: bool,
    /// Largest composite-key source table planned with point lookups.
    pub composite_lookup_max_rows: usize,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            trust_equal_counts: false,
            composite_lookup_max_rows: 1000,
        }
    }
}

/// Pending work for one table in one run.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub table: String,
    /// Source rows absent from the target, in source (key) order.
    pub pending_rows: Vec<Row>,
    pub total_source: u64,
    pub total_target_before: u64,
    pub strategy: PlanStrategy,
}

impl MigrationPlan {
    /// Source rows already present in the target.
    pub fn already_present(&self) -> u64 {
        self.total_source
            .saturating_sub(self.pending_rows.len() as u64)
    }
}

/// Computes [`MigrationPlan`]s.
pub struct DiffPlanner {
    source: Arc<dyn RowSource>,
    target: Arc<dyn RowSink>,
    options: PlannerOptions,
}

impl DiffPlanner {
    pub fn new(source: Arc<dyn RowSource>, target: Arc<dyn RowSink>, options: PlannerOptions) -> Self {
        Self {
            source,
            target,
            options,
        }
    }

    /// Plan one table.
    pub async fn plan(&self, table: &ResolvedTable) -> Result<MigrationPlan> {
        let total_source = self.source.count(&table.source).await?;
        let total_target_before = self.target.count(&table.target).await?;

        if self.options.trust_equal_counts && total_source == total_target_before {
            debug!(
                "{}: counts match ({}), skipping key comparison",
                table.name(),
                total_source
            );
            return Ok(MigrationPlan {
                table: table.name().to_string(),
                pending_rows: Vec::new(),
                total_source,
                total_target_before,
                strategy: PlanStrategy::FastPathEqualCounts,
            });
        }

        let source_rows = self.source.list_all(&table.source).await?;

        let (pending_rows, strategy) = if table.descriptor.is_composite()
            && source_rows.len() <= self.options.composite_lookup_max_rows
        {
            (self.pending_by_lookup(table, source_rows).await?, PlanStrategy::PointLookup)
        } else {
            (self.pending_by_difference(table, source_rows).await?, PlanStrategy::SetDifference)
        };

        debug!(
            "{}: {} pending of {} source rows ({:?})",
            table.name(),
            pending_rows.len(),
            total_source,
            strategy
        );

        Ok(MigrationPlan {
            table: table.name().to_string(),
            pending_rows,
            total_source,
            total_target_before,
            strategy,
        })
    }

    async fn pending_by_difference(&self, table: &ResolvedTable, rows: Vec<Row>) -> Result<Vec<Row>> {
        let present: HashSet<RowKey> = self
            .target
            .list_keys(&table.target)
            .await?
            .into_iter()
            .collect();

        let mut pending = Vec::new();
        for row in rows {
            if !present.contains(&extract_key(&table.source, &row)?) {
                pending.push(row);
            }
        }
        Ok(pending)
    }

    async fn pending_by_lookup(&self, table: &ResolvedTable, rows: Vec<Row>) -> Result<Vec<Row>> {
        let mut pending = Vec::new();
        for row in rows {
            let key = extract_key(&table.source, &row)?;
            if self
                .target
                .find_by_composite_key(&table.target, &key)
                .await?
                .is_none()
            {
                pending.push(row);
            }
        }
        Ok(pending)
    }
}
