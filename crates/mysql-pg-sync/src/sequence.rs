//! Identity generator realignment after a migration.
//!
//! Rows are copied with their source keys, which leaves target generators
//! behind the stored maximum. Each generator is moved to `max + 1` so the
//! application's next insert does not collide.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::core::TableHandle;
use crate::error::{MigrateError, Result};
use crate::registry::TableDescriptor;
use crate::store::{Generator, RowSink};

/// Observed state of one generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceState {
    pub table_name: String,
    pub generator_name: String,
    /// `None` when the table is empty.
    pub current_max: Option<i64>,
    /// Value the generator was set to, if it was touched.
    pub next_value: Option<i64>,
}

/// What happened to a table's generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SequenceOutcome {
    Realigned { current_max: i64, next_value: i64 },
    SkippedEmpty,
    NoGenerator,
    Failed { message: String },
}

/// One line of the sequence sync report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceReport {
    pub table: String,
    pub generator: Option<String>,
    #[serde(flatten)]
    pub outcome: SequenceOutcome,
}

impl SequenceReport {
    fn new(table: &str, generator: Option<&Generator>, outcome: SequenceOutcome) -> Self {
        Self {
            table: table.to_string(),
            generator: generator.map(|g| g.name.clone()),
            outcome,
        }
    }

    fn failed(table: &str, err: &MigrateError) -> Self {
        Self::new(
            table,
            None,
            SequenceOutcome::Failed {
                message: err.to_string(),
            },
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, SequenceOutcome::Failed { .. })
    }
}

/// Moves every identity generator past the largest stored value.
pub struct SequenceRealigner {
    target: Arc<dyn RowSink>,
}

impl SequenceRealigner {
    pub fn new(target: Arc<dyn RowSink>) -> Self {
        Self { target }
    }

    /// Resolve each descriptor against the target and realign it, whatever
    /// happened to the table on the source side. A table the target cannot
    /// resolve is reported as failed.
    pub async fn realign_descriptors(&self, descriptors: &[TableDescriptor]) -> Vec<SequenceReport> {
        info!("Syncing sequences for {} tables", descriptors.len());
        let mut reports = Vec::new();
        for descriptor in descriptors {
            match self.target.resolve(descriptor).await {
                Ok(table) => reports.append(&mut self.realign_or_report(&table).await),
                Err(e) => {
                    warn!("{}: sequence sync failed: {}", descriptor.name, e);
                    reports.push(SequenceReport::failed(&descriptor.name, &e));
                }
            }
        }
        reports
    }

    async fn realign_or_report(&self, table: &TableHandle) -> Vec<SequenceReport> {
        match self.realign_table(table).await {
            Ok(reports) => reports,
            Err(e) => {
                warn!("{}: sequence sync failed: {}", table.name, e);
                vec![SequenceReport::failed(&table.name, &e)]
            }
        }
    }

    /// Realign one table's generators.
    pub async fn realign_table(&self, table: &TableHandle) -> Result<Vec<SequenceReport>> {
        let generators = self.target.list_generators(table).await?;
        if generators.is_empty() {
            return Ok(vec![SequenceReport::new(
                &table.name,
                None,
                SequenceOutcome::NoGenerator,
            )]);
        }

        let mut reports = Vec::with_capacity(generators.len());
        for generator in &generators {
            let report = match self.realign_generator(table, generator).await {
                Ok(state) => match (state.current_max, state.next_value) {
                    (Some(current_max), Some(next_value)) => {
                        info!(
                            "{}: {} set to {} (max {})",
                            table.name, generator.name, next_value, current_max
                        );
                        SequenceOutcome::Realigned {
                            current_max,
                            next_value,
                        }
                    }
                    _ => {
                        info!("{}: empty, {} left unchanged", table.name, generator.name);
                        SequenceOutcome::SkippedEmpty
                    }
                },
                Err(e) => {
                    warn!("{}: failed to realign {}: {}", table.name, generator.name, e);
                    SequenceOutcome::Failed {
                        message: e.to_string(),
                    }
                }
            };
            reports.push(SequenceReport::new(&table.name, Some(generator), report));
        }
        Ok(reports)
    }

    async fn realign_generator(&self, table: &TableHandle, generator: &Generator) -> Result<SequenceState> {
        let current_max = self.target.max_value(table, &generator.column).await?;
        let next_value = match current_max {
            Some(max) => {
                let next = max.saturating_add(1);
                self.target.set_generator(&generator.name, next).await?;
                Some(next)
            }
            None => None,
        };
        Ok(SequenceState {
            table_name: table.name.clone(),
            generator_name: generator.name.clone(),
            current_max,
            next_value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Row, SqlValue};
    use crate::registry::TableDescriptor;
    use crate::store::{MemoryStore, RowSource};

    fn lead(id: i64) -> Row {
        Row::from_pairs([("id", SqlValue::I64(id)), ("name", "lead".into())])
    }

    async fn handle(store: &MemoryStore, name: &str) -> TableHandle {
        store.resolve(&TableDescriptor::simple(name, 0)).await.unwrap()
    }

    #[tokio::test]
    async fn test_realign_to_max_plus_one() {
        let target = Arc::new(MemoryStore::new("target"));
        target
            .create_table("Lead", &["id", "name"])
            .add_generator("Lead", "id", "Lead_id_seq", 1)
            .seed("Lead", vec![lead(7), lead(42), lead(3)]);

        let table = handle(&target, "Lead").await;
        let reports = SequenceRealigner::new(target.clone())
            .realign_table(&table)
            .await
            .unwrap();

        assert_eq!(
            reports,
            vec![SequenceReport {
                table: "Lead".to_string(),
                generator: Some("Lead_id_seq".to_string()),
                outcome: SequenceOutcome::Realigned {
                    current_max: 42,
                    next_value: 43
                },
            }]
        );
        assert_eq!(target.generator_value("Lead_id_seq"), Some(43));
    }

    #[tokio::test]
    async fn test_empty_table_untouched() {
        let target = Arc::new(MemoryStore::new("target"));
        target
            .create_table("Lead", &["id", "name"])
            .add_generator("Lead", "id", "Lead_id_seq", 17);

        let table = handle(&target, "Lead").await;
        let reports = SequenceRealigner::new(target.clone())
            .realign_table(&table)
            .await
            .unwrap();

        assert_eq!(reports[0].outcome, SequenceOutcome::SkippedEmpty);
        assert_eq!(target.generator_value("Lead_id_seq"), Some(17));
        assert_eq!(target.calls().set_generator, 0);
    }

    #[tokio::test]
    async fn test_table_without_generator() {
        let target = Arc::new(MemoryStore::new("target"));
        target.create_table("ItemTag", &["itemId", "tagId"]);

        let reports = SequenceRealigner::new(target.clone())
            .realign_descriptors(&[TableDescriptor::composite("ItemTag", ["itemId", "tagId"], 0)])
            .await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, SequenceOutcome::NoGenerator);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_other_tables() {
        let target = Arc::new(MemoryStore::new("target"));
        target
            .create_table("Lead", &["id", "name"])
            .add_generator("Lead", "id", "Lead_id_seq", 1)
            .seed("Lead", vec![lead(5)]);
        target
            .create_table("Client", &["id", "name"])
            .add_generator("Client", "id", "Client_id_seq", 1)
            .seed("Client", vec![lead(9)])
            .fail_reads("Client");
        target
            .create_table("Invoice", &["id", "name"])
            .add_generator("Invoice", "id", "Invoice_id_seq", 1)
            .seed("Invoice", vec![lead(12)]);

        let reports = SequenceRealigner::new(target.clone())
            .realign_descriptors(&[
                TableDescriptor::simple("Lead", 0),
                TableDescriptor::simple("Client", 0),
                TableDescriptor::simple("Invoice", 0),
            ])
            .await;

        assert_eq!(reports.len(), 3);
        assert!(!reports[0].is_failure());
        assert!(reports[1].is_failure());
        assert!(!reports[2].is_failure());
        assert_eq!(target.generator_value("Lead_id_seq"), Some(6));
        assert_eq!(target.generator_value("Client_id_seq"), Some(1));
        assert_eq!(target.generator_value("Invoice_id_seq"), Some(13));
    }

    #[tokio::test]
    async fn test_unresolvable_table_is_reported_failed() {
        let target = Arc::new(MemoryStore::new("target"));
        target
            .create_table("Lead", &["id", "name"])
            .add_generator("Lead", "id", "Lead_id_seq", 1)
            .seed("Lead", vec![lead(42)]);

        let reports = SequenceRealigner::new(target.clone())
            .realign_descriptors(&[
                TableDescriptor::simple("Gone", 0),
                TableDescriptor::simple("Lead", 1),
            ])
            .await;

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].table, "Gone");
        assert!(reports[0].is_failure());
        assert_eq!(
            reports[1].outcome,
            SequenceOutcome::Realigned {
                current_max: 42,
                next_value: 43
            }
        );
        assert_eq!(target.generator_value("Lead_id_seq"), Some(43));
    }
}
