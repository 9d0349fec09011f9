//! End-to-end runs of the orchestrator against in-memory stores.

use std::sync::Arc;

use mysql_pg_sync::{
    Config, ErrorKind, MemoryStore, Orchestrator, PlanStrategy, Row, RowKey, SequenceOutcome,
    SqlValue, TableDescriptor, TableRegistry, TableStatus,
};

fn row(pairs: &[(&str, i64)]) -> Row {
    Row::from_pairs(pairs.iter().map(|(k, v)| (*k, SqlValue::I64(*v))))
}

fn config() -> Config {
    let mut config = Config::default();
    config.migration.chunk_size = Some(5);
    config.migration.max_concurrent_chunks = Some(4);
    config
}

async fn run(
    config: Config,
    registry: &TableRegistry,
    source: &Arc<MemoryStore>,
    target: &Arc<MemoryStore>,
) -> mysql_pg_sync::MigrationResult {
    Orchestrator::with_stores(config, registry.clone(), source.clone(), target.clone())
        .run(None, false)
        .await
        .unwrap()
}

/// Company <- User, Lead <- Client, with generators on every target table.
fn crm() -> (TableRegistry, Arc<MemoryStore>, Arc<MemoryStore>) {
    // Declared out of order on purpose; the registry sorts by rank.
    let registry = TableRegistry::new(vec![
        TableDescriptor::simple("User", 1).with_references(["Company"]),
        TableDescriptor::simple("Client", 1).with_references(["Lead"]),
        TableDescriptor::simple("Company", 0),
        TableDescriptor::simple("Lead", 0),
    ])
    .unwrap();

    let source = Arc::new(MemoryStore::new("source"));
    source
        .create_table("Company", &["id"])
        .create_table("User", &["id", "companyId"])
        .create_table("Lead", &["id"])
        .create_table("Client", &["id", "leadId"])
        .seed("Company", (1..=3).map(|id| row(&[("id", id)])).collect())
        .seed(
            "User",
            (1..=10)
                .map(|id| row(&[("id", id), ("companyId", id % 3 + 1)]))
                .collect(),
        )
        .seed("Lead", vec![row(&[("id", 7)]), row(&[("id", 42)])])
        .seed("Client", vec![row(&[("id", 1), ("leadId", 42)])]);

    let target = Arc::new(MemoryStore::new("target"));
    target
        .create_table("Company", &["id"])
        .create_table("User", &["id", "companyId"])
        .create_table("Lead", &["id"])
        .create_table("Client", &["id", "leadId"])
        .add_generator("Company", "id", "Company_id_seq", 1)
        .add_generator("User", "id", "User_id_seq", 1)
        .add_generator("Lead", "id", "Lead_id_seq", 1)
        .add_generator("Client", "id", "Client_id_seq", 1)
        .add_foreign_key("User", "companyId", "Company", "id")
        .add_foreign_key("Client", "leadId", "Lead", "id");

    (registry, source, target)
}

#[tokio::test]
async fn second_run_migrates_nothing() {
    let (registry, source, target) = crm();

    let first = run(config(), &registry, &source, &target).await;
    assert_eq!(first.rows_transferred, 16);
    assert_eq!(first.rows_failed, 0);
    let after_first: Vec<Vec<Row>> = registry
        .tables()
        .iter()
        .map(|t| target.rows(&t.name))
        .collect();

    let second = run(config(), &registry, &source, &target).await;
    assert_eq!(second.rows_transferred, 0);
    assert_eq!(second.rows_skipped, 16);
    assert!(second.tables.iter().all(|t| t.status == TableStatus::Completed));
    let after_second: Vec<Vec<Row>> = registry
        .tables()
        .iter()
        .map(|t| target.rows(&t.name))
        .collect();
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn interrupted_target_is_completed_by_next_run() {
    let (registry, source, target) = crm();
    // A previous run that stopped part way through User.
    target
        .seed("Company", (1..=3).map(|id| row(&[("id", id)])).collect())
        .seed(
            "User",
            vec![row(&[("id", 1), ("companyId", 2)]), row(&[("id", 2), ("companyId", 3)])],
        );

    let result = run(config(), &registry, &source, &target).await;

    let user = result.tables.iter().find(|t| t.table == "User").unwrap();
    assert_eq!(user.total_target_before, 2);
    assert_eq!(user.migrated, 8);
    assert_eq!(user.skipped, 2);
    assert_eq!(target.row_count("User"), 10);
}

#[tokio::test]
async fn parents_are_migrated_before_children() {
    let (registry, source, target) = crm();
    let result = run(config(), &registry, &source, &target).await;

    let order: Vec<&str> = result.tables.iter().map(|t| t.table.as_str()).collect();
    assert_eq!(order, vec!["Company", "Lead", "User", "Client"]);
    // Every child insert passed its foreign key check.
    assert!(result.tables.iter().all(|t| t.failures.is_empty()));
    assert_eq!(target.row_count("User"), 10);
    assert_eq!(target.row_count("Client"), 1);
}

#[tokio::test]
async fn composite_keys_match_on_every_component() {
    let registry = TableRegistry::new(vec![
        TableDescriptor::simple("Tag", 0),
        TableDescriptor::simple("InvoiceItem", 0),
        TableDescriptor::composite("ItemTag", ["itemId", "tagId"], 1)
            .with_references(["InvoiceItem", "Tag"]),
    ])
    .unwrap();

    let source = Arc::new(MemoryStore::new("source"));
    let target = Arc::new(MemoryStore::new("target"));
    for store in [&source, &target] {
        store
            .create_table("Tag", &["id"])
            .create_table("InvoiceItem", &["id"])
            .create_table("ItemTag", &["itemId", "tagId"]);
    }
    target
        .add_foreign_key("ItemTag", "itemId", "InvoiceItem", "id")
        .add_foreign_key("ItemTag", "tagId", "Tag", "id");

    let pair = |item: i64, tag: i64| row(&[("itemId", item), ("tagId", tag)]);
    source
        .seed("Tag", (1..=2).map(|id| row(&[("id", id)])).collect())
        .seed("InvoiceItem", (1..=2).map(|id| row(&[("id", id)])).collect())
        .seed("ItemTag", vec![pair(1, 1), pair(1, 2), pair(2, 1), pair(2, 2)]);
    // (1, 2) is already there; (2, 1) must not be mistaken for it.
    target
        .seed("Tag", (1..=2).map(|id| row(&[("id", id)])).collect())
        .seed("InvoiceItem", (1..=2).map(|id| row(&[("id", id)])).collect())
        .seed("ItemTag", vec![pair(1, 2)]);

    let result = run(config(), &registry, &source, &target).await;
    let item_tag = result.tables.iter().find(|t| t.table == "ItemTag").unwrap();
    assert_eq!(item_tag.strategy, Some(PlanStrategy::PointLookup));
    assert_eq!(item_tag.migrated, 3);
    assert_eq!(item_tag.skipped, 1);
    assert_eq!(target.row_count("ItemTag"), 4);

    // Above the lookup threshold the set difference gives the same answer.
    let mut large = config();
    large.migration.composite_lookup_max_rows = 0;
    let again = run(large, &registry, &source, &target).await;
    let item_tag = again.tables.iter().find(|t| t.table == "ItemTag").unwrap();
    assert_eq!(item_tag.strategy, Some(PlanStrategy::SetDifference));
    assert_eq!(item_tag.migrated, 0);
    // No generators: reported, nothing touched.
    assert!(again
        .sequences
        .iter()
        .all(|s| s.outcome == SequenceOutcome::NoGenerator));
}

#[tokio::test]
async fn rejected_row_does_not_sink_its_chunk() {
    let registry = TableRegistry::new(vec![TableDescriptor::simple("Lead", 0)]).unwrap();
    let source = Arc::new(MemoryStore::new("source"));
    let target = Arc::new(MemoryStore::new("target"));
    source
        .create_table("Lead", &["id"])
        .seed("Lead", (1..=20).map(|id| row(&[("id", id)])).collect());
    target
        .create_table("Lead", &["id"])
        .reject_key("Lead", RowKey::single(5i64));

    let mut config = config();
    config.migration.chunk_size = Some(9);
    let result = run(config, &registry, &source, &target).await;

    assert_eq!(result.status, "completed");
    assert_eq!(result.rows_transferred, 19);
    let lead = &result.tables[0];
    assert_eq!(lead.status, TableStatus::Partial);
    assert_eq!(lead.failures.len(), 1);
    assert_eq!(lead.failures[0].key, Some(RowKey::single(5i64)));
    assert_eq!(lead.failures[0].kind, ErrorKind::Constraint);
    assert_eq!(result.failed_tables, vec!["Lead".to_string()]);
    assert_eq!(target.row_count("Lead"), 19);
}

#[tokio::test]
async fn sequences_continue_after_copied_keys() {
    let (registry, source, target) = crm();
    // Leave Company empty on both sides.
    let registry = registry
        .filter(&[], &["User".to_string()])
        .unwrap();
    let empty_source = Arc::new(MemoryStore::new("source"));
    empty_source
        .create_table("Company", &["id"])
        .create_table("Lead", &["id"])
        .create_table("Client", &["id", "leadId"])
        .seed("Lead", source.rows("Lead"))
        .seed("Client", source.rows("Client"));

    let result = run(config(), &registry, &empty_source, &target).await;

    assert_eq!(target.generator_value("Lead_id_seq"), Some(43));
    assert_eq!(target.generator_value("Client_id_seq"), Some(2));
    assert_eq!(target.generator_value("Company_id_seq"), Some(1));

    let company = result
        .sequences
        .iter()
        .find(|s| s.table == "Company")
        .unwrap();
    assert_eq!(company.outcome, SequenceOutcome::SkippedEmpty);
    let lead = result.sequences.iter().find(|s| s.table == "Lead").unwrap();
    assert_eq!(
        lead.outcome,
        SequenceOutcome::Realigned {
            current_max: 42,
            next_value: 43
        }
    );
}

#[tokio::test]
async fn sequences_realigned_when_source_table_is_missing() {
    let registry = TableRegistry::new(vec![
        TableDescriptor::simple("Company", 0),
        TableDescriptor::simple("Lead", 0),
    ])
    .unwrap();
    let source = Arc::new(MemoryStore::new("source"));
    source
        .create_table("Company", &["id"])
        .seed("Company", vec![row(&[("id", 1)])]);
    let target = Arc::new(MemoryStore::new("target"));
    target
        .create_table("Company", &["id"])
        .create_table("Lead", &["id"])
        .add_generator("Lead", "id", "Lead_id_seq", 1)
        .seed("Lead", vec![row(&[("id", 42)])]);

    let result = run(config(), &registry, &source, &target).await;

    let lead = result.tables.iter().find(|t| t.table == "Lead").unwrap();
    assert_eq!(lead.status, TableStatus::Failed);
    assert_eq!(lead.error_kind, Some(ErrorKind::Schema));
    assert_eq!(target.generator_value("Lead_id_seq"), Some(43));
    let report = result.sequences.iter().find(|s| s.table == "Lead").unwrap();
    assert_eq!(
        report.outcome,
        SequenceOutcome::Realigned {
            current_max: 42,
            next_value: 43
        }
    );
}

#[tokio::test]
async fn sequence_sync_can_be_disabled() {
    let (registry, source, target) = crm();
    let mut config = config();
    config.migration.sync_sequences = false;

    let result = run(config, &registry, &source, &target).await;
    assert!(result.sequences.is_empty());
    assert_eq!(target.generator_value("Lead_id_seq"), Some(1));
}

#[tokio::test]
async fn trusted_equal_counts_skip_listing() {
    let (registry, source, target) = crm();
    run(config(), &registry, &source, &target).await;

    let fresh_source = Arc::new(MemoryStore::new("source"));
    for table in registry.tables() {
        let columns: Vec<String> = source
            .rows(&table.name)
            .first()
            .map(|r| r.columns().to_vec())
            .unwrap_or_default();
        let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
        fresh_source
            .create_table(&table.name, &columns)
            .seed(&table.name, source.rows(&table.name));
    }

    let mut config = config();
    config.migration.trust_equal_counts = true;
    let result = run(config, &registry, &fresh_source, &target).await;

    assert_eq!(result.rows_transferred, 0);
    assert!(result
        .tables
        .iter()
        .all(|t| t.strategy == Some(PlanStrategy::FastPathEqualCounts)));
    assert_eq!(fresh_source.calls().list_all, 0);
}

#[tokio::test]
async fn unreachable_source_is_fatal() {
    let (registry, source, target) = crm();
    source.set_available(false);

    let err = Orchestrator::with_stores(config(), registry, source.clone(), target.clone())
        .run(None, false)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(err.exit_code(), 2);
    assert_eq!(target.calls().insert, 0);
    assert_eq!(target.calls().close, 1);
}

#[tokio::test]
async fn failing_table_does_not_block_later_tables() {
    let (registry, source, target) = crm();
    source.fail_reads("Lead");

    let result = run(config(), &registry, &source, &target).await;

    let lead = result.tables.iter().find(|t| t.table == "Lead").unwrap();
    assert_eq!(lead.status, TableStatus::Failed);
    assert_eq!(lead.error_kind, Some(ErrorKind::Connection));
    assert_eq!(target.row_count("User"), 10);
    // Client rows reference leads that never arrived.
    let client = result.tables.iter().find(|t| t.table == "Client").unwrap();
    assert_eq!(client.status, TableStatus::Failed);
    assert_eq!(client.failures.len(), 1);
    assert_eq!(result.status, "completed");
}
