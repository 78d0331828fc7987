//! Scenario: an entry leaving the filtered set archives its mirrored page.
//!
//! # Invariants under test
//!
//! 1. A managed page whose CRM entry no longer passes the status filter is
//!    archived in the same run and its join row deleted.
//! 2. Unmanaged pages (no join-key property) are never archived, whatever
//!    the filter says.
//! 3. With `auto_archive_unmatched` off, nothing is archived.

use std::sync::Arc;

use chrono::Utc;
use lmr_config::EngineConfig;
use lmr_crm::CrmApi;
use lmr_db::Storage;
use lmr_engine::{ActiveSet, PairRunner};
use lmr_pages::PagesApi;
use lmr_schemas::{
    CrmEntry, CrmFieldValue, DatabaseInfo, Direction, EntityKind, FieldMapping, Page,
    PropertyKind, PropertyValue, SyncPair,
};
use lmr_testkit::{FakeCrm, FakePages, MemStorage};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn filtered_pair() -> SyncPair {
    SyncPair {
        id: 1,
        name: "deals".to_string(),
        list_ref: "list-1".to_string(),
        db_ref: "db-1".to_string(),
        direction: Direction::CrmToPages,
        period_minutes: 15,
        field_mappings: vec![FieldMapping {
            crm_field_id: 10,
            crm_field_name: "Stage".to_string(),
            page_property: "Stage".to_string(),
            kind_hint: None,
        }],
        status_filters: vec!["Active".to_string()],
        status_field_id: Some(7),
        active: true,
        last_sync_at: None,
    }
}

fn deals_database() -> DatabaseInfo {
    DatabaseInfo {
        db_ref: "db-1".to_string(),
        name: "Deals".to_string(),
        schema: [
            ("Name".to_string(), PropertyKind::Title),
            ("Stage".to_string(), PropertyKind::Select),
        ]
        .into_iter()
        .collect(),
    }
}

fn active_entry() -> CrmEntry {
    CrmEntry {
        entry_id: 101,
        entity_id: 101,
        entity_kind: EntityKind::Organization,
        name: "Acme".to_string(),
        domains: vec![],
        fields: vec![
            CrmFieldValue {
                field_id: 7,
                value: json!({"text": "Active"}),
            },
            CrmFieldValue {
                field_id: 10,
                value: json!({"text": "Seed"}),
            },
        ],
        last_modified_at: Some(Utc::now()),
        organization_id: None,
    }
}

fn harness(config: EngineConfig) -> (Arc<FakeCrm>, Arc<FakePages>, Arc<MemStorage>, PairRunner) {
    let crm = Arc::new(FakeCrm::new());
    let pages = Arc::new(FakePages::new());
    let storage = Arc::new(MemStorage::new());

    pages.add_database(deals_database());
    storage.insert_pair(filtered_pair());

    let runner = PairRunner::new(
        Arc::clone(&crm) as Arc<dyn CrmApi>,
        Arc::clone(&pages) as Arc<dyn PagesApi>,
        Arc::clone(&storage) as Arc<dyn Storage>,
        config,
        "cfg-test".to_string(),
        ActiveSet::new(),
    );
    (crm, pages, storage, runner)
}

#[tokio::test]
async fn dropout_archives_page_and_deletes_join_row() {
    let (crm, pages, storage, runner) = harness(EngineConfig::default());
    crm.add_entry("list-1", active_entry());
    let cancel = CancellationToken::new();

    let first = runner.run(1, &cancel).await.unwrap();
    assert_eq!(first.counters.records_created, 1);
    let page_id = storage.record(1, 101).unwrap().page_id;

    // The entry goes inactive and disappears from the filtered set.
    crm.set_entry_field("list-1", 101, 7, json!({"text": "Inactive"}), Utc::now());

    let second = runner.run(1, &cancel).await.unwrap();

    assert_eq!(second.counters.records_archived, 1);
    assert_eq!(second.counters.records_created, 0);
    assert!(pages.page(&page_id).unwrap().archived);
    assert!(storage.record(1, 101).is_none(), "join row removed");
}

#[tokio::test]
async fn unmanaged_pages_survive_cleanup() {
    let (crm, pages, _storage, runner) = harness(EngineConfig::default());
    crm.add_entry("list-1", active_entry());

    // Hand-made page without the join-key property.
    pages.seed_page(Page {
        page_id: "PG-HAND".to_string(),
        parent_db_ref: "db-1".to_string(),
        properties: [(
            "Stage".to_string(),
            PropertyValue::Select(Some("Handwritten".to_string())),
        )]
        .into_iter()
        .collect(),
        last_edited_at: Utc::now(),
        archived: false,
    });

    let cancel = CancellationToken::new();
    runner.run(1, &cancel).await.unwrap();

    assert!(!pages.page("PG-HAND").unwrap().archived);
}

#[tokio::test]
async fn cleanup_can_be_disabled() {
    let config = EngineConfig {
        auto_archive_unmatched: false,
        ..EngineConfig::default()
    };
    let (crm, pages, storage, runner) = harness(config);
    crm.add_entry("list-1", active_entry());
    let cancel = CancellationToken::new();

    runner.run(1, &cancel).await.unwrap();
    let page_id = storage.record(1, 101).unwrap().page_id;

    crm.remove_entry("list-1", 101);
    let second = runner.run(1, &cancel).await.unwrap();

    assert_eq!(second.counters.records_archived, 0);
    assert!(!pages.page(&page_id).unwrap().archived);
}
