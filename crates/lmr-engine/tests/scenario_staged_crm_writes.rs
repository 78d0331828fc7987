//! Scenario: the pages-to-CRM phase stages writes, and never touches CRM
//! records it cannot match.
//!
//! # Invariants under test
//!
//! 1. A pages-side divergence on a pages-to-CRM pair is journaled as a
//!    staged write (in the run details and at the client), not applied:
//!    the CRM client reports writes as unsupported and the run still
//!    succeeds.
//! 2. A managed page without a matching CRM entry is skipped — the engine
//!    never creates CRM entries.
//! 3. Virtual mappings are never staged.
//! 4. No page is archived by the pages-to-CRM phase.

use std::sync::Arc;

use chrono::Utc;
use lmr_config::EngineConfig;
use lmr_crm::CrmApi;
use lmr_db::Storage;
use lmr_engine::{ActiveSet, PairRunner};
use lmr_pages::PagesApi;
use lmr_schemas::{
    CrmEntry, CrmFieldValue, DatabaseInfo, Direction, EntityKind, FieldMapping, Page,
    PropertyKind, PropertyValue, RunStatus, SyncPair, VIRTUAL_FIELD_NAME,
};
use lmr_testkit::{FakeCrm, FakePages, MemStorage};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn pages_to_crm_pair() -> SyncPair {
    SyncPair {
        id: 1,
        name: "deals".to_string(),
        list_ref: "list-1".to_string(),
        db_ref: "db-1".to_string(),
        direction: Direction::PagesToCrm,
        period_minutes: 15,
        field_mappings: vec![
            FieldMapping {
                crm_field_id: 10,
                crm_field_name: "Stage".to_string(),
                page_property: "Stage".to_string(),
                kind_hint: None,
            },
            FieldMapping {
                crm_field_id: VIRTUAL_FIELD_NAME,
                crm_field_name: "name".to_string(),
                page_property: "Name".to_string(),
                kind_hint: None,
            },
        ],
        status_filters: vec![],
        status_field_id: None,
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
            ("A_ID".to_string(), PropertyKind::RichText),
        ]
        .into_iter()
        .collect(),
    }
}

fn managed_page(page_id: &str, crm_id: i64, stage: &str, name: &str) -> Page {
    Page {
        page_id: page_id.to_string(),
        parent_db_ref: "db-1".to_string(),
        properties: [
            (
                "A_ID".to_string(),
                PropertyValue::RichText(crm_id.to_string()),
            ),
            (
                "Stage".to_string(),
                PropertyValue::Select(Some(stage.to_string())),
            ),
            ("Name".to_string(), PropertyValue::Title(name.to_string())),
        ]
        .into_iter()
        .collect(),
        last_edited_at: Utc::now(),
        archived: false,
    }
}

fn harness() -> (Arc<FakeCrm>, Arc<FakePages>, Arc<MemStorage>, PairRunner) {
    let crm = Arc::new(FakeCrm::new());
    let pages = Arc::new(FakePages::new());
    let storage = Arc::new(MemStorage::new());

    pages.add_database(deals_database());
    storage.insert_pair(pages_to_crm_pair());

    let runner = PairRunner::new(
        Arc::clone(&crm) as Arc<dyn CrmApi>,
        Arc::clone(&pages) as Arc<dyn PagesApi>,
        Arc::clone(&storage) as Arc<dyn Storage>,
        EngineConfig::default(),
        "cfg-test".to_string(),
        ActiveSet::new(),
    );
    (crm, pages, storage, runner)
}

#[tokio::test]
async fn pages_divergence_is_staged_not_applied() {
    let (crm, pages, _storage, runner) = harness();

    crm.add_entry(
        "list-1",
        CrmEntry {
            entry_id: 55,
            entity_id: 101,
            entity_kind: EntityKind::Organization,
            name: "Acme".to_string(),
            domains: vec![],
            fields: vec![CrmFieldValue {
                field_id: 10,
                value: json!({"text": "Seed"}),
            }],
            last_modified_at: Some(Utc::now()),
            organization_id: None,
        },
    );
    pages.seed_page(managed_page("PG-1", 101, "Series A", "Acme"));

    let cancel = CancellationToken::new();
    let outcome = runner.run(1, &cancel).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(outcome.counters.records_updated, 0, "nothing applied");
    assert_eq!(outcome.counters.records_archived, 0);

    // Journaled at the client boundary.
    let staged = crm.staged_writes();
    assert_eq!(staged.len(), 1);
    assert_eq!(staged[0].entry_id, 55);
    assert_eq!(staged[0].field_id, 10);
    assert_eq!(staged[0].value, json!("Series A"));

    // And in the run details, replayable later.
    let detail_writes = outcome.details["staged_writes"].as_array().unwrap();
    assert_eq!(detail_writes.len(), 1);
    assert_eq!(detail_writes[0]["field_id"], json!(10));
    assert_eq!(detail_writes[0]["value"], json!("Series A"));

    // The page itself was never written.
    assert_eq!(pages.write_count(), 0);
}

#[tokio::test]
async fn orphan_managed_page_is_skipped_never_created_in_crm() {
    let (crm, pages, storage, runner) = harness();

    // Page claims CRM id 999; no such entry exists.
    pages.seed_page(managed_page("PG-ORPHAN", 999, "Seed", "Ghost"));

    let cancel = CancellationToken::new();
    let outcome = runner.run(1, &cancel).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Success);
    assert!(crm.staged_writes().is_empty());
    assert_eq!(pages.write_count(), 0);
    assert!(!pages.page("PG-ORPHAN").unwrap().archived);
    assert_eq!(storage.history().len(), 1);
}

#[tokio::test]
async fn virtual_mappings_are_never_staged() {
    let (crm, pages, _storage, runner) = harness();

    crm.add_entry(
        "list-1",
        CrmEntry {
            entry_id: 55,
            entity_id: 101,
            entity_kind: EntityKind::Organization,
            name: "Acme".to_string(),
            domains: vec![],
            fields: vec![CrmFieldValue {
                field_id: 10,
                value: json!({"text": "Seed"}),
            }],
            last_modified_at: Some(Utc::now()),
            organization_id: None,
        },
    );
    // The title diverges from the entity name; the mapping is virtual, so
    // nothing may be staged for it.
    pages.seed_page(managed_page("PG-1", 101, "Seed", "Acme Renamed"));

    let cancel = CancellationToken::new();
    let outcome = runner.run(1, &cancel).await.unwrap();

    assert!(crm.staged_writes().is_empty());
    let detail_writes = outcome.details["staged_writes"].as_array().unwrap();
    assert!(detail_writes.is_empty());
}
