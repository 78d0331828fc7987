//! Deterministic in-process fakes for scenario tests.
//!
//! No randomness, no network, no database: page ids come from counters,
//! every mutation is journaled so tests can assert exactly what the engine
//! did. All three fakes are `Arc`-shareable and implement the same traits
//! the live adapters do.

mod fake_crm;
mod fake_pages;
mod mem_storage;

pub use fake_crm::FakeCrm;
pub use fake_pages::{FakePages, PageWrite};
pub use mem_storage::MemStorage;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lmr_crm::{CrmApi, StatusFilter};
    use lmr_pages::PagesApi;
    use lmr_schemas::{
        CrmEntry, CrmField, CrmFieldValue, CrmList, CrmPerson, DatabaseInfo, EntityKind, Page,
        PropertyKind, PropertyValue,
    };
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn entry(entity_id: i64, status: &str) -> CrmEntry {
        CrmEntry {
            entry_id: entity_id,
            entity_id,
            entity_kind: EntityKind::Organization,
            name: format!("org-{entity_id}"),
            domains: vec![],
            fields: vec![CrmFieldValue {
                field_id: 7,
                value: json!({"text": status}),
            }],
            last_modified_at: None,
            organization_id: None,
        }
    }

    #[tokio::test]
    async fn fake_crm_serves_lists_fields_and_filtered_entries() {
        let crm = FakeCrm::new();
        let cancel = CancellationToken::new();

        crm.add_list(CrmList {
            list_ref: "list-1".to_string(),
            name: "Deals".to_string(),
            entity_kind: EntityKind::Organization,
        });
        crm.add_field(
            "list-1",
            CrmField {
                field_id: 7,
                name: "Status".to_string(),
                dropdown_options: vec!["Active".to_string(), "Churned".to_string()],
            },
        );
        crm.add_entry("list-1", entry(1, "Active"));
        crm.add_entry("list-1", entry(2, "Churned"));

        assert_eq!(crm.list_lists(&cancel).await.unwrap().len(), 1);
        assert_eq!(crm.list_fields("list-1", &cancel).await.unwrap().len(), 1);

        let filter = StatusFilter::new(7, ["Active".to_string()]);
        let filtered = crm.list_entries("list-1", Some(&filter), &cancel).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].entity_id, 1);

        let unfiltered = crm.list_entries("list-1", None, &cancel).await.unwrap();
        assert_eq!(unfiltered.len(), 2);
    }

    #[tokio::test]
    async fn fake_crm_serves_person_lookups() {
        let crm = FakeCrm::new();
        let cancel = CancellationToken::new();
        crm.add_person(CrmPerson {
            id: 3,
            name: "Ada".to_string(),
            emails: vec!["ada@example.com".to_string()],
        });

        let person = crm.get_person(3, &cancel).await.unwrap();
        assert_eq!(person.name, "Ada");
        assert!(crm.get_person(99, &cancel).await.is_err());
    }

    #[tokio::test]
    async fn fake_pages_journals_every_mutation() {
        let pages = FakePages::new();
        let cancel = CancellationToken::new();

        pages.add_database(DatabaseInfo {
            db_ref: "db-1".to_string(),
            name: "Deals".to_string(),
            schema: [("Stage".to_string(), PropertyKind::Select)]
                .into_iter()
                .collect(),
        });
        assert_eq!(pages.list_databases(&cancel).await.unwrap().len(), 1);

        let props = [(
            "Stage".to_string(),
            PropertyValue::Select(Some("Seed".to_string())),
        )]
        .into_iter()
        .collect();
        let page_id = pages.create_page("db-1", &props, &cancel).await.unwrap();
        pages.update_page(&page_id, &props, &cancel).await.unwrap();
        pages
            .add_property("db-1", "A_ID", PropertyKind::RichText, &cancel)
            .await
            .unwrap();
        pages.archive_page(&page_id, &cancel).await.unwrap();

        assert_eq!(
            pages.writes(),
            vec![
                PageWrite::Created(page_id.clone()),
                PageWrite::Updated(page_id.clone()),
                PageWrite::PropertyAdded("A_ID".to_string()),
                PageWrite::Archived(page_id.clone()),
            ]
        );

        // Archived pages disappear from queries.
        let db = pages.get_database("db-1", &cancel).await.unwrap();
        assert!(pages.query_database(&db, &cancel).await.unwrap().is_empty());
        assert!(pages.page(&page_id).unwrap().archived);
    }

    #[tokio::test]
    async fn seeded_pages_do_not_collide_with_created_ids() {
        let pages = FakePages::new();
        let cancel = CancellationToken::new();
        pages.add_database(DatabaseInfo {
            db_ref: "db-1".to_string(),
            name: "Deals".to_string(),
            schema: Default::default(),
        });

        pages.seed_page(Page {
            page_id: "PG-SEEDED".to_string(),
            parent_db_ref: "db-1".to_string(),
            properties: Default::default(),
            last_edited_at: Utc::now(),
            archived: false,
        });

        let created = pages
            .create_page("db-1", &Default::default(), &cancel)
            .await
            .unwrap();
        assert_ne!(created, "PG-SEEDED");
        assert_eq!(pages.pages().len(), 2);
    }
}
