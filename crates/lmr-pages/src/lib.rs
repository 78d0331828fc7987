//! Typed, rate-limited pages-store client.
//!
//! The engine consumes the [`PagesApi`] trait; [`HttpPagesClient`] is the
//! live adapter. Pages are archived, never hard-deleted; nothing in this
//! crate exposes a delete.
//!
//! The reserved join-key property ([`lmr_schemas::CRM_ID_PROPERTY`]) gets
//! dedicated helpers here because both the runner and the testkit need to
//! read and write it consistently: numeric when the live schema says
//! `number`, rich text otherwise.

mod client;
mod wire;

pub use client::HttpPagesClient;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use lmr_net::ApiError;
use lmr_schemas::{
    DatabaseInfo, Page, PropertyKind, PropertyValue, CRM_ID_PROPERTY,
};
use std::collections::BTreeMap;

/// Read the CRM entity id off a managed page. Pages without the join-key
/// property (or with an unparseable one) are unmanaged.
pub fn crm_id_of(page: &Page) -> Option<i64> {
    match page.property(CRM_ID_PROPERTY)? {
        PropertyValue::Number(Some(n)) if n.fract() == 0.0 => Some(*n as i64),
        PropertyValue::RichText(s) | PropertyValue::Title(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Build the join-key property for a page write, shaped by the live schema.
pub fn crm_id_property(schema: &BTreeMap<String, PropertyKind>, entity_id: i64) -> PropertyValue {
    match schema.get(CRM_ID_PROPERTY) {
        Some(PropertyKind::Number) => PropertyValue::Number(Some(entity_id as f64)),
        _ => PropertyValue::RichText(entity_id.to_string()),
    }
}

#[async_trait]
pub trait PagesApi: Send + Sync {
    async fn list_databases(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<DatabaseInfo>, ApiError>;

    /// Database description including the live property schema map.
    async fn get_database(
        &self,
        db_ref: &str,
        cancel: &CancellationToken,
    ) -> Result<DatabaseInfo, ApiError>;

    /// All non-archived pages across cursor pages. Takes the
    /// [`DatabaseInfo`] the caller already fetched so property decoding is
    /// directed by the live schema.
    async fn query_database(
        &self,
        db: &DatabaseInfo,
        cancel: &CancellationToken,
    ) -> Result<Vec<Page>, ApiError>;

    /// Create a page; returns its id.
    async fn create_page(
        &self,
        db_ref: &str,
        properties: &BTreeMap<String, PropertyValue>,
        cancel: &CancellationToken,
    ) -> Result<String, ApiError>;

    async fn update_page(
        &self,
        page_id: &str,
        properties: &BTreeMap<String, PropertyValue>,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError>;

    /// Archive, not delete; the page stays recoverable on the store side.
    async fn archive_page(&self, page_id: &str, cancel: &CancellationToken)
        -> Result<(), ApiError>;

    /// Schema mutation, used to provision the join-key property when a
    /// database is mirrored for the first time.
    async fn add_property(
        &self,
        db_ref: &str,
        name: &str,
        kind: PropertyKind,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn page_with(props: Vec<(&str, PropertyValue)>) -> Page {
        Page {
            page_id: "pg-1".to_string(),
            parent_db_ref: "db-1".to_string(),
            properties: props
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            last_edited_at: Utc::now(),
            archived: false,
        }
    }

    #[test]
    fn crm_id_reads_number_and_text_forms() {
        let p = page_with(vec![(CRM_ID_PROPERTY, PropertyValue::Number(Some(101.0)))]);
        assert_eq!(crm_id_of(&p), Some(101));

        let p = page_with(vec![(CRM_ID_PROPERTY, PropertyValue::RichText("101".into()))]);
        assert_eq!(crm_id_of(&p), Some(101));
    }

    #[test]
    fn pages_without_join_key_are_unmanaged() {
        let p = page_with(vec![("Stage", PropertyValue::Select(Some("Seed".into())))]);
        assert_eq!(crm_id_of(&p), None);

        let p = page_with(vec![(CRM_ID_PROPERTY, PropertyValue::RichText("imported".into()))]);
        assert_eq!(crm_id_of(&p), None);
    }

    #[test]
    fn join_key_property_follows_schema_kind() {
        let mut schema = BTreeMap::new();
        schema.insert(CRM_ID_PROPERTY.to_string(), PropertyKind::Number);
        assert_eq!(
            crm_id_property(&schema, 101),
            PropertyValue::Number(Some(101.0))
        );

        let mut schema = BTreeMap::new();
        schema.insert(CRM_ID_PROPERTY.to_string(), PropertyKind::RichText);
        assert_eq!(
            crm_id_property(&schema, 101),
            PropertyValue::RichText("101".to_string())
        );

        // Absent from the schema entirely: default to rich text.
        assert_eq!(
            crm_id_property(&BTreeMap::new(), 101),
            PropertyValue::RichText("101".to_string())
        );
    }
}
