//! Typed, rate-limited CRM client.
//!
//! The engine consumes the [`CrmApi`] trait; [`HttpCrmClient`] is the live
//! adapter. Every call is paced by the CRM rate limiter, wrapped in the
//! retry policy and bounded by a deadline.
//!
//! Writes are deliberately absent from this generation:
//! [`CrmApi::update_entry_fields`] journals the intent and returns
//! [`lmr_net::ApiError::WriteUnsupported`]. Nothing in this crate can
//! create or delete a CRM entry.

mod client;
mod wire;

pub use client::HttpCrmClient;
pub use wire::normalize_field_id;

use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use lmr_net::ApiError;
use lmr_schemas::{CrmEntry, CrmField, CrmList, CrmOrganization, CrmPerson, StagedWrite};

/// Server-side-or-during-pagination entry filter: keep only entries whose
/// dropdown value of `field_id` is in `values`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFilter {
    pub field_id: i64,
    pub values: BTreeSet<String>,
}

impl StatusFilter {
    pub fn new(field_id: i64, values: impl IntoIterator<Item = String>) -> Self {
        Self {
            field_id,
            values: values.into_iter().collect(),
        }
    }

    /// Does this entry's status value pass the filter?
    pub fn accepts(&self, entry: &CrmEntry) -> bool {
        match entry.field_value(self.field_id).and_then(wire::dropdown_text) {
            Some(text) => self.values.contains(&text),
            None => false,
        }
    }
}

#[async_trait]
pub trait CrmApi: Send + Sync {
    async fn list_lists(&self, cancel: &CancellationToken) -> Result<Vec<CrmList>, ApiError>;

    async fn list_fields(
        &self,
        list_ref: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CrmField>, ApiError>;

    /// Resolve the full entry set across cursor pages: finite, single-pass,
    /// in the order the CRM returns it, with no client-introduced
    /// duplicates. `filter` drops non-matching entries during pagination.
    async fn list_entries(
        &self,
        list_ref: &str,
        filter: Option<&StatusFilter>,
        cancel: &CancellationToken,
    ) -> Result<Vec<CrmEntry>, ApiError>;

    async fn get_organization(
        &self,
        id: i64,
        cancel: &CancellationToken,
    ) -> Result<CrmOrganization, ApiError>;

    async fn get_person(
        &self,
        id: i64,
        cancel: &CancellationToken,
    ) -> Result<CrmPerson, ApiError>;

    /// Journal the intended field writes, then fail with
    /// [`ApiError::WriteUnsupported`]. A future write-capable adapter
    /// implements this for real; callers must already treat the journaled
    /// intent as the durable artifact.
    async fn update_entry_fields(
        &self,
        entry_id: i64,
        writes: &[StagedWrite],
        cancel: &CancellationToken,
    ) -> Result<(), ApiError>;
}
