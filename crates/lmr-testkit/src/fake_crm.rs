use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use lmr_crm::{CrmApi, StatusFilter};
use lmr_net::ApiError;
use lmr_schemas::{
    CrmEntry, CrmField, CrmFieldValue, CrmList, CrmOrganization, CrmPerson, StagedWrite,
};

/// In-memory CRM. Entries are keyed by list; writes are journaled and then
/// rejected, exactly like the live adapter.
#[derive(Default)]
pub struct FakeCrm {
    lists: Mutex<Vec<CrmList>>,
    fields: Mutex<BTreeMap<String, Vec<CrmField>>>,
    entries: Mutex<BTreeMap<String, Vec<CrmEntry>>>,
    organizations: Mutex<BTreeMap<i64, CrmOrganization>>,
    persons: Mutex<BTreeMap<i64, CrmPerson>>,
    staged: Mutex<Vec<StagedWrite>>,
    org_fetches: AtomicUsize,
    latency: Mutex<Option<std::time::Duration>>,
}

impl FakeCrm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_list(&self, list: CrmList) {
        self.lists.lock().unwrap().push(list);
    }

    pub fn add_field(&self, list_ref: &str, field: CrmField) {
        self.fields
            .lock()
            .unwrap()
            .entry(list_ref.to_string())
            .or_default()
            .push(field);
    }

    pub fn add_entry(&self, list_ref: &str, entry: CrmEntry) {
        self.entries
            .lock()
            .unwrap()
            .entry(list_ref.to_string())
            .or_default()
            .push(entry);
    }

    pub fn remove_entry(&self, list_ref: &str, entry_id: i64) {
        if let Some(list) = self.entries.lock().unwrap().get_mut(list_ref) {
            list.retain(|e| e.entry_id != entry_id);
        }
    }

    /// Overwrite one field value and bump the entity modification time.
    pub fn set_entry_field(
        &self,
        list_ref: &str,
        entry_id: i64,
        field_id: i64,
        value: Value,
        modified_at: DateTime<Utc>,
    ) {
        if let Some(list) = self.entries.lock().unwrap().get_mut(list_ref) {
            for entry in list.iter_mut().filter(|e| e.entry_id == entry_id) {
                match entry.fields.iter_mut().find(|f| f.field_id == field_id) {
                    Some(f) => f.value = value.clone(),
                    None => entry.fields.push(CrmFieldValue {
                        field_id,
                        value: value.clone(),
                    }),
                }
                entry.last_modified_at = Some(modified_at);
            }
        }
    }

    pub fn set_modified_at(&self, list_ref: &str, entry_id: i64, at: DateTime<Utc>) {
        if let Some(list) = self.entries.lock().unwrap().get_mut(list_ref) {
            for entry in list.iter_mut().filter(|e| e.entry_id == entry_id) {
                entry.last_modified_at = Some(at);
            }
        }
    }

    pub fn add_organization(&self, org: CrmOrganization) {
        self.organizations.lock().unwrap().insert(org.id, org);
    }

    pub fn add_person(&self, person: CrmPerson) {
        self.persons.lock().unwrap().insert(person.id, person);
    }

    /// Writes journaled by `update_entry_fields`.
    pub fn staged_writes(&self) -> Vec<StagedWrite> {
        self.staged.lock().unwrap().clone()
    }

    /// How many times an organization lookup hit this fake (cache misses).
    pub fn org_fetch_count(&self) -> usize {
        self.org_fetches.load(Ordering::SeqCst)
    }

    /// Delay every `list_entries` call, so tests can hold a run in flight.
    pub fn set_latency(&self, latency: std::time::Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }
}

#[async_trait]
impl CrmApi for FakeCrm {
    async fn list_lists(&self, _cancel: &CancellationToken) -> Result<Vec<CrmList>, ApiError> {
        Ok(self.lists.lock().unwrap().clone())
    }

    async fn list_fields(
        &self,
        list_ref: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<CrmField>, ApiError> {
        Ok(self
            .fields
            .lock()
            .unwrap()
            .get(list_ref)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_entries(
        &self,
        list_ref: &str,
        filter: Option<&StatusFilter>,
        _cancel: &CancellationToken,
    ) -> Result<Vec<CrmEntry>, ApiError> {
        let latency = *self.latency.lock().unwrap();
        if let Some(d) = latency {
            tokio::time::sleep(d).await;
        }

        let all = self
            .entries
            .lock()
            .unwrap()
            .get(list_ref)
            .cloned()
            .unwrap_or_default();

        Ok(match filter {
            Some(f) => all.into_iter().filter(|e| f.accepts(e)).collect(),
            None => all,
        })
    }

    async fn get_organization(
        &self,
        id: i64,
        _cancel: &CancellationToken,
    ) -> Result<CrmOrganization, ApiError> {
        self.org_fetches.fetch_add(1, Ordering::SeqCst);
        self.organizations
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(ApiError::Status {
                code: 404,
                message: format!("organization {id} not found"),
            })
    }

    async fn get_person(
        &self,
        id: i64,
        _cancel: &CancellationToken,
    ) -> Result<CrmPerson, ApiError> {
        self.persons
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(ApiError::Status {
                code: 404,
                message: format!("person {id} not found"),
            })
    }

    async fn update_entry_fields(
        &self,
        _entry_id: i64,
        writes: &[StagedWrite],
        _cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        self.staged.lock().unwrap().extend(writes.iter().cloned());
        Err(ApiError::WriteUnsupported)
    }
}
