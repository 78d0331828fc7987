use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use lmr_net::ApiError;
use lmr_pages::PagesApi;
use lmr_schemas::{DatabaseInfo, Page, PropertyKind, PropertyValue};

/// One journaled mutation against the fake store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageWrite {
    Created(String),
    Updated(String),
    Archived(String),
    PropertyAdded(String),
}

#[derive(Default)]
struct Inner {
    databases: BTreeMap<String, DatabaseInfo>,
    pages: BTreeMap<String, Page>,
    writes: Vec<PageWrite>,
    next_page_id: u64,
}

/// In-memory pages store with counter-derived page ids (`PG-000001`, …)
/// and a full write journal.
#[derive(Default)]
pub struct FakePages {
    inner: Mutex<Inner>,
}

impl FakePages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_database(&self, db: DatabaseInfo) {
        self.inner
            .lock()
            .unwrap()
            .databases
            .insert(db.db_ref.clone(), db);
    }

    /// Seed a page directly, bypassing the journal.
    pub fn seed_page(&self, page: Page) {
        let mut inner = self.inner.lock().unwrap();
        inner.next_page_id += 1;
        inner.pages.insert(page.page_id.clone(), page);
    }

    pub fn page(&self, page_id: &str) -> Option<Page> {
        self.inner.lock().unwrap().pages.get(page_id).cloned()
    }

    pub fn pages(&self) -> Vec<Page> {
        self.inner.lock().unwrap().pages.values().cloned().collect()
    }

    pub fn live_pages(&self) -> Vec<Page> {
        self.inner
            .lock()
            .unwrap()
            .pages
            .values()
            .filter(|p| !p.archived)
            .cloned()
            .collect()
    }

    pub fn writes(&self) -> Vec<PageWrite> {
        self.inner.lock().unwrap().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.inner.lock().unwrap().writes.len()
    }

    /// Pin a page's edit timestamp, for conflict-rule tests.
    pub fn set_page_edited_at(&self, page_id: &str, at: DateTime<Utc>) {
        if let Some(p) = self.inner.lock().unwrap().pages.get_mut(page_id) {
            p.last_edited_at = at;
        }
    }

    /// Overwrite one property without journaling, simulating an edit made
    /// by a human on the pages side.
    pub fn set_property(&self, page_id: &str, name: &str, value: PropertyValue, at: DateTime<Utc>) {
        if let Some(p) = self.inner.lock().unwrap().pages.get_mut(page_id) {
            p.properties.insert(name.to_string(), value);
            p.last_edited_at = at;
        }
    }
}

#[async_trait]
impl PagesApi for FakePages {
    async fn list_databases(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<Vec<DatabaseInfo>, ApiError> {
        Ok(self.inner.lock().unwrap().databases.values().cloned().collect())
    }

    async fn get_database(
        &self,
        db_ref: &str,
        _cancel: &CancellationToken,
    ) -> Result<DatabaseInfo, ApiError> {
        self.inner
            .lock()
            .unwrap()
            .databases
            .get(db_ref)
            .cloned()
            .ok_or(ApiError::Status {
                code: 404,
                message: format!("database {db_ref} not found"),
            })
    }

    async fn query_database(
        &self,
        db: &DatabaseInfo,
        _cancel: &CancellationToken,
    ) -> Result<Vec<Page>, ApiError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .pages
            .values()
            .filter(|p| p.parent_db_ref == db.db_ref && !p.archived)
            .cloned()
            .collect())
    }

    async fn create_page(
        &self,
        db_ref: &str,
        properties: &BTreeMap<String, PropertyValue>,
        _cancel: &CancellationToken,
    ) -> Result<String, ApiError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_page_id += 1;
        let page_id = format!("PG-{:06}", inner.next_page_id);

        inner.pages.insert(
            page_id.clone(),
            Page {
                page_id: page_id.clone(),
                parent_db_ref: db_ref.to_string(),
                properties: properties.clone(),
                last_edited_at: Utc::now(),
                archived: false,
            },
        );
        inner.writes.push(PageWrite::Created(page_id.clone()));
        Ok(page_id)
    }

    async fn update_page(
        &self,
        page_id: &str,
        properties: &BTreeMap<String, PropertyValue>,
        _cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(page) = inner.pages.get_mut(page_id) else {
            return Err(ApiError::Status {
                code: 404,
                message: format!("page {page_id} not found"),
            });
        };
        for (name, value) in properties {
            page.properties.insert(name.clone(), value.clone());
        }
        page.last_edited_at = Utc::now();
        inner.writes.push(PageWrite::Updated(page_id.to_string()));
        Ok(())
    }

    async fn archive_page(
        &self,
        page_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(page) = inner.pages.get_mut(page_id) else {
            return Err(ApiError::Status {
                code: 404,
                message: format!("page {page_id} not found"),
            });
        };
        page.archived = true;
        inner.writes.push(PageWrite::Archived(page_id.to_string()));
        Ok(())
    }

    async fn add_property(
        &self,
        db_ref: &str,
        name: &str,
        kind: PropertyKind,
        _cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(db) = inner.databases.get_mut(db_ref) else {
            return Err(ApiError::Status {
                code: 404,
                message: format!("database {db_ref} not found"),
            });
        };
        db.schema.insert(name.to_string(), kind);
        inner.writes.push(PageWrite::PropertyAdded(name.to_string()));
        Ok(())
    }
}
