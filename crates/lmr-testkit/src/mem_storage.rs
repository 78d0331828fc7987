use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use lmr_db::{NewConflict, Storage};
use lmr_schemas::{Conflict, ConflictSide, ConflictStatus, HistoryEntry, SyncPair, SyncedRecord};

#[derive(Default)]
struct Inner {
    pairs: BTreeMap<i64, SyncPair>,
    records: BTreeMap<(i64, i64), SyncedRecord>,
    conflicts: BTreeMap<i64, Conflict>,
    history: Vec<HistoryEntry>,
    cache: BTreeMap<String, Value>,
    next_conflict_id: i64,
}

/// In-memory [`Storage`] with the same row semantics as the Postgres
/// implementation.
#[derive(Default)]
pub struct MemStorage {
    inner: Mutex<Inner>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_pair(&self, pair: SyncPair) {
        self.inner.lock().unwrap().pairs.insert(pair.id, pair);
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.inner.lock().unwrap().history.clone()
    }

    pub fn conflicts(&self) -> Vec<Conflict> {
        self.inner.lock().unwrap().conflicts.values().cloned().collect()
    }

    pub fn records(&self) -> Vec<SyncedRecord> {
        self.inner.lock().unwrap().records.values().cloned().collect()
    }

    pub fn record(&self, pair_id: i64, crm_entity_id: i64) -> Option<SyncedRecord> {
        self.inner
            .lock()
            .unwrap()
            .records
            .get(&(pair_id, crm_entity_id))
            .cloned()
    }

    pub fn pair(&self, id: i64) -> Option<SyncPair> {
        self.inner.lock().unwrap().pairs.get(&id).cloned()
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn get_sync_pair(&self, id: i64) -> Result<Option<SyncPair>> {
        Ok(self.inner.lock().unwrap().pairs.get(&id).cloned())
    }

    async fn list_sync_pairs(&self) -> Result<Vec<SyncPair>> {
        Ok(self.inner.lock().unwrap().pairs.values().cloned().collect())
    }

    async fn update_pair_last_sync(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        if let Some(p) = self.inner.lock().unwrap().pairs.get_mut(&id) {
            p.last_sync_at = Some(at);
        }
        Ok(())
    }

    async fn get_synced_record(
        &self,
        pair_id: i64,
        crm_entity_id: i64,
    ) -> Result<Option<SyncedRecord>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .records
            .get(&(pair_id, crm_entity_id))
            .cloned())
    }

    async fn upsert_synced_record(&self, row: &SyncedRecord) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .records
            .insert((row.sync_pair_id, row.crm_entity_id), row.clone());
        Ok(())
    }

    async fn delete_synced_record(&self, pair_id: i64, crm_entity_id: i64) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .records
            .remove(&(pair_id, crm_entity_id));
        Ok(())
    }

    async fn create_conflict(&self, row: &NewConflict) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_conflict_id += 1;
        let id = inner.next_conflict_id;
        inner.conflicts.insert(
            id,
            Conflict {
                id,
                sync_pair_id: row.sync_pair_id,
                crm_record_id: row.crm_record_id,
                crm_record_kind: row.crm_record_kind,
                field_name: row.field_name.clone(),
                crm_value: row.crm_value.clone(),
                page_value: row.page_value.clone(),
                crm_modified_at: row.crm_modified_at,
                page_edited_at: row.page_edited_at,
                status: ConflictStatus::Pending,
                resolution: None,
                resolved_at: None,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn list_conflicts(&self, pair_id: Option<i64>) -> Result<Vec<Conflict>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .conflicts
            .values()
            .filter(|c| pair_id.map(|p| c.sync_pair_id == p).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn list_pending_conflicts(&self, pair_id: Option<i64>) -> Result<Vec<Conflict>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .conflicts
            .values()
            .filter(|c| c.status == ConflictStatus::Pending)
            .filter(|c| pair_id.map(|p| c.sync_pair_id == p).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn resolve_conflict(&self, id: i64, pick: ConflictSide) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let c = inner
            .conflicts
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("conflict {id} not found"))?;
        c.status = ConflictStatus::Resolved;
        c.resolution = Some(pick);
        c.resolved_at = Some(Utc::now());
        Ok(())
    }

    async fn delete_conflict(&self, id: i64) -> Result<()> {
        self.inner.lock().unwrap().conflicts.remove(&id);
        Ok(())
    }

    async fn append_history(&self, row: &HistoryEntry) -> Result<()> {
        self.inner.lock().unwrap().history.push(row.clone());
        Ok(())
    }

    async fn get_cached_payload(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.inner.lock().unwrap().cache.get(key).cloned())
    }

    async fn put_cached_payload(&self, key: &str, payload: &Value) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .cache
            .insert(key.to_string(), payload.clone());
        Ok(())
    }
}
