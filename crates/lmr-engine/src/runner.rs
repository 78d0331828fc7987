use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use chrono::Utc;
use futures_util::future::join_all;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lmr_config::EngineConfig;
use lmr_conflict::{detect, ConflictReport, Resolution, Timestamps};
use lmr_crm::{CrmApi, StatusFilter};
use lmr_db::{NewConflict, Storage};
use lmr_net::ApiError;
use lmr_pages::{crm_id_of, crm_id_property, PagesApi};
use lmr_schemas::{
    CrmEntry, DatabaseInfo, Page, PropertyKind, PropertyValue, RunCounters, RunStatus,
    StagedWrite, SyncPair, SyncedRecord, CRM_ID_PROPERTY, VIRTUAL_FIELD_DOMAIN,
    VIRTUAL_FIELD_ENTITY_KIND, VIRTUAL_FIELD_ENTRY_ID, VIRTUAL_FIELD_NAME, VIRTUAL_FIELD_ORG_ID,
};
use lmr_values::{fingerprint, CanonicalValue, Normalizer};

use crate::plan::{integrity_check, GuardedAction};
use crate::{ActiveSet, HistorySink, RunError};

/// Title properties that receive the entity name on page creation.
const NAME_TITLE_PROPERTIES: [&str; 2] = ["Name", "Opportunity Name"];

/// Result of one [`PairRunner::run`] invocation.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub pair_id: i64,
    pub status: RunStatus,
    pub counters: RunCounters,
    pub duration_ms: i64,
    pub error_message: Option<String>,
    pub details: Value,
    /// True when another run held the pair; nothing was appended to
    /// history.
    pub busy: bool,
}

impl RunOutcome {
    fn busy(pair_id: i64) -> Self {
        Self {
            pair_id,
            status: RunStatus::Warning,
            counters: RunCounters::default(),
            duration_ms: 0,
            error_message: Some("a run for this pair is already in flight".to_string()),
            details: Value::Null,
            busy: true,
        }
    }
}

/// Mutable state accumulated over one run.
#[derive(Default)]
struct RunState {
    counters: RunCounters,
    skipped: u32,
    record_errors: Vec<Value>,
    warnings: Vec<String>,
    staged: Vec<StagedWrite>,
    staged_seen: HashSet<(i64, i64, String)>,
    /// (entity_id, field_id) pairs already counted as conflicts this run,
    /// so the two bidirectional phases do not double-count one divergence.
    counted_conflicts: HashSet<(i64, i64)>,
}

impl RunState {
    fn record_error(&mut self, entity_id: i64, message: String) {
        warn!(entity_id, %message, "record-level failure; run continues");
        self.record_errors
            .push(json!({ "entity_id": entity_id, "error": message }));
    }

    fn stage(&mut self, write: StagedWrite) {
        let key = (write.entry_id, write.field_id, write.value.to_string());
        if self.staged_seen.insert(key) {
            self.staged.push(write);
        }
    }
}

/// What one entry's mirroring produced. Record-level failures are not a
/// variant: they surface as errors and are folded into the run details at
/// the reduce site.
enum EntryOutcome {
    Created,
    Updated,
    Skipped,
    Conflicted { entity_id: i64, fields: Vec<i64> },
}

struct EntryResult {
    outcome: EntryOutcome,
    warnings: Vec<String>,
}

/// Releases the pair's active claim when the run ends, however it ends.
struct ClaimGuard {
    active: ActiveSet,
    pair_id: i64,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.active.release(self.pair_id);
    }
}

/// Executes one sync of one SyncPair.
pub struct PairRunner {
    crm: Arc<dyn CrmApi>,
    pages: Arc<dyn PagesApi>,
    storage: Arc<dyn Storage>,
    sink: HistorySink,
    config: EngineConfig,
    config_hash: String,
    active: ActiveSet,
    #[cfg(feature = "testkit")]
    injected: std::sync::Mutex<Vec<GuardedAction>>,
}

impl PairRunner {
    pub fn new(
        crm: Arc<dyn CrmApi>,
        pages: Arc<dyn PagesApi>,
        storage: Arc<dyn Storage>,
        config: EngineConfig,
        config_hash: String,
        active: ActiveSet,
    ) -> Self {
        let sink = HistorySink::new(
            Arc::clone(&storage),
            config.duration_warn_ms,
            config.large_creation_count,
        );
        Self {
            crm,
            pages,
            storage,
            sink,
            config,
            config_hash,
            active,
            #[cfg(feature = "testkit")]
            injected: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Push a hostile action through the next run's integrity gate.
    /// Test-only seam; production builds have no way to reach it.
    #[cfg(feature = "testkit")]
    pub fn inject_action_for_test(&self, action: GuardedAction) {
        self.injected
            .lock()
            .expect("injected actions poisoned")
            .push(action);
    }

    /// Run one sync for `pair_id`. At most one run per pair may be in
    /// flight: the loser of the claim race returns a busy outcome and
    /// appends nothing to history.
    pub async fn run(
        &self,
        pair_id: i64,
        cancel: &CancellationToken,
    ) -> anyhow::Result<RunOutcome> {
        if !self.active.try_claim(pair_id) {
            debug!(pair_id, "run already in flight; returning busy");
            return Ok(RunOutcome::busy(pair_id));
        }
        let _claim = ClaimGuard {
            active: self.active.clone(),
            pair_id,
        };

        let pair = self
            .storage
            .get_sync_pair(pair_id)
            .await?
            .ok_or_else(|| anyhow!("sync pair {pair_id} not found"))?;

        let started = Instant::now();
        let mut state = RunState::default();
        let result = self.execute(&pair, cancel, &mut state).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let (status, error_message) = match &result {
            Ok(()) => {
                if state.counters.conflicts_found > 0 || !state.record_errors.is_empty() {
                    (RunStatus::Warning, None)
                } else {
                    (RunStatus::Success, None)
                }
            }
            Err(e) => (RunStatus::Error, Some(e.to_string())),
        };

        let outcome = RunOutcome {
            pair_id,
            status,
            counters: state.counters,
            duration_ms,
            error_message,
            details: json!({
                "config_hash": self.config_hash,
                "skipped": state.skipped,
                "record_errors": state.record_errors,
                "warnings": state.warnings,
                "staged_writes": state.staged,
            }),
            busy: false,
        };

        self.sink.record(&outcome).await?;

        if outcome.status != RunStatus::Error {
            self.storage
                .update_pair_last_sync(pair_id, Utc::now())
                .await?;
        }

        Ok(outcome)
    }

    async fn execute(
        &self,
        pair: &SyncPair,
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> Result<(), RunError> {
        self.check_injected()?;

        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        // Loading: live schema first, join-key property provisioned if the
        // database has never been mirrored.
        let mut db = self.pages.get_database(&pair.db_ref, cancel).await?;
        if !db.schema.contains_key(CRM_ID_PROPERTY) {
            self.pages
                .add_property(&pair.db_ref, CRM_ID_PROPERTY, PropertyKind::RichText, cancel)
                .await?;
            db.schema
                .insert(CRM_ID_PROPERTY.to_string(), PropertyKind::RichText);
        }

        let filter = self.status_filter(pair, state);
        let entries = self
            .crm
            .list_entries(&pair.list_ref, filter.as_ref(), cancel)
            .await?;
        let pages = self.pages.query_database(&db, cancel).await?;

        let mut managed: HashMap<i64, Page> = HashMap::new();
        let mut unmanaged = 0usize;
        for page in pages {
            match crm_id_of(&page) {
                Some(id) => {
                    managed.insert(id, page);
                }
                None => unmanaged += 1,
            }
        }
        debug!(
            pair_id = pair.id,
            entries = entries.len(),
            managed = managed.len(),
            unmanaged,
            "loaded both sides"
        );

        if pair.direction.mirrors_to_pages() {
            self.mirror_to_pages(pair, &db, &entries, &managed, cancel, state)
                .await?;
        }

        if pair.direction.stages_to_crm() {
            let archived_before = state.counters.records_archived;
            self.stage_to_crm(pair, &db, &entries, &managed, cancel, state)
                .await?;
            if state.counters.records_archived != archived_before {
                return Err(RunError::Integrity(
                    "pages were archived during the pages-to-CRM phase".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn check_injected(&self) -> Result<(), RunError> {
        #[cfg(feature = "testkit")]
        {
            let drained: Vec<GuardedAction> = self
                .injected
                .lock()
                .expect("injected actions poisoned")
                .drain(..)
                .collect();
            for action in &drained {
                integrity_check(action)?;
            }
        }
        Ok(())
    }

    fn status_filter(&self, pair: &SyncPair, state: &mut RunState) -> Option<StatusFilter> {
        if pair.status_filters.is_empty() {
            return None;
        }
        match pair.status_field_id {
            Some(field_id) => Some(StatusFilter::new(
                field_id,
                pair.status_filters.iter().cloned(),
            )),
            None => {
                state.warnings.push(
                    "status filters configured without a status field id; running unfiltered"
                        .to_string(),
                );
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // CRM -> pages phase
    // -----------------------------------------------------------------------

    async fn mirror_to_pages(
        &self,
        pair: &SyncPair,
        db: &DatabaseInfo,
        entries: &[CrmEntry],
        managed: &HashMap<i64, Page>,
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> Result<(), RunError> {
        // Entries are processed in CRM order, batched; within a batch the
        // per-entry work is concurrent and independent.
        for batch in entries.chunks(self.config.batch_size.max(1)) {
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }

            let results = join_all(batch.iter().map(|entry| {
                self.mirror_entry(pair, db, entry, managed.get(&entry.entity_id), cancel)
            }))
            .await;

            for (entry, result) in batch.iter().zip(results) {
                match result {
                    Ok(r) => {
                        state.warnings.extend(r.warnings);
                        self.reduce(r.outcome, state);
                    }
                    Err(e) if e.is_cancelled() => return Err(RunError::Cancelled),
                    Err(e @ RunError::Integrity(_)) => return Err(e),
                    Err(e @ RunError::Storage(_)) => return Err(e),
                    Err(e) => state.record_error(entry.entity_id, e.to_string()),
                }
            }
        }

        // Cleanup runs only after every batch finished: managed pages whose
        // CRM entry left the filtered set are archived and their join rows
        // removed. Unmanaged pages are never touched.
        if self.config.auto_archive_unmatched {
            let present: HashSet<i64> = entries.iter().map(|e| e.entity_id).collect();
            for (crm_id, page) in managed {
                if present.contains(crm_id) {
                    continue;
                }
                integrity_check(&GuardedAction::ArchivePage {
                    page_id: page.page_id.clone(),
                    managed: true,
                })?;
                match self.pages.archive_page(&page.page_id, cancel).await {
                    Ok(()) => {
                        self.storage.delete_synced_record(pair.id, *crm_id).await?;
                        state.counters.records_archived += 1;
                    }
                    Err(e) if e.is_cancelled() => return Err(RunError::Cancelled),
                    Err(e) => state.record_error(*crm_id, format!("archive failed: {e}")),
                }
            }
        }

        Ok(())
    }

    fn reduce(&self, outcome: EntryOutcome, state: &mut RunState) {
        match outcome {
            EntryOutcome::Created => state.counters.records_created += 1,
            EntryOutcome::Updated => state.counters.records_updated += 1,
            EntryOutcome::Skipped => state.skipped += 1,
            EntryOutcome::Conflicted { entity_id, fields } => {
                for field_id in fields {
                    if state.counted_conflicts.insert((entity_id, field_id)) {
                        state.counters.conflicts_found += 1;
                    }
                }
            }
        }
    }

    async fn mirror_entry(
        &self,
        pair: &SyncPair,
        db: &DatabaseInfo,
        entry: &CrmEntry,
        page: Option<&Page>,
        cancel: &CancellationToken,
    ) -> Result<EntryResult, RunError> {
        let mut warnings = Vec::new();
        let values = self.entry_values(pair, db, entry, cancel, &mut warnings).await?;
        let fp = fingerprint(&pair.field_mappings, &values);

        let existing = self
            .storage
            .get_synced_record(pair.id, entry.entity_id)
            .await?;

        // Fingerprint hit + live page: the mapped subset has not changed
        // since the last sync, nothing to do.
        if let (Some(record), Some(_)) = (existing.as_ref(), page) {
            if record.fingerprint == fp {
                return Ok(EntryResult {
                    outcome: EntryOutcome::Skipped,
                    warnings,
                });
            }
        }

        let outcome = match page {
            Some(page) => {
                self.mirror_onto_page(pair, db, entry, page, &values, &fp, cancel, &mut warnings)
                    .await?
            }
            None => {
                self.create_page_for(pair, db, entry, &values, &fp, cancel)
                    .await?
            }
        };

        Ok(EntryResult { outcome, warnings })
    }

    #[allow(clippy::too_many_arguments)]
    async fn mirror_onto_page(
        &self,
        pair: &SyncPair,
        db: &DatabaseInfo,
        entry: &CrmEntry,
        page: &Page,
        values: &BTreeMap<i64, CanonicalValue>,
        fp: &str,
        cancel: &CancellationToken,
        warnings: &mut Vec<String>,
    ) -> Result<EntryOutcome, RunError> {
        let page_values = self.page_values(pair, page, warnings);
        let ts = Timestamps {
            crm_modified_at: entry.last_modified_at,
            page_edited_at: Some(page.last_edited_at),
            last_sync_at: pair.last_sync_at,
        };
        let report = detect(pair.direction, &pair.field_mappings, values, &page_values, &ts);

        if report.has_manual() {
            let fields = self.persist_manual_conflicts(pair, entry, page, &report).await?;
            return Ok(EntryOutcome::Conflicted {
                entity_id: entry.entity_id,
                fields,
            });
        }

        let normalizer = Normalizer::new(self.config.strict_sanitization);
        let mut props: BTreeMap<String, PropertyValue> = BTreeMap::new();
        for divergence in &report.divergences {
            if divergence.resolution != Resolution::TakeCrm {
                continue;
            }
            let kind = db
                .schema
                .get(&divergence.mapping.page_property)
                .copied()
                .unwrap_or(PropertyKind::RichText);
            props.insert(
                divergence.mapping.page_property.clone(),
                normalizer.project(&divergence.crm_value, kind),
            );
        }

        if props.is_empty() {
            // Either the sides already agree, or every divergence resolved
            // toward the pages store and belongs to the staging phase. Both
            // cases are settled, so the join row must still be refreshed:
            // leaving the stale fingerprint behind would re-litigate the
            // same divergence against a later watermark as a manual
            // conflict.
            self.upsert_record(pair, entry, &page.page_id, fp, page).await?;
            return Ok(EntryOutcome::Skipped);
        }

        self.pages.update_page(&page.page_id, &props, cancel).await?;
        self.upsert_record(pair, entry, &page.page_id, fp, page).await?;
        Ok(EntryOutcome::Updated)
    }

    async fn create_page_for(
        &self,
        pair: &SyncPair,
        db: &DatabaseInfo,
        entry: &CrmEntry,
        values: &BTreeMap<i64, CanonicalValue>,
        fp: &str,
        cancel: &CancellationToken,
    ) -> Result<EntryOutcome, RunError> {
        let normalizer = Normalizer::new(self.config.strict_sanitization);
        let mut props: BTreeMap<String, PropertyValue> = BTreeMap::new();

        for mapping in &pair.field_mappings {
            let kind = db
                .schema
                .get(&mapping.page_property)
                .copied()
                .unwrap_or(PropertyKind::RichText);
            let value = values
                .get(&mapping.crm_field_id)
                .cloned()
                .unwrap_or(CanonicalValue::Empty);
            props.insert(mapping.page_property.clone(), normalizer.project(&value, kind));
        }

        // The durable join key, shaped by the live schema.
        props.insert(
            CRM_ID_PROPERTY.to_string(),
            crm_id_property(&db.schema, entry.entity_id),
        );

        // Entity name lands in the conventional title property when the
        // database declares one and no mapping already claims it.
        if let Some(title) = db.title_property() {
            if NAME_TITLE_PROPERTIES.contains(&title) && !props.contains_key(title) {
                props.insert(title.to_string(), PropertyValue::Title(entry.name.clone()));
            }
        }

        let page_id = self.pages.create_page(&pair.db_ref, &props, cancel).await?;

        let record = SyncedRecord {
            sync_pair_id: pair.id,
            crm_entity_id: entry.entity_id,
            entity_kind: entry.entity_kind,
            page_id,
            fingerprint: fp.to_string(),
            crm_modified_at: entry.last_modified_at,
            page_edited_at: Some(Utc::now()),
            last_synced_at: Utc::now(),
        };
        self.storage.upsert_synced_record(&record).await?;

        Ok(EntryOutcome::Created)
    }

    async fn upsert_record(
        &self,
        pair: &SyncPair,
        entry: &CrmEntry,
        page_id: &str,
        fp: &str,
        page: &Page,
    ) -> Result<(), RunError> {
        let record = SyncedRecord {
            sync_pair_id: pair.id,
            crm_entity_id: entry.entity_id,
            entity_kind: entry.entity_kind,
            page_id: page_id.to_string(),
            fingerprint: fp.to_string(),
            crm_modified_at: entry.last_modified_at,
            page_edited_at: Some(page.last_edited_at),
            last_synced_at: Utc::now(),
        };
        self.storage.upsert_synced_record(&record).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Pages -> CRM phase
    // -----------------------------------------------------------------------

    async fn stage_to_crm(
        &self,
        pair: &SyncPair,
        db: &DatabaseInfo,
        entries: &[CrmEntry],
        managed: &HashMap<i64, Page>,
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> Result<(), RunError> {
        let by_entity: HashMap<i64, &CrmEntry> =
            entries.iter().map(|e| (e.entity_id, e)).collect();

        for (crm_id, page) in managed {
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }

            // A managed page without a live CRM entry is an archival
            // candidate for the mirroring phase; it never becomes a CRM
            // creation.
            let Some(entry) = by_entity.get(crm_id) else {
                state.skipped += 1;
                continue;
            };

            let mut warnings = Vec::new();
            let values = match self
                .entry_values(pair, db, entry, cancel, &mut warnings)
                .await
            {
                Ok(v) => v,
                Err(e) if e.is_cancelled() => return Err(RunError::Cancelled),
                Err(e @ RunError::Storage(_)) => return Err(e),
                Err(e) => {
                    state.record_error(entry.entity_id, e.to_string());
                    continue;
                }
            };
            state.warnings.append(&mut warnings);

            let mut page_warnings = Vec::new();
            let page_values = self.page_values(pair, page, &mut page_warnings);
            state.warnings.append(&mut page_warnings);

            let ts = Timestamps {
                crm_modified_at: entry.last_modified_at,
                page_edited_at: Some(page.last_edited_at),
                last_sync_at: pair.last_sync_at,
            };
            let report = detect(pair.direction, &pair.field_mappings, &values, &page_values, &ts);

            if report.has_manual() {
                let fields = self
                    .persist_manual_conflicts(pair, entry, page, &report)
                    .await?;
                self.reduce(
                    EntryOutcome::Conflicted {
                        entity_id: entry.entity_id,
                        fields,
                    },
                    state,
                );
                continue;
            }

            // Virtual fields are entity-derived and read-only on the CRM;
            // only concrete field ids can be staged.
            let writes: Vec<StagedWrite> = report
                .divergences
                .iter()
                .filter(|d| d.resolution == Resolution::TakePages && !d.mapping.is_virtual())
                .map(|d| StagedWrite {
                    entry_id: entry.entry_id,
                    field_id: d.mapping.crm_field_id,
                    field_name: d.mapping.crm_field_name.clone(),
                    value: d.page_value.bare_json(),
                })
                .collect();

            if writes.is_empty() {
                continue;
            }

            integrity_check(&GuardedAction::StageCrmWrite {
                entry_id: entry.entry_id,
            })?;

            match self
                .crm
                .update_entry_fields(entry.entry_id, &writes, cancel)
                .await
            {
                // Applied for real by a write-capable adapter.
                Ok(()) => {}
                // The expected outcome in this generation: journaled only.
                Err(ApiError::WriteUnsupported) => {}
                Err(e) if e.is_cancelled() => return Err(RunError::Cancelled),
                Err(e) => {
                    state.record_error(entry.entity_id, format!("staged write failed: {e}"));
                    continue;
                }
            }

            for write in writes {
                state.stage(write);
            }
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    /// Canonicalized mapped field values for one entry, virtual fields
    /// included. Missing page properties are tolerated with a rich_text
    /// fallback so the fingerprint stays stable while the mapping is
    /// misconfigured.
    async fn entry_values(
        &self,
        pair: &SyncPair,
        db: &DatabaseInfo,
        entry: &CrmEntry,
        cancel: &CancellationToken,
        warnings: &mut Vec<String>,
    ) -> Result<BTreeMap<i64, CanonicalValue>, RunError> {
        let normalizer = Normalizer::new(self.config.strict_sanitization);
        let mut values = BTreeMap::new();

        for mapping in &pair.field_mappings {
            let kind = match db.schema.get(&mapping.page_property) {
                Some(k) => *k,
                None => {
                    warnings.push(format!(
                        "entity {}: mapped property '{}' missing from database schema",
                        entry.entity_id, mapping.page_property
                    ));
                    PropertyKind::RichText
                }
            };

            let raw = if mapping.is_virtual() {
                self.virtual_value(entry, mapping.crm_field_id, cancel, warnings)
                    .await?
            } else {
                entry
                    .field_value(mapping.crm_field_id)
                    .cloned()
                    .unwrap_or(Value::Null)
            };

            values.insert(
                mapping.crm_field_id,
                normalizer.canonicalize(&raw, kind, warnings),
            );
        }

        Ok(values)
    }

    /// Entity-derived values for virtual (negative) field ids.
    async fn virtual_value(
        &self,
        entry: &CrmEntry,
        field_id: i64,
        cancel: &CancellationToken,
        warnings: &mut Vec<String>,
    ) -> Result<Value, RunError> {
        let v = match field_id {
            VIRTUAL_FIELD_NAME => Value::String(entry.name.clone()),
            VIRTUAL_FIELD_DOMAIN => self.domain_value(entry, cancel, warnings).await?,
            VIRTUAL_FIELD_ENTITY_KIND => Value::String(entry.entity_kind.as_str().to_string()),
            VIRTUAL_FIELD_ENTRY_ID => Value::from(entry.entry_id),
            VIRTUAL_FIELD_ORG_ID => entry
                .organization_id
                .map(Value::from)
                .unwrap_or(Value::Null),
            other => {
                warnings.push(format!(
                    "entity {}: unknown virtual field id {other}",
                    entry.entity_id
                ));
                Value::Null
            }
        };
        Ok(v)
    }

    /// Domains straight off the entity when present; opportunities fall
    /// back to their owning organization, cached across runs.
    async fn domain_value(
        &self,
        entry: &CrmEntry,
        cancel: &CancellationToken,
        warnings: &mut Vec<String>,
    ) -> Result<Value, RunError> {
        if !entry.domains.is_empty() {
            return Ok(Value::Array(
                entry
                    .domains
                    .iter()
                    .map(|d| Value::String(d.clone()))
                    .collect(),
            ));
        }

        let Some(org_id) = entry.organization_id else {
            return Ok(Value::Null);
        };

        let cache_key = format!("org:{org_id}");
        if let Some(cached) = self.storage.get_cached_payload(&cache_key).await? {
            return Ok(cached.get("domain").cloned().unwrap_or(Value::Null));
        }

        match self.crm.get_organization(org_id, cancel).await {
            Ok(org) => {
                let payload = json!({ "name": org.name, "domain": org.domain });
                self.storage.put_cached_payload(&cache_key, &payload).await?;
                Ok(payload.get("domain").cloned().unwrap_or(Value::Null))
            }
            Err(e) if e.is_cancelled() => Err(RunError::Cancelled),
            Err(e) => {
                warnings.push(format!(
                    "entity {}: organization {org_id} enrichment failed: {e}",
                    entry.entity_id
                ));
                Ok(Value::Null)
            }
        }
    }

    /// Canonicalized page-side values for every mapping, keyed by the
    /// mapping's CRM field id so the two sides compare directly.
    fn page_values(
        &self,
        pair: &SyncPair,
        page: &Page,
        warnings: &mut Vec<String>,
    ) -> BTreeMap<i64, CanonicalValue> {
        let normalizer = Normalizer::new(self.config.strict_sanitization);
        let mut values = BTreeMap::new();

        for mapping in &pair.field_mappings {
            let canonical = match page.property(&mapping.page_property) {
                Some(pv) => normalizer.canonicalize_page(pv, warnings),
                None => CanonicalValue::Empty,
            };
            values.insert(mapping.crm_field_id, canonical);
        }

        values
    }

    /// Persist each manual divergence as a pending conflict row, skipping
    /// rows that are already pending from an earlier run. Returns the field
    /// ids involved so the caller can count them (deduplicated run-wide).
    async fn persist_manual_conflicts(
        &self,
        pair: &SyncPair,
        entry: &CrmEntry,
        page: &Page,
        report: &ConflictReport,
    ) -> Result<Vec<i64>, RunError> {
        let pending = self.storage.list_pending_conflicts(Some(pair.id)).await?;
        let mut fields = Vec::new();

        for divergence in report.manual() {
            fields.push(divergence.mapping.crm_field_id);

            let already_pending = pending.iter().any(|c| {
                c.crm_record_id == entry.entity_id
                    && c.field_name == divergence.mapping.crm_field_name
            });
            if already_pending {
                continue;
            }

            self.storage
                .create_conflict(&NewConflict {
                    sync_pair_id: pair.id,
                    crm_record_id: entry.entity_id,
                    crm_record_kind: entry.entity_kind,
                    field_name: divergence.mapping.crm_field_name.clone(),
                    crm_value: divergence.crm_value.bare_json(),
                    page_value: divergence.page_value.bare_json(),
                    crm_modified_at: entry.last_modified_at,
                    page_edited_at: Some(page.last_edited_at),
                })
                .await?;
        }

        Ok(fields)
    }
}
