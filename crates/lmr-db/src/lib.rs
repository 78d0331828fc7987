//! Storage contract and its Postgres implementation.
//!
//! The engine consumes the [`Storage`] trait only; nothing above this crate
//! writes SQL. Consistency is single-row transactional — multi-step engine
//! updates are best-effort and re-checked via fingerprints on the next run.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use lmr_schemas::{
    Conflict, ConflictSide, ConflictStatus, Direction, EntityKind, HistoryEntry, RunCounters,
    RunStatus, SyncPair, SyncedRecord,
};

pub const ENV_DB_URL: &str = "LMR_DATABASE_URL";

/// A conflict row before insertion assigns its id.
#[derive(Debug, Clone)]
pub struct NewConflict {
    pub sync_pair_id: i64,
    pub crm_record_id: i64,
    pub crm_record_kind: EntityKind,
    pub field_name: String,
    pub crm_value: Value,
    pub page_value: Value,
    pub crm_modified_at: Option<DateTime<Utc>>,
    pub page_edited_at: Option<DateTime<Utc>>,
}

/// Persistence consumed by the engine. The engine never creates or deletes
/// SyncPair rows and only ever updates their `last_sync_at`.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_sync_pair(&self, id: i64) -> Result<Option<SyncPair>>;
    async fn list_sync_pairs(&self) -> Result<Vec<SyncPair>>;
    async fn update_pair_last_sync(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    async fn get_synced_record(
        &self,
        pair_id: i64,
        crm_entity_id: i64,
    ) -> Result<Option<SyncedRecord>>;
    async fn upsert_synced_record(&self, row: &SyncedRecord) -> Result<()>;
    async fn delete_synced_record(&self, pair_id: i64, crm_entity_id: i64) -> Result<()>;

    async fn create_conflict(&self, row: &NewConflict) -> Result<i64>;
    async fn list_conflicts(&self, pair_id: Option<i64>) -> Result<Vec<Conflict>>;
    async fn list_pending_conflicts(&self, pair_id: Option<i64>) -> Result<Vec<Conflict>>;
    async fn resolve_conflict(&self, id: i64, pick: ConflictSide) -> Result<()>;
    async fn delete_conflict(&self, id: i64) -> Result<()>;

    async fn append_history(&self, row: &HistoryEntry) -> Result<()>;

    async fn get_cached_payload(&self, key: &str) -> Result<Option<Value>>;
    async fn put_cached_payload(&self, key: &str, payload: &Value) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Pool helpers
// ---------------------------------------------------------------------------

/// Connect to Postgres using LMR_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Test helper used by integration tests: connect + migrate.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='sync_pair'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_sync_pair_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_sync_pair_table: bool,
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn pair_from_row(row: &sqlx::postgres::PgRow) -> Result<SyncPair> {
    let direction_raw: String = row.try_get("direction")?;
    let direction = Direction::parse(&direction_raw)
        .ok_or_else(|| anyhow!("invalid direction: {direction_raw}"))?;

    let mappings_raw: Value = row.try_get("field_mappings")?;
    let field_mappings =
        serde_json::from_value(mappings_raw).context("decode field_mappings failed")?;

    let filters_raw: Value = row.try_get("status_filters")?;
    let status_filters =
        serde_json::from_value(filters_raw).context("decode status_filters failed")?;

    let period: i32 = row.try_get("period_minutes")?;

    Ok(SyncPair {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        list_ref: row.try_get("list_ref")?,
        db_ref: row.try_get("db_ref")?,
        direction,
        period_minutes: period as u32,
        field_mappings,
        status_filters,
        status_field_id: row.try_get("status_field_id")?,
        active: row.try_get("active")?,
        last_sync_at: row.try_get("last_sync_at")?,
    })
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<SyncedRecord> {
    let kind_raw: String = row.try_get("entity_kind")?;
    let entity_kind =
        EntityKind::parse(&kind_raw).ok_or_else(|| anyhow!("invalid entity kind: {kind_raw}"))?;

    Ok(SyncedRecord {
        sync_pair_id: row.try_get("sync_pair_id")?,
        crm_entity_id: row.try_get("crm_entity_id")?,
        entity_kind,
        page_id: row.try_get("page_id")?,
        fingerprint: row.try_get("fingerprint")?,
        crm_modified_at: row.try_get("crm_modified_at")?,
        page_edited_at: row.try_get("page_edited_at")?,
        last_synced_at: row.try_get("last_synced_at")?,
    })
}

fn conflict_from_row(row: &sqlx::postgres::PgRow) -> Result<Conflict> {
    let kind_raw: String = row.try_get("crm_record_kind")?;
    let crm_record_kind =
        EntityKind::parse(&kind_raw).ok_or_else(|| anyhow!("invalid entity kind: {kind_raw}"))?;

    let status_raw: String = row.try_get("status")?;
    let status = ConflictStatus::parse(&status_raw)
        .ok_or_else(|| anyhow!("invalid conflict status: {status_raw}"))?;

    let resolution_raw: Option<String> = row.try_get("resolution")?;
    let resolution = match resolution_raw {
        Some(s) => {
            Some(ConflictSide::parse(&s).ok_or_else(|| anyhow!("invalid resolution: {s}"))?)
        }
        None => None,
    };

    Ok(Conflict {
        id: row.try_get("id")?,
        sync_pair_id: row.try_get("sync_pair_id")?,
        crm_record_id: row.try_get("crm_record_id")?,
        crm_record_kind,
        field_name: row.try_get("field_name")?,
        crm_value: row.try_get("crm_value")?,
        page_value: row.try_get("page_value")?,
        crm_modified_at: row.try_get("crm_modified_at")?,
        page_edited_at: row.try_get("page_edited_at")?,
        status,
        resolution,
        resolved_at: row.try_get("resolved_at")?,
        created_at: row.try_get("created_at")?,
    })
}

const CONFLICT_COLUMNS: &str = r#"
    id, sync_pair_id, crm_record_id, crm_record_kind, field_name,
    crm_value, page_value, crm_modified_at, page_edited_at,
    status, resolution, resolved_at, created_at
"#;

#[async_trait]
impl Storage for PgStorage {
    async fn get_sync_pair(&self, id: i64) -> Result<Option<SyncPair>> {
        let row = sqlx::query(
            r#"
            select id, name, list_ref, db_ref, direction, period_minutes,
                   field_mappings, status_filters, status_field_id, active, last_sync_at
            from sync_pair
            where id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("get_sync_pair failed")?;

        row.as_ref().map(pair_from_row).transpose()
    }

    async fn list_sync_pairs(&self) -> Result<Vec<SyncPair>> {
        let rows = sqlx::query(
            r#"
            select id, name, list_ref, db_ref, direction, period_minutes,
                   field_mappings, status_filters, status_field_id, active, last_sync_at
            from sync_pair
            order by id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("list_sync_pairs failed")?;

        rows.iter().map(pair_from_row).collect()
    }

    async fn update_pair_last_sync(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("update sync_pair set last_sync_at = $2 where id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .context("update_pair_last_sync failed")?;
        Ok(())
    }

    async fn get_synced_record(
        &self,
        pair_id: i64,
        crm_entity_id: i64,
    ) -> Result<Option<SyncedRecord>> {
        let row = sqlx::query(
            r#"
            select sync_pair_id, crm_entity_id, entity_kind, page_id, fingerprint,
                   crm_modified_at, page_edited_at, last_synced_at
            from synced_record
            where sync_pair_id = $1 and crm_entity_id = $2
            "#,
        )
        .bind(pair_id)
        .bind(crm_entity_id)
        .fetch_optional(&self.pool)
        .await
        .context("get_synced_record failed")?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn upsert_synced_record(&self, r: &SyncedRecord) -> Result<()> {
        sqlx::query(
            r#"
            insert into synced_record (
                sync_pair_id, crm_entity_id, entity_kind, page_id, fingerprint,
                crm_modified_at, page_edited_at, last_synced_at
            ) values ($1, $2, $3, $4, $5, $6, $7, $8)
            on conflict (sync_pair_id, crm_entity_id) do update set
                entity_kind = excluded.entity_kind,
                page_id = excluded.page_id,
                fingerprint = excluded.fingerprint,
                crm_modified_at = excluded.crm_modified_at,
                page_edited_at = excluded.page_edited_at,
                last_synced_at = excluded.last_synced_at
            "#,
        )
        .bind(r.sync_pair_id)
        .bind(r.crm_entity_id)
        .bind(r.entity_kind.as_str())
        .bind(&r.page_id)
        .bind(&r.fingerprint)
        .bind(r.crm_modified_at)
        .bind(r.page_edited_at)
        .bind(r.last_synced_at)
        .execute(&self.pool)
        .await
        .context("upsert_synced_record failed")?;
        Ok(())
    }

    async fn delete_synced_record(&self, pair_id: i64, crm_entity_id: i64) -> Result<()> {
        sqlx::query("delete from synced_record where sync_pair_id = $1 and crm_entity_id = $2")
            .bind(pair_id)
            .bind(crm_entity_id)
            .execute(&self.pool)
            .await
            .context("delete_synced_record failed")?;
        Ok(())
    }

    async fn create_conflict(&self, c: &NewConflict) -> Result<i64> {
        let row = sqlx::query(
            r#"
            insert into conflict (
                sync_pair_id, crm_record_id, crm_record_kind, field_name,
                crm_value, page_value, crm_modified_at, page_edited_at, status
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, 'pending')
            returning id
            "#,
        )
        .bind(c.sync_pair_id)
        .bind(c.crm_record_id)
        .bind(c.crm_record_kind.as_str())
        .bind(&c.field_name)
        .bind(&c.crm_value)
        .bind(&c.page_value)
        .bind(c.crm_modified_at)
        .bind(c.page_edited_at)
        .fetch_one(&self.pool)
        .await
        .context("create_conflict failed")?;

        Ok(row.try_get("id")?)
    }

    async fn list_conflicts(&self, pair_id: Option<i64>) -> Result<Vec<Conflict>> {
        let sql = format!(
            "select {CONFLICT_COLUMNS} from conflict \
             where ($1::bigint is null or sync_pair_id = $1) \
             order by created_at"
        );
        let rows = sqlx::query(&sql)
            .bind(pair_id)
            .fetch_all(&self.pool)
            .await
            .context("list_conflicts failed")?;

        rows.iter().map(conflict_from_row).collect()
    }

    async fn list_pending_conflicts(&self, pair_id: Option<i64>) -> Result<Vec<Conflict>> {
        let sql = format!(
            "select {CONFLICT_COLUMNS} from conflict \
             where status = 'pending' \
               and ($1::bigint is null or sync_pair_id = $1) \
             order by created_at"
        );
        let rows = sqlx::query(&sql)
            .bind(pair_id)
            .fetch_all(&self.pool)
            .await
            .context("list_pending_conflicts failed")?;

        rows.iter().map(conflict_from_row).collect()
    }

    async fn resolve_conflict(&self, id: i64, pick: ConflictSide) -> Result<()> {
        let res = sqlx::query(
            r#"
            update conflict
            set status = 'resolved', resolution = $2, resolved_at = now()
            where id = $1
            "#,
        )
        .bind(id)
        .bind(pick.as_str())
        .execute(&self.pool)
        .await
        .context("resolve_conflict failed")?;

        if res.rows_affected() == 0 {
            return Err(anyhow!("conflict {id} not found"));
        }
        Ok(())
    }

    async fn delete_conflict(&self, id: i64) -> Result<()> {
        sqlx::query("delete from conflict where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("delete_conflict failed")?;
        Ok(())
    }

    async fn append_history(&self, h: &HistoryEntry) -> Result<()> {
        sqlx::query(
            r#"
            insert into sync_history (
                sync_pair_id, status, records_created, records_updated,
                records_archived, conflicts_found, duration_ms, error_message,
                details, created_at
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(h.sync_pair_id)
        .bind(h.status.as_str())
        .bind(h.counters.records_created as i32)
        .bind(h.counters.records_updated as i32)
        .bind(h.counters.records_archived as i32)
        .bind(h.counters.conflicts_found as i32)
        .bind(h.duration_ms)
        .bind(&h.error_message)
        .bind(&h.details)
        .bind(h.created_at)
        .execute(&self.pool)
        .await
        .context("append_history failed")?;
        Ok(())
    }

    async fn get_cached_payload(&self, key: &str) -> Result<Option<Value>> {
        let row = sqlx::query("select payload from crm_field_cache where cache_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("get_cached_payload failed")?;

        Ok(row.map(|r| r.try_get("payload")).transpose()?)
    }

    async fn put_cached_payload(&self, key: &str, payload: &Value) -> Result<()> {
        sqlx::query(
            r#"
            insert into crm_field_cache (cache_key, payload, updated_at)
            values ($1, $2, now())
            on conflict (cache_key) do update set
                payload = excluded.payload,
                updated_at = now()
            "#,
        )
        .bind(key)
        .bind(payload)
        .execute(&self.pool)
        .await
        .context("put_cached_payload failed")?;
        Ok(())
    }
}

/// Fetch the most recent history rows for one pair, newest first. Used by
/// the daemon status surface; not part of the engine's [`Storage`] contract.
pub async fn recent_history(
    pool: &PgPool,
    pair_id: i64,
    limit: i64,
) -> Result<Vec<HistoryEntry>> {
    let rows = sqlx::query(
        r#"
        select sync_pair_id, status, records_created, records_updated,
               records_archived, conflicts_found, duration_ms, error_message,
               details, created_at
        from sync_history
        where sync_pair_id = $1
        order by created_at desc
        limit $2
        "#,
    )
    .bind(pair_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("recent_history failed")?;

    rows.iter()
        .map(|row| {
            let status_raw: String = row.try_get("status")?;
            let status = RunStatus::parse(&status_raw)
                .ok_or_else(|| anyhow!("invalid run status: {status_raw}"))?;
            Ok(HistoryEntry {
                sync_pair_id: row.try_get("sync_pair_id")?,
                status,
                counters: RunCounters {
                    records_created: row.try_get::<i32, _>("records_created")? as u32,
                    records_updated: row.try_get::<i32, _>("records_updated")? as u32,
                    records_archived: row.try_get::<i32, _>("records_archived")? as u32,
                    conflicts_found: row.try_get::<i32, _>("conflicts_found")? as u32,
                },
                duration_ms: row.try_get("duration_ms")?,
                error_message: row.try_get("error_message")?,
                details: row.try_get("details")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect()
}
