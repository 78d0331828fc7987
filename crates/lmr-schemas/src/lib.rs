//! Shared data model for the ListMirror sync engine.
//!
//! Everything here is a plain serializable value type. No I/O, no logic
//! beyond constructors and string conversions; the behavioral crates
//! (`lmr-values`, `lmr-conflict`, `lmr-engine`) operate on these shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Reserved page property holding the CRM entity id. This is the sole
/// durable join key between a mirrored page and its CRM entry; pages
/// without it are unmanaged and never touched by cleanup.
pub const CRM_ID_PROPERTY: &str = "A_ID";

// ---------------------------------------------------------------------------
// Virtual field ids
// ---------------------------------------------------------------------------

/// Entity-derived values are addressed with negative field ids. They are
/// read-only on the CRM side and never appear on the wire.
pub const VIRTUAL_FIELD_NAME: i64 = -1;
pub const VIRTUAL_FIELD_DOMAIN: i64 = -2;
pub const VIRTUAL_FIELD_ENTITY_KIND: i64 = -3;
pub const VIRTUAL_FIELD_ENTRY_ID: i64 = -4;
pub const VIRTUAL_FIELD_ORG_ID: i64 = -5;

// ---------------------------------------------------------------------------
// SyncPair
// ---------------------------------------------------------------------------

/// Which way records flow between the CRM list and the pages database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    CrmToPages,
    PagesToCrm,
    Bidirectional,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::CrmToPages => "crm_to_pages",
            Direction::PagesToCrm => "pages_to_crm",
            Direction::Bidirectional => "bidirectional",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "crm_to_pages" => Some(Direction::CrmToPages),
            "pages_to_crm" => Some(Direction::PagesToCrm),
            "bidirectional" => Some(Direction::Bidirectional),
            _ => None,
        }
    }

    /// True when the CRM-to-pages mirroring phase runs for this direction.
    pub fn mirrors_to_pages(&self) -> bool {
        matches!(self, Direction::CrmToPages | Direction::Bidirectional)
    }

    /// True when the pages-to-CRM staging phase runs for this direction.
    pub fn stages_to_crm(&self) -> bool {
        matches!(self, Direction::PagesToCrm | Direction::Bidirectional)
    }
}

/// Declarative correspondence between one CRM field (or virtual attribute)
/// and one page property. Type hints from the UI are not authoritative; the
/// runner resolves the effective kind from the live database schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub crm_field_id: i64,
    pub crm_field_name: String,
    pub page_property: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind_hint: Option<String>,
}

impl FieldMapping {
    /// Virtual mappings read entity-derived values and are skipped when
    /// staging writes back to the CRM.
    pub fn is_virtual(&self) -> bool {
        self.crm_field_id < 0
    }
}

/// Configuration linking one CRM list to one pages database.
///
/// Rows are created and edited by the external API collaborator; the engine
/// only ever updates `last_sync_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPair {
    pub id: i64,
    pub name: String,
    pub list_ref: String,
    pub db_ref: String,
    pub direction: Direction,
    pub period_minutes: u32,
    pub field_mappings: Vec<FieldMapping>,
    /// Empty set means no status filtering.
    pub status_filters: Vec<String>,
    /// CRM field id carrying the status dropdown, when filters are set.
    pub status_field_id: Option<i64>,
    pub active: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// CRM projections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Organization,
    Opportunity,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Person => "person",
            EntityKind::Organization => "organization",
            EntityKind::Opportunity => "opportunity",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "person" => Some(EntityKind::Person),
            "organization" => Some(EntityKind::Organization),
            "opportunity" => Some(EntityKind::Opportunity),
            _ => None,
        }
    }
}

/// One raw field value as the CRM returns it: bare scalar, `{text: …}`
/// object, or an array of either. Interpretation happens in `lmr-values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrmFieldValue {
    pub field_id: i64,
    pub value: Value,
}

/// Read-only projection of one list entry plus its entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmEntry {
    pub entry_id: i64,
    pub entity_id: i64,
    pub entity_kind: EntityKind,
    pub name: String,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub fields: Vec<CrmFieldValue>,
    /// Entity-level modification time; the CRM does not expose per-field
    /// timestamps.
    pub last_modified_at: Option<DateTime<Utc>>,
    /// Owning organization for opportunity entries, when known.
    pub organization_id: Option<i64>,
}

impl CrmEntry {
    pub fn field_value(&self, field_id: i64) -> Option<&Value> {
        self.fields
            .iter()
            .find(|f| f.field_id == field_id)
            .map(|f| &f.value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmList {
    pub list_ref: String,
    pub name: String,
    pub entity_kind: EntityKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmField {
    pub field_id: i64,
    pub name: String,
    #[serde(default)]
    pub dropdown_options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmOrganization {
    pub id: i64,
    pub name: String,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmPerson {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub emails: Vec<String>,
}

// ---------------------------------------------------------------------------
// Pages projections
// ---------------------------------------------------------------------------

/// Property kind as declared by the live database schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Title,
    RichText,
    Number,
    Select,
    MultiSelect,
    Date,
    Checkbox,
    Email,
    Url,
    Phone,
    /// Anything the engine does not model; projected as rich text.
    Unknown,
}

impl PropertyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyKind::Title => "title",
            PropertyKind::RichText => "rich_text",
            PropertyKind::Number => "number",
            PropertyKind::Select => "select",
            PropertyKind::MultiSelect => "multi_select",
            PropertyKind::Date => "date",
            PropertyKind::Checkbox => "checkbox",
            PropertyKind::Email => "email",
            PropertyKind::Url => "url",
            PropertyKind::Phone => "phone",
            PropertyKind::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "title" => PropertyKind::Title,
            "rich_text" => PropertyKind::RichText,
            "number" => PropertyKind::Number,
            "select" => PropertyKind::Select,
            "multi_select" => PropertyKind::MultiSelect,
            "date" => PropertyKind::Date,
            "checkbox" => PropertyKind::Checkbox,
            "email" => PropertyKind::Email,
            "url" => PropertyKind::Url,
            "phone" => PropertyKind::Phone,
            _ => PropertyKind::Unknown,
        }
    }
}

/// Typed page property value. Absent inner values model the cleared state;
/// a property missing from the map entirely is equivalent to `Empty` after
/// canonicalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Title(String),
    RichText(String),
    Number(Option<f64>),
    Select(Option<String>),
    MultiSelect(Vec<String>),
    Date(Option<String>),
    Checkbox(bool),
    Email(Option<String>),
    Url(Option<String>),
    Phone(Option<String>),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Title(_) => PropertyKind::Title,
            PropertyValue::RichText(_) => PropertyKind::RichText,
            PropertyValue::Number(_) => PropertyKind::Number,
            PropertyValue::Select(_) => PropertyKind::Select,
            PropertyValue::MultiSelect(_) => PropertyKind::MultiSelect,
            PropertyValue::Date(_) => PropertyKind::Date,
            PropertyValue::Checkbox(_) => PropertyKind::Checkbox,
            PropertyValue::Email(_) => PropertyKind::Email,
            PropertyValue::Url(_) => PropertyKind::Url,
            PropertyValue::Phone(_) => PropertyKind::Phone,
        }
    }
}

/// Read-only projection of one database page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub page_id: String,
    pub parent_db_ref: String,
    pub properties: BTreeMap<String, PropertyValue>,
    pub last_edited_at: DateTime<Utc>,
    pub archived: bool,
}

impl Page {
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }
}

/// Database description: reference, schema and the title property name (when
/// the schema declares one).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub db_ref: String,
    pub name: String,
    pub schema: BTreeMap<String, PropertyKind>,
}

impl DatabaseInfo {
    /// Name of the title property, if the schema has one.
    pub fn title_property(&self) -> Option<&str> {
        self.schema
            .iter()
            .find(|(_, k)| **k == PropertyKind::Title)
            .map(|(n, _)| n.as_str())
    }
}

// ---------------------------------------------------------------------------
// Engine-owned persistent rows
// ---------------------------------------------------------------------------

/// Join row between a CRM entity and its mirrored page, unique on
/// (sync_pair_id, crm_entity_id). The fingerprint covers only the mapped
/// field subset; unrelated CRM edits do not invalidate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedRecord {
    pub sync_pair_id: i64,
    pub crm_entity_id: i64,
    pub entity_kind: EntityKind,
    pub page_id: String,
    /// Hex-encoded SHA-256 of the canonicalized mapped field subset.
    pub fingerprint: String,
    pub crm_modified_at: Option<DateTime<Utc>>,
    pub page_edited_at: Option<DateTime<Utc>>,
    pub last_synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Pending,
    Resolved,
    Skipped,
}

impl ConflictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStatus::Pending => "pending",
            ConflictStatus::Resolved => "resolved",
            ConflictStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ConflictStatus::Pending),
            "resolved" => Some(ConflictStatus::Resolved),
            "skipped" => Some(ConflictStatus::Skipped),
            _ => None,
        }
    }
}

/// Which side a resolved conflict was settled in favor of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSide {
    Crm,
    Pages,
    Manual,
}

impl ConflictSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictSide::Crm => "crm",
            ConflictSide::Pages => "pages",
            ConflictSide::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "crm" => Some(ConflictSide::Crm),
            "pages" => Some(ConflictSide::Pages),
            "manual" => Some(ConflictSide::Manual),
            _ => None,
        }
    }
}

/// A per-field divergence the engine declined to auto-resolve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub id: i64,
    pub sync_pair_id: i64,
    pub crm_record_id: i64,
    pub crm_record_kind: EntityKind,
    pub field_name: String,
    pub crm_value: Value,
    pub page_value: Value,
    pub crm_modified_at: Option<DateTime<Utc>>,
    pub page_edited_at: Option<DateTime<Utc>>,
    pub status: ConflictStatus,
    pub resolution: Option<ConflictSide>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Run reporting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Warning,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Warning => "warning",
            RunStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RunStatus::Success),
            "warning" => Some(RunStatus::Warning),
            "error" => Some(RunStatus::Error),
            _ => None,
        }
    }
}

/// Counters accumulated over one run. CRM-side deletions have no counter:
/// the engine has no deletion path, and any attempt to plan one terminates
/// the run before I/O.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub records_created: u32,
    pub records_updated: u32,
    pub records_archived: u32,
    pub conflicts_found: u32,
}

impl RunCounters {
    pub fn merge(&mut self, other: &RunCounters) {
        self.records_created += other.records_created;
        self.records_updated += other.records_updated;
        self.records_archived += other.records_archived;
        self.conflicts_found += other.conflicts_found;
    }
}

/// Append-only record of one finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sync_pair_id: i64,
    pub status: RunStatus,
    pub counters: RunCounters,
    pub duration_ms: i64,
    pub error_message: Option<String>,
    /// Per-record errors, sanitizer warnings, staged writes, config hash.
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

/// One intended CRM field write, staged by the pages-to-CRM phase. The CRM
/// client does not support writes in this generation; staged writes are
/// journaled so a future write-capable client can replay them. The
/// (entry_id, field_id, value) key makes replay idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedWrite {
    pub entry_id: i64,
    pub field_id: i64,
    pub field_name: String,
    pub value: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_round_trips() {
        for d in [
            Direction::CrmToPages,
            Direction::PagesToCrm,
            Direction::Bidirectional,
        ] {
            assert_eq!(Direction::parse(d.as_str()), Some(d));
        }
        assert_eq!(Direction::parse("sideways"), None);
    }

    #[test]
    fn direction_phase_flags() {
        assert!(Direction::CrmToPages.mirrors_to_pages());
        assert!(!Direction::CrmToPages.stages_to_crm());
        assert!(!Direction::PagesToCrm.mirrors_to_pages());
        assert!(Direction::PagesToCrm.stages_to_crm());
        assert!(Direction::Bidirectional.mirrors_to_pages());
        assert!(Direction::Bidirectional.stages_to_crm());
    }

    #[test]
    fn property_kind_parse_falls_back_to_unknown() {
        assert_eq!(PropertyKind::parse("select"), PropertyKind::Select);
        assert_eq!(PropertyKind::parse("formula"), PropertyKind::Unknown);
    }

    #[test]
    fn virtual_mappings_are_negative() {
        let m = FieldMapping {
            crm_field_id: VIRTUAL_FIELD_DOMAIN,
            crm_field_name: "domain".to_string(),
            page_property: "Domain".to_string(),
            kind_hint: None,
        };
        assert!(m.is_virtual());
    }

    #[test]
    fn title_property_found_in_schema() {
        let mut schema = BTreeMap::new();
        schema.insert("Stage".to_string(), PropertyKind::Select);
        schema.insert("Name".to_string(), PropertyKind::Title);
        let db = DatabaseInfo {
            db_ref: "db-1".to_string(),
            name: "Deals".to_string(),
            schema,
        };
        assert_eq!(db.title_property(), Some("Name"));
    }

    #[test]
    fn counters_merge_sums() {
        let mut a = RunCounters {
            records_created: 1,
            records_updated: 2,
            records_archived: 0,
            conflicts_found: 1,
        };
        let b = RunCounters {
            records_created: 3,
            records_updated: 0,
            records_archived: 2,
            conflicts_found: 0,
        };
        a.merge(&b);
        assert_eq!(a.records_created, 4);
        assert_eq!(a.records_updated, 2);
        assert_eq!(a.records_archived, 2);
        assert_eq!(a.conflicts_found, 1);
    }
}
