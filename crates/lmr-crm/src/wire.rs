//! Raw CRM response shapes and their conversion into the engine's
//! projections. All wire irregularities stop at this boundary: prefixed
//! field ids, `{text}` wrappers around status values, entity payloads that
//! carry either `domain` or `domains`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use lmr_schemas::{CrmEntry, CrmField, CrmFieldValue, CrmList, EntityKind};

/// The wire is inconsistent about field ids: sometimes a bare integer,
/// sometimes the string form `"field-123"`. Both normalize to `123` here;
/// the engine core never sees the prefixed form.
pub fn normalize_field_id(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let stripped = s.strip_prefix("field-").unwrap_or(s);
            stripped.parse::<i64>().ok()
        }
        _ => None,
    }
}

/// Status/dropdown values arrive as a bare string, a `{text}` object, or a
/// single-element array of either.
pub fn dropdown_text(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("text").and_then(dropdown_text),
        Value::Array(items) => items.first().and_then(dropdown_text),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
pub struct ListsResponse {
    pub lists: Vec<WireList>,
}

#[derive(Debug, Deserialize)]
pub struct WireList {
    pub id: Value,
    pub name: String,
    pub entity_type: String,
}

impl WireList {
    pub fn into_list(self) -> Option<CrmList> {
        Some(CrmList {
            list_ref: value_to_ref(&self.id)?,
            entity_kind: EntityKind::parse(&self.entity_type)?,
            name: self.name,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct FieldsResponse {
    pub fields: Vec<WireField>,
}

#[derive(Debug, Deserialize)]
pub struct WireField {
    pub id: Value,
    pub name: String,
    #[serde(default)]
    pub dropdown_options: Vec<Value>,
}

impl WireField {
    pub fn into_field(self) -> Option<CrmField> {
        Some(CrmField {
            field_id: normalize_field_id(&self.id)?,
            name: self.name,
            dropdown_options: self
                .dropdown_options
                .iter()
                .filter_map(dropdown_text)
                .collect(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct EntriesResponse {
    pub entries: Vec<WireEntry>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WireEntry {
    pub id: i64,
    pub entity: WireEntity,
    #[serde(default)]
    pub fields: Vec<WireFieldValue>,
    #[serde(default)]
    pub last_modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct WireEntity {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub organization_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct WireFieldValue {
    pub field_id: Value,
    pub value: Value,
}

impl WireEntry {
    pub fn into_entry(self) -> Option<CrmEntry> {
        let entity_kind = EntityKind::parse(&self.entity.entity_type)?;

        let mut domains = self.entity.domains;
        if let Some(d) = self.entity.domain {
            if !domains.contains(&d) {
                domains.insert(0, d);
            }
        }

        let fields = self
            .fields
            .into_iter()
            .filter_map(|fv| {
                normalize_field_id(&fv.field_id).map(|field_id| CrmFieldValue {
                    field_id,
                    value: fv.value,
                })
            })
            .collect();

        Some(CrmEntry {
            entry_id: self.id,
            entity_id: self.entity.id,
            entity_kind,
            name: self.entity.name,
            domains,
            fields,
            last_modified_at: self.last_modified_at,
            organization_id: self.entity.organization_id,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct WireOrganization {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WirePerson {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub emails: Vec<String>,
}

fn value_to_ref(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
