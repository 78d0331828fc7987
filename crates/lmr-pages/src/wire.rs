//! Wire encoding of page properties.
//!
//! Values travel as one JSON object per property, shaped by kind:
//! title/rich_text as a bare string, number as a number, select as
//! `{"name": …}`, multi_select as `[{"name": …}]`, date as
//! `{"start": "YYYY-MM-DD"}`, checkbox as a bool, email/url/phone as
//! strings. Decoding is directed by the live database schema, never by
//! guessing at the value shape.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use lmr_schemas::{DatabaseInfo, Page, PropertyKind, PropertyValue};

pub fn encode_property(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Title(s) | PropertyValue::RichText(s) => Value::String(s.clone()),
        PropertyValue::Number(opt) => opt
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        PropertyValue::Select(opt) => match opt {
            Some(name) => json!({ "name": name }),
            None => Value::Null,
        },
        PropertyValue::MultiSelect(items) => Value::Array(
            items.iter().map(|name| json!({ "name": name })).collect(),
        ),
        PropertyValue::Date(opt) => match opt {
            Some(start) => json!({ "start": start }),
            None => Value::Null,
        },
        PropertyValue::Checkbox(b) => Value::Bool(*b),
        PropertyValue::Email(opt) | PropertyValue::Url(opt) | PropertyValue::Phone(opt) => opt
            .as_ref()
            .map(|s| Value::String(s.clone()))
            .unwrap_or(Value::Null),
    }
}

pub fn encode_properties(props: &BTreeMap<String, PropertyValue>) -> Value {
    Value::Object(
        props
            .iter()
            .map(|(name, value)| (name.clone(), encode_property(value)))
            .collect(),
    )
}

pub fn decode_property(kind: PropertyKind, raw: &Value) -> PropertyValue {
    match kind {
        PropertyKind::Title => PropertyValue::Title(string_of(raw)),
        PropertyKind::RichText | PropertyKind::Unknown => PropertyValue::RichText(string_of(raw)),
        PropertyKind::Number => PropertyValue::Number(raw.as_f64()),
        PropertyKind::Select => PropertyValue::Select(name_of(raw)),
        PropertyKind::MultiSelect => PropertyValue::MultiSelect(
            raw.as_array()
                .map(|items| items.iter().filter_map(name_of).collect())
                .unwrap_or_default(),
        ),
        PropertyKind::Date => PropertyValue::Date(
            raw.get("start")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| raw.as_str().map(str::to_string)),
        ),
        PropertyKind::Checkbox => PropertyValue::Checkbox(raw.as_bool().unwrap_or(false)),
        PropertyKind::Email => PropertyValue::Email(opt_string(raw)),
        PropertyKind::Url => PropertyValue::Url(opt_string(raw)),
        PropertyKind::Phone => PropertyValue::Phone(opt_string(raw)),
    }
}

fn string_of(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn opt_string(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn name_of(raw: &Value) -> Option<String> {
    match raw {
        Value::Object(map) => map.get("name").and_then(Value::as_str).map(str::to_string),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DatabasesResponse {
    pub databases: Vec<WireDatabase>,
}

#[derive(Debug, Deserialize)]
pub struct WireDatabase {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, WirePropertySchema>,
}

#[derive(Debug, Deserialize)]
pub struct WirePropertySchema {
    #[serde(rename = "type")]
    pub kind: String,
}

impl WireDatabase {
    pub fn into_info(self) -> DatabaseInfo {
        DatabaseInfo {
            db_ref: self.id,
            name: self.name,
            schema: self
                .properties
                .into_iter()
                .map(|(name, p)| (name, PropertyKind::parse(&p.kind)))
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    pub pages: Vec<WirePage>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WirePage {
    pub id: String,
    pub parent_database_id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    pub last_edited_at: DateTime<Utc>,
    #[serde(default)]
    pub archived: bool,
}

impl WirePage {
    pub fn into_page(self, db: &DatabaseInfo) -> Page {
        let properties = self
            .properties
            .into_iter()
            .filter_map(|(name, raw)| {
                db.schema
                    .get(&name)
                    .map(|kind| (name.clone(), decode_property(*kind, &raw)))
            })
            .collect();

        Page {
            page_id: self.id,
            parent_db_ref: self.parent_database_id,
            properties,
            last_edited_at: self.last_edited_at,
            archived: self.archived,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePageResponse {
    pub id: String,
}
