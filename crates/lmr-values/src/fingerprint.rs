use std::collections::BTreeMap;

use lmr_schemas::FieldMapping;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::CanonicalValue;

/// Content hash of the mapped field subset of one CRM entry.
///
/// The encoding sorts mappings by `crm_field_id` and emits
/// `[{field_id, field_name, value}]` as sorted-key compact JSON before
/// hashing, so the hash depends only on the mapped subset plus the
/// mapping keys themselves — unrelated CRM fields never invalidate it.
/// A stored match means the entry needs no page write this run.
pub fn fingerprint(
    mappings: &[FieldMapping],
    values: &BTreeMap<i64, CanonicalValue>,
) -> String {
    let mut ordered: Vec<&FieldMapping> = mappings.iter().collect();
    ordered.sort_by_key(|m| m.crm_field_id);

    let encoded: Vec<Value> = ordered
        .iter()
        .map(|m| {
            let value = values
                .get(&m.crm_field_id)
                .map(|c| c.bare_json())
                .unwrap_or(Value::Null);
            let mut obj = serde_json::Map::new();
            obj.insert("field_id".to_string(), Value::from(m.crm_field_id));
            obj.insert(
                "field_name".to_string(),
                Value::String(m.crm_field_name.clone()),
            );
            obj.insert("value".to_string(), value);
            Value::Object(obj)
        })
        .collect();

    let canonical = canonical_json(&Value::Array(encoded));

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Sorted-key compact JSON. One encoding, one hash.
fn canonical_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(id: i64, name: &str) -> FieldMapping {
        FieldMapping {
            crm_field_id: id,
            crm_field_name: name.to_string(),
            page_property: name.to_string(),
            kind_hint: None,
        }
    }

    #[test]
    fn stable_across_mapping_declaration_order() {
        let mut values = BTreeMap::new();
        values.insert(10, CanonicalValue::Text("Seed".into()));
        values.insert(11, CanonicalValue::Num(5.0));

        let forward = vec![mapping(10, "Stage"), mapping(11, "Score")];
        let reversed = vec![mapping(11, "Score"), mapping(10, "Stage")];

        assert_eq!(fingerprint(&forward, &values), fingerprint(&reversed, &values));
    }

    #[test]
    fn unmapped_fields_do_not_affect_hash() {
        let mappings = vec![mapping(10, "Stage")];

        let mut narrow = BTreeMap::new();
        narrow.insert(10, CanonicalValue::Text("Seed".into()));

        let mut wide = narrow.clone();
        wide.insert(99, CanonicalValue::Text("noise".into()));

        assert_eq!(fingerprint(&mappings, &narrow), fingerprint(&mappings, &wide));
    }

    #[test]
    fn value_change_changes_hash() {
        let mappings = vec![mapping(10, "Stage")];

        let mut before = BTreeMap::new();
        before.insert(10, CanonicalValue::Text("Seed".into()));
        let mut after = BTreeMap::new();
        after.insert(10, CanonicalValue::Text("Series A".into()));

        assert_ne!(fingerprint(&mappings, &before), fingerprint(&mappings, &after));
    }

    #[test]
    fn mapping_rename_changes_hash() {
        let mut values = BTreeMap::new();
        values.insert(10, CanonicalValue::Text("Seed".into()));

        let a = vec![mapping(10, "Stage")];
        let b = vec![mapping(10, "Phase")];

        assert_ne!(fingerprint(&a, &values), fingerprint(&b, &values));
    }

    #[test]
    fn missing_value_hashes_as_null() {
        let mappings = vec![mapping(10, "Stage")];
        let absent = BTreeMap::new();
        let mut empty = BTreeMap::new();
        empty.insert(10, CanonicalValue::Empty);

        assert_eq!(fingerprint(&mappings, &absent), fingerprint(&mappings, &empty));
    }
}
