use std::collections::BTreeSet;

use lmr_schemas::{PropertyKind, PropertyValue};
use serde_json::Value;

use crate::sanitize;

/// One comparable value form shared by both systems.
///
/// Every raw field value — CRM scalar, `{text}` wrapper, array, or typed
/// page property — folds into exactly one of these shapes before any
/// equality check or hash. Canonicalization is idempotent:
/// `canon(bare(canon(v))) == canon(v)`.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalValue {
    Empty,
    Text(String),
    Num(f64),
    Bool(bool),
    /// ISO calendar date, `YYYY-MM-DD`.
    Date(String),
    Select(String),
    MultiSelect(BTreeSet<String>),
    List(Vec<CanonicalValue>),
}

impl CanonicalValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CanonicalValue::Empty)
    }

    /// Bare JSON form: what a staged CRM write carries, and what the
    /// fingerprint encoding embeds.
    pub fn bare_json(&self) -> Value {
        match self {
            CanonicalValue::Empty => Value::Null,
            CanonicalValue::Text(s) | CanonicalValue::Select(s) | CanonicalValue::Date(s) => {
                Value::String(s.clone())
            }
            CanonicalValue::Num(n) => number_value(*n),
            CanonicalValue::Bool(b) => Value::Bool(*b),
            CanonicalValue::MultiSelect(set) => {
                Value::Array(set.iter().map(|s| Value::String(s.clone())).collect())
            }
            CanonicalValue::List(items) => {
                Value::Array(items.iter().map(|c| c.bare_json()).collect())
            }
        }
    }

    /// Plain-text rendering, used for title/rich_text projection and for
    /// the deterministic ordering of list elements.
    pub fn render(&self) -> String {
        match self {
            CanonicalValue::Empty => String::new(),
            CanonicalValue::Text(s) | CanonicalValue::Select(s) | CanonicalValue::Date(s) => {
                s.clone()
            }
            CanonicalValue::Num(n) => format_number(*n),
            CanonicalValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            CanonicalValue::MultiSelect(set) => {
                set.iter().cloned().collect::<Vec<_>>().join(", ")
            }
            CanonicalValue::List(items) => items
                .iter()
                .map(|c| c.render())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// Folds raw values into [`CanonicalValue`], directed by the live property
/// kind of the mapping target (never by the stored type hint).
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    /// When set, email/url/phone/date values failing sanitization collapse
    /// to `Empty` and a warning is collected; otherwise the raw text is
    /// kept as-is.
    pub strict: bool,
}

impl Normalizer {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    /// Canonicalize a raw CRM value. `warnings` collects sanitizer failures
    /// for the run's details blob.
    pub fn canonicalize(
        &self,
        raw: &Value,
        kind: PropertyKind,
        warnings: &mut Vec<String>,
    ) -> CanonicalValue {
        let unwrapped = unwrap_raw(raw);
        self.shape(&unwrapped, kind, warnings)
    }

    /// Canonicalize a typed page property through the same rules, so both
    /// sides compare on identical footing.
    pub fn canonicalize_page(
        &self,
        value: &PropertyValue,
        warnings: &mut Vec<String>,
    ) -> CanonicalValue {
        let (bare, kind) = property_to_bare(value);
        self.shape(&unwrap_raw(&bare), kind, warnings)
    }

    /// Project a canonical value into the typed page shape for `kind`.
    pub fn project(&self, c: &CanonicalValue, kind: PropertyKind) -> PropertyValue {
        match kind {
            PropertyKind::Title => PropertyValue::Title(c.render()),
            PropertyKind::RichText | PropertyKind::Unknown => PropertyValue::RichText(c.render()),
            PropertyKind::Number => PropertyValue::Number(number_of(c)),
            PropertyKind::Select => PropertyValue::Select(match c {
                CanonicalValue::Empty => None,
                other => Some(other.render()),
            }),
            PropertyKind::MultiSelect => PropertyValue::MultiSelect(match c {
                CanonicalValue::Empty => Vec::new(),
                CanonicalValue::MultiSelect(set) => set.iter().cloned().collect(),
                CanonicalValue::List(items) => items.iter().map(|i| i.render()).collect(),
                other => vec![other.render()],
            }),
            PropertyKind::Date => PropertyValue::Date(match c {
                CanonicalValue::Empty => None,
                CanonicalValue::Date(s) => Some(s.clone()),
                other => sanitize::sanitize_date(&other.render()),
            }),
            PropertyKind::Checkbox => PropertyValue::Checkbox(match c {
                CanonicalValue::Bool(b) => *b,
                CanonicalValue::Empty => false,
                other => is_truthy_token(&other.render()),
            }),
            PropertyKind::Email => PropertyValue::Email(optional_text(c)),
            PropertyKind::Url => PropertyValue::Url(optional_text(c)),
            PropertyKind::Phone => PropertyValue::Phone(optional_text(c)),
        }
    }

    fn shape(&self, v: &Value, kind: PropertyKind, warnings: &mut Vec<String>) -> CanonicalValue {
        match v {
            Value::Null => empty_for(kind),
            Value::Array(items) => self.shape_array(items, kind, warnings),
            scalar => self.shape_scalar(scalar, kind, warnings),
        }
    }

    fn shape_array(
        &self,
        items: &[Value],
        kind: PropertyKind,
        warnings: &mut Vec<String>,
    ) -> CanonicalValue {
        let mut shaped: Vec<CanonicalValue> = items
            .iter()
            .map(|item| self.shape(item, element_kind(kind), warnings))
            .filter(|c| !c.is_empty())
            .collect();

        if kind == PropertyKind::MultiSelect {
            let set: BTreeSet<String> = shaped.iter().map(|c| c.render()).collect();
            return if set.is_empty() {
                CanonicalValue::Empty
            } else {
                CanonicalValue::MultiSelect(set)
            };
        }

        // Order never carries meaning in CRM multi-values; sort so both
        // systems agree regardless of storage order.
        shaped.sort_by_key(|c| c.render());
        match shaped.len() {
            0 => empty_for(kind),
            1 => shaped.into_iter().next().expect("len checked"),
            _ => CanonicalValue::List(shaped),
        }
    }

    fn shape_scalar(
        &self,
        v: &Value,
        kind: PropertyKind,
        warnings: &mut Vec<String>,
    ) -> CanonicalValue {
        if value_is_empty(v) {
            return empty_for(kind);
        }

        match kind {
            PropertyKind::Number => match v {
                Value::Number(n) => match n.as_f64() {
                    Some(f) if f.is_finite() => CanonicalValue::Num(f),
                    _ => CanonicalValue::Empty,
                },
                Value::Bool(b) => CanonicalValue::Num(if *b { 1.0 } else { 0.0 }),
                other => match sanitize::sanitize_number(&render_raw(other)) {
                    Some(f) => CanonicalValue::Num(f),
                    None => self.reject(other, "number", warnings),
                },
            },
            PropertyKind::Checkbox => CanonicalValue::Bool(raw_truthy(v)),
            PropertyKind::Date => {
                let text = render_raw(v);
                match sanitize::sanitize_date(&text) {
                    Some(iso) => CanonicalValue::Date(iso),
                    None => self.reject(v, "date", warnings),
                }
            }
            PropertyKind::Select => CanonicalValue::Select(render_raw(v)),
            PropertyKind::MultiSelect => {
                let mut set = BTreeSet::new();
                set.insert(render_raw(v));
                CanonicalValue::MultiSelect(set)
            }
            PropertyKind::Email => self.sanitized_text(v, sanitize::sanitize_email, "email", warnings),
            PropertyKind::Url => self.sanitized_text(v, sanitize::sanitize_url, "url", warnings),
            PropertyKind::Phone => self.sanitized_text(v, sanitize::sanitize_phone, "phone", warnings),
            PropertyKind::Title | PropertyKind::RichText | PropertyKind::Unknown => {
                CanonicalValue::Text(render_raw(v))
            }
        }
    }

    fn sanitized_text(
        &self,
        v: &Value,
        sanitizer: fn(&str) -> Option<String>,
        label: &str,
        warnings: &mut Vec<String>,
    ) -> CanonicalValue {
        let text = render_raw(v);
        match sanitizer(&text) {
            Some(clean) => CanonicalValue::Text(clean),
            None => self.reject(v, label, warnings),
        }
    }

    fn reject(&self, v: &Value, label: &str, warnings: &mut Vec<String>) -> CanonicalValue {
        if self.strict {
            warnings.push(format!("invalid {label} value dropped: {v}"));
            CanonicalValue::Empty
        } else {
            CanonicalValue::Text(render_raw(v))
        }
    }
}

/// Sub-values of a multi_select array are plain labels.
fn element_kind(kind: PropertyKind) -> PropertyKind {
    match kind {
        PropertyKind::MultiSelect => PropertyKind::RichText,
        other => other,
    }
}

/// Missing checkbox and unchecked checkbox are the same state.
fn empty_for(kind: PropertyKind) -> CanonicalValue {
    match kind {
        PropertyKind::Checkbox => CanonicalValue::Bool(false),
        _ => CanonicalValue::Empty,
    }
}

/// Unwrap the CRM's `{text: …}` wrappers (and association objects carrying
/// `{name: …}`) recursively; everything else passes through.
fn unwrap_raw(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            if let Some(inner) = map.get("text") {
                unwrap_raw(inner)
            } else if let Some(inner) = map.get("name") {
                unwrap_raw(inner)
            } else {
                Value::String(serde_json::to_string(v).unwrap_or_default())
            }
        }
        Value::Array(items) => Value::Array(items.iter().map(unwrap_raw).collect()),
        other => other.clone(),
    }
}

fn value_is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn render_raw(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n
            .as_f64()
            .map(format_number)
            .unwrap_or_else(|| n.to_string()),
        Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn raw_truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => is_truthy_token(s),
        _ => false,
    }
}

fn is_truthy_token(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "1" | "on" | "checked"
    )
}

fn number_of(c: &CanonicalValue) -> Option<f64> {
    match c {
        CanonicalValue::Num(n) if n.is_finite() => Some(*n),
        CanonicalValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        CanonicalValue::Empty => None,
        other => sanitize::sanitize_number(&other.render()),
    }
}

fn optional_text(c: &CanonicalValue) -> Option<String> {
    match c {
        CanonicalValue::Empty => None,
        other => Some(other.render()),
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn property_to_bare(value: &PropertyValue) -> (Value, PropertyKind) {
    let kind = value.kind();
    let bare = match value {
        PropertyValue::Title(s) | PropertyValue::RichText(s) => Value::String(s.clone()),
        PropertyValue::Number(opt) => opt.map(number_value).unwrap_or(Value::Null),
        PropertyValue::Select(opt)
        | PropertyValue::Date(opt)
        | PropertyValue::Email(opt)
        | PropertyValue::Url(opt)
        | PropertyValue::Phone(opt) => opt
            .as_ref()
            .map(|s| Value::String(s.clone()))
            .unwrap_or(Value::Null),
        PropertyValue::MultiSelect(items) => {
            Value::Array(items.iter().map(|s| Value::String(s.clone())).collect())
        }
        PropertyValue::Checkbox(b) => Value::Bool(*b),
    };
    (bare, kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canon(raw: serde_json::Value, kind: PropertyKind) -> CanonicalValue {
        Normalizer::new(false).canonicalize(&raw, kind, &mut Vec::new())
    }

    #[test]
    fn text_wrapper_unwraps() {
        assert_eq!(
            canon(json!({"text": "Seed"}), PropertyKind::Select),
            canon(json!("Seed"), PropertyKind::Select)
        );
    }

    #[test]
    fn array_order_is_irrelevant() {
        assert_eq!(
            canon(json!([{"text": "b"}, {"text": "a"}]), PropertyKind::RichText),
            canon(json!(["a", "b"]), PropertyKind::RichText)
        );
    }

    #[test]
    fn empties_collapse() {
        for raw in [json!(null), json!(""), json!("   "), json!([])] {
            assert_eq!(canon(raw, PropertyKind::RichText), CanonicalValue::Empty);
        }
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let cases = [
            (json!({"text": "Series A"}), PropertyKind::Select),
            (json!(["b", "a", "c"]), PropertyKind::RichText),
            (json!(["x", "y"]), PropertyKind::MultiSelect),
            (json!(42.5), PropertyKind::Number),
            (json!("2024-03-05T10:00:00Z"), PropertyKind::Date),
            (json!("yes"), PropertyKind::Checkbox),
            (json!(null), PropertyKind::RichText),
        ];
        let n = Normalizer::new(false);
        for (raw, kind) in cases {
            let once = n.canonicalize(&raw, kind, &mut Vec::new());
            let twice = n.canonicalize(&once.bare_json(), kind, &mut Vec::new());
            assert_eq!(once, twice, "not idempotent for {raw} as {kind:?}");
        }
    }

    #[test]
    fn numbers_coerce_and_nan_collapses() {
        assert_eq!(canon(json!("1,250"), PropertyKind::Number), CanonicalValue::Num(1250.0));
        assert_eq!(canon(json!(7), PropertyKind::Number), CanonicalValue::Num(7.0));
        // Unsalvageable text passes through non-strict for visibility.
        assert_eq!(
            canon(json!("n/a"), PropertyKind::Number),
            CanonicalValue::Text("n/a".to_string())
        );
    }

    #[test]
    fn strict_mode_drops_invalid_and_warns() {
        let n = Normalizer::new(true);
        let mut warnings = Vec::new();
        let c = n.canonicalize(&json!("not-an-email"), PropertyKind::Email, &mut warnings);
        assert_eq!(c, CanonicalValue::Empty);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn dates_normalize_to_iso_day() {
        assert_eq!(
            canon(json!("2024-03-05T23:59:00Z"), PropertyKind::Date),
            CanonicalValue::Date("2024-03-05".to_string())
        );
    }

    #[test]
    fn checkbox_truthy_tokens() {
        for token in ["true", "yes", "1", "on", "checked", "YES"] {
            assert_eq!(
                canon(json!(token), PropertyKind::Checkbox),
                CanonicalValue::Bool(true),
                "token {token}"
            );
        }
        assert_eq!(canon(json!("no"), PropertyKind::Checkbox), CanonicalValue::Bool(false));
        assert_eq!(canon(json!(null), PropertyKind::Checkbox), CanonicalValue::Bool(false));
    }

    #[test]
    fn page_side_canonicalizes_symmetrically() {
        let n = Normalizer::new(false);
        let mut w = Vec::new();

        let from_crm = n.canonicalize(&json!({"text": "Seed"}), PropertyKind::Select, &mut w);
        let from_page =
            n.canonicalize_page(&PropertyValue::Select(Some("Seed".to_string())), &mut w);
        assert_eq!(from_crm, from_page);

        let from_crm = n.canonicalize(&json!(["b", "a"]), PropertyKind::MultiSelect, &mut w);
        let from_page = n.canonicalize_page(
            &PropertyValue::MultiSelect(vec!["a".to_string(), "b".to_string()]),
            &mut w,
        );
        assert_eq!(from_crm, from_page);
    }

    #[test]
    fn association_objects_unwrap_to_names() {
        let raw = json!([{"id": 9, "name": "Acme", "domain": "acme.io"}]);
        assert_eq!(
            canon(raw, PropertyKind::RichText),
            CanonicalValue::Text("Acme".to_string())
        );
    }

    #[test]
    fn projection_matches_kind() {
        let n = Normalizer::new(false);
        assert_eq!(
            n.project(&CanonicalValue::Text("Acme".into()), PropertyKind::Title),
            PropertyValue::Title("Acme".to_string())
        );
        assert_eq!(
            n.project(&CanonicalValue::Empty, PropertyKind::Select),
            PropertyValue::Select(None)
        );
        assert_eq!(
            n.project(&CanonicalValue::Num(12.0), PropertyKind::RichText),
            PropertyValue::RichText("12".to_string())
        );
        assert_eq!(
            n.project(&CanonicalValue::Empty, PropertyKind::Number),
            PropertyValue::Number(None)
        );
    }
}
