//! Engine configuration.
//!
//! Config is loaded from layered YAML files (later files override earlier
//! ones via deep-merge), canonicalized to sorted-key compact JSON and
//! SHA-256 hashed. The hash is recorded in every run's history details so a
//! run can always be tied back to the exact configuration it executed under.
//!
//! Credentials and endpoints never live in YAML; they come from the
//! environment (`LMR_*`). YAML files containing credential-looking keys are
//! rejected outright.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

pub const ENV_CRM_API_KEY: &str = "LMR_CRM_API_KEY";
pub const ENV_CRM_BASE_URL: &str = "LMR_CRM_BASE_URL";
pub const ENV_PAGES_TOKEN: &str = "LMR_PAGES_TOKEN";
pub const ENV_PAGES_BASE_URL: &str = "LMR_PAGES_BASE_URL";
pub const ENV_DB_URL: &str = "LMR_DATABASE_URL";
pub const ENV_DAEMON_ADDR: &str = "LMR_DAEMON_ADDR";

/// Keys that must never appear in a YAML layer. Secrets are injected via
/// environment variables only.
const FORBIDDEN_KEYS: &[&str] = &["api_key", "token", "secret", "password"];

// ---------------------------------------------------------------------------
// Layered YAML loading
// ---------------------------------------------------------------------------

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
/// Later files override earlier files via deep-merge.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        reject_secret_keys(&json_val, p)?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

impl LoadedConfig {
    /// Empty configuration (all defaults). Used when no YAML layer is given.
    pub fn empty() -> Self {
        let canonical = "{}".to_string();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Self {
            config_json: Value::Object(Default::default()),
            config_hash: hex::encode(hasher.finalize()),
            canonical_json: canonical,
        }
    }
}

/// Deep-merge: objects merge recursively; arrays replaced; scalars overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

/// Canonicalize JSON by sorting all object keys recursively and emitting
/// compact JSON.
pub fn canonicalize_json(v: &Value) -> String {
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

fn reject_secret_keys(v: &Value, path: &str) -> Result<()> {
    match v {
        Value::Object(map) => {
            for (k, child) in map {
                let lower = k.to_ascii_lowercase();
                if FORBIDDEN_KEYS.iter().any(|f| lower.contains(f)) {
                    return Err(anyhow!(
                        "config file {path} contains credential-looking key '{k}'; \
                         secrets must be injected via LMR_* environment variables"
                    ));
                }
                reject_secret_keys(child, path)?;
            }
            Ok(())
        }
        Value::Array(arr) => {
            for child in arr {
                reject_secret_keys(child, path)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Typed engine config
// ---------------------------------------------------------------------------

/// Tuning knobs consumed by the engine. Values are orthogonal; every field
/// has a default so an empty config is valid.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Outbound CRM calls per second.
    pub rate_limit_crm: f64,
    /// Outbound pages-store calls per second.
    pub rate_limit_pages: f64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Entries mirrored in parallel within one batch.
    pub batch_size: usize,
    /// Archive managed pages whose CRM entry left the filtered set.
    pub auto_archive_unmatched: bool,
    /// Invalid email/url/phone values become null instead of passing through.
    pub strict_sanitization: bool,
    pub list_timeout_ms: u64,
    pub record_timeout_ms: u64,
    /// Runs slower than this are reported as warnings.
    pub duration_warn_ms: i64,
    /// Runs creating more pages than this are flagged for visibility.
    pub large_creation_count: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rate_limit_crm: 2.0,
            rate_limit_pages: 3.0,
            retry_max_attempts: 3,
            retry_base_delay_ms: 1000,
            batch_size: 5,
            auto_archive_unmatched: true,
            strict_sanitization: false,
            list_timeout_ms: 60_000,
            record_timeout_ms: 20_000,
            duration_warn_ms: 300_000,
            large_creation_count: 100,
        }
    }
}

impl EngineConfig {
    /// Build from a merged config document, falling back to defaults for
    /// absent keys.
    pub fn from_loaded(cfg: &LoadedConfig) -> Self {
        let v = &cfg.config_json;
        let d = EngineConfig::default();
        Self {
            rate_limit_crm: cfg_f64(v, "/engine/rate_limit_crm")
                .filter(|r| *r > 0.0)
                .unwrap_or(d.rate_limit_crm),
            rate_limit_pages: cfg_f64(v, "/engine/rate_limit_pages")
                .filter(|r| *r > 0.0)
                .unwrap_or(d.rate_limit_pages),
            retry_max_attempts: cfg_u64(v, "/engine/retry_max_attempts")
                .map(|n| n as u32)
                .unwrap_or(d.retry_max_attempts),
            retry_base_delay_ms: cfg_u64(v, "/engine/retry_base_delay_ms")
                .unwrap_or(d.retry_base_delay_ms),
            batch_size: cfg_u64(v, "/engine/batch_size")
                .map(|n| n as usize)
                .filter(|n| *n > 0)
                .unwrap_or(d.batch_size),
            auto_archive_unmatched: cfg_bool(
                v,
                "/engine/auto_archive_unmatched",
                d.auto_archive_unmatched,
            ),
            strict_sanitization: cfg_bool(v, "/engine/strict_sanitization", d.strict_sanitization),
            list_timeout_ms: cfg_u64(v, "/engine/list_timeout_ms").unwrap_or(d.list_timeout_ms),
            record_timeout_ms: cfg_u64(v, "/engine/record_timeout_ms")
                .unwrap_or(d.record_timeout_ms),
            duration_warn_ms: cfg_i64(v, "/alerts/duration_warn_ms").unwrap_or(d.duration_warn_ms),
            large_creation_count: cfg_u64(v, "/alerts/large_creation_count")
                .map(|n| n as u32)
                .unwrap_or(d.large_creation_count),
        }
    }
}

/// Opaque credentials + endpoints for the two external systems, read from
/// the environment.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub crm_api_key: String,
    pub crm_base_url: String,
    pub pages_token: String,
    pub pages_base_url: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            crm_api_key: require_env(ENV_CRM_API_KEY)?,
            crm_base_url: require_env(ENV_CRM_BASE_URL)?,
            pages_token: require_env(ENV_PAGES_TOKEN)?,
            pages_base_url: require_env(ENV_PAGES_BASE_URL)?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing env var {key}"))
}

fn cfg_bool(v: &Value, ptr: &str, default: bool) -> bool {
    v.pointer(ptr).and_then(|x| x.as_bool()).unwrap_or(default)
}

fn cfg_f64(v: &Value, ptr: &str) -> Option<f64> {
    v.pointer(ptr).and_then(|x| x.as_f64())
}

fn cfg_u64(v: &Value, ptr: &str) -> Option<u64> {
    v.pointer(ptr).and_then(|x| x.as_u64())
}

fn cfg_i64(v: &Value, ptr: &str) -> Option<i64> {
    v.pointer(ptr).and_then(|x| x.as_i64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_yaml(dir: &tempfile::TempDir, name: &str, body: &str) -> String {
        let path = dir.path().join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn defaults_match_contract() {
        let d = EngineConfig::default();
        assert_eq!(d.rate_limit_crm, 2.0);
        assert_eq!(d.rate_limit_pages, 3.0);
        assert_eq!(d.retry_max_attempts, 3);
        assert_eq!(d.retry_base_delay_ms, 1000);
        assert_eq!(d.batch_size, 5);
        assert!(d.auto_archive_unmatched);
        assert!(!d.strict_sanitization);
        assert_eq!(d.list_timeout_ms, 60_000);
        assert_eq!(d.record_timeout_ms, 20_000);
    }

    #[test]
    fn later_layer_overrides_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_yaml(&dir, "base.yaml", "engine:\n  batch_size: 5\n  retry_max_attempts: 3\n");
        let over = write_yaml(&dir, "override.yaml", "engine:\n  batch_size: 10\n");

        let loaded = load_layered_yaml(&[base.as_str(), over.as_str()]).unwrap();
        let cfg = EngineConfig::from_loaded(&loaded);
        assert_eq!(cfg.batch_size, 10);
        assert_eq!(cfg.retry_max_attempts, 3);
    }

    #[test]
    fn hash_is_stable_across_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_yaml(&dir, "a.yaml", "engine:\n  batch_size: 7\n  strict_sanitization: true\n");
        let b = write_yaml(&dir, "b.yaml", "engine:\n  strict_sanitization: true\n  batch_size: 7\n");

        let la = load_layered_yaml(&[a.as_str()]).unwrap();
        let lb = load_layered_yaml(&[b.as_str()]).unwrap();
        assert_eq!(la.config_hash, lb.config_hash);
        assert_eq!(la.canonical_json, lb.canonical_json);
    }

    #[test]
    fn credential_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bad = write_yaml(&dir, "bad.yaml", "crm:\n  api_key: sk-oops\n");
        let err = load_layered_yaml(&[bad.as_str()]).unwrap_err();
        assert!(err.to_string().contains("credential-looking"));
    }

    #[test]
    fn zero_batch_size_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let p = write_yaml(&dir, "z.yaml", "engine:\n  batch_size: 0\n");
        let cfg = EngineConfig::from_loaded(&load_layered_yaml(&[p.as_str()]).unwrap());
        assert_eq!(cfg.batch_size, 5);
    }
}
