//! Value canonicalization, sanitization and fingerprinting.
//!
//! Field values arrive in heterogeneous raw shapes: the CRM hands back bare
//! scalars, `{text: …}` wrappers or arrays of either; the pages store hands
//! back typed property values. Everything is folded into one comparable
//! [`CanonicalValue`] form before any equality check, conflict decision or
//! fingerprint computation.
//!
//! This crate does **not**:
//! - talk to either external system
//! - decide conflicts (that is `lmr-conflict`)
//! - persist anything

mod canonical;
mod fingerprint;
mod sanitize;

pub use canonical::{CanonicalValue, Normalizer};
pub use fingerprint::fingerprint;
pub use sanitize::{
    sanitize_date, sanitize_email, sanitize_number, sanitize_phone, sanitize_url,
};
