//! Best-effort cleanup of user-entered contact values.
//!
//! Each sanitizer returns `None` when the value cannot be salvaged. Whether
//! `None` means "pass the raw value through" or "blank the value and warn"
//! is the caller's choice (`strict_sanitization`).

use regex::Regex;
use std::sync::OnceLock;

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex is valid"))
}

pub fn sanitize_email(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if email_re().is_match(trimmed) {
        Some(trimmed.to_string())
    } else {
        None
    }
}

/// Accepts anything `url::Url` can parse; bare hosts get an `https://`
/// prefix first.
pub fn sanitize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if url::Url::parse(trimmed).is_ok() {
        return Some(trimmed.to_string());
    }
    let prefixed = format!("https://{trimmed}");
    url::Url::parse(&prefixed).ok().map(|_| prefixed)
}

/// Strips everything but digits; requires at least 10 of them.
pub fn sanitize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() >= 10 {
        Some(digits)
    } else {
        None
    }
}

/// Parses after dropping everything but digits, dots and minus signs.
/// NaN and infinities are rejected.
pub fn sanitize_number(raw: &str) -> Option<f64> {
    let filtered: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    match filtered.parse::<f64>() {
        Ok(n) if n.is_finite() => Some(n),
        _ => None,
    }
}

/// Normalizes to an ISO calendar date (`YYYY-MM-DD`). Accepts RFC 3339
/// timestamps, bare ISO dates and US-style `M/D/YYYY`.
pub fn sanitize_date(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.date_naive().format("%Y-%m-%d").to_string());
    }
    if let Ok(d) = chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(d) = chrono::NaiveDate::parse_from_str(trimmed, "%m/%d/%Y") {
        return Some(d.format("%Y-%m-%d").to_string());
    }
    None
}
