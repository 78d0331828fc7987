use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use lmr_schemas::{Direction, FieldMapping};
use lmr_values::CanonicalValue;

use crate::types::{ConflictReport, FieldDivergence, Resolution, Timestamps};

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Decide which side wins a divergence.
///
/// Directed pairs are trivial: the configured source of truth wins. For
/// bidirectional pairs the rule compares both modification times against
/// the last sync watermark `ts`:
/// - exactly one side changed since `ts` => that side wins
/// - both changed => the later one wins; a tie is manual
/// - neither changed yet the values differ => manual (the divergence
///   predates our watermark and came from a source we cannot see; do not
///   guess)
pub fn resolve_side(direction: Direction, ts: &Timestamps) -> Resolution {
    match direction {
        Direction::CrmToPages => Resolution::TakeCrm,
        Direction::PagesToCrm => Resolution::TakePages,
        Direction::Bidirectional => {
            let watermark = ts.last_sync_at.unwrap_or_else(epoch);
            let ta = ts.crm_modified_at.unwrap_or_else(epoch);
            let tb = ts.page_edited_at.unwrap_or_else(epoch);

            let crm_newer = ta > watermark;
            let page_newer = tb > watermark;

            match (crm_newer, page_newer) {
                (true, false) => Resolution::TakeCrm,
                (false, true) => Resolution::TakePages,
                (true, true) => {
                    if ta > tb {
                        Resolution::TakeCrm
                    } else if tb > ta {
                        Resolution::TakePages
                    } else {
                        Resolution::Manual
                    }
                }
                (false, false) => Resolution::Manual,
            }
        }
    }
}

/// Compare every mapped field of one (entry, page) pair.
///
/// `crm_values` and `page_values` are keyed by CRM field id and must
/// already be canonicalized through the same normalizer; a side missing a
/// key compares as `Empty`.
pub fn detect(
    direction: Direction,
    mappings: &[FieldMapping],
    crm_values: &BTreeMap<i64, CanonicalValue>,
    page_values: &BTreeMap<i64, CanonicalValue>,
    ts: &Timestamps,
) -> ConflictReport {
    let mut report = ConflictReport::default();

    for mapping in mappings {
        let va = crm_values
            .get(&mapping.crm_field_id)
            .cloned()
            .unwrap_or(CanonicalValue::Empty);
        let vb = page_values
            .get(&mapping.crm_field_id)
            .cloned()
            .unwrap_or(CanonicalValue::Empty);

        if va == vb {
            continue;
        }

        report.divergences.push(FieldDivergence {
            mapping: mapping.clone(),
            crm_value: va,
            page_value: vb,
            resolution: resolve_side(direction, ts),
        });
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid ts")
    }

    fn stamps(ta: Option<i64>, tb: Option<i64>, ts: Option<i64>) -> Timestamps {
        Timestamps {
            crm_modified_at: ta.map(t),
            page_edited_at: tb.map(t),
            last_sync_at: ts.map(t),
        }
    }

    #[test]
    fn directed_pairs_always_pick_their_source() {
        let s = stamps(Some(100), Some(200), Some(50));
        assert_eq!(resolve_side(Direction::CrmToPages, &s), Resolution::TakeCrm);
        assert_eq!(resolve_side(Direction::PagesToCrm, &s), Resolution::TakePages);
    }

    #[test]
    fn bidirectional_single_newer_side_wins() {
        // CRM changed after the watermark, page did not.
        let s = stamps(Some(105), Some(99), Some(100));
        assert_eq!(resolve_side(Direction::Bidirectional, &s), Resolution::TakeCrm);

        // Page changed after the watermark, CRM did not.
        let s = stamps(Some(99), Some(105), Some(100));
        assert_eq!(resolve_side(Direction::Bidirectional, &s), Resolution::TakePages);
    }

    #[test]
    fn bidirectional_both_newer_later_wins() {
        let s = stamps(Some(110), Some(120), Some(100));
        assert_eq!(resolve_side(Direction::Bidirectional, &s), Resolution::TakePages);

        let s = stamps(Some(120), Some(110), Some(100));
        assert_eq!(resolve_side(Direction::Bidirectional, &s), Resolution::TakeCrm);
    }

    #[test]
    fn bidirectional_tie_is_manual() {
        let s = stamps(Some(110), Some(110), Some(100));
        assert_eq!(resolve_side(Direction::Bidirectional, &s), Resolution::Manual);
    }

    #[test]
    fn bidirectional_neither_newer_is_manual() {
        // Values differ but both timestamps predate the watermark: the
        // change came from somewhere we cannot see.
        let s = stamps(Some(90), Some(95), Some(100));
        assert_eq!(resolve_side(Direction::Bidirectional, &s), Resolution::Manual);
    }

    #[test]
    fn missing_last_sync_treats_everything_as_newer() {
        // First run: the watermark is the epoch, so any modification counts.
        let s = stamps(Some(10), None, None);
        assert_eq!(resolve_side(Direction::Bidirectional, &s), Resolution::TakeCrm);
    }

    fn mapping(id: i64, name: &str) -> FieldMapping {
        FieldMapping {
            crm_field_id: id,
            crm_field_name: name.to_string(),
            page_property: name.to_string(),
            kind_hint: None,
        }
    }

    #[test]
    fn equal_canonical_forms_produce_no_divergence() {
        let mappings = vec![mapping(10, "Stage")];
        let mut crm = BTreeMap::new();
        crm.insert(10, CanonicalValue::Text("Seed".into()));
        let page = crm.clone();

        let report = detect(
            Direction::Bidirectional,
            &mappings,
            &crm,
            &page,
            &stamps(Some(1), Some(2), Some(3)),
        );
        assert!(report.is_clean());
    }

    #[test]
    fn divergence_carries_both_values_and_resolution() {
        let mappings = vec![mapping(10, "Stage")];
        let mut crm = BTreeMap::new();
        crm.insert(10, CanonicalValue::Text("X".into()));
        let mut page = BTreeMap::new();
        page.insert(10, CanonicalValue::Text("Y".into()));

        // Tie on timestamps => manual.
        let report = detect(
            Direction::Bidirectional,
            &mappings,
            &crm,
            &page,
            &stamps(Some(110), Some(110), Some(100)),
        );
        assert_eq!(report.manual_count(), 1);
        let d = &report.divergences[0];
        assert_eq!(d.crm_value, CanonicalValue::Text("X".into()));
        assert_eq!(d.page_value, CanonicalValue::Text("Y".into()));
    }

    #[test]
    fn missing_side_compares_as_empty() {
        let mappings = vec![mapping(10, "Stage")];
        let mut crm = BTreeMap::new();
        crm.insert(10, CanonicalValue::Text("Seed".into()));
        let page = BTreeMap::new();

        let report = detect(
            Direction::CrmToPages,
            &mappings,
            &crm,
            &page,
            &stamps(None, None, None),
        );
        assert_eq!(report.divergences.len(), 1);
        assert_eq!(report.divergences[0].resolution, Resolution::TakeCrm);
        assert_eq!(report.divergences[0].page_value, CanonicalValue::Empty);
    }
}
