use chrono::{DateTime, Utc};
use lmr_schemas::FieldMapping;
use lmr_values::CanonicalValue;

/// What to do about one diverged field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Mirror the CRM value onto the page.
    TakeCrm,
    /// Stage the page value as a CRM write.
    TakePages,
    /// Neither side can be trusted; surface for an external decision.
    Manual,
}

/// The three timestamps the bidirectional rule operates on.
#[derive(Debug, Clone, Copy)]
pub struct Timestamps {
    /// Entity-level CRM modification time; absent means "not modified since
    /// anyone looked".
    pub crm_modified_at: Option<DateTime<Utc>>,
    pub page_edited_at: Option<DateTime<Utc>>,
    /// The pair's last successful sync; absent on the first run.
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// One mapped field where the canonical forms disagree.
#[derive(Debug, Clone)]
pub struct FieldDivergence {
    pub mapping: FieldMapping,
    pub crm_value: CanonicalValue,
    pub page_value: CanonicalValue,
    pub resolution: Resolution,
}

/// Outcome for one (entry, page) pair. Divergences preserve mapping order.
#[derive(Debug, Clone, Default)]
pub struct ConflictReport {
    pub divergences: Vec<FieldDivergence>,
}

impl ConflictReport {
    pub fn is_clean(&self) -> bool {
        self.divergences.is_empty()
    }

    pub fn manual_count(&self) -> usize {
        self.divergences
            .iter()
            .filter(|d| d.resolution == Resolution::Manual)
            .count()
    }

    pub fn has_manual(&self) -> bool {
        self.manual_count() > 0
    }

    pub fn manual(&self) -> impl Iterator<Item = &FieldDivergence> {
        self.divergences
            .iter()
            .filter(|d| d.resolution == Resolution::Manual)
    }
}
