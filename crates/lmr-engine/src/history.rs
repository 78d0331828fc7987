use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};

use lmr_db::Storage;
use lmr_schemas::{HistoryEntry, RunStatus};

use crate::runner::RunOutcome;

/// Appends one history row per finished run and emits the monitoring
/// signals. Signals are observability only — nothing reads them back.
pub struct HistorySink {
    storage: Arc<dyn Storage>,
    duration_warn_ms: i64,
    large_creation_count: u32,
}

impl HistorySink {
    pub fn new(storage: Arc<dyn Storage>, duration_warn_ms: i64, large_creation_count: u32) -> Self {
        Self {
            storage,
            duration_warn_ms,
            large_creation_count,
        }
    }

    pub async fn record(&self, outcome: &RunOutcome) -> Result<()> {
        let entry = HistoryEntry {
            sync_pair_id: outcome.pair_id,
            status: outcome.status,
            counters: outcome.counters,
            duration_ms: outcome.duration_ms,
            error_message: outcome.error_message.clone(),
            details: outcome.details.clone(),
            created_at: Utc::now(),
        };
        self.storage.append_history(&entry).await?;

        match outcome.status {
            RunStatus::Error => error!(
                pair_id = outcome.pair_id,
                error = outcome.error_message.as_deref().unwrap_or("unknown"),
                "sync run failed"
            ),
            _ => info!(
                pair_id = outcome.pair_id,
                created = outcome.counters.records_created,
                updated = outcome.counters.records_updated,
                archived = outcome.counters.records_archived,
                conflicts = outcome.counters.conflicts_found,
                duration_ms = outcome.duration_ms,
                "sync run finished"
            ),
        }

        if outcome.counters.conflicts_found > 0 {
            warn!(
                pair_id = outcome.pair_id,
                conflicts = outcome.counters.conflicts_found,
                "run surfaced manual conflicts"
            );
        }
        if outcome.duration_ms > self.duration_warn_ms {
            warn!(
                pair_id = outcome.pair_id,
                duration_ms = outcome.duration_ms,
                threshold_ms = self.duration_warn_ms,
                "run exceeded duration threshold"
            );
        }
        if outcome.counters.records_created > self.large_creation_count {
            info!(
                pair_id = outcome.pair_id,
                created = outcome.counters.records_created,
                "unusually large creation count"
            );
        }

        Ok(())
    }
}
