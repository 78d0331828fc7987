//! Shared runtime state for lmr-daemon.
//!
//! Everything here is `Clone`-able via `Arc`; handlers receive
//! `State<Arc<AppState>>` from Axum.

use std::sync::Arc;

use serde::Serialize;

use lmr_engine::Scheduler;

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Point-in-time snapshot of daemon state, returned by GET /v1/status.
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    /// Pair ids with an armed ticker.
    pub scheduled_pairs: Vec<i64>,
    /// Pair ids with a run in flight right now.
    pub active_pairs: Vec<i64>,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub build: BuildInfo,
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            build: BuildInfo {
                service: "lmr-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            scheduler,
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        let snapshot = self.scheduler.snapshot();
        StatusSnapshot {
            daemon_uptime_secs: uptime_secs(),
            scheduled_pairs: snapshot.scheduled,
            active_pairs: snapshot.active,
        }
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}
