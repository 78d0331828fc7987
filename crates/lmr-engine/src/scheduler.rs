use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use lmr_db::Storage;
use lmr_schemas::SyncPair;

use crate::{ActiveSet, PairRunner};

struct Job {
    ticker: CancellationToken,
    handle: JoinHandle<()>,
}

/// Point-in-time view of the scheduler, served by the daemon status
/// surface.
#[derive(Debug, Clone)]
pub struct SchedulerSnapshot {
    /// Pair ids with an armed ticker.
    pub scheduled: Vec<i64>,
    /// Pair ids with a run in flight right now.
    pub active: Vec<i64>,
}

/// Owns one periodic ticker per active SyncPair.
///
/// Tickers are cooperative: a tick that finds its pair already running
/// skips without queueing a second run. Stopping a pair cancels its ticker
/// only — an in-flight run completes unless the engine-wide shutdown token
/// fires.
pub struct Scheduler {
    runner: Arc<PairRunner>,
    storage: Arc<dyn Storage>,
    jobs: Mutex<HashMap<i64, Job>>,
    active: ActiveSet,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        runner: Arc<PairRunner>,
        storage: Arc<dyn Storage>,
        active: ActiveSet,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            runner,
            storage,
            jobs: Mutex::new(HashMap::new()),
            active,
            shutdown,
        }
    }

    /// On startup: read every SyncPair and arm tickers for the active ones.
    pub async fn initialize(&self) -> Result<()> {
        let pairs = self.storage.list_sync_pairs().await?;
        let mut started = 0usize;
        for pair in pairs.iter().filter(|p| p.active) {
            match self.start(pair) {
                Ok(()) => started += 1,
                // A pair that fails to arm stays inactive until its next
                // lifecycle event; the others still come up.
                Err(e) => error!(pair_id = pair.id, error = %e, "failed to arm ticker"),
            }
        }
        info!(total = pairs.len(), started, "scheduler initialized");
        Ok(())
    }

    /// Arm (or re-arm) the ticker for one pair. The first tick fires
    /// immediately, so starting a pair also syncs it.
    pub fn start(&self, pair: &SyncPair) -> Result<()> {
        if pair.period_minutes == 0 {
            return Err(anyhow!(
                "pair {} has a zero sync period; refusing to arm",
                pair.id
            ));
        }

        let mut jobs = self.jobs.lock().expect("scheduler jobs poisoned");
        if let Some(previous) = jobs.remove(&pair.id) {
            previous.ticker.cancel();
            previous.handle.abort();
        }

        let ticker = CancellationToken::new();
        let handle = tokio::spawn(tick_loop(
            Arc::clone(&self.runner),
            self.active.clone(),
            pair.id,
            Duration::from_secs(u64::from(pair.period_minutes) * 60),
            ticker.clone(),
            self.shutdown.clone(),
        ));

        jobs.insert(pair.id, Job { ticker, handle });
        info!(pair_id = pair.id, period_minutes = pair.period_minutes, "ticker armed");
        Ok(())
    }

    /// Disarm one pair's ticker. The in-flight run, if any, completes.
    pub fn stop(&self, pair_id: i64) {
        let mut jobs = self.jobs.lock().expect("scheduler jobs poisoned");
        if let Some(job) = jobs.remove(&pair_id) {
            job.ticker.cancel();
            info!(pair_id, "ticker disarmed");
        } else {
            debug!(pair_id, "stop requested for pair without a ticker");
        }
    }

    /// Operator escape hatch; see [`ActiveSet::clear`].
    pub fn clear_active(&self) {
        warn!("clearing the active set; duplicate runs are possible until in-flight runs finish");
        self.active.clear();
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let mut scheduled: Vec<i64> = self
            .jobs
            .lock()
            .expect("scheduler jobs poisoned")
            .keys()
            .copied()
            .collect();
        scheduled.sort_unstable();
        SchedulerSnapshot {
            scheduled,
            active: self.active.snapshot(),
        }
    }

    /// Engine-wide shutdown: stop every ticker and cancel in-flight runs.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let mut jobs = self.jobs.lock().expect("scheduler jobs poisoned");
        for (_, job) in jobs.drain() {
            job.ticker.cancel();
        }
        info!("scheduler shut down");
    }
}

async fn tick_loop(
    runner: Arc<PairRunner>,
    active: ActiveSet,
    pair_id: i64,
    period: Duration,
    ticker_token: CancellationToken,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = ticker_token.cancelled() => break,
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        // Cooperative skip: never dispatch a second run of the same pair.
        if active.contains(pair_id) {
            debug!(pair_id, "tick skipped; run still in flight");
            continue;
        }

        match runner.run(pair_id, &shutdown).await {
            Ok(outcome) if outcome.busy => {
                debug!(pair_id, "tick lost the claim race");
            }
            Ok(outcome) => {
                debug!(pair_id, status = outcome.status.as_str(), "tick finished");
            }
            Err(e) => {
                error!(pair_id, error = %e, "tick failed outside the run lifecycle");
            }
        }
    }
}
