//! Scenario: scheduler arms tickers for active pairs and tears them down.
//!
//! # Invariants under test
//!
//! 1. `initialize` arms a ticker per active pair only; the first tick fires
//!    immediately, so starting a pair also syncs it.
//! 2. A zero period refuses to arm instead of spinning.
//! 3. `stop` disarms the ticker; `shutdown` cancels in-flight work.
//! 4. `clear_active` empties the active set without touching tickers.

use std::sync::Arc;
use std::time::Duration;

use lmr_config::EngineConfig;
use lmr_crm::CrmApi;
use lmr_db::Storage;
use lmr_engine::{ActiveSet, PairRunner, Scheduler};
use lmr_pages::PagesApi;
use lmr_schemas::{DatabaseInfo, Direction, FieldMapping, PropertyKind, SyncPair};
use lmr_testkit::{FakeCrm, FakePages, MemStorage};
use tokio_util::sync::CancellationToken;

fn pair(id: i64, active: bool, period_minutes: u32) -> SyncPair {
    SyncPair {
        id,
        name: format!("pair-{id}"),
        list_ref: "list-1".to_string(),
        db_ref: "db-1".to_string(),
        direction: Direction::CrmToPages,
        period_minutes,
        field_mappings: vec![FieldMapping {
            crm_field_id: 10,
            crm_field_name: "Stage".to_string(),
            page_property: "Stage".to_string(),
            kind_hint: None,
        }],
        status_filters: vec![],
        status_field_id: None,
        active,
        last_sync_at: None,
    }
}

struct Harness {
    storage: Arc<MemStorage>,
    scheduler: Scheduler,
}

fn harness() -> Harness {
    let crm = Arc::new(FakeCrm::new());
    let pages = Arc::new(FakePages::new());
    let storage = Arc::new(MemStorage::new());

    pages.add_database(DatabaseInfo {
        db_ref: "db-1".to_string(),
        name: "Deals".to_string(),
        schema: [("Stage".to_string(), PropertyKind::Select)]
            .into_iter()
            .collect(),
    });

    let active = ActiveSet::new();
    let runner = Arc::new(PairRunner::new(
        crm as Arc<dyn CrmApi>,
        pages as Arc<dyn PagesApi>,
        Arc::clone(&storage) as Arc<dyn Storage>,
        EngineConfig::default(),
        "cfg-test".to_string(),
        active.clone(),
    ));
    let scheduler = Scheduler::new(
        runner,
        Arc::clone(&storage) as Arc<dyn Storage>,
        active,
        CancellationToken::new(),
    );

    Harness { storage, scheduler }
}

#[tokio::test]
async fn initialize_arms_active_pairs_only() {
    let h = harness();
    h.storage.insert_pair(pair(1, true, 15));
    h.storage.insert_pair(pair(2, false, 15));

    h.scheduler.initialize().await.unwrap();

    let snapshot = h.scheduler.snapshot();
    assert_eq!(snapshot.scheduled, vec![1]);

    // First tick is immediate: the active pair syncs shortly after arming.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let history = h.storage.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].sync_pair_id, 1);

    h.scheduler.shutdown();
}

#[tokio::test]
async fn zero_period_refuses_to_arm() {
    let h = harness();
    let p = pair(1, true, 0);
    h.storage.insert_pair(p.clone());

    assert!(h.scheduler.start(&p).is_err());
    assert!(h.scheduler.snapshot().scheduled.is_empty());
}

#[tokio::test]
async fn initialize_survives_one_bad_pair() {
    let h = harness();
    h.storage.insert_pair(pair(1, true, 0));
    h.storage.insert_pair(pair(2, true, 15));

    h.scheduler.initialize().await.unwrap();

    assert_eq!(h.scheduler.snapshot().scheduled, vec![2]);
    h.scheduler.shutdown();
}

#[tokio::test]
async fn stop_disarms_the_ticker() {
    let h = harness();
    let p = pair(1, true, 15);
    h.storage.insert_pair(p.clone());

    h.scheduler.start(&p).unwrap();
    assert_eq!(h.scheduler.snapshot().scheduled, vec![1]);

    h.scheduler.stop(1);
    assert!(h.scheduler.snapshot().scheduled.is_empty());
    h.scheduler.shutdown();
}

#[tokio::test]
async fn restart_replaces_the_previous_ticker() {
    let h = harness();
    let p = pair(1, true, 15);
    h.storage.insert_pair(p.clone());

    h.scheduler.start(&p).unwrap();
    h.scheduler.start(&p).unwrap();

    assert_eq!(h.scheduler.snapshot().scheduled, vec![1]);
    h.scheduler.shutdown();
}

#[tokio::test]
async fn clear_active_empties_the_set() {
    let h = harness();
    let active = ActiveSet::new();
    active.try_claim(7);

    let scheduler = {
        let crm = Arc::new(FakeCrm::new());
        let pages = Arc::new(FakePages::new());
        let runner = Arc::new(PairRunner::new(
            crm as Arc<dyn CrmApi>,
            pages as Arc<dyn PagesApi>,
            Arc::clone(&h.storage) as Arc<dyn Storage>,
            EngineConfig::default(),
            "cfg-test".to_string(),
            active.clone(),
        ));
        Scheduler::new(
            runner,
            Arc::clone(&h.storage) as Arc<dyn Storage>,
            active.clone(),
            CancellationToken::new(),
        )
    };

    assert_eq!(scheduler.snapshot().active, vec![7]);
    scheduler.clear_active();
    assert!(scheduler.snapshot().active.is_empty());
}
