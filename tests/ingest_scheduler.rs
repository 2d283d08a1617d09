// tests/ingest_scheduler.rs
mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hazard_ingest::ingest::scheduler::{manual_ticks, Scheduler, SchedulerStats};
use hazard_ingest::ingest::types::{FeedSource, RawFeedEvent};
use hazard_ingest::ingest::providers::eonet::EonetFeed;
use hazard_ingest::{IngestError, MemoryStore, Pipeline, RunOutcome, RunStage};
use tokio::sync::{Notify, Semaphore};

#[tokio::test]
async fn tick_during_active_run_is_skipped_not_queued() {
    let (trigger, ticks) = manual_ticks();
    let gate = Arc::new(Semaphore::new(0));
    let runs = Arc::new(AtomicUsize::new(0));

    let (g, r) = (gate.clone(), runs.clone());
    let sched = Scheduler::start(ticks, move |_cancel| {
        let (g, r) = (g.clone(), r.clone());
        async move {
            r.fetch_add(1, Ordering::SeqCst);
            let _permit = g.acquire().await;
        }
    });

    assert!(trigger.fire());
    assert!(common::wait_until(|| sched.is_running()).await);

    assert!(trigger.fire());
    assert!(common::wait_until(|| sched.stats().skipped == 1).await);

    gate.add_permits(1);
    assert!(common::wait_until(|| !sched.is_running()).await);

    assert!(trigger.fire());
    assert!(common::wait_until(|| sched.stats().started == 2).await);
    gate.add_permits(1);

    assert!(common::wait_until(|| !sched.is_running()).await);
    assert_eq!(
        sched.stats(),
        SchedulerStats {
            fired: 3,
            started: 2,
            skipped: 1
        }
    );
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    sched.stop().await;
}

#[tokio::test]
async fn stop_prevents_further_runs() {
    let (trigger, ticks) = manual_ticks();
    let runs = Arc::new(AtomicUsize::new(0));
    let r = runs.clone();
    let sched = Scheduler::start(ticks, move |_cancel| {
        let r = r.clone();
        async move {
            r.fetch_add(1, Ordering::SeqCst);
        }
    });

    trigger.fire();
    assert!(common::wait_until(|| runs.load(Ordering::SeqCst) == 1).await);
    sched.stop().await;

    assert!(!trigger.fire());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// Feed that parks until released, so a test can stop mid-fetch.
struct ParkedFeed {
    entered: Arc<Notify>,
    release: Arc<Notify>,
    inner: EonetFeed,
}

#[async_trait]
impl FeedSource for ParkedFeed {
    async fn fetch(&self) -> Result<Vec<RawFeedEvent>, IngestError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.fetch().await
    }

    fn name(&self) -> &'static str {
        "parked"
    }
}

#[tokio::test]
async fn stop_lets_current_stage_finish_then_cancels() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let feed = ParkedFeed {
        entered: entered.clone(),
        release: release.clone(),
        inner: EonetFeed::from_fixture(&common::feed_body(&[("A", 1.0, 1.0)])),
    };
    let store = Arc::new(MemoryStore::default());
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(feed),
        store.clone(),
        common::single_place_geocoder(1.0, 1.0, 50.0),
        3,
    ));

    let (trigger, ticks) = manual_ticks();
    let p = pipeline.clone();
    let sched = Scheduler::start(ticks, move |cancel| {
        let p = p.clone();
        async move {
            p.run(&cancel).await;
        }
    });

    trigger.fire();
    entered.notified().await;
    assert_eq!(pipeline.stage(), RunStage::Fetching);

    let stopping = tokio::spawn(sched.stop());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!stopping.is_finished());
    release.notify_one();
    stopping.await.unwrap();

    let report = pipeline.history().last().expect("run recorded");
    assert_eq!(
        report.outcome,
        RunOutcome::Cancelled {
            stage: RunStage::Deduplicating
        }
    );
    assert_eq!(pipeline.stage(), RunStage::Idle);
    assert!(store.is_empty());
}

#[tokio::test]
async fn cron_ticks_drive_runs() {
    let runs = Arc::new(AtomicUsize::new(0));
    let r = runs.clone();
    let sched = Scheduler::start_cron("* * * * * *", move |_cancel| {
        let r = r.clone();
        async move {
            r.fetch_add(1, Ordering::SeqCst);
        }
    })
    .await
    .unwrap();

    for _ in 0..40 {
        if runs.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(runs.load(Ordering::SeqCst) > 0);
    sched.stop().await;
}

#[tokio::test]
async fn malformed_cron_is_rejected() {
    let res = Scheduler::start_cron("every day", |_c| async {}).await;
    assert!(res.is_err());
}
