// src/ingest/scheduler.rs
//! Trigger loop that drives pipeline runs, one at a time.
//!
//! Ticks come from a [`TickSource`]. Production uses [`CronTicks`]; tests use
//! [`ChannelTicks`] and fire ticks by hand through a [`ManualTrigger`].

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

const TICK_BUFFER: usize = 16;

#[async_trait]
pub trait TickSource: Send + 'static {
    /// Wait for the next tick. `None` ends the scheduler loop.
    async fn next_tick(&mut self) -> Option<DateTime<Utc>>;

    /// Release whatever drives the ticks. Called once when the loop exits.
    async fn close(&mut self) {}
}

pub struct ChannelTicks {
    rx: mpsc::Receiver<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct ManualTrigger {
    tx: mpsc::Sender<DateTime<Utc>>,
}

impl ManualTrigger {
    /// Queue a tick. Returns false if the scheduler is gone or the buffer is full.
    pub fn fire(&self) -> bool {
        self.tx.try_send(Utc::now()).is_ok()
    }
}

/// A trigger and its tick source. Dropping every trigger ends the source.
pub fn manual_ticks() -> (ManualTrigger, ChannelTicks) {
    let (tx, rx) = mpsc::channel(TICK_BUFFER);
    (ManualTrigger { tx }, ChannelTicks { rx })
}

#[async_trait]
impl TickSource for ChannelTicks {
    async fn next_tick(&mut self) -> Option<DateTime<Utc>> {
        self.rx.recv().await
    }
}

/// Cron-driven ticks. Accepts `min hour dom month dow` or the same with a
/// leading seconds field.
pub struct CronTicks {
    sched: JobScheduler,
    trigger: ManualTrigger,
    ticks: ChannelTicks,
}

impl CronTicks {
    pub async fn new(expr: &str) -> Result<Self> {
        let schedule = normalize_cron(expr)?;
        let (trigger, ticks) = manual_ticks();

        let sched = JobScheduler::new()
            .await
            .context("creating cron scheduler")?;
        let job_trigger = trigger.clone();
        let job = Job::new_async(schedule.as_str(), move |_uuid, _l| {
            let t = job_trigger.clone();
            Box::pin(async move {
                if !t.fire() {
                    tracing::warn!(target: "scheduler", "tick buffer full, dropping cron tick");
                }
            })
        })
        .with_context(|| format!("invalid schedule `{expr}`"))?;
        sched.add(job).await.context("adding cron job")?;
        sched.start().await.context("starting cron scheduler")?;

        Ok(Self {
            sched,
            trigger,
            ticks,
        })
    }

    /// Extra trigger feeding the same source, e.g. for a run at startup.
    pub fn trigger(&self) -> ManualTrigger {
        self.trigger.clone()
    }
}

#[async_trait]
impl TickSource for CronTicks {
    async fn next_tick(&mut self) -> Option<DateTime<Utc>> {
        self.ticks.next_tick().await
    }

    async fn close(&mut self) {
        if let Err(e) = self.sched.shutdown().await {
            tracing::warn!(target: "scheduler", error = %e, "cron scheduler shutdown failed");
        }
    }
}

/// Five fields get a `0` seconds field prepended; six pass through.
pub fn normalize_cron(expr: &str) -> Result<String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 => Ok(fields.join(" ")),
        n => Err(anyhow!(
            "schedule `{expr}` has {n} fields, expected 5 (min hour dom month dow) or 6"
        )),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SchedulerStats {
    pub fired: u64,
    pub started: u64,
    pub skipped: u64,
}

#[derive(Default)]
struct Counters {
    fired: AtomicU64,
    started: AtomicU64,
    skipped: AtomicU64,
}

/// Clears the run flag when the run task ends, panicking or not.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl Scheduler {
    /// Spawn the trigger loop. `run_fn` is invoked once per accepted tick;
    /// ticks arriving while a run is active are dropped.
    pub fn start<T, F, Fut>(ticks: T, run_fn: F) -> Self
    where
        T: TickSource,
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let running = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let handle = tokio::spawn(trigger_loop(
            ticks,
            run_fn,
            cancel.clone(),
            Arc::clone(&running),
            Arc::clone(&counters),
        ));

        Self {
            cancel,
            handle,
            running,
            counters,
        }
    }

    pub async fn start_cron<F, Fut>(expr: &str, run_fn: F) -> Result<Self>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let ticks = CronTicks::new(expr).await?;
        tracing::info!(target: "scheduler", schedule = %expr, "cron schedule armed");
        Ok(Self::start(ticks, run_fn))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            fired: self.counters.fired.load(Ordering::Relaxed),
            started: self.counters.started.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting ticks, signal the in-flight run and wait for it.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!(target: "scheduler", error = %e, "scheduler loop ended abnormally");
        }
        tracing::info!(target: "scheduler", "scheduler stopped");
    }
}

async fn trigger_loop<T, F, Fut>(
    mut ticks: T,
    run_fn: F,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
) where
    T: TickSource,
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut in_flight: Option<JoinHandle<()>> = None;
    loop {
        let tick = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            t = ticks.next_tick() => t,
        };
        let Some(at) = tick else { break };
        counters.fired.fetch_add(1, Ordering::Relaxed);

        if running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            counter!("ingest_runs_skipped_total").increment(1);
            tracing::warn!(target: "scheduler", tick = %at, "previous run still active, skipping tick");
            continue;
        }

        counters.started.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(target: "scheduler", tick = %at, "starting run");
        let guard = RunGuard(Arc::clone(&running));
        let fut = run_fn(cancel.child_token());
        in_flight = Some(tokio::spawn(async move {
            let _guard = guard;
            fut.await;
        }));
    }

    ticks.close().await;
    if let Some(h) = in_flight {
        if let Err(e) = h.await {
            tracing::error!(target: "scheduler", error = %e, "run task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cron_field_counts() {
        assert_eq!(normalize_cron("0 0 * * *").unwrap(), "0 0 0 * * *");
        assert_eq!(normalize_cron(" */5  * * * * * ").unwrap(), "*/5 * * * * *");
        assert!(normalize_cron("* * *").is_err());
        assert!(normalize_cron("").is_err());
    }

    #[tokio::test]
    async fn exhausted_source_ends_loop() {
        let (trigger, ticks) = manual_ticks();
        let sched = Scheduler::start(ticks, |_c| async {});
        assert!(trigger.fire());
        drop(trigger);
        // loop ends on its own once the channel drains
        sched.stop().await;
    }

    #[tokio::test]
    async fn panicking_run_releases_flag() {
        let (trigger, ticks) = manual_ticks();
        let sched = Scheduler::start(ticks, |_c| async { panic!("boom") });
        trigger.fire();
        for _ in 0..100 {
            if sched.stats().started == 1 && !sched.is_running() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!sched.is_running());
        trigger.fire();
        for _ in 0..100 {
            if sched.stats().started == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(sched.stats().started, 2);
        sched.stop().await;
    }
}
