// src/ingest/mod.rs
pub mod dedup;
pub mod geometry;
pub mod providers;
pub mod scheduler;
pub mod types;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::IngestError;
use crate::geocode::Geocoder;
use crate::history::RunHistory;
use crate::ingest::types::FeedSource;
use crate::store::{self, EventStore};

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_runs_total", "Pipeline runs finished, any outcome.");
        describe_counter!("ingest_runs_failed_total", "Runs aborted by a stage failure.");
        describe_counter!(
            "ingest_runs_skipped_total",
            "Ticks dropped because a run was still active."
        );
        describe_counter!("ingest_events_total", "Events parsed from the feed.");
        describe_counter!("ingest_new_total", "Events not yet persisted.");
        describe_counter!(
            "ingest_dropped_geometry_total",
            "Events dropped for unsupported or malformed geometry."
        );
        describe_counter!("feed_requests_total", "Feed HTTP attempts.");
        describe_counter!("feed_retries_total", "Feed attempts that were retried.");
        describe_histogram!("feed_fetch_ms", "Feed request time in milliseconds.");
        describe_histogram!("feed_parse_ms", "Feed body parse time in milliseconds.");
        describe_counter!("geocode_lookups_total", "Reverse geocode lookups.");
        describe_counter!("geocode_misses_total", "Lookups with no place within range.");
        describe_counter!("geocode_failures_total", "Lookups that errored.");
        describe_gauge!("geocode_gazetteer_entries", "Entries in the loaded gazetteer.");
        describe_counter!("persist_inserted_total", "Records inserted.");
        describe_counter!("persist_skipped_total", "Records skipped on id conflict.");
        describe_counter!("persist_failed_total", "Records that failed to insert.");
        describe_histogram!("ingest_run_duration_ms", "Wall time of a run in milliseconds.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when ingest pipeline last ran."
        );
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Idle,
    Fetching,
    Deduplicating,
    Normalizing,
    Geocoding,
    Persisting,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub fetched: usize,
    pub new: usize,
    pub already_persisted: usize,
    pub repeated_in_batch: usize,
    pub dropped_geometry: usize,
    pub geocode_misses: usize,
    pub geocode_failures: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(RunStats),
    Failed {
        stage: RunStage,
        kind: String,
        error: String,
    },
    /// Cancellation was observed before `stage` started.
    Cancelled { stage: RunStage },
}

impl RunOutcome {
    fn failed(stage: RunStage, e: &IngestError) -> Self {
        RunOutcome::Failed {
            stage,
            kind: e.kind().to_string(),
            error: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn stats(&self) -> Option<&RunStats> {
        match &self.outcome {
            RunOutcome::Completed(s) => Some(s),
            _ => None,
        }
    }
}

/// Fetch → dedup → round → convert → geocode → persist, once per call.
///
/// Collaborators are injected; the pipeline itself holds no feed or store
/// state between runs apart from the report history.
pub struct Pipeline {
    feed: Arc<dyn FeedSource>,
    store: Arc<dyn EventStore>,
    geocoder: Arc<Geocoder>,
    precision: u32,
    history: Arc<RunHistory>,
    stage: Mutex<RunStage>,
}

impl Pipeline {
    pub fn new(
        feed: Arc<dyn FeedSource>,
        store: Arc<dyn EventStore>,
        geocoder: Arc<Geocoder>,
        precision: u32,
    ) -> Self {
        Self {
            feed,
            store,
            geocoder,
            precision: precision.min(geometry::MAX_PRECISION),
            history: Arc::new(RunHistory::with_capacity(100)),
            stage: Mutex::new(RunStage::Idle),
        }
    }

    pub fn with_history(mut self, history: Arc<RunHistory>) -> Self {
        self.history = history;
        self
    }

    pub fn history(&self) -> Arc<RunHistory> {
        Arc::clone(&self.history)
    }

    pub fn stage(&self) -> RunStage {
        *self.stage.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_stage(&self, stage: RunStage) {
        *self.stage.lock().unwrap_or_else(|p| p.into_inner()) = stage;
    }

    fn enter(&self, cancel: &CancellationToken, stage: RunStage) -> Result<(), RunOutcome> {
        if cancel.is_cancelled() {
            return Err(RunOutcome::Cancelled { stage });
        }
        self.set_stage(stage);
        tracing::debug!(target: "ingest", ?stage, "entering stage");
        Ok(())
    }

    /// Execute one run. Never panics on stage errors; the outcome is in the
    /// returned report, which is also appended to the history.
    pub async fn run(&self, cancel: &CancellationToken) -> RunReport {
        ensure_metrics_described();
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let t0 = Instant::now();

        let span = tracing::info_span!("ingest_run", %run_id, feed = self.feed.name());
        let outcome = match self.execute(cancel).instrument(span).await {
            Ok(stats) => RunOutcome::Completed(stats),
            Err(outcome) => outcome,
        };
        self.set_stage(RunStage::Idle);

        let elapsed_ms = t0.elapsed().as_secs_f64() * 1_000.0;
        counter!("ingest_runs_total").increment(1);
        histogram!("ingest_run_duration_ms").record(elapsed_ms);
        gauge!("ingest_pipeline_last_run_ts").set(Utc::now().timestamp().max(0) as f64);

        match &outcome {
            RunOutcome::Completed(s) => tracing::info!(
                target: "ingest",
                %run_id,
                fetched = s.fetched,
                new = s.new,
                dropped_geometry = s.dropped_geometry,
                geocode_misses = s.geocode_misses,
                inserted = s.inserted,
                skipped = s.skipped,
                failed = s.failed,
                elapsed_ms = elapsed_ms as u64,
                "ingest run completed"
            ),
            RunOutcome::Failed { stage, kind, error } => {
                counter!("ingest_runs_failed_total", "kind" => kind.clone()).increment(1);
                tracing::error!(target: "ingest", %run_id, ?stage, kind = %kind, error = %error, "ingest run failed");
            }
            RunOutcome::Cancelled { stage } => {
                tracing::info!(target: "ingest", %run_id, ?stage, "ingest run cancelled")
            }
        }

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcome,
        };
        self.history.push(report.clone());
        report
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<RunStats, RunOutcome> {
        let mut stats = RunStats::default();

        self.enter(cancel, RunStage::Fetching)?;
        let fetched = self
            .feed
            .fetch()
            .await
            .map_err(|e| RunOutcome::failed(RunStage::Fetching, &e))?;
        stats.fetched = fetched.len();

        self.enter(cancel, RunStage::Deduplicating)?;
        let existing = store::load_ids(self.store.as_ref())
            .await
            .map_err(|e| RunOutcome::failed(RunStage::Deduplicating, &e))?;
        let deduped = dedup::filter_new(fetched, &existing);
        stats.new = deduped.fresh.len();
        stats.already_persisted = deduped.already_persisted;
        stats.repeated_in_batch = deduped.repeated_in_batch;
        counter!("ingest_new_total").increment(stats.new as u64);

        self.enter(cancel, RunStage::Normalizing)?;
        let rounded = geometry::round_events(deduped.fresh, self.precision);
        let converted = geometry::to_canonical(rounded);
        stats.dropped_geometry = converted.dropped.len();
        counter!("ingest_dropped_geometry_total").increment(stats.dropped_geometry as u64);

        self.enter(cancel, RunStage::Geocoding)?;
        let resolved = self.geocoder.resolve(converted.events).await;
        stats.geocode_misses = resolved.misses;
        stats.geocode_failures = resolved.failures;

        self.enter(cancel, RunStage::Persisting)?;
        let summary = store::insert_all(self.store.as_ref(), &resolved.events).await;
        stats.inserted = summary.inserted;
        stats.skipped = summary.skipped;
        stats.failed = summary.failed;

        Ok(stats)
    }
}
