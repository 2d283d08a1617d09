//! hazard-ingest: binary entrypoint
//! Loads config and the gazetteer, then drives the ingest pipeline on a cron
//! schedule until Ctrl-C.

use anyhow::{Context, Result};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hazard_ingest::{
    api,
    config::IngestConfig,
    ingest::{
        providers::eonet::EonetFeed,
        scheduler::{CronTicks, Scheduler},
        Pipeline,
    },
    metrics::Metrics,
    Geocoder, RunHistory, SqliteStore,
};

/// `LOG_FORMAT=json` switches to JSON lines; compact text otherwise.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hazard_ingest=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "hazard-ingest exiting");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cfg = IngestConfig::load_default().context("loading ingest config")?;
    let metrics = Metrics::init()?;

    // No scheduling without a gazetteer.
    let geocoder = Geocoder::spawn_load(cfg.geocode.clone())
        .await
        .context("loading gazetteer")?;

    let store = SqliteStore::connect(&cfg.store.database_url).await?;
    let feed = EonetFeed::from_settings(&cfg.feed)?;
    let history = Arc::new(RunHistory::with_capacity(cfg.history.capacity));

    let pipeline = Arc::new(
        Pipeline::new(
            Arc::new(feed),
            Arc::new(store),
            Arc::new(geocoder),
            cfg.geometry.precision,
        )
        .with_history(Arc::clone(&history)),
    );

    let http = match cfg.http.addr.as_deref() {
        Some(addr) => Some(api::serve(addr, api::create_router(history, Some(&metrics))).await?),
        None => None,
    };

    let ticks = CronTicks::new(&cfg.schedule.cron).await?;
    let startup_trigger = ticks.trigger();
    let scheduler = Scheduler::start(ticks, move |cancel: CancellationToken| {
        let p = Arc::clone(&pipeline);
        async move {
            p.run(&cancel).await;
        }
    });
    tracing::info!(schedule = %cfg.schedule.cron, "scheduler started");

    if cfg.schedule.run_on_start && !startup_trigger.fire() {
        tracing::warn!("could not queue startup run");
    }
    drop(startup_trigger);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    tracing::info!("shutdown requested");

    scheduler.stop().await;
    if let Some(h) = http {
        h.abort();
    }
    Ok(())
}
