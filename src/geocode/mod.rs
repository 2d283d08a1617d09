// src/geocode/mod.rs
//! Offline reverse geocoding.
//!
//! `Geocoder` is the context object that owns the loaded gazetteer. Build it
//! once at startup and hand an `Arc` to the pipeline; it is never mutated.

pub mod gazetteer;
pub mod kdtree;

use futures::stream::{self, StreamExt};
use metrics::{counter, gauge};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{GeocodeSettings, MAX_GEOCODE_WORKERS};
use crate::error::IngestError;
use crate::geocode::gazetteer::Gazetteer;
use crate::ingest::types::{NormalizedEvent, Place, Position};

#[derive(Debug, Clone)]
pub struct Geocoder {
    gazetteer: Arc<Gazetteer>,
    max_distance_km: f64,
    workers: usize,
    with_admin3and4: bool,
}

#[derive(Debug, Default)]
pub struct ResolveOutcome {
    pub events: Vec<NormalizedEvent>,
    pub lookups: usize,
    /// Samples left without a place: no anchor or nothing within range.
    pub misses: usize,
    pub failures: usize,
}

impl Geocoder {
    /// Load the gazetteer subsets selected in `cfg`. Any failure here is
    /// fatal for the process.
    pub fn load(cfg: &GeocodeSettings) -> Result<Self, IngestError> {
        let t0 = Instant::now();
        let gazetteer = Gazetteer::load(cfg)?;
        let stats = gazetteer.stats();
        tracing::info!(
            target: "geocode",
            dir = %cfg.dump_dir.display(),
            cities = stats.cities,
            admin1 = stats.admin1_names,
            admin2 = stats.admin2_names,
            alternate_names = stats.alternate_names,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "gazetteer loaded"
        );
        gauge!("geocode_gazetteer_entries").set(gazetteer.len() as f64);
        Ok(Self::new(gazetteer, cfg.max_distance_km, cfg.workers).with_admin3and4(cfg.admin3and4))
    }

    /// `load` on the blocking pool, keeping the dump parse off the runtime
    /// workers.
    pub async fn spawn_load(cfg: GeocodeSettings) -> Result<Self, IngestError> {
        tokio::task::spawn_blocking(move || Self::load(&cfg))
            .await
            .map_err(|e| IngestError::GazetteerLoadFailure(format!("loader task: {e}")))?
    }

    pub fn new(gazetteer: Gazetteer, max_distance_km: f64, workers: usize) -> Self {
        Self {
            gazetteer: Arc::new(gazetteer),
            max_distance_km,
            workers: workers.clamp(1, MAX_GEOCODE_WORKERS),
            with_admin3and4: false,
        }
    }

    pub fn with_admin3and4(mut self, on: bool) -> Self {
        self.with_admin3and4 = on;
        self
    }

    pub fn gazetteer(&self) -> &Gazetteer {
        &self.gazetteer
    }

    /// Nearest place within the distance threshold. `Ok(None)` is a miss.
    pub fn lookup(&self, pos: Position) -> Result<Option<Place>, IngestError> {
        lookup_in(
            &self.gazetteer,
            pos,
            self.max_distance_km,
            self.with_admin3and4,
        )
    }

    /// Attach a place to every sample. Events are processed with at most
    /// `workers` lookups in flight; output order matches input order and no
    /// event is ever dropped here.
    pub async fn resolve(&self, events: Vec<NormalizedEvent>) -> ResolveOutcome {
        let anchors: Vec<Vec<Option<Position>>> = events
            .iter()
            .map(|ev| ev.samples.iter().map(|s| s.geometry.anchor()).collect())
            .collect();

        let results: Vec<Vec<Result<Option<Place>, IngestError>>> = stream::iter(anchors)
            .map(|points| {
                let gz = Arc::clone(&self.gazetteer);
                let max_km = self.max_distance_km;
                let admin34 = self.with_admin3and4;
                let n = points.len();
                async move {
                    let joined = tokio::task::spawn_blocking(move || {
                        points
                            .into_iter()
                            .map(|p| match p {
                                Some(p) => lookup_in(&gz, p, max_km, admin34),
                                None => Ok(None),
                            })
                            .collect::<Vec<_>>()
                    })
                    .await;
                    match joined {
                        Ok(v) => v,
                        Err(e) => (0..n)
                            .map(|_| Err(IngestError::GeocodeLookupFailure(e.to_string())))
                            .collect(),
                    }
                }
            })
            .buffered(self.workers)
            .collect()
            .await;

        let mut out = ResolveOutcome {
            events: Vec::with_capacity(events.len()),
            ..Default::default()
        };
        for (mut ev, places) in events.into_iter().zip(results) {
            for (sample, res) in ev.samples.iter_mut().zip(places) {
                out.lookups += 1;
                match res {
                    Ok(Some(place)) => sample.place = Some(place),
                    Ok(None) => out.misses += 1,
                    Err(e) => {
                        tracing::warn!(target: "geocode", id = %ev.id, error = %e, "lookup failed");
                        out.failures += 1;
                    }
                }
            }
            out.events.push(ev);
        }

        counter!("geocode_lookups_total").increment(out.lookups as u64);
        counter!("geocode_misses_total").increment(out.misses as u64);
        counter!("geocode_failures_total").increment(out.failures as u64);
        out
    }
}

fn lookup_in(
    gz: &Gazetteer,
    pos: Position,
    max_distance_km: f64,
    with_admin3and4: bool,
) -> Result<Option<Place>, IngestError> {
    let [lon, lat] = pos;
    if !lon.is_finite() || !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(IngestError::GeocodeLookupFailure(format!(
            "coordinate out of range: [{lon}, {lat}]"
        )));
    }
    let Some((entry, km)) = gz.nearest(lat, lon) else {
        return Ok(None);
    };
    if km > max_distance_km {
        return Ok(None);
    }
    Ok(Some(Place {
        name: entry.name.clone(),
        admin1: entry.admin1.clone(),
        admin2: entry.admin2.clone(),
        admin3: entry.admin3_code.clone().filter(|_| with_admin3and4),
        admin4: entry.admin4_code.clone().filter(|_| with_admin3and4),
        country_code: entry.country_code.clone(),
        distance_km: km,
    }))
}
