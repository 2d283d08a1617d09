// tests/common/mod.rs
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use hazard_ingest::config::GeocodeSettings;
use hazard_ingest::geocode::gazetteer::{Gazetteer, GazetteerEntry};
use hazard_ingest::Geocoder;

pub const FEED_FIXTURE: &str = include_str!("../fixtures/eonet_events.json");

pub fn geonames_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/geonames")
}

pub fn geocode_settings() -> GeocodeSettings {
    GeocodeSettings {
        dump_dir: geonames_dir(),
        ..GeocodeSettings::default()
    }
}

pub fn fixture_geocoder() -> Arc<Geocoder> {
    Arc::new(Geocoder::load(&geocode_settings()).expect("fixture gazetteer loads"))
}

/// Single-entry gazetteer at (lat, lon).
pub fn single_place_geocoder(lat: f64, lon: f64, max_km: f64) -> Arc<Geocoder> {
    let gz = Gazetteer::from_entries(vec![GazetteerEntry::new("Anchor", lat, lon, "XX")])
        .expect("one entry is enough");
    Arc::new(Geocoder::new(gz, max_km, 2))
}

/// Feed body with one Point sample per `(id, lon, lat)`.
pub fn feed_body(events: &[(&str, f64, f64)]) -> String {
    let items: Vec<serde_json::Value> = events
        .iter()
        .map(|(id, lon, lat)| {
            serde_json::json!({
                "id": id,
                "title": format!("event {id}"),
                "categories": [{"id": 8, "title": "Wildfires"}],
                "sources": [],
                "geometries": [
                    {"date": "2018-09-01T00:00:00Z", "type": "Point", "coordinates": [lon, lat]}
                ]
            })
        })
        .collect();
    serde_json::json!({ "events": items }).to_string()
}

/// Serve `router` on an ephemeral local port and return its base url.
pub async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server");
    });
    format!("http://{addr}/events")
}

/// Poll `cond` every 10ms for up to 2s.
pub async fn wait_until<F: Fn() -> bool>(cond: F) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    cond()
}
