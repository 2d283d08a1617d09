// src/config/mod.rs
//! Layered configuration: built-in defaults, then a TOML file, then env.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::geometry::MAX_PRECISION;
use crate::ingest::providers::eonet::DEFAULT_EONET_URL;

pub const ENV_CONFIG_PATH: &str = "INGEST_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/ingest.toml";

pub const DEFAULT_SCHEDULE: &str = "0 0 * * *";
pub const DEFAULT_PRECISION: u32 = 3;
pub const DEFAULT_MAX_DISTANCE_KM: f64 = 50.0;
pub const DEFAULT_GEOCODE_WORKERS: usize = 4;
pub const MAX_GEOCODE_WORKERS: usize = 64;

fn default_feed_url() -> String {
    DEFAULT_EONET_URL.to_string()
}
fn default_status() -> String {
    "open".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSettings {
    #[serde(default = "default_feed_url")]
    pub url: String,
    /// Static key appended as `api_key`; "ENV" reads `EONET_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// "open" | "closed" | "all"
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub days: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            api_key: None,
            status: default_status(),
            days: None,
            limit: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

fn default_cron() -> String {
    DEFAULT_SCHEDULE.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default = "default_cron")]
    pub cron: String,
    /// Fire one run right after startup, before the first cron tick.
    #[serde(default)]
    pub run_on_start: bool,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            cron: default_cron(),
            run_on_start: false,
        }
    }
}

fn default_precision() -> u32 {
    DEFAULT_PRECISION
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometrySettings {
    /// Decimal digits kept per coordinate component.
    #[serde(default = "default_precision")]
    pub precision: u32,
}

impl Default for GeometrySettings {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
        }
    }
}

fn default_dump_dir() -> PathBuf {
    PathBuf::from("geonames")
}
fn default_true() -> bool {
    true
}
fn default_language() -> String {
    "en".to_string()
}
fn default_max_distance_km() -> f64 {
    DEFAULT_MAX_DISTANCE_KM
}
fn default_workers() -> usize {
    DEFAULT_GEOCODE_WORKERS
}

/// Which gazetteer subsets to load. Disabling subsets trades recall for
/// memory and startup time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodeSettings {
    #[serde(default = "default_dump_dir")]
    pub dump_dir: PathBuf,
    #[serde(default = "default_true")]
    pub admin1: bool,
    #[serde(default)]
    pub admin2: bool,
    #[serde(default)]
    pub admin3and4: bool,
    #[serde(default)]
    pub alternate_names: bool,
    /// ISO 639 code picked from the alternate names table.
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_max_distance_km")]
    pub max_distance_km: f64,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for GeocodeSettings {
    fn default() -> Self {
        Self {
            dump_dir: default_dump_dir(),
            admin1: true,
            admin2: false,
            admin3and4: false,
            alternate_names: false,
            language: default_language(),
            max_distance_km: DEFAULT_MAX_DISTANCE_KM,
            workers: DEFAULT_GEOCODE_WORKERS,
        }
    }
}

fn default_database_url() -> String {
    "sqlite://events.db".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpSettings {
    /// e.g. "127.0.0.1:9090"; unset disables the operational HTTP surface.
    #[serde(default)]
    pub addr: Option<String>,
}

fn default_history_capacity() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySettings {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub feed: FeedSettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub geometry: GeometrySettings,
    #[serde(default)]
    pub geocode: GeocodeSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub history: HistorySettings,
}

impl IngestConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: IngestConfig = toml::from_str(s).context("parsing ingest config toml")?;
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading ingest config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Resolve the config file and apply env overrides:
    /// 1) $INGEST_CONFIG_PATH (must exist)
    /// 2) config/ingest.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_p.exists() {
                Self::load_from(&default_p)?
            } else {
                IngestConfig::default()
            }
        };
        cfg.apply_env_overrides()?;
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("EONET_URL") {
            self.feed.url = v;
        }
        let key_from_env = self
            .feed
            .api_key
            .as_deref()
            .is_some_and(|k| k.trim().eq_ignore_ascii_case("env"));
        match std::env::var("EONET_API_KEY") {
            Ok(v) => self.feed.api_key = Some(v),
            Err(_) if key_from_env => {
                return Err(anyhow!("feed.api_key is \"ENV\" but EONET_API_KEY is not set"))
            }
            Err(_) => {}
        }
        if let Ok(v) = std::env::var("INGEST_SCHEDULE") {
            self.schedule.cron = v;
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.store.database_url = v;
        }
        if let Ok(v) = std::env::var("GEONAMES_DIR") {
            self.geocode.dump_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("HTTP_ADDR") {
            self.http.addr = Some(v).filter(|s| !s.trim().is_empty());
        }
        Ok(())
    }

    /// Clamp out-of-range values back into something usable.
    pub fn sanitize(&mut self) {
        if self.geometry.precision > MAX_PRECISION {
            self.geometry.precision = MAX_PRECISION;
        }
        if !self.geocode.max_distance_km.is_finite() || self.geocode.max_distance_km < 0.0 {
            self.geocode.max_distance_km = DEFAULT_MAX_DISTANCE_KM;
        }
        self.geocode.workers = self.geocode.workers.clamp(1, MAX_GEOCODE_WORKERS);
        if self.feed.timeout_secs == 0 {
            self.feed.timeout_secs = 1;
        }
        let status = self.feed.status.trim().to_ascii_lowercase();
        self.feed.status = match status.as_str() {
            s @ ("open" | "closed" | "all") => s.to_string(),
            _ => default_status(),
        };
        if self.schedule.cron.trim().is_empty() {
            self.schedule.cron = default_cron();
        }
        if self.history.capacity == 0 {
            self.history.capacity = default_history_capacity();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_documented_defaults() {
        let cfg = IngestConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.feed.url, DEFAULT_EONET_URL);
        assert_eq!(cfg.feed.max_retries, 3);
        assert_eq!(cfg.schedule.cron, "0 0 * * *");
        assert_eq!(cfg.geometry.precision, 3);
        assert_eq!(cfg.geocode.max_distance_km, 50.0);
        assert_eq!(cfg.geocode.workers, 4);
        assert!(cfg.geocode.admin1);
        assert!(!cfg.geocode.admin2);
        assert!(cfg.http.addr.is_none());
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let cfg = IngestConfig::from_toml_str(
            r#"
[feed]
status = "whatever"
timeout_secs = 0

[geometry]
precision = 42

[geocode]
max_distance_km = -5.0
workers = 0
"#,
        )
        .unwrap();
        assert_eq!(cfg.feed.status, "open");
        assert_eq!(cfg.feed.timeout_secs, 1);
        assert_eq!(cfg.geometry.precision, MAX_PRECISION);
        assert_eq!(cfg.geocode.max_distance_km, DEFAULT_MAX_DISTANCE_KM);
        assert_eq!(cfg.geocode.workers, 1);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = IngestConfig::from_toml_str(
            r#"
[geocode]
admin2 = true
dump_dir = "/srv/geonames"
"#,
        )
        .unwrap();
        assert!(cfg.geocode.admin2);
        assert!(cfg.geocode.admin1);
        assert_eq!(cfg.geocode.dump_dir, PathBuf::from("/srv/geonames"));
        assert_eq!(cfg.geocode.language, "en");
    }
}
