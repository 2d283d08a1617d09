// src/geocode/gazetteer.rs
//! GeoNames dump loader.
//!
//! Expected layout of the dump directory:
//! - `cities1000.txt` (required)
//! - `admin1CodesASCII.txt` (admin1 subset)
//! - `admin2Codes.txt` (admin2 subset)
//! - `alternateNamesV2.txt` or `alternateNames.txt` (alternate names subset)

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use geo::{Distance, Haversine, Point};

use crate::config::GeocodeSettings;
use crate::error::IngestError;
use crate::geocode::kdtree::KdTree;

pub const CITIES_FILE: &str = "cities1000.txt";
pub const ADMIN1_FILE: &str = "admin1CodesASCII.txt";
pub const ADMIN2_FILE: &str = "admin2Codes.txt";
pub const ALTERNATE_NAMES_FILES: [&str; 2] = ["alternateNamesV2.txt", "alternateNames.txt"];

#[derive(Debug, Clone, PartialEq)]
pub struct GazetteerEntry {
    pub geoname_id: u64,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub country_code: String,
    pub admin1_code: String,
    pub admin2_code: String,
    pub admin3_code: Option<String>,
    pub admin4_code: Option<String>,
    pub admin1: Option<String>,
    pub admin2: Option<String>,
}

impl GazetteerEntry {
    pub fn new(name: &str, lat: f64, lon: f64, country_code: &str) -> Self {
        Self {
            geoname_id: 0,
            name: name.to_string(),
            lat,
            lon,
            country_code: country_code.to_string(),
            admin1_code: String::new(),
            admin2_code: String::new(),
            admin3_code: None,
            admin4_code: None,
            admin1: None,
            admin2: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub cities: usize,
    pub skipped_rows: usize,
    pub admin1_names: usize,
    pub admin2_names: usize,
    pub alternate_names: usize,
}

/// Read-only nearest-place index. Built once, shared across runs.
#[derive(Debug)]
pub struct Gazetteer {
    entries: Vec<GazetteerEntry>,
    tree: KdTree,
    stats: LoadStats,
}

impl Gazetteer {
    pub fn from_entries(entries: Vec<GazetteerEntry>) -> Result<Self, IngestError> {
        let stats = LoadStats {
            cities: entries.len(),
            ..Default::default()
        };
        Self::build(entries, stats)
    }

    fn build(entries: Vec<GazetteerEntry>, stats: LoadStats) -> Result<Self, IngestError> {
        if entries.is_empty() {
            return Err(IngestError::GazetteerLoadFailure(
                "no usable gazetteer entries".into(),
            ));
        }
        let pts: Vec<(f64, f64)> = entries.iter().map(|e| (e.lat, e.lon)).collect();
        let tree = KdTree::build(&pts);
        Ok(Self {
            entries,
            tree,
            stats,
        })
    }

    pub fn load(cfg: &GeocodeSettings) -> Result<Self, IngestError> {
        let dir = cfg.dump_dir.as_path();
        let (mut entries, skipped) = read_cities(&dir.join(CITIES_FILE), cfg.admin3and4)?;
        let mut stats = LoadStats {
            cities: entries.len(),
            skipped_rows: skipped,
            ..Default::default()
        };

        if cfg.admin1 {
            let (names, undecodable) = read_admin_codes(&dir.join(ADMIN1_FILE))?;
            stats.admin1_names = names.len();
            stats.skipped_rows += undecodable;
            for e in entries.iter_mut() {
                let key = format!("{}.{}", e.country_code, e.admin1_code);
                e.admin1 = names.get(&key).cloned();
            }
        }

        if cfg.admin2 {
            let (names, undecodable) = read_admin_codes(&dir.join(ADMIN2_FILE))?;
            stats.admin2_names = names.len();
            stats.skipped_rows += undecodable;
            for e in entries.iter_mut() {
                let key = format!("{}.{}.{}", e.country_code, e.admin1_code, e.admin2_code);
                e.admin2 = names.get(&key).cloned();
            }
        }

        if cfg.alternate_names {
            let path = ALTERNATE_NAMES_FILES
                .iter()
                .map(|f| dir.join(f))
                .find(|p| p.exists())
                .ok_or_else(|| {
                    IngestError::GazetteerLoadFailure(format!(
                        "alternate names enabled but none of {:?} found in {}",
                        ALTERNATE_NAMES_FILES,
                        dir.display()
                    ))
                })?;
            let wanted: HashSet<u64> = entries.iter().map(|e| e.geoname_id).collect();
            let (alt, undecodable) = read_alternate_names(&path, &cfg.language, &wanted)?;
            stats.alternate_names = alt.len();
            stats.skipped_rows += undecodable;
            for e in entries.iter_mut() {
                if let Some(n) = alt.get(&e.geoname_id) {
                    e.name = n.clone();
                }
            }
        }

        if stats.skipped_rows > 0 {
            tracing::warn!(
                target: "geocode",
                skipped = stats.skipped_rows,
                "skipped malformed gazetteer rows"
            );
        }

        Self::build(entries, stats)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &LoadStats {
        &self.stats
    }

    /// Nearest entry and its great-circle distance in km.
    pub fn nearest(&self, lat: f64, lon: f64) -> Option<(&GazetteerEntry, f64)> {
        let entry = self.entries.get(self.tree.nearest(lat, lon)?)?;
        let metres = Haversine::distance(Point::new(lon, lat), Point::new(entry.lon, entry.lat));
        Some((entry, metres / 1000.0))
    }
}

fn open(path: &Path) -> Result<BufReader<File>, IngestError> {
    File::open(path).map(BufReader::new).map_err(|e| {
        IngestError::GazetteerLoadFailure(format!("opening {}: {e}", path.display()))
    })
}

fn read_err(path: &Path, e: std::io::Error) -> IngestError {
    IngestError::GazetteerLoadFailure(format!("reading {}: {e}", path.display()))
}

/// Parse `cities1000.txt`. Returns entries and the number of rows skipped.
fn read_cities(path: &Path, keep_admin3and4: bool) -> Result<(Vec<GazetteerEntry>, usize), IngestError> {
    let mut out = Vec::new();
    let mut skipped = 0usize;
    let undecodable = for_each_row(path, |line| {
        if line.trim().is_empty() || line.starts_with('#') {
            return;
        }
        match parse_city_row(line, keep_admin3and4) {
            Some(e) => out.push(e),
            None => skipped += 1,
        }
    })?;
    Ok((out, skipped + undecodable))
}

/// Feed each line of `path` to `row`, without its line ending. Lines that
/// are not valid UTF-8 are passed over; their count is returned.
fn for_each_row<F>(path: &Path, mut row: F) -> Result<usize, IngestError>
where
    F: FnMut(&str),
{
    let mut reader = open(path)?;
    let mut buf = Vec::new();
    let mut undecodable = 0usize;
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| read_err(path, e))?;
        if n == 0 {
            return Ok(undecodable);
        }
        let bytes = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        match std::str::from_utf8(bytes) {
            Ok(line) => row(line),
            Err(_) => undecodable += 1,
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

pub(crate) fn parse_city_row(line: &str, keep_admin3and4: bool) -> Option<GazetteerEntry> {
    let cols: Vec<&str> = line.split('\t').collect();
    if cols.len() < 14 {
        return None;
    }
    let geoname_id = cols[0].trim().parse::<u64>().ok()?;
    let name = non_empty(cols[1])?;
    let lat = cols[4].trim().parse::<f64>().ok()?;
    let lon = cols[5].trim().parse::<f64>().ok()?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }
    Some(GazetteerEntry {
        geoname_id,
        name,
        lat,
        lon,
        country_code: cols[8].trim().to_string(),
        admin1_code: cols[10].trim().to_string(),
        admin2_code: cols[11].trim().to_string(),
        admin3_code: keep_admin3and4.then(|| non_empty(cols[12])).flatten(),
        admin4_code: keep_admin3and4.then(|| non_empty(cols[13])).flatten(),
        admin1: None,
        admin2: None,
    })
}

/// `code<TAB>name<TAB>asciiname<TAB>geonameid` → code → name.
/// Also returns the number of undecodable lines.
fn read_admin_codes(path: &Path) -> Result<(HashMap<String, String>, usize), IngestError> {
    let mut out = HashMap::new();
    let undecodable = for_each_row(path, |line| {
        let mut cols = line.split('\t');
        let (Some(code), Some(name)) = (cols.next(), cols.next()) else {
            return;
        };
        if let (Some(code), Some(name)) = (non_empty(code), non_empty(name)) {
            out.insert(code, name);
        }
    })?;
    Ok((out, undecodable))
}

/// Pick one name per geoname id in `language`, preferring rows flagged
/// as preferred names. Also returns the number of undecodable lines.
fn read_alternate_names(
    path: &Path,
    language: &str,
    wanted: &HashSet<u64>,
) -> Result<(HashMap<u64, String>, usize), IngestError> {
    let mut out: HashMap<u64, (String, bool)> = HashMap::new();
    let undecodable = for_each_row(path, |line| {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 4 || !cols[2].eq_ignore_ascii_case(language) {
            return;
        }
        let Ok(id) = cols[1].parse::<u64>() else {
            return;
        };
        if !wanted.contains(&id) {
            return;
        }
        let Some(name) = non_empty(cols[3]) else {
            return;
        };
        let preferred = cols.get(4).is_some_and(|v| *v == "1");
        match out.get(&id) {
            Some((_, true)) => {}
            Some((_, false)) if !preferred => {}
            _ => {
                out.insert(id, (name, preferred));
            }
        }
    })?;
    let names = out.into_iter().map(|(k, (n, _))| (k, n)).collect();
    Ok((names, undecodable))
}
