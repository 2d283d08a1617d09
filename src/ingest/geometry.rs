// src/ingest/geometry.rs
//! Coordinate rounding and feed → canonical geometry conversion.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::error::IngestError;
use crate::ingest::types::{
    Category, Coordinates, EventSample, Geometry, NormalizedEvent, Position, RawFeedEvent,
};

/// Upper bound accepted for the precision setting.
pub const MAX_PRECISION: u32 = 10;

// Scaled magnitudes past 2^44 are returned unchanged: closer to 2^52 the
// divide-then-rescale round trip can drift by a whole unit. Valid
// coordinates stay far below this at every supported precision.
const MAX_ROUNDABLE: f64 = 17_592_186_044_416.0;

/// Round half away from zero to `precision` decimal digits.
/// Idempotent: `round_coord(round_coord(v, p), p) == round_coord(v, p)`.
pub fn round_coord(v: f64, precision: u32) -> f64 {
    if !v.is_finite() {
        return v;
    }
    let factor = 10f64.powi(precision.min(MAX_PRECISION) as i32);
    let scaled = v * factor;
    if !scaled.is_finite() || scaled.abs() >= MAX_ROUNDABLE {
        return v;
    }
    scaled.round() / factor
}

pub fn round_position(p: Position, precision: u32) -> Position {
    [round_coord(p[0], precision), round_coord(p[1], precision)]
}

/// Round every coordinate of every sample. Point count and order are kept,
/// so closed rings stay closed.
pub fn round_events(events: Vec<RawFeedEvent>, precision: u32) -> Vec<RawFeedEvent> {
    events
        .into_iter()
        .map(|mut ev| {
            for g in ev.geometries.iter_mut() {
                g.coordinates = g.coordinates.map_positions(|p| round_position(p, precision));
            }
            ev
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct ConversionOutcome {
    pub events: Vec<NormalizedEvent>,
    pub dropped: Vec<(String, IngestError)>,
}

/// Map feed events to canonical events. An event with any unsupported or
/// malformed sample is dropped; the rest of the batch continues.
pub fn to_canonical(events: Vec<RawFeedEvent>) -> ConversionOutcome {
    let mut out = ConversionOutcome {
        events: Vec::with_capacity(events.len()),
        dropped: Vec::new(),
    };
    for ev in events {
        let id = ev.id.clone();
        match convert_event(ev) {
            Ok(n) => out.events.push(n),
            Err(e) => {
                tracing::warn!(target: "ingest", id = %id, error = %e, "dropping event");
                out.dropped.push((id, e));
            }
        }
    }
    out
}

pub fn convert_event(ev: RawFeedEvent) -> Result<NormalizedEvent, IngestError> {
    let mut samples = Vec::with_capacity(ev.geometries.len());
    for g in ev.geometries {
        let geometry = convert_geometry(&ev.id, &g.kind, g.coordinates)?;
        let date = parse_date(&g.date).ok_or_else(|| IngestError::InvalidSampleDate {
            id: ev.id.clone(),
            date: g.date.clone(),
        })?;
        samples.push(EventSample {
            date,
            geometry,
            place: None,
        });
    }

    Ok(NormalizedEvent {
        id: ev.id,
        title: ev.title,
        description: ev.description.filter(|d| !d.trim().is_empty()),
        link: ev.link,
        closed: ev.closed,
        categories: unique_categories(ev.categories),
        sources: ev.sources,
        samples,
    })
}

fn convert_geometry(id: &str, kind: &str, coords: Coordinates) -> Result<Geometry, IngestError> {
    let mismatch = || IngestError::GeometryShapeMismatch {
        id: id.to_string(),
        kind: kind.to_string(),
    };
    match kind {
        "Point" => match coords {
            Coordinates::Point(p) => Ok(Geometry::point(p)),
            _ => Err(mismatch()),
        },
        "LineString" => match coords {
            Coordinates::Path(ps) => Ok(Geometry::line_string(ps)),
            _ => Err(mismatch()),
        },
        "Polygon" => match coords {
            Coordinates::Rings(rings) => Ok(Geometry::polygon(rings)),
            _ => Err(mismatch()),
        },
        other => Err(IngestError::UnsupportedGeometryKind {
            id: id.to_string(),
            kind: other.to_string(),
        }),
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn unique_categories(cats: Vec<Category>) -> Vec<Category> {
    let mut seen = HashSet::new();
    cats.into_iter().filter(|c| seen.insert(c.id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::RawGeometry;

    fn raw(id: &str, kind: &str, coords: Coordinates) -> RawFeedEvent {
        RawFeedEvent {
            id: id.into(),
            title: "t".into(),
            description: Some("  ".into()),
            link: None,
            closed: None,
            categories: vec![
                Category { id: "8".into(), title: "Wildfires".into() },
                Category { id: "8".into(), title: "Wildfires".into() },
            ],
            sources: vec![],
            geometries: vec![RawGeometry {
                date: "2018-09-01T00:00:00Z".into(),
                kind: kind.into(),
                coordinates: coords,
            }],
        }
    }

    #[test]
    fn rounds_half_away_from_zero() {
        // 1.0625 and 2.5 are exact in binary, so these are true ties
        assert_eq!(round_coord(1.0625, 3), 1.063);
        assert_eq!(round_coord(-1.0625, 3), -1.063);
        assert_eq!(round_coord(2.5, 0), 3.0);
        assert_eq!(round_coord(-2.5, 0), -3.0);
        assert_eq!(round_coord(12.0, 3), 12.0);
    }

    #[test]
    fn rounding_large_magnitudes_is_stable() {
        let v = 4_397_196.230_792_794;
        let once = round_coord(v, 9);
        assert_eq!(round_coord(once, 9), once);
        // every valid coordinate is still rounded at the top precision
        assert_eq!(round_coord(179.123_456_789_01, MAX_PRECISION), 179.123_456_789_0);
    }

    #[test]
    fn rounding_keeps_point_count_and_order() {
        let line = Coordinates::Path(vec![[1.11111, 2.22222], [3.33333, 4.44444], [5.5, 6.6]]);
        let out = round_events(vec![raw("A", "LineString", line)], 2);
        assert_eq!(
            out[0].geometries[0].coordinates,
            Coordinates::Path(vec![[1.11, 2.22], [3.33, 4.44], [5.5, 6.6]])
        );
    }

    #[test]
    fn converts_supported_kinds_and_dedups_categories() {
        let out = to_canonical(vec![raw("A", "Point", Coordinates::Point([1.0, 2.0]))]);
        assert!(out.dropped.is_empty());
        let ev = &out.events[0];
        assert_eq!(ev.samples[0].geometry, Geometry::point([1.0, 2.0]));
        assert_eq!(ev.categories.len(), 1);
        assert_eq!(ev.description, None);
    }

    #[test]
    fn unsupported_kind_drops_only_that_event() {
        let out = to_canonical(vec![
            raw("A", "MultiPoint", Coordinates::Path(vec![[1.0, 2.0]])),
            raw("B", "Point", Coordinates::Point([1.0, 2.0])),
        ]);
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].id, "B");
        assert!(matches!(
            out.dropped[0].1,
            IngestError::UnsupportedGeometryKind { ref kind, .. } if kind == "MultiPoint"
        ));
    }

    #[test]
    fn mismatched_nesting_is_rejected() {
        let out = to_canonical(vec![raw("A", "Polygon", Coordinates::Point([1.0, 2.0]))]);
        assert!(out.events.is_empty());
        assert!(matches!(out.dropped[0].1, IngestError::GeometryShapeMismatch { .. }));
    }

    #[test]
    fn bad_date_is_rejected() {
        let mut ev = raw("A", "Point", Coordinates::Point([1.0, 2.0]));
        ev.geometries[0].date = "yesterday".into();
        let out = to_canonical(vec![ev]);
        assert!(matches!(out.dropped[0].1, IngestError::InvalidSampleDate { .. }));
    }
}
