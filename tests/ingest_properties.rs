// tests/ingest_properties.rs
use std::collections::HashSet;

use hazard_ingest::ingest::dedup::filter_new;
use hazard_ingest::ingest::geometry::{round_coord, round_events, to_canonical};
use hazard_ingest::ingest::types::{Coordinates, Geometry, RawFeedEvent, RawGeometry};
use proptest::prelude::*;

fn raw(id: String, kind: &str, coordinates: Coordinates) -> RawFeedEvent {
    RawFeedEvent {
        id,
        title: "t".into(),
        description: None,
        link: None,
        closed: None,
        categories: vec![],
        sources: vec![],
        geometries: vec![RawGeometry {
            date: "2018-09-01T00:00:00Z".into(),
            kind: kind.into(),
            coordinates,
        }],
    }
}

fn position() -> impl Strategy<Value = [f64; 2]> {
    (-180.0f64..180.0, -90.0f64..90.0).prop_map(|(lon, lat)| [lon, lat])
}

/// Closed ring of 3..12 distinct vertices plus the closing repeat.
fn closed_ring() -> impl Strategy<Value = Vec<[f64; 2]>> {
    proptest::collection::vec(position(), 3..12).prop_map(|mut ring| {
        ring.push(ring[0]);
        ring
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn rounding_is_idempotent(v in -1.0e7f64..1.0e7, p in 0u32..=10) {
        let once = round_coord(v, p);
        prop_assert_eq!(round_coord(once, p), once);
    }

    #[test]
    fn rounding_moves_at_most_half_a_unit(v in -180.0f64..180.0, p in 0u32..=6) {
        let unit = 10f64.powi(-(p as i32));
        prop_assert!((round_coord(v, p) - v).abs() <= unit / 2.0 + 1e-9);
    }

    #[test]
    fn ring_closure_survives_rounding(ring in closed_ring(), p in 0u32..=6) {
        let ev = raw("R".into(), "Polygon", Coordinates::Rings(vec![ring.clone()]));
        let rounded = round_events(vec![ev], p);
        let out = to_canonical(rounded);
        prop_assert_eq!(out.events.len(), 1);
        match &out.events[0].samples[0].geometry {
            Geometry::Polygon(poly) => {
                let r = &poly.exterior().0;
                prop_assert_eq!(r.len(), ring.len());
                prop_assert_eq!(r.first(), r.last());
            }
            other => prop_assert!(false, "unexpected geometry {:?}", other),
        }
    }

    #[test]
    fn dedup_yields_fetched_minus_existing_once_each(
        fetched in proptest::collection::vec(0u8..20, 0..40),
        existing in proptest::collection::hash_set(0u8..20, 0..10),
    ) {
        let events: Vec<RawFeedEvent> = fetched
            .iter()
            .map(|n| raw(format!("E{n}"), "Point", Coordinates::Point([0.0, 0.0])))
            .collect();
        let existing: HashSet<String> = existing.iter().map(|n| format!("E{n}")).collect();

        let out = filter_new(events, &existing);
        let ids: Vec<&str> = out.fresh.iter().map(|e| e.id.as_str()).collect();

        let expected: HashSet<String> = fetched
            .iter()
            .map(|n| format!("E{n}"))
            .filter(|id| !existing.contains(id))
            .collect();
        let got: HashSet<String> = ids.iter().map(|s| s.to_string()).collect();
        prop_assert_eq!(&got, &expected);
        prop_assert_eq!(ids.len(), got.len());

        // first-occurrence order
        let mut seen = HashSet::new();
        let order: Vec<String> = fetched
            .iter()
            .map(|n| format!("E{n}"))
            .filter(|id| !existing.contains(id) && seen.insert(id.clone()))
            .collect();
        prop_assert_eq!(ids, order.iter().map(String::as_str).collect::<Vec<_>>());
    }
}
