// src/ingest/dedup.rs
use std::collections::HashSet;

use crate::ingest::types::RawFeedEvent;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupOutcome {
    pub fresh: Vec<RawFeedEvent>,
    pub already_persisted: usize,
    pub repeated_in_batch: usize,
}

/// Keep only events whose id is not in `existing`, preserving input order.
/// An id repeated inside `fetched` is kept once (first occurrence).
pub fn filter_new(fetched: Vec<RawFeedEvent>, existing: &HashSet<String>) -> DedupOutcome {
    let mut seen: HashSet<String> = HashSet::with_capacity(fetched.len());
    let mut out = DedupOutcome {
        fresh: Vec::with_capacity(fetched.len()),
        ..Default::default()
    };

    for ev in fetched {
        if existing.contains(&ev.id) {
            out.already_persisted += 1;
            continue;
        }
        if !seen.insert(ev.id.clone()) {
            out.repeated_in_batch += 1;
            continue;
        }
        out.fresh.push(ev);
    }

    out
}
