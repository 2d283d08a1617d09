// src/store/memory.rs
//! In-process store for tests and dry runs.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use crate::error::IngestError;
use crate::ingest::types::NormalizedEvent;
use crate::store::{EventStore, InsertOutcome};

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    events: BTreeMap<String, Option<NormalizedEvent>>,
    fail_ids: HashSet<String>,
    fail_reads: bool,
}

impl MemoryStore {
    /// Store pre-populated with bare identifiers (no payload).
    pub fn with_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::default();
        {
            let mut g = store.lock();
            for id in ids {
                g.events.insert(id.into(), None);
            }
        }
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // the guarded data stays consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Make inserts of `id` fail with a storage error.
    pub fn fail_on(&self, id: &str) {
        self.lock().fail_ids.insert(id.to_string());
    }

    /// Make `find_all_ids` fail.
    pub fn fail_reads(&self, on: bool) {
        self.lock().fail_reads = on;
    }

    /// Simulate a concurrent writer landing a record between read and write.
    pub fn insert_behind_back(&self, id: &str) {
        self.lock().events.insert(id.to_string(), None);
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().events.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<NormalizedEvent> {
        self.lock().events.get(id).cloned().flatten()
    }

    pub fn ids(&self) -> Vec<String> {
        self.lock().events.keys().cloned().collect()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn find_all_ids(&self) -> Result<HashSet<String>, IngestError> {
        let g = self.lock();
        if g.fail_reads {
            return Err(IngestError::Storage("memory store read disabled".into()));
        }
        Ok(g.events.keys().cloned().collect())
    }

    async fn insert_many(&self, events: &[NormalizedEvent]) -> Vec<InsertOutcome> {
        let mut g = self.lock();
        events
            .iter()
            .map(|ev| {
                if g.fail_ids.contains(&ev.id) {
                    InsertOutcome::Failed(format!("injected failure for {}", ev.id))
                } else if g.events.contains_key(&ev.id) {
                    InsertOutcome::Conflict
                } else {
                    g.events.insert(ev.id.clone(), Some(ev.clone()));
                    InsertOutcome::Inserted
                }
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
pub(crate) fn test_event(id: &str) -> NormalizedEvent {
    use crate::ingest::types::{EventSample, Geometry};
    NormalizedEvent {
        id: id.to_string(),
        title: format!("event {id}"),
        description: None,
        link: None,
        closed: None,
        categories: vec![],
        sources: vec![],
        samples: vec![EventSample {
            date: chrono::DateTime::from_timestamp(1_536_000_000, 0).unwrap_or_default(),
            geometry: Geometry::point([10.0, 20.0]),
            place: None,
        }],
    }
}
