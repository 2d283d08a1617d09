// src/store/mod.rs
//! Persistence: the existing-id index and the per-record persister.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::IngestError;
use crate::ingest::types::NormalizedEvent;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Identifier already present; the store's uniqueness constraint fired.
    Conflict,
    Failed(String),
}

/// Storage backend. Uniqueness on `id` is enforced by the store itself.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn find_all_ids(&self) -> Result<HashSet<String>, IngestError>;

    /// Insert each record independently. The result has one entry per input
    /// record, in input order.
    async fn insert_many(&self, events: &[NormalizedEvent]) -> Vec<InsertOutcome>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistSummary {
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Existing-id index for one run.
pub async fn load_ids(store: &dyn EventStore) -> Result<HashSet<String>, IngestError> {
    let ids = store.find_all_ids().await?;
    tracing::debug!(target: "store", store = store.name(), count = ids.len(), "loaded existing ids");
    Ok(ids)
}

/// Persist every event. Conflicts are counted as skipped, other per-record
/// errors as failed; neither aborts the batch.
pub async fn insert_all(store: &dyn EventStore, events: &[NormalizedEvent]) -> PersistSummary {
    if events.is_empty() {
        return PersistSummary::default();
    }
    let outcomes = store.insert_many(events).await;
    let mut summary = PersistSummary::default();
    for (ev, outcome) in events.iter().zip(outcomes) {
        match outcome {
            InsertOutcome::Inserted => summary.inserted += 1,
            InsertOutcome::Conflict => {
                tracing::info!(
                    target: "store",
                    error = %IngestError::PersistConflict(ev.id.clone()),
                    "skipping duplicate"
                );
                summary.skipped += 1;
            }
            InsertOutcome::Failed(reason) => {
                tracing::warn!(target: "store", id = %ev.id, reason = %reason, "insert failed");
                summary.failed += 1;
            }
        }
    }

    counter!("persist_inserted_total").increment(summary.inserted as u64);
    counter!("persist_skipped_total").increment(summary.skipped as u64);
    counter!("persist_failed_total").increment(summary.failed as u64);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::test_event;

    #[tokio::test]
    async fn conflicts_are_skipped_not_fatal() {
        let store = MemoryStore::with_ids(["B"]);
        let events = vec![test_event("A"), test_event("B"), test_event("C")];
        let summary = insert_all(&store, &events).await;
        assert_eq!(
            summary,
            PersistSummary {
                inserted: 2,
                skipped: 1,
                failed: 0
            }
        );
        let ids = load_ids(&store).await.unwrap();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn failing_record_does_not_abort_batch() {
        let store = MemoryStore::default();
        store.fail_on("B");
        let events = vec![test_event("A"), test_event("B"), test_event("C")];
        let summary = insert_all(&store, &events).await;
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.failed, 1);
        assert!(!store.contains("B"));
    }

    #[tokio::test]
    async fn empty_batch_touches_nothing() {
        let store = MemoryStore::default();
        assert_eq!(insert_all(&store, &[]).await, PersistSummary::default());
    }
}
