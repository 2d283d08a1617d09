// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod geocode;
pub mod history;
pub mod ingest;
pub mod metrics;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::config::IngestConfig;
pub use crate::error::IngestError;
pub use crate::geocode::Geocoder;
pub use crate::history::RunHistory;
pub use crate::ingest::scheduler::Scheduler;
pub use crate::ingest::{Pipeline, RunOutcome, RunReport, RunStage, RunStats};
pub use crate::store::{EventStore, MemoryStore, SqliteStore};
