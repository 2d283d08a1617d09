// src/error.rs
//! Error taxonomy for the ingest pipeline.
//!
//! Feed errors abort the current run. Geometry, geocoding and persistence
//! errors are per-event and get absorbed by the stage that raised them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Network failure, timeout or non-success status after retries ran out.
    #[error("feed unavailable after {attempts} attempt(s): {reason}")]
    FeedUnavailable { attempts: u32, reason: String },

    /// The feed answered but the body does not match the expected schema.
    #[error("feed response malformed: {0}")]
    FeedMalformed(String),

    #[error("event {id}: unsupported geometry kind `{kind}`")]
    UnsupportedGeometryKind { id: String, kind: String },

    #[error("event {id}: {kind} geometry has mismatched coordinate nesting")]
    GeometryShapeMismatch { id: String, kind: String },

    #[error("event {id}: unparsable sample date `{date}`")]
    InvalidSampleDate { id: String, date: String },

    #[error("geocode lookup failed: {0}")]
    GeocodeLookupFailure(String),

    /// Identifier already present in the store.
    #[error("event {0} already persisted")]
    PersistConflict(String),

    #[error("gazetteer load failed: {0}")]
    GazetteerLoadFailure(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl IngestError {
    /// Whether a retry of the same feed request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, IngestError::FeedUnavailable { .. })
    }

    /// Short stable label used in metrics and run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::FeedUnavailable { .. } => "feed_unavailable",
            IngestError::FeedMalformed(_) => "feed_malformed",
            IngestError::UnsupportedGeometryKind { .. } => "unsupported_geometry_kind",
            IngestError::GeometryShapeMismatch { .. } => "geometry_shape_mismatch",
            IngestError::InvalidSampleDate { .. } => "invalid_sample_date",
            IngestError::GeocodeLookupFailure(_) => "geocode_lookup_failure",
            IngestError::PersistConflict(_) => "persist_conflict",
            IngestError::GazetteerLoadFailure(_) => "gazetteer_load_failure",
            IngestError::Storage(_) => "storage",
        }
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(e: sqlx::Error) -> Self {
        IngestError::Storage(e.to_string())
    }
}
