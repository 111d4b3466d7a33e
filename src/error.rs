//! Error taxonomy for the search and acquisition pipeline.
//!
//! Each layer has its own enum so failures stay scoped: a bad item never
//! becomes a job failure, and a job failure never becomes a search error.

use thiserror::Error;

/// Errors returned to search callers.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("could not find location '{location}'")]
    LocationNotFound { location: String },
    #[error("location lookup for '{location}' is rate limited, try again shortly")]
    LocationResolutionRateLimited { location: String },
    #[error("location lookup for '{location}' failed: {message}")]
    LocationResolutionFailed { location: String, message: String },
    #[error("trail store unavailable: {0}")]
    StorageUnavailable(String),
    #[error("failed to embed query: {0}")]
    Embedding(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("service is shutting down")]
    ShuttingDown,
}

impl SearchError {
    /// Short machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            SearchError::LocationNotFound { .. } => "location_not_found",
            SearchError::LocationResolutionRateLimited { .. } => "rate_limited",
            SearchError::LocationResolutionFailed { .. } => "location_lookup_failed",
            SearchError::StorageUnavailable(_) => "storage_unavailable",
            SearchError::Embedding(_) => "embedding_failed",
            SearchError::InvalidRequest(_) => "bad_request",
            SearchError::ShuttingDown => "shutting_down",
        }
    }
}

/// Errors from the [`VectorStore`](crate::vector_store::VectorStore) facade.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Embedding(String),
}

impl From<StoreError> for SearchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => SearchError::StorageUnavailable(msg),
            StoreError::Embedding(msg) => SearchError::Embedding(msg),
        }
    }
}

/// Job-fatal ingestion errors. Per-item problems are counted, not raised.
#[derive(Debug, Clone, Error)]
pub enum IngestError {
    #[error("ingestion source unreachable: {0}")]
    SourceUnreachable(String),
    #[error("trail store unavailable during ingestion: {0}")]
    StorageUnavailable(String),
}

/// Why a raw record could not become a trail.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ItemParseError {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("missing or empty field '{0}'")]
    MissingField(&'static str),
    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),
    #[error("record has no url, slug, or id to derive a stable id from")]
    MissingIdentity,
}

/// Scheduling errors from the scrape coordinator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinatorError {
    #[error("coordinator is shutting down and accepts no new jobs")]
    ShuttingDown,
}

impl From<CoordinatorError> for SearchError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::ShuttingDown => SearchError::ShuttingDown,
        }
    }
}
