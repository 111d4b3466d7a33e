//! Storage abstraction for trail collections.
//!
//! The [`Store`] trait defines the operations the search and ingestion
//! pipeline needs, enabling pluggable backends (SQLite in the app crate,
//! in-memory here).
//!
//! Implementations must be `Send + Sync` and safe under concurrent
//! readers and writers: searches run while ingestion jobs upsert.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::geo::GeoFilter;
use crate::models::TrailRecord;

/// A record returned from [`Store::vector_search`] with its scores.
#[derive(Debug, Clone)]
pub struct TrailCandidate {
    pub record: TrailRecord,
    /// Cosine similarity between the stored vector and the query vector.
    pub similarity: f64,
    /// Miles from the filter center, when a [`GeoFilter`] was given.
    pub distance_miles: Option<f64>,
}

/// Abstract storage backend for one trail collection.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`health_check`](Store::health_check) | Fail fast when the backend is unreachable |
/// | [`upsert_trail`](Store::upsert_trail) | Insert or fully replace a record and its vector |
/// | [`vector_search`](Store::vector_search) | Cosine similarity search, geo-filtered before truncation |
/// | [`get_trail`](Store::get_trail) | Fetch one record by stable id |
/// | [`count_trails`](Store::count_trails) | Number of stored records |
/// | [`list_trails`](Store::list_trails) | Every stored record |
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns an error when the backend cannot serve requests at all.
    async fn health_check(&self) -> Result<()>;

    /// Insert `record` with its embedding, replacing any record with the
    /// same id. Each call commits on its own.
    async fn upsert_trail(&self, record: &TrailRecord, vector: &[f32], model: &str) -> Result<()>;

    /// Return up to `limit` records most similar to `query_vec`.
    ///
    /// When `geo` is set, records outside the radius are discarded before
    /// the limit applies. Results are ordered by descending similarity.
    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        geo: Option<&GeoFilter>,
    ) -> Result<Vec<TrailCandidate>>;

    async fn get_trail(&self, id: &str) -> Result<Option<TrailRecord>>;

    async fn count_trails(&self) -> Result<usize>;

    /// Every record, ordered by name then id.
    async fn list_trails(&self) -> Result<Vec<TrailRecord>>;
}

/// Order candidates by similarity (desc), distance (asc, when present),
/// then id (asc), and keep the first `limit`.
///
/// Shared by backends so tie-breaking is identical across them.
pub fn rank_candidates(mut candidates: Vec<TrailCandidate>, limit: usize) -> Vec<TrailCandidate> {
    candidates.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| match (a.distance_miles, b.distance_miles) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
                _ => std::cmp::Ordering::Equal,
            })
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
    candidates.truncate(limit);
    candidates
}
