//! Similarity search with an optional radius filter.
//!
//! The algorithm operates entirely through the [`Store`] trait, with no
//! database or configuration dependencies. The calling application embeds
//! the query text and passes the resulting vector.
//!
//! # Ranking
//!
//! 1. Discard every record outside the [`GeoFilter`] radius (if any).
//! 2. Score the remainder by cosine similarity to the query vector.
//! 3. Sort by score (desc), distance from center (asc), id (asc).
//! 4. Truncate to `limit`.
//!
//! Filtering happens before truncation, so an in-radius record can never be
//! crowded out by better-scoring records elsewhere.

use anyhow::Result;

use crate::geo::GeoFilter;
use crate::models::TrailResult;
use crate::store::{Store, TrailCandidate};

/// Bundles the inputs for a single query.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    /// Pre-computed query embedding.
    pub query_vec: &'a [f32],
    /// Maximum results to return.
    pub limit: usize,
    /// Restrict results to a circle around a point.
    pub geo: Option<&'a GeoFilter>,
}

/// Run a ranked similarity search against `store`.
pub async fn search<S: Store + ?Sized>(
    store: &S,
    req: &SearchRequest<'_>,
) -> Result<Vec<TrailResult>> {
    if req.limit == 0 {
        return Ok(Vec::new());
    }
    let candidates = store
        .vector_search(req.query_vec, req.limit, req.geo)
        .await?;
    Ok(candidates.iter().map(to_result).collect())
}

fn to_result(candidate: &TrailCandidate) -> TrailResult {
    let mut result = TrailResult::from_record(&candidate.record);
    result.similarity_score = Some(round_to(candidate.similarity, 4));
    result.distance_from_query_center = candidate.distance_miles.map(|d| round_to(d, 2));
    result
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
