//! Trail data models shared by the store, the ranking step, and the app.
//!
//! A [`TrailRecord`] is the normalized, embeddable unit stored in a
//! collection. A [`TrailResult`] is the caller-facing projection returned
//! from searches and listings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::geo::Coordinate;

/// Characters kept in [`TrailResult::snippet`].
pub const SNIPPET_CHARS: usize = 240;

/// A normalized trail document.
///
/// Records are keyed by [`id`](TrailRecord::id); writing a record whose id
/// already exists replaces the stored document entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailRecord {
    /// Stable identifier, see [`stable_id`].
    pub id: String,
    pub name: String,
    pub description: String,
    pub url: Option<String>,
    pub location: Coordinate,
    pub tags: Vec<String>,
    /// Source fields with no dedicated slot (length, elevation, rating, ...).
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// When the source last reported this trail.
    pub source_timestamp: DateTime<Utc>,
    /// Text the embedding was computed from.
    pub search_text: String,
}

/// A ranked or listed trail as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailResult {
    pub id: String,
    pub name: String,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub location: Coordinate,
    /// Miles from the query center; present only when a location filter applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_from_query_center: Option<f64>,
    /// Cosine similarity to the query; absent in plain listings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f64>,
    pub tags: Vec<String>,
}

impl TrailResult {
    /// Project a record into a result without scoring information.
    pub fn from_record(record: &TrailRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            snippet: snippet(&record.description),
            url: record.url.clone(),
            location: record.location,
            distance_from_query_center: None,
            similarity_score: None,
            tags: record.tags.clone(),
        }
    }
}

/// Truncate a description to [`SNIPPET_CHARS`] characters on a char boundary.
pub fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(SNIPPET_CHARS) {
        Some((idx, _)) => format!("{}…", trimmed[..idx].trim_end()),
        None => trimmed.to_string(),
    }
}

/// Canonicalize a URL so trivially different spellings map to one identity.
///
/// Lower-cases the scheme and host, drops the query string and fragment,
/// and strips trailing slashes from the path.
pub fn canonical_url(url: &str) -> String {
    let url = url.trim();
    let url = url.split('#').next().unwrap_or(url);
    let url = url.split('?').next().unwrap_or(url);

    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
        None => (None, url),
    };
    let (host, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    let path = path.trim_end_matches('/');

    match scheme {
        Some(scheme) => format!("{}://{}{}", scheme, host.to_ascii_lowercase(), path),
        None => format!("{}{}", host.to_ascii_lowercase(), path),
    }
}

/// Derive the stable id for a source identity string.
///
/// `trail-` followed by the first 32 hex digits of the SHA-256 of
/// `identity`. Callers pass a [`canonical_url`] when one exists, or a
/// `source:slug` pair otherwise.
pub fn stable_id(identity: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("trail-{}", &digest[..32])
}
