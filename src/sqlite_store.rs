//! SQLite-backed [`Store`] implementation.
//!
//! One table (`trails`) holds every collection, keyed by
//! `(collection, id)`. Embeddings are stored as little-endian f32 BLOBs and
//! scored in Rust. A geo filter narrows rows to a latitude band in SQL and
//! then applies the exact haversine test before ranking.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use trailscout_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use trailscout_core::geo::{Coordinate, GeoFilter, EARTH_RADIUS_MILES};
use trailscout_core::models::TrailRecord;
use trailscout_core::store::{rank_candidates, Store, TrailCandidate};

const RECORD_COLUMNS: &str = "id, name, description, url, latitude, longitude, \
                              tags_json, metadata_json, source_timestamp, search_text";

/// SQLite implementation of the [`Store`] trait for one collection.
pub struct SqliteStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            collection: collection.into(),
        }
    }
}

fn row_to_record(row: &SqliteRow) -> Result<TrailRecord> {
    let tags_json: String = row.get("tags_json");
    let metadata_json: String = row.get("metadata_json");
    let ts: i64 = row.get("source_timestamp");
    let id: String = row.get("id");

    let tags: Vec<String> = serde_json::from_str(&tags_json)
        .with_context(|| format!("corrupt tags_json for trail {}", id))?;
    let metadata: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&metadata_json)
        .with_context(|| format!("corrupt metadata_json for trail {}", id))?;
    let source_timestamp = DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or_default();

    Ok(TrailRecord {
        id,
        name: row.get("name"),
        description: row.get("description"),
        url: row.get("url"),
        location: Coordinate::new(row.get("latitude"), row.get("longitude")),
        tags,
        metadata,
        source_timestamp,
        search_text: row.get("search_text"),
    })
}

/// Half-height, in degrees of latitude, of the band that can contain
/// points within `radius_miles`.
fn latitude_band(radius_miles: f64) -> f64 {
    (radius_miles / EARTH_RADIUS_MILES).to_degrees() + 1e-6
}

#[async_trait]
impl Store for SqliteStore {
    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1 FROM trails LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .context("trail table is not reachable")?;
        Ok(())
    }

    async fn upsert_trail(&self, record: &TrailRecord, vector: &[f32], model: &str) -> Result<()> {
        let tags_json = serde_json::to_string(&record.tags)?;
        let metadata_json = serde_json::to_string(&record.metadata)?;
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO trails (collection, id, name, description, url, latitude, longitude,
                                tags_json, metadata_json, source_timestamp, search_text,
                                embedding, model, dims, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(collection, id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                url = excluded.url,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                tags_json = excluded.tags_json,
                metadata_json = excluded.metadata_json,
                source_timestamp = excluded.source_timestamp,
                search_text = excluded.search_text,
                embedding = excluded.embedding,
                model = excluded.model,
                dims = excluded.dims,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.collection)
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.url)
        .bind(record.location.latitude)
        .bind(record.location.longitude)
        .bind(&tags_json)
        .bind(&metadata_json)
        .bind(record.source_timestamp.timestamp())
        .bind(&record.search_text)
        .bind(vec_to_blob(vector))
        .bind(model)
        .bind(vector.len() as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        geo: Option<&GeoFilter>,
    ) -> Result<Vec<TrailCandidate>> {
        let rows = match geo {
            Some(filter) => {
                let band = latitude_band(filter.radius_miles);
                sqlx::query(&format!(
                    "SELECT {}, embedding FROM trails \
                     WHERE collection = ? AND latitude BETWEEN ? AND ?",
                    RECORD_COLUMNS
                ))
                .bind(&self.collection)
                .bind(filter.center.latitude - band)
                .bind(filter.center.latitude + band)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {}, embedding FROM trails WHERE collection = ?",
                    RECORD_COLUMNS
                ))
                .bind(&self.collection)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let record = row_to_record(row)?;
            let distance_miles = match geo {
                Some(filter) => match filter.distance_if_within(&record.location) {
                    Some(d) => Some(d),
                    None => continue,
                },
                None => None,
            };
            let blob: Vec<u8> = row.get("embedding");
            let similarity = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
            candidates.push(TrailCandidate {
                record,
                similarity,
                distance_miles,
            });
        }

        Ok(rank_candidates(candidates, limit))
    }

    async fn get_trail(&self, id: &str) -> Result<Option<TrailRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM trails WHERE collection = ? AND id = ?",
            RECORD_COLUMNS
        ))
        .bind(&self.collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn count_trails(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trails WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn list_trails(&self) -> Result<Vec<TrailRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM trails WHERE collection = ? ORDER BY name ASC, id ASC",
            RECORD_COLUMNS
        ))
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }
}
