//! In-memory [`Store`] implementation for tests and ephemeral runs.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity over every stored vector. Locks are never
//! held across an `.await`.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::geo::GeoFilter;
use crate::models::TrailRecord;

use super::{rank_candidates, Store, TrailCandidate};

struct StoredTrail {
    record: TrailRecord,
    vector: Vec<f32>,
    _model: String,
}

/// In-memory trail store.
pub struct InMemoryStore {
    trails: RwLock<HashMap<String, StoredTrail>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            trails: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, StoredTrail>>> {
        self.trails
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, StoredTrail>>> {
        self.trails
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn health_check(&self) -> Result<()> {
        self.read().map(|_| ())
    }

    async fn upsert_trail(&self, record: &TrailRecord, vector: &[f32], model: &str) -> Result<()> {
        let mut trails = self.write()?;
        trails.insert(
            record.id.clone(),
            StoredTrail {
                record: record.clone(),
                vector: vector.to_vec(),
                _model: model.to_string(),
            },
        );
        Ok(())
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        geo: Option<&GeoFilter>,
    ) -> Result<Vec<TrailCandidate>> {
        let trails = self.read()?;
        let mut candidates = Vec::new();
        for stored in trails.values() {
            let distance_miles = match geo {
                Some(filter) => match filter.distance_if_within(&stored.record.location) {
                    Some(d) => Some(d),
                    None => continue,
                },
                None => None,
            };
            candidates.push(TrailCandidate {
                record: stored.record.clone(),
                similarity: cosine_similarity(query_vec, &stored.vector) as f64,
                distance_miles,
            });
        }
        drop(trails);
        Ok(rank_candidates(candidates, limit))
    }

    async fn get_trail(&self, id: &str) -> Result<Option<TrailRecord>> {
        Ok(self.read()?.get(id).map(|s| s.record.clone()))
    }

    async fn count_trails(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    async fn list_trails(&self) -> Result<Vec<TrailRecord>> {
        let mut records: Vec<TrailRecord> =
            self.read()?.values().map(|s| s.record.clone()).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }
}
