//! Embedding-aware facade over a [`Store`] backend.
//!
//! [`VectorStore`] is what the ingester and search service talk to: it
//! turns text into vectors with the configured [`EmbeddingProvider`] and
//! maps backend failures into [`StoreError`].
//!
//! Upserts commit record by record. A record that fails to embed or write
//! is counted in [`UpsertReport::failed`] and never aborts the batch. After
//! a failed write the backend is health-checked once; if that fails too the
//! backend is unreachable as a whole and [`StoreError::Unavailable`] is
//! raised.

use std::sync::Arc;

use serde::Serialize;

use trailscout_core::embedding::{embed_one, EmbeddingProvider};
use trailscout_core::geo::GeoFilter;
use trailscout_core::models::{TrailRecord, TrailResult};
use trailscout_core::search::{search, SearchRequest};
use trailscout_core::store::Store;

use crate::error::StoreError;

/// Per-record outcome counts from [`VectorStore::upsert`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertReport {
    pub written: usize,
    pub failed: usize,
}

/// A store plus the embedder used to index it.
#[derive(Clone)]
pub struct VectorStore {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl VectorStore {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    async fn ensure_available(&self) -> Result<(), StoreError> {
        self.store
            .health_check()
            .await
            .map_err(|e| StoreError::Unavailable(format!("{:#}", e)))
    }

    /// Write or replace `records` by stable id.
    pub async fn upsert(&self, records: &[TrailRecord]) -> Result<UpsertReport, StoreError> {
        if records.is_empty() {
            return Ok(UpsertReport::default());
        }

        let texts: Vec<String> = records.iter().map(|r| r.search_text.clone()).collect();
        let vectors = match self.embedder.embed(&texts).await {
            Ok(vectors) if vectors.len() == records.len() => vectors.into_iter().map(Some).collect(),
            Ok(vectors) => {
                tracing::warn!(
                    expected = records.len(),
                    got = vectors.len(),
                    "embedding batch size mismatch, embedding records one by one"
                );
                self.embed_individually(&texts).await
            }
            Err(err) => {
                tracing::warn!(error = %err, "batch embedding failed, embedding records one by one");
                self.embed_individually(&texts).await
            }
        };

        let mut report = UpsertReport::default();
        let model = self.embedder.model_name();
        let mut checked = false;
        for (record, vector) in records.iter().zip(vectors) {
            let Some(vector) = vector else {
                report.failed += 1;
                continue;
            };
            match self.store.upsert_trail(record, &vector, model).await {
                Ok(()) => report.written += 1,
                Err(err) => {
                    if !checked {
                        self.ensure_available().await?;
                        checked = true;
                    }
                    tracing::warn!(trail = %record.id, error = %err, "failed to write trail");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn embed_individually(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            match embed_one(self.embedder.as_ref(), text).await {
                Ok(v) => out.push(Some(v)),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to embed trail text");
                    out.push(None);
                }
            }
        }
        out
    }

    /// Return up to `k` trails most similar to `text`, restricted to `geo`.
    pub async fn query(
        &self,
        text: &str,
        k: usize,
        geo: Option<&GeoFilter>,
    ) -> Result<Vec<TrailResult>, StoreError> {
        let query_vec = embed_one(self.embedder.as_ref(), text)
            .await
            .map_err(|e| StoreError::Embedding(format!("{:#}", e)))?;

        search(
            self.store.as_ref(),
            &SearchRequest {
                query_vec: &query_vec,
                limit: k,
                geo,
            },
        )
        .await
        .map_err(|e| StoreError::Unavailable(format!("{:#}", e)))
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        self.store
            .count_trails()
            .await
            .map_err(|e| StoreError::Unavailable(format!("{:#}", e)))
    }

    /// Every stored trail, unfiltered and unscored.
    pub async fn list(&self) -> Result<Vec<TrailResult>, StoreError> {
        let records = self
            .store
            .list_trails()
            .await
            .map_err(|e| StoreError::Unavailable(format!("{:#}", e)))?;
        Ok(records.iter().map(TrailResult::from_record).collect())
    }

    pub async fn get(&self, id: &str) -> Result<Option<TrailRecord>, StoreError> {
        self.store
            .get_trail(id)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{:#}", e)))
    }
}
