//! Region ingestion: source → normalize → embed → store.
//!
//! [`TrailIngester::run`] drains one region's source cursor and writes each
//! trail as soon as it is normalized, so searches see a region fill in while
//! the fetch is still running. Per-item failures (fetch, parse, write) are
//! logged and counted as skipped. Only two conditions end a run early:
//! the source cannot be opened, or the store becomes unreachable.
//!
//! Re-running a region is safe: trails are keyed by stable id, so a second
//! pass replaces documents instead of duplicating them.

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{IngestError, StoreError};
use crate::normalize::normalize;
use crate::region::RegionDescriptor;
use crate::source::TrailSource;
use crate::vector_store::VectorStore;

/// Live counters for a running ingestion, readable from other tasks.
#[derive(Debug, Default)]
pub struct IngestProgress {
    written: AtomicUsize,
    skipped: AtomicUsize,
}

impl IngestProgress {
    pub fn written(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::Relaxed)
    }

    fn add_written(&self, n: usize) {
        self.written.fetch_add(n, Ordering::Relaxed);
    }

    fn add_skipped(&self, n: usize) {
        self.skipped.fetch_add(n, Ordering::Relaxed);
    }
}

/// Final counts for one ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub written: usize,
    pub skipped: usize,
    /// Set when the run ended early; counts reflect work done before that.
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_error")]
    pub fatal: Option<IngestError>,
}

fn serialize_error<S: serde::Serializer>(
    err: &Option<IngestError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match err {
        Some(e) => serializer.serialize_str(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl IngestReport {
    pub fn is_success(&self) -> bool {
        self.fatal.is_none()
    }
}

pub struct TrailIngester {
    source: Arc<dyn TrailSource>,
    index: VectorStore,
}

impl TrailIngester {
    pub fn new(source: Arc<dyn TrailSource>, index: VectorStore) -> Self {
        Self { source, index }
    }

    /// Fetch and store every trail the source yields for `region`.
    pub async fn run(&self, region: &RegionDescriptor, progress: &IngestProgress) -> IngestReport {
        let label = self.source.source_label();
        tracing::info!(region = %region.key, place = %region.label, source = %label, "ingestion started");

        let mut cursor = match self.source.open(region).await {
            Ok(cursor) => cursor,
            Err(err) => {
                tracing::error!(region = %region.key, error = %format!("{:#}", err), "ingestion source unreachable");
                return IngestReport {
                    fatal: Some(IngestError::SourceUnreachable(format!("{:#}", err))),
                    ..IngestReport::default()
                };
            }
        };

        let mut fatal = None;
        while let Some(item) = cursor.next_item().await {
            let raw = match item {
                Ok(raw) => raw,
                Err(err) => {
                    tracing::warn!(region = %region.key, error = %format!("{:#}", err), "skipping unfetchable trail");
                    progress.add_skipped(1);
                    continue;
                }
            };

            let record = match normalize(&raw, &label, Utc::now()) {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(region = %region.key, error = %err, "skipping malformed trail");
                    progress.add_skipped(1);
                    continue;
                }
            };

            match self.index.upsert(std::slice::from_ref(&record)).await {
                Ok(report) => {
                    progress.add_written(report.written);
                    progress.add_skipped(report.failed);
                    tracing::debug!(region = %region.key, trail = %record.id, name = %record.name, "trail stored");
                }
                Err(StoreError::Unavailable(msg)) => {
                    tracing::error!(region = %region.key, error = %msg, "store unavailable, aborting ingestion");
                    fatal = Some(IngestError::StorageUnavailable(msg));
                    break;
                }
                Err(err) => {
                    tracing::warn!(region = %region.key, trail = %record.id, error = %err, "skipping unstorable trail");
                    progress.add_skipped(1);
                }
            }
        }

        let report = IngestReport {
            written: progress.written(),
            skipped: progress.skipped(),
            fatal,
        };
        tracing::info!(
            region = %region.key,
            written = report.written,
            skipped = report.skipped,
            ok = report.is_success(),
            "ingestion finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{TrailCursor, VecCursor};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use trailscout_core::embedding::HashingEmbedder;
    use trailscout_core::geo::Coordinate;
    use crate::coordinator::{RegionStatus, ScrapeCoordinator};
    use std::time::Duration;
    use trailscout_core::geo::GeoFilter;
    use trailscout_core::models::TrailRecord;
    use trailscout_core::store::memory::InMemoryStore;
    use trailscout_core::store::{Store, TrailCandidate};

    struct Fixed(Vec<serde_json::Value>);

    #[async_trait]
    impl TrailSource for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn description(&self) -> &str {
            "fixed list"
        }
        async fn open(&self, _region: &RegionDescriptor) -> Result<Box<dyn TrailCursor>> {
            let mut items: Vec<Result<serde_json::Value>> = self.0.iter().cloned().map(Ok).collect();
            items.push(Err(anyhow!("page 3 timed out")));
            Ok(Box::new(VecCursor::new(items)))
        }
    }

    struct Offline;

    #[async_trait]
    impl TrailSource for Offline {
        fn name(&self) -> &str {
            "offline"
        }
        fn description(&self) -> &str {
            "always down"
        }
        async fn open(&self, _region: &RegionDescriptor) -> Result<Box<dyn TrailCursor>> {
            Err(anyhow!("connection refused"))
        }
    }

    /// Accepts `budget` writes, then loses its backend entirely.
    struct Vanishing {
        inner: InMemoryStore,
        budget: AtomicUsize,
    }

    impl Vanishing {
        fn new(budget: usize) -> Self {
            Self {
                inner: InMemoryStore::new(),
                budget: AtomicUsize::new(budget),
            }
        }

        fn gone(&self) -> bool {
            self.budget.load(Ordering::SeqCst) == 0
        }
    }

    #[async_trait]
    impl Store for Vanishing {
        async fn health_check(&self) -> Result<()> {
            if self.gone() {
                return Err(anyhow!("database file removed"));
            }
            Ok(())
        }
        async fn upsert_trail(&self, record: &TrailRecord, v: &[f32], m: &str) -> Result<()> {
            if self.gone() {
                return Err(anyhow!("database file removed"));
            }
            self.budget.fetch_sub(1, Ordering::SeqCst);
            self.inner.upsert_trail(record, v, m).await
        }
        async fn vector_search(
            &self,
            q: &[f32],
            limit: usize,
            geo: Option<&GeoFilter>,
        ) -> Result<Vec<TrailCandidate>> {
            self.inner.vector_search(q, limit, geo).await
        }
        async fn get_trail(&self, id: &str) -> Result<Option<TrailRecord>> {
            self.inner.get_trail(id).await
        }
        async fn count_trails(&self) -> Result<usize> {
            self.inner.count_trails().await
        }
        async fn list_trails(&self) -> Result<Vec<TrailRecord>> {
            self.inner.list_trails().await
        }
    }

    fn many(n: usize) -> Vec<serde_json::Value> {
        (0..n)
            .map(|i| json!({ "name": format!("Trail {}", i), "slug": format!("t{}", i),
                             "lat": 47.8 + i as f64 * 0.001, "lon": -123.6 }))
            .collect()
    }

    fn index(store: Arc<InMemoryStore>) -> VectorStore {
        VectorStore::new(store, Arc::new(HashingEmbedder::new(64)))
    }

    fn region() -> RegionDescriptor {
        RegionDescriptor::new("Olympic", Coordinate::new(47.8, -123.6), 5.0)
    }

    fn trails() -> Vec<serde_json::Value> {
        vec![
            json!({ "name": "Hoh", "slug": "hoh", "lat": 47.81, "lon": -123.6 }),
            json!({ "name": "Sol Duc", "slug": "sol-duc", "lat": 47.79, "lon": -123.61 }),
            json!({ "slug": "nameless", "lat": 47.8, "lon": -123.6 }),
        ]
    }

    #[tokio::test]
    async fn test_partial_failures_are_skipped() {
        let store = Arc::new(InMemoryStore::new());
        let ingester = TrailIngester::new(Arc::new(Fixed(trails())), index(store.clone()));
        let progress = IngestProgress::default();

        let report = ingester.run(&region(), &progress).await;
        assert!(report.is_success());
        assert_eq!(report.written, 2);
        // One nameless record plus one failed fetch.
        assert_eq!(report.skipped, 2);
        assert_eq!(progress.written(), 2);
        assert_eq!(store.count_trails().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let ingester = TrailIngester::new(Arc::new(Fixed(trails())), index(store.clone()));

        ingester.run(&region(), &IngestProgress::default()).await;
        let first: Vec<String> = store.list_trails().await.unwrap().into_iter().map(|t| t.id).collect();
        ingester.run(&region(), &IngestProgress::default()).await;
        let second: Vec<String> = store.list_trails().await.unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unreachable_source_is_fatal() {
        let store = Arc::new(InMemoryStore::new());
        let ingester = TrailIngester::new(Arc::new(Offline), index(store.clone()));
        let report = ingester.run(&region(), &IngestProgress::default()).await;
        assert_eq!(report.written, 0);
        assert!(matches!(report.fatal, Some(IngestError::SourceUnreachable(_))));
    }

    #[tokio::test]
    async fn test_store_lost_mid_run_is_fatal() {
        let store = Arc::new(Vanishing::new(2));
        let ingester = TrailIngester::new(
            Arc::new(Fixed(many(5))),
            VectorStore::new(store.clone(), Arc::new(HashingEmbedder::new(64))),
        );
        let report = ingester.run(&region(), &IngestProgress::default()).await;

        assert_eq!(report.written, 2);
        assert_eq!(report.skipped, 0);
        match report.fatal {
            Some(IngestError::StorageUnavailable(msg)) => assert!(msg.contains("removed"), "{}", msg),
            other => panic!("expected StorageUnavailable, got {:?}", other),
        }
        assert_eq!(store.inner.count_trails().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_store_lost_mid_run_fails_region() {
        let store = Arc::new(Vanishing::new(2));
        let ingester = Arc::new(TrailIngester::new(
            Arc::new(Fixed(many(5))),
            VectorStore::new(store, Arc::new(HashingEmbedder::new(64))),
        ));
        let coordinator = ScrapeCoordinator::new(ingester, Duration::from_secs(30));

        let trigger = coordinator.trigger(region(), false).await.unwrap();
        let outcome = trigger.handle.wait().await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.written, 2);

        let snapshot = coordinator.status(&region().key).await;
        assert_eq!(snapshot.status, RegionStatus::Failed);
        assert_eq!(coordinator.in_flight(), 0);
    }
}
