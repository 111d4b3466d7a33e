//! Scheduling behavior of the scrape coordinator under concurrency,
//! failures, time limits, and shutdown.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use trailscout::coordinator::{Disposition, RegionStatus, ScrapeCoordinator};
use trailscout::error::CoordinatorError;
use trailscout::ingest::TrailIngester;
use trailscout::normalize::RawTrail;
use trailscout::region::RegionDescriptor;
use trailscout::source::{TrailCursor, TrailSource, VecCursor};
use trailscout::vector_store::VectorStore;
use trailscout_core::embedding::HashingEmbedder;
use trailscout_core::geo::Coordinate;
use trailscout_core::store::memory::InMemoryStore;
use trailscout_core::store::Store;

/// Source whose `open` blocks until the test releases a permit, and which
/// can be switched to fail.
struct GatedSource {
    gate: Arc<Semaphore>,
    opens: AtomicUsize,
    fail: AtomicBool,
}

impl GatedSource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Arc::new(Semaphore::new(0)),
            opens: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }

    fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrailSource for GatedSource {
    fn name(&self) -> &str {
        "gated"
    }

    fn description(&self) -> &str {
        "blocks until released"
    }

    async fn open(&self, region: &RegionDescriptor) -> Result<Box<dyn TrailCursor>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let permit = self.gate.acquire().await?;
        permit.forget();
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("upstream returned 503"));
        }
        let c = region.center;
        let items: Vec<Result<RawTrail>> = vec![
            Ok(json!({ "name": format!("{} Loop", region.label), "slug": format!("{}-loop", region.label),
                       "lat": c.latitude, "lon": c.longitude })),
            Ok(json!({ "name": format!("{} Ridge", region.label), "slug": format!("{}-ridge", region.label),
                       "lat": c.latitude + 0.01, "lon": c.longitude })),
        ];
        Ok(Box::new(VecCursor::new(items)))
    }
}

/// Source that never finishes opening.
struct StuckSource;

#[async_trait]
impl TrailSource for StuckSource {
    fn name(&self) -> &str {
        "stuck"
    }

    fn description(&self) -> &str {
        "never answers"
    }

    async fn open(&self, _region: &RegionDescriptor) -> Result<Box<dyn TrailCursor>> {
        std::future::pending().await
    }
}

fn coordinator(source: Arc<dyn TrailSource>, limit: Duration) -> (ScrapeCoordinator, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let index = VectorStore::new(store.clone(), Arc::new(HashingEmbedder::new(64)));
    let ingester = Arc::new(TrailIngester::new(source, index));
    (ScrapeCoordinator::new(ingester, limit), store)
}

fn region(label: &str, lat: f64) -> RegionDescriptor {
    RegionDescriptor::new(label, Coordinate::new(lat, -123.6), 5.0)
}

#[tokio::test]
async fn test_concurrent_triggers_start_one_job() {
    let source = GatedSource::new();
    let (coord, store) = coordinator(source.clone(), Duration::from_secs(30));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let coord = coord.clone();
        tasks.push(tokio::spawn(async move { coord.trigger(region("olympic", 47.8), false).await }));
    }
    let mut started = 0;
    let mut ids = Vec::new();
    for task in tasks {
        let trigger = task.await.unwrap().unwrap();
        if trigger.disposition == Disposition::Started {
            started += 1;
        } else {
            assert_eq!(trigger.disposition, Disposition::Joined);
        }
        ids.push(trigger.handle.id());
    }
    assert_eq!(started, 1);
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(coord.in_flight(), 1);

    let key = region("olympic", 47.8).key;
    assert_eq!(coord.status(&key).await.status, RegionStatus::InProgress);

    source.release(1);
    coord.wait_idle().await;
    assert_eq!(source.opens(), 1);
    assert_eq!(coord.status(&key).await.status, RegionStatus::Done);
    assert_eq!(store.count_trails().await.unwrap(), 2);
}

#[tokio::test]
async fn test_distinct_regions_run_in_parallel() {
    let source = GatedSource::new();
    let (coord, _store) = coordinator(source.clone(), Duration::from_secs(30));

    let a = coord.trigger(region("olympic", 47.8), false).await.unwrap();
    let b = coord.trigger(region("rainier", 46.85), false).await.unwrap();
    assert_eq!(a.disposition, Disposition::Started);
    assert_eq!(b.disposition, Disposition::Started);
    assert_ne!(a.handle.id(), b.handle.id());
    assert_eq!(coord.in_flight(), 2);

    source.release(2);
    let (oa, ob) = tokio::join!(a.handle.wait(), b.handle.wait());
    assert!(oa.is_success() && ob.is_success());
    assert_eq!(coord.regions().await.len(), 2);
}

#[tokio::test]
async fn test_done_region_needs_force_to_refetch() {
    let source = GatedSource::new();
    let (coord, store) = coordinator(source.clone(), Duration::from_secs(30));
    source.release(10);

    let first = coord.trigger(region("olympic", 47.8), false).await.unwrap();
    first.handle.wait().await;

    let again = coord.trigger(region("olympic", 47.8), false).await.unwrap();
    assert_eq!(again.disposition, Disposition::AlreadyDone);
    assert_eq!(again.handle.id(), first.handle.id());
    assert_eq!(source.opens(), 1);

    let forced = coord.trigger(region("olympic", 47.8), true).await.unwrap();
    assert_eq!(forced.disposition, Disposition::Started);
    let outcome = forced.handle.wait().await;
    assert_eq!(outcome.written, 2);
    assert_eq!(source.opens(), 2);
    // Re-ingestion replaces rather than duplicates.
    assert_eq!(store.count_trails().await.unwrap(), 2);
}

#[tokio::test]
async fn test_failed_region_can_be_retriggered() {
    let source = GatedSource::new();
    source.fail.store(true, Ordering::SeqCst);
    let (coord, store) = coordinator(source.clone(), Duration::from_secs(30));
    source.release(10);

    let key = region("olympic", 47.8).key;
    let failed = coord.trigger(region("olympic", 47.8), false).await.unwrap();
    let outcome = failed.handle.wait().await;
    assert!(!outcome.is_success());
    assert!(outcome.error.unwrap().contains("503"));

    let snapshot = coord.status(&key).await;
    assert_eq!(snapshot.status, RegionStatus::Failed);
    assert!(snapshot.last_attempt.is_some());
    assert_eq!(snapshot.job.unwrap().state, "failed");

    source.fail.store(false, Ordering::SeqCst);
    let retry = coord.trigger(region("olympic", 47.8), false).await.unwrap();
    assert_eq!(retry.disposition, Disposition::Started);
    assert!(retry.handle.wait().await.is_success());
    assert_eq!(coord.status(&key).await.status, RegionStatus::Done);
    assert_eq!(store.count_trails().await.unwrap(), 2);
}

#[tokio::test]
async fn test_job_over_time_limit_fails() {
    let (coord, _store) = coordinator(Arc::new(StuckSource), Duration::from_millis(50));

    let trigger = coord.trigger(region("olympic", 47.8), false).await.unwrap();
    let outcome = trigger.handle.wait().await;
    assert!(outcome.error.unwrap().contains("time limit"));
    assert_eq!(coord.status(&trigger.handle.region().key).await.status, RegionStatus::Failed);
    assert_eq!(coord.in_flight(), 0);
}

#[tokio::test]
async fn test_job_outlives_dropped_caller() {
    let source = GatedSource::new();
    let (coord, store) = coordinator(source.clone(), Duration::from_secs(30));

    let caller = {
        let coord = coord.clone();
        tokio::spawn(async move {
            let _ = coord.trigger(region("olympic", 47.8), false).await;
        })
    };
    caller.await.unwrap();
    assert_eq!(coord.in_flight(), 1);

    source.release(1);
    coord.wait_idle().await;
    assert_eq!(store.count_trails().await.unwrap(), 2);
}

#[tokio::test]
async fn test_shutdown_drains_and_rejects_new_jobs() {
    let source = GatedSource::new();
    let (coord, store) = coordinator(source.clone(), Duration::from_secs(30));

    let running = coord.trigger(region("olympic", 47.8), false).await.unwrap();
    let drain = {
        let coord = coord.clone();
        tokio::spawn(async move { coord.shutdown().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(coord.is_closed());
    assert!(!drain.is_finished());

    let rejected = coord.trigger(region("rainier", 46.85), false).await.unwrap_err();
    assert_eq!(rejected, CoordinatorError::ShuttingDown);
    // Joining the running job is still allowed.
    let joined = coord.trigger(region("olympic", 47.8), false).await.unwrap();
    assert_eq!(joined.disposition, Disposition::Joined);

    source.release(1);
    drain.await.unwrap();
    assert!(running.handle.is_finished());
    assert_eq!(coord.in_flight(), 0);
    assert_eq!(store.count_trails().await.unwrap(), 2);
}

#[tokio::test]
async fn test_oldest_finished_region_is_forgotten_at_limit() {
    let source = GatedSource::new();
    source.release(10);
    let store = Arc::new(InMemoryStore::new());
    let index = VectorStore::new(store.clone(), Arc::new(HashingEmbedder::new(64)));
    let ingester = Arc::new(TrailIngester::new(source.clone(), index));
    let coord = ScrapeCoordinator::with_region_limit(ingester, Duration::from_secs(30), 2);

    for (label, lat) in [("olympic", 47.8), ("rainier", 46.85), ("baker", 48.77)] {
        let trigger = coord.trigger(region(label, lat), false).await.unwrap();
        trigger.handle.wait().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(coord.regions().await.len(), 2);
    let oldest = region("olympic", 47.8).key;
    assert_eq!(coord.status(&oldest).await.status, RegionStatus::NotScraped);
    assert_eq!(coord.status(&region("baker", 48.77).key).await.status, RegionStatus::Done);

    // A forgotten region is fetched again; its trails are replaced, not duplicated.
    let again = coord.trigger(region("olympic", 47.8), false).await.unwrap();
    assert_eq!(again.disposition, Disposition::Started);
    again.handle.wait().await;
    assert_eq!(store.count_trails().await.unwrap(), 6);
}

#[tokio::test]
async fn test_running_region_is_never_forgotten() {
    let source = GatedSource::new();
    let store = Arc::new(InMemoryStore::new());
    let index = VectorStore::new(store, Arc::new(HashingEmbedder::new(64)));
    let ingester = Arc::new(TrailIngester::new(source.clone(), index));
    let coord = ScrapeCoordinator::with_region_limit(ingester, Duration::from_secs(30), 1);

    let running = coord.trigger(region("olympic", 47.8), false).await.unwrap();
    let other = coord.trigger(region("rainier", 46.85), false).await.unwrap();
    assert_eq!(coord.regions().await.len(), 2);

    let joined = coord.trigger(region("olympic", 47.8), false).await.unwrap();
    assert_eq!(joined.disposition, Disposition::Joined);
    assert_eq!(joined.handle.id(), running.handle.id());

    source.release(2);
    let (a, b) = tokio::join!(running.handle.wait(), other.handle.wait());
    assert!(a.is_success() && b.is_success());
    assert_eq!(source.opens(), 2);
}
