//! End-to-end behavior of `search_trails`: miss, background fetch, retry.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use trailscout::app::{assemble, Components};
use trailscout::config::{parse_config, Config};
use trailscout::coordinator::RegionStatus;
use trailscout::error::SearchError;
use trailscout::geocode::{GeoError, GeoResolver, StaticGeoResolver};
use trailscout::region::RegionDescriptor;
use trailscout::search::{ScrapeStatus, SearchRequest, SearchService};
use trailscout::source::{TrailCursor, TrailSource};
use trailscout::source_catalog::CatalogSource;
use trailscout_core::embedding::HashingEmbedder;
use trailscout_core::geo::Coordinate;
use trailscout_core::store::memory::InMemoryStore;
use trailscout_core::store::Store;

const OLYMPIC: Coordinate = Coordinate {
    latitude: 47.8021,
    longitude: -123.6044,
};

const CATALOG: &str = r#"[
  {"name":"Hurricane Ridge Meadows","slug":"hurricane-meadows","lat":47.8045,"lon":-123.6,"description":"Wildflower meadows and mountain views on an easy paved loop.","tags":["wildflowers","views"]},
  {"name":"Heart O' the Hills","slug":"heart-hills","lat":47.83,"lon":-123.57,"description":"Old growth forest walk beside a creek.","tags":["forest"]},
  {"name":"Sol Duc Falls","slug":"sol-duc-falls","lat":47.9526,"lon":-123.8355,"description":"Waterfall in a mossy canyon.","tags":["waterfall"]},
  {"name":"Ozette Triangle","slug":"ozette","lat":48.155,"lon":-124.667,"description":"Boardwalk to wild coastline and sea stacks.","tags":["coast"]}
]"#;

fn config() -> Config {
    parse_config(
        r#"
        [store]
        backend = "memory"

        [source]
        path = "unused.json"

        [search]
        retry_after_secs = 30
        failure_cooldown_secs = 600
        "#,
    )
    .unwrap()
}

fn resolver() -> StaticGeoResolver {
    StaticGeoResolver::new(HashMap::new())
        .with_place("Olympic National Park", OLYMPIC)
        .with_place("Washington", Coordinate::new(47.4, -120.5))
        .with_place("Empty Quarter", Coordinate::new(20.0, 50.0))
}

struct Fixture {
    service: Arc<SearchService>,
    store: Arc<InMemoryStore>,
    _dir: TempDir,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("catalog.json");
    std::fs::write(&path, CATALOG).unwrap();
    with_source(Arc::new(CatalogSource::new("fixture", path)), Arc::new(resolver()), dir)
}

fn with_source(source: Arc<dyn TrailSource>, resolver: Arc<dyn GeoResolver>, dir: TempDir) -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let service = assemble(
        Components {
            store: store.clone(),
            embedder: Arc::new(HashingEmbedder::default()),
            resolver,
            source,
        },
        &config(),
    );
    Fixture {
        service,
        store,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_first_search_triggers_then_retry_finds_trails() {
    let f = fixture();
    let request = SearchRequest::new("wildflower meadow views").near("Olympic National Park");

    let first = f.service.search(request.clone()).await.unwrap();
    assert!(first.trails.is_empty());
    assert!(first.triggered_scrape);
    assert_eq!(first.retry_after_secs, Some(30));
    assert!(first.message.unwrap().contains("Olympic National Park"));
    let key = first.region_key.unwrap();

    f.service.coordinator().wait_idle().await;
    assert_eq!(f.service.coordinator().status(&key).await.status, RegionStatus::Done);

    let second = f.service.search(request).await.unwrap();
    assert!(!second.triggered_scrape);
    assert!(second.message.is_none());
    assert_eq!(second.trails[0].name, "Hurricane Ridge Meadows");
    for trail in &second.trails {
        let d = trail.distance_from_query_center.unwrap();
        assert!(d <= 5.0, "{} is {} miles out", trail.name, d);
        assert!(trail.similarity_score.is_some());
    }
    // Only trails inside the 5 mile region were fetched.
    assert_eq!(f.store.count_trails().await.unwrap(), 2);
}

#[tokio::test]
async fn test_repeated_misses_share_one_job() {
    let f = fixture();
    let request = SearchRequest::new("creek").near("Olympic National Park");

    let a = f.service.search(request.clone()).await.unwrap();
    let b = f.service.search(request.clone()).await.unwrap();
    assert!(a.triggered_scrape);
    if b.triggered_scrape {
        // Still running: the second search joined the first job.
        assert_eq!(a.job_id, b.job_id);
    } else {
        // Already finished and the store answered.
        assert!(!b.trails.is_empty());
    }
    f.service.coordinator().wait_idle().await;
    assert_eq!(f.service.coordinator().regions().await.len(), 1);
}

#[tokio::test]
async fn test_loaded_region_with_no_match_does_not_refetch() {
    let f = fixture();
    f.service
        .search(SearchRequest::new("meadow").near("Empty Quarter"))
        .await
        .unwrap();
    f.service.coordinator().wait_idle().await;

    let again = f
        .service
        .search(SearchRequest::new("meadow").near("Empty Quarter"))
        .await
        .unwrap();
    assert!(again.trails.is_empty());
    assert!(!again.triggered_scrape);
    assert!(again.message.unwrap().contains("already loaded"));
}

#[tokio::test]
async fn test_unknown_location_is_an_error_without_side_effects() {
    let f = fixture();
    let err = f
        .service
        .search(SearchRequest::new("lakes").near("Zzzqx123"))
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::LocationNotFound { ref location } if location == "Zzzqx123"));
    assert_eq!(err.code(), "location_not_found");
    assert!(f.service.coordinator().regions().await.is_empty());
    assert_eq!(f.store.count_trails().await.unwrap(), 0);
}

#[tokio::test]
async fn test_no_location_searches_everything() {
    let f = fixture();
    f.service
        .scrape_region("Olympic National Park", Some(100.0), false)
        .await
        .unwrap();
    f.service.coordinator().wait_idle().await;

    let resp = f.service.search(SearchRequest::new("waterfall canyon")).await.unwrap();
    assert!(!resp.triggered_scrape);
    assert_eq!(resp.trails[0].name, "Sol Duc Falls");
    assert!(resp.trails.iter().all(|t| t.distance_from_query_center.is_none()));
    assert_eq!(resp.trails.len(), 4);
}

#[tokio::test]
async fn test_coordinate_literal_location() {
    let f = fixture();
    let request = SearchRequest::new("forest creek").near("47.83,-123.57").within(1.0);
    assert!(f.service.search(request.clone()).await.unwrap().triggered_scrape);
    f.service.coordinator().wait_idle().await;
    let resp = f.service.search(request).await.unwrap();
    assert_eq!(resp.trails.len(), 1);
    assert_eq!(resp.trails[0].name, "Heart O' the Hills");
}

#[tokio::test]
async fn test_broad_location_is_refused() {
    let f = fixture();
    let resp = f
        .service
        .search(SearchRequest::new("lakes").near("  WASHINGTON "))
        .await
        .unwrap();
    assert!(!resp.triggered_scrape);
    assert!(resp.message.unwrap().contains("too broad"));
    assert!(f.service.coordinator().regions().await.is_empty());
}

#[tokio::test]
async fn test_rescrape_refetches_and_keeps_ids() {
    let f = fixture();
    let request = SearchRequest::new("meadows").near("Olympic National Park");
    f.service.search(request.clone()).await.unwrap();
    f.service.coordinator().wait_idle().await;
    let before: Vec<String> = f.store.list_trails().await.unwrap().into_iter().map(|t| t.id).collect();

    let forced = f
        .service
        .search(SearchRequest::new("").near("Olympic National Park").rescrape(true))
        .await
        .unwrap();
    assert!(forced.triggered_scrape);
    f.service.coordinator().wait_idle().await;

    let after: Vec<String> = f.store.list_trails().await.unwrap().into_iter().map(|t| t.id).collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_rescrape_requires_location() {
    let f = fixture();
    let err = f
        .service
        .search(SearchRequest::new("meadows").rescrape(true))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "bad_request");
}

#[tokio::test]
async fn test_explicit_scrape_region() {
    let f = fixture();
    let started = f
        .service
        .scrape_region("Olympic National Park", None, false)
        .await
        .unwrap();
    assert_eq!(started.status, ScrapeStatus::Started);
    // Default scrape radius (50 miles) reaches Sol Duc but not Ozette.
    f.service.coordinator().wait_idle().await;
    assert_eq!(f.service.get_trail_count().await.unwrap(), 3);

    let status = f
        .service
        .scrape_status("Olympic National Park", Some(50.0))
        .await
        .unwrap();
    assert_eq!(status.status, RegionStatus::Done);
    assert_eq!(status.job.unwrap().written, 3);

    let listed = f.service.list_stored_trails().await.unwrap();
    let names: Vec<&str> = listed.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["Heart O' the Hills", "Hurricane Ridge Meadows", "Sol Duc Falls"]);
    let full = f.service.get_trail(&listed[0].id).await.unwrap().unwrap();
    assert!(full.search_text.contains("forest"));
}

// ─── Failure handling ───────────────────────────────────────────────

/// Fails to open until switched on.
struct Flaky {
    up: AtomicBool,
    opens: AtomicUsize,
    inner: CatalogSource,
}

#[async_trait]
impl TrailSource for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn description(&self) -> &str {
        "down until switched on"
    }

    async fn open(&self, region: &RegionDescriptor) -> Result<Box<dyn TrailCursor>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if !self.up.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        self.inner.open(region).await
    }
}

#[tokio::test]
async fn test_failed_region_cools_down_until_rescrape() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("catalog.json");
    std::fs::write(&path, CATALOG).unwrap();
    let source = Arc::new(Flaky {
        up: AtomicBool::new(false),
        opens: AtomicUsize::new(0),
        inner: CatalogSource::new("fixture", path),
    });
    let f = with_source(source.clone(), Arc::new(resolver()), dir);
    let request = SearchRequest::new("meadows").near("Olympic National Park");

    assert!(f.service.search(request.clone()).await.unwrap().triggered_scrape);
    f.service.coordinator().wait_idle().await;

    let cooling = f.service.search(request.clone()).await.unwrap();
    assert!(!cooling.triggered_scrape);
    let message = cooling.message.unwrap();
    assert!(message.contains("failed"), "{}", message);
    assert!(message.contains("connection refused"), "{}", message);
    assert!(cooling.retry_after_secs.unwrap() <= 600);
    assert_eq!(source.opens.load(Ordering::SeqCst), 1);

    source.up.store(true, Ordering::SeqCst);
    let forced = f
        .service
        .search(request.clone().rescrape(true))
        .await
        .unwrap();
    assert!(forced.triggered_scrape);
    f.service.coordinator().wait_idle().await;

    let recovered = f.service.search(request).await.unwrap();
    assert!(!recovered.trails.is_empty());
    assert_eq!(source.opens.load(Ordering::SeqCst), 2);
}

struct Throttled;

#[async_trait]
impl GeoResolver for Throttled {
    fn name(&self) -> &str {
        "throttled"
    }

    async fn resolve(&self, _place: &str) -> Result<Coordinate, GeoError> {
        Err(GeoError::RateLimited)
    }
}

#[tokio::test]
async fn test_rate_limited_geocoder_surfaces_distinct_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("catalog.json");
    std::fs::write(&path, CATALOG).unwrap();
    let f = with_source(Arc::new(CatalogSource::new("fixture", path)), Arc::new(Throttled), dir);

    let err = f
        .service
        .search(SearchRequest::new("meadows").near("Olympic National Park"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "rate_limited");
    assert!(f.service.coordinator().regions().await.is_empty());
}
