//! The search service: location-filtered semantic search that fetches
//! missing regions in the background.
//!
//! # Flow
//!
//! 1. Resolve the location (if any). Unresolvable or rate-limited lookups
//!    are errors and never start a fetch.
//! 2. With `rescrape`, skip the query and force a fresh fetch.
//! 3. Query the store, filtered to `radius_miles` around the location.
//! 4. Hits are returned as-is. A miss with a location asks the coordinator
//!    for the region and reports that a fetch is under way; the caller
//!    retries after `retryAfterSecs` or polls [`SearchService::scrape_status`].
//!
//! A miss is not always a trigger: overly broad locations, regions that
//! are already loaded, and regions whose last fetch failed recently all
//! return an empty result with an explanatory message instead.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use trailscout_core::geo::{Coordinate, GeoFilter};
use trailscout_core::models::{TrailRecord, TrailResult};

use crate::config::SearchConfig;
use crate::coordinator::{
    Disposition, RegionSnapshot, RegionStatus, ScrapeCoordinator, Trigger,
};
use crate::error::SearchError;
use crate::geocode::{normalize_place, GeoError, GeoResolver};
use crate::region::{RegionDescriptor, RegionKey};
use crate::vector_store::VectorStore;

fn default_true() -> bool {
    true
}

/// Parameters of `search_trails`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, alias = "radius_miles")]
    pub radius_miles: Option<f64>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default = "default_true", alias = "lazy_scrape")]
    pub lazy_scrape: bool,
    #[serde(default)]
    pub rescrape: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            location: None,
            radius_miles: None,
            limit: None,
            lazy_scrape: true,
            rescrape: false,
        }
    }

    pub fn near(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn within(mut self, radius_miles: f64) -> Self {
        self.radius_miles = Some(radius_miles);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn lazy_scrape(mut self, enabled: bool) -> Self {
        self.lazy_scrape = enabled;
        self
    }

    pub fn rescrape(mut self, enabled: bool) -> Self {
        self.rescrape = enabled;
        self
    }
}

/// Result of `search_trails`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub trails: Vec<TrailResult>,
    pub triggered_scrape: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_key: Option<RegionKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

impl SearchResponse {
    fn results(trails: Vec<TrailResult>) -> Self {
        Self {
            trails,
            triggered_scrape: false,
            message: None,
            retry_after_secs: None,
            region_key: None,
            job_id: None,
        }
    }

    fn empty(message: Option<String>) -> Self {
        Self {
            message,
            ..Self::results(Vec::new())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    Started,
    InProgress,
    AlreadyDone,
}

/// Result of `scrape_region`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResponse {
    pub status: ScrapeStatus,
    pub message: String,
    pub region_key: RegionKey,
    pub job_id: Uuid,
}

pub struct SearchService {
    index: VectorStore,
    resolver: Arc<dyn GeoResolver>,
    coordinator: ScrapeCoordinator,
    settings: SearchConfig,
    broad_locations: HashSet<String>,
}

impl SearchService {
    pub fn new(
        index: VectorStore,
        resolver: Arc<dyn GeoResolver>,
        coordinator: ScrapeCoordinator,
        settings: SearchConfig,
    ) -> Self {
        let broad_locations = settings
            .broad_locations
            .iter()
            .map(|l| normalize_place(l))
            .collect();
        Self {
            index,
            resolver,
            coordinator,
            settings,
            broad_locations,
        }
    }

    pub fn coordinator(&self) -> &ScrapeCoordinator {
        &self.coordinator
    }

    pub fn settings(&self) -> &SearchConfig {
        &self.settings
    }

    async fn resolve(&self, location: &str) -> Result<Coordinate, SearchError> {
        self.resolver.resolve(location).await.map_err(|err| {
            tracing::info!(location, resolver = self.resolver.name(), error = %err, "location not resolved");
            match err {
                GeoError::NotFound(_) => SearchError::LocationNotFound {
                    location: location.to_string(),
                },
                GeoError::RateLimited => SearchError::LocationResolutionRateLimited {
                    location: location.to_string(),
                },
                GeoError::Unavailable(message) => SearchError::LocationResolutionFailed {
                    location: location.to_string(),
                    message,
                },
            }
        })
    }

    fn is_broad(&self, location: &str) -> bool {
        self.broad_locations.contains(&normalize_place(location))
    }

    fn validate_radius(radius: f64) -> Result<f64, SearchError> {
        if radius.is_finite() && radius > 0.0 {
            Ok(radius)
        } else {
            Err(SearchError::InvalidRequest(format!(
                "radius_miles must be a positive number, got {}",
                radius
            )))
        }
    }

    fn fetching_message(&self, trigger: &Trigger) -> String {
        let region = trigger.handle.region();
        let lead = match trigger.disposition {
            Disposition::Joined => format!("Trails near {} are already being fetched", region.label),
            _ => format!(
                "No trails stored near {} yet; fetching trails within {} miles in the background",
                region.label, region.radius_miles
            ),
        };
        format!(
            "{}. Retry in about {} seconds or check scrape_status for progress.",
            lead, self.settings.retry_after_secs
        )
    }

    fn fetching(&self, trigger: &Trigger) -> SearchResponse {
        SearchResponse {
            triggered_scrape: true,
            message: Some(self.fetching_message(trigger)),
            retry_after_secs: Some(self.settings.retry_after_secs),
            region_key: Some(trigger.handle.region().key.clone()),
            job_id: Some(trigger.handle.id()),
            ..SearchResponse::results(Vec::new())
        }
    }

    /// Seconds left in the failure cooldown for `snapshot`, if any.
    fn cooldown_remaining(&self, snapshot: &RegionSnapshot) -> Option<u64> {
        if snapshot.status != RegionStatus::Failed {
            return None;
        }
        let last = snapshot.last_attempt?;
        let elapsed = (Utc::now() - last).num_seconds().max(0) as u64;
        self.settings
            .failure_cooldown_secs
            .checked_sub(elapsed)
            .filter(|remaining| *remaining > 0)
    }

    /// Search stored trails, fetching the region in the background on a miss.
    pub async fn search(&self, req: SearchRequest) -> Result<SearchResponse, SearchError> {
        let query = req.query.trim();
        if query.is_empty() && !req.rescrape {
            return Err(SearchError::InvalidRequest("query must not be empty".into()));
        }
        if req.limit == Some(0) {
            return Err(SearchError::InvalidRequest("limit must be >= 1".into()));
        }
        let radius =
            Self::validate_radius(req.radius_miles.unwrap_or(self.settings.default_radius_miles))?;
        let limit = req.limit.unwrap_or(self.settings.default_limit);

        let location = req
            .location
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty());
        let center = match location {
            Some(place) => Some(self.resolve(place).await?),
            None => None,
        };

        if req.rescrape {
            let (Some(place), Some(center)) = (location, center) else {
                return Err(SearchError::InvalidRequest(
                    "rescrape requires a location".into(),
                ));
            };
            let region = RegionDescriptor::new(place, center, radius);
            let trigger = self.coordinator.trigger(region, true).await?;
            return Ok(self.fetching(&trigger));
        }

        let geo = center.map(|c| GeoFilter::new(c, radius));
        let trails = self.index.query(query, limit, geo.as_ref()).await?;
        if !trails.is_empty() {
            return Ok(SearchResponse::results(trails));
        }

        let (Some(place), Some(center)) = (location, center) else {
            return Ok(SearchResponse::empty(None));
        };
        if !req.lazy_scrape {
            return Ok(SearchResponse::empty(Some(format!(
                "No stored trails near {} match \"{}\".",
                place, query
            ))));
        }
        if self.is_broad(place) {
            return Ok(SearchResponse::empty(Some(format!(
                "\"{}\" is too broad to fetch as one region; name a specific park, trailhead, or town.",
                place
            ))));
        }

        let region = RegionDescriptor::new(place, center, radius);
        let snapshot = self.coordinator.status(&region.key).await;
        if let Some(remaining) = self.cooldown_remaining(&snapshot) {
            let reason = snapshot
                .job
                .as_ref()
                .and_then(|j| j.error.clone())
                .unwrap_or_else(|| "unknown error".to_string());
            return Ok(SearchResponse {
                message: Some(format!(
                    "The last fetch for {} failed ({}). Try again in {} seconds, or pass rescrape to retry now.",
                    place, reason, remaining
                )),
                retry_after_secs: Some(remaining),
                region_key: Some(region.key),
                ..SearchResponse::empty(None)
            });
        }

        let trigger = self.coordinator.trigger(region, false).await?;
        match trigger.disposition {
            Disposition::Started | Disposition::Joined => Ok(self.fetching(&trigger)),
            Disposition::AlreadyDone => Ok(SearchResponse {
                message: Some(format!(
                    "Trails near {} are already loaded, but none match \"{}\". Try another query or a larger radius, or pass rescrape to refresh.",
                    place, query
                )),
                region_key: Some(trigger.handle.region().key.clone()),
                ..SearchResponse::empty(None)
            }),
        }
    }

    /// Start (or join) a fetch for `region` without searching.
    pub async fn scrape_region(
        &self,
        region: &str,
        radius_miles: Option<f64>,
        rescrape: bool,
    ) -> Result<ScrapeResponse, SearchError> {
        let place = region.trim();
        if place.is_empty() {
            return Err(SearchError::InvalidRequest("region must not be empty".into()));
        }
        let radius =
            Self::validate_radius(radius_miles.unwrap_or(self.settings.scrape_radius_miles))?;
        let center = self.resolve(place).await?;
        let trigger = self
            .coordinator
            .trigger(RegionDescriptor::new(place, center, radius), rescrape)
            .await?;

        let status = match trigger.disposition {
            Disposition::Started => ScrapeStatus::Started,
            Disposition::Joined => ScrapeStatus::InProgress,
            Disposition::AlreadyDone => ScrapeStatus::AlreadyDone,
        };
        let message = match status {
            ScrapeStatus::AlreadyDone => format!(
                "Trails within {} miles of {} are already loaded; pass rescrape to refresh them.",
                radius, place
            ),
            _ => self.fetching_message(&trigger),
        };
        Ok(ScrapeResponse {
            status,
            message,
            region_key: trigger.handle.region().key.clone(),
            job_id: trigger.handle.id(),
        })
    }

    /// Region status for `region` at `radius_miles` (search default if none).
    pub async fn scrape_status(
        &self,
        region: &str,
        radius_miles: Option<f64>,
    ) -> Result<RegionSnapshot, SearchError> {
        let radius =
            Self::validate_radius(radius_miles.unwrap_or(self.settings.default_radius_miles))?;
        let center = self.resolve(region.trim()).await?;
        let key = RegionKey::derive(center, radius, None);
        Ok(self.coordinator.status(&key).await)
    }

    pub async fn list_stored_trails(&self) -> Result<Vec<TrailResult>, SearchError> {
        Ok(self.index.list().await?)
    }

    pub async fn get_trail_count(&self) -> Result<usize, SearchError> {
        Ok(self.index.count().await?)
    }

    pub async fn get_trail(&self, id: &str) -> Result<Option<TrailRecord>, SearchError> {
        Ok(self.index.get(id).await?)
    }
}
