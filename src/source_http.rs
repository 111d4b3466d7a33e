//! Paged HTTP JSON source.
//!
//! Issues `GET {url}?lat=..&lon=..&radius_miles=..&q=..&page=N` for
//! `N = 1..=page_limit`, pausing `request_delay_ms` between pages. A page
//! body is either a JSON array of trail objects or an object with a
//! `trails` (or `items`) array. An empty page ends the sequence.
//!
//! Failure to fetch the first page fails the open; a failure on a later
//! page is reported as one item error and ends the sequence, keeping the
//! pages already fetched.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;

use crate::config::SourceConfig;
use crate::normalize::RawTrail;
use crate::region::RegionDescriptor;
use crate::source::{in_region, TrailCursor, TrailSource};

#[derive(Clone)]
pub struct HttpSource {
    name: String,
    url: String,
    page_limit: u32,
    request_delay: Duration,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow!("source.url required for http source"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("trailscout/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            name: config.name.clone(),
            url,
            page_limit: config.page_limit.max(1),
            request_delay: Duration::from_millis(config.request_delay_ms),
            client,
        })
    }

    async fn fetch_page(&self, region: &RegionDescriptor, page: u32) -> Result<Vec<RawTrail>> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("lat", region.center.latitude.to_string()),
                ("lon", region.center.longitude.to_string()),
                ("radius_miles", region.radius_miles.to_string()),
                ("q", region.label.clone()),
                ("page", page.to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("GET {} page {} failed", self.url, page))?;

        let status = response.status();
        if !status.is_success() {
            bail!("GET {} page {} returned HTTP {}", self.url, page, status);
        }
        let body: serde_json::Value = response
            .json()
            .await
            .with_context(|| format!("page {} is not valid JSON", page))?;
        parse_page(body)
    }
}

/// Extract the trail array from a page body.
fn parse_page(body: serde_json::Value) -> Result<Vec<RawTrail>> {
    match body {
        serde_json::Value::Array(items) => Ok(items),
        serde_json::Value::Object(mut obj) => {
            for key in ["trails", "items"] {
                if let Some(serde_json::Value::Array(items)) = obj.remove(key) {
                    return Ok(items);
                }
            }
            bail!("page object has no 'trails' or 'items' array")
        }
        other => bail!("unexpected page body: {}", other),
    }
}

struct HttpCursor {
    source: HttpSource,
    region: RegionDescriptor,
    buffer: VecDeque<RawTrail>,
    next_page: u32,
    exhausted: bool,
}

#[async_trait]
impl TrailCursor for HttpCursor {
    async fn next_item(&mut self) -> Option<Result<RawTrail>> {
        loop {
            while let Some(raw) = self.buffer.pop_front() {
                if in_region(&raw, &self.region) {
                    return Some(Ok(raw));
                }
            }
            if self.exhausted || self.next_page > self.source.page_limit {
                return None;
            }

            tokio::time::sleep(self.source.request_delay).await;
            let page = self.next_page;
            self.next_page += 1;
            match self.source.fetch_page(&self.region, page).await {
                Ok(items) if items.is_empty() => {
                    self.exhausted = true;
                }
                Ok(items) => self.buffer.extend(items),
                Err(err) => {
                    self.exhausted = true;
                    tracing::warn!(region = %self.region.key, page, error = %err, "stopping paged fetch");
                    return Some(Err(err));
                }
            }
        }
    }
}

#[async_trait]
impl TrailSource for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Trails from a paged JSON HTTP endpoint"
    }

    fn source_type(&self) -> &str {
        "http"
    }

    async fn open(&self, region: &RegionDescriptor) -> Result<Box<dyn TrailCursor>> {
        let first = self.fetch_page(region, 1).await?;
        let exhausted = first.is_empty();
        Ok(Box::new(HttpCursor {
            source: self.clone(),
            region: region.clone(),
            buffer: first.into(),
            next_page: 2,
            exhausted,
        }))
    }
}
