//! Ingestion source abstraction.
//!
//! A [`TrailSource`] produces the raw trail records for one region as a
//! lazy sequence. Opening the sequence is the only step allowed to fail the
//! whole fetch: once [`open`](TrailSource::open) returns a cursor, every
//! subsequent error is scoped to a single item and the cursor moves on.
//!
//! # Lifecycle
//!
//! 1. The app builds one source from `[source]` via [`create_source`].
//! 2. Each fetch job calls [`open`](TrailSource::open) with its region.
//! 3. The ingester drains the cursor with [`next_item`](TrailCursor::next_item)
//!    until it returns `None`.
//!
//! # Example
//!
//! ```rust
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use trailscout::normalize::RawTrail;
//! use trailscout::region::RegionDescriptor;
//! use trailscout::source::{TrailCursor, TrailSource, VecCursor};
//!
//! pub struct FixtureSource;
//!
//! #[async_trait]
//! impl TrailSource for FixtureSource {
//!     fn name(&self) -> &str { "fixture" }
//!     fn description(&self) -> &str { "Serves a fixed list" }
//!
//!     async fn open(&self, _region: &RegionDescriptor) -> Result<Box<dyn TrailCursor>> {
//!         let items: Vec<RawTrail> = vec![];
//!         Ok(Box::new(VecCursor::new(items.into_iter().map(Ok).collect())))
//!     }
//! }
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::SourceConfig;
use crate::normalize::{extract_coordinate, RawTrail};
use crate::region::RegionDescriptor;
use crate::source_catalog::CatalogSource;
use crate::source_http::HttpSource;

/// A lazy, single-pass sequence of raw records.
#[async_trait]
pub trait TrailCursor: Send {
    /// Next record, an item-scoped error, or `None` when exhausted.
    async fn next_item(&mut self) -> Option<Result<RawTrail>>;
}

#[async_trait]
pub trait TrailSource: Send + Sync {
    /// Instance name (e.g. `"wta"`).
    fn name(&self) -> &str;

    /// One-line description for status output.
    fn description(&self) -> &str;

    /// Source type identifier (e.g. `"catalog"`, `"http"`).
    fn source_type(&self) -> &str {
        "custom"
    }

    /// Label recorded with fetched trails: `"{type}:{name}"`.
    fn source_label(&self) -> String {
        format!("{}:{}", self.source_type(), self.name())
    }

    /// Begin fetching `region`. An error here means nothing could be
    /// fetched at all.
    async fn open(&self, region: &RegionDescriptor) -> Result<Box<dyn TrailCursor>>;
}

/// Cursor over records that were fetched up front.
pub struct VecCursor {
    items: VecDeque<Result<RawTrail>>,
}

impl VecCursor {
    pub fn new(items: Vec<Result<RawTrail>>) -> Self {
        Self {
            items: items.into(),
        }
    }
}

#[async_trait]
impl TrailCursor for VecCursor {
    async fn next_item(&mut self) -> Option<Result<RawTrail>> {
        self.items.pop_front()
    }
}

/// Whether a raw record belongs to `region`.
///
/// Records without a readable coordinate are kept so the ingester can
/// report them as skipped instead of dropping them silently.
pub fn in_region(raw: &RawTrail, region: &RegionDescriptor) -> bool {
    let Some(obj) = raw.as_object() else {
        return true;
    };
    match extract_coordinate(obj) {
        Ok(coord) => region.geo_filter().contains(&coord),
        Err(_) => true,
    }
}

/// Build the source selected by `config.kind`.
pub fn create_source(config: &SourceConfig) -> Result<Arc<dyn TrailSource>> {
    match config.kind.as_str() {
        "catalog" => Ok(Arc::new(CatalogSource::from_config(config)?)),
        "http" => Ok(Arc::new(HttpSource::from_config(config)?)),
        other => bail!("Unknown source kind: {}", other),
    }
}
