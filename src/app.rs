//! Wiring: build a [`SearchService`] from a [`Config`].
//!
//! [`build_service`] is what the CLI and server use. Tests and embedders
//! that want their own store, resolver, or source call [`assemble`] with a
//! hand-built [`Components`].

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;

use trailscout_core::embedding::EmbeddingProvider;
use trailscout_core::store::memory::InMemoryStore;
use trailscout_core::store::Store;

use crate::config::Config;
use crate::coordinator::ScrapeCoordinator;
use crate::embedding::create_provider;
use crate::geocode::{create_resolver, GeoResolver};
use crate::ingest::TrailIngester;
use crate::search::SearchService;
use crate::source::{create_source, TrailSource};
use crate::sqlite_store::SqliteStore;
use crate::vector_store::VectorStore;
use crate::{db, migrate};

/// The pluggable parts of a service.
pub struct Components {
    pub store: Arc<dyn Store>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub resolver: Arc<dyn GeoResolver>,
    pub source: Arc<dyn TrailSource>,
}

/// Open the configured store, creating the schema if needed.
pub async fn build_store(config: &Config) -> Result<Arc<dyn Store>> {
    match config.store.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        "sqlite" => {
            let pool = db::connect(config).await?;
            migrate::apply(&pool).await?;
            Ok(Arc::new(SqliteStore::new(pool, config.store.collection.clone())))
        }
        other => bail!("Unknown store backend: {}", other),
    }
}

pub fn assemble(components: Components, config: &Config) -> Arc<SearchService> {
    let index = VectorStore::new(components.store, components.embedder);
    let ingester = Arc::new(TrailIngester::new(components.source, index.clone()));
    let coordinator = ScrapeCoordinator::with_region_limit(
        ingester,
        Duration::from_secs(config.coordinator.max_job_secs),
        config.coordinator.max_tracked_regions,
    );
    Arc::new(SearchService::new(
        index,
        components.resolver,
        coordinator,
        config.search.clone(),
    ))
}

pub async fn build_service(config: &Config) -> Result<Arc<SearchService>> {
    let components = Components {
        store: build_store(config).await?,
        embedder: create_provider(&config.embedding)?,
        resolver: create_resolver(&config.geocode)?,
        source: create_source(&config.source)?,
    };
    tracing::debug!(
        store = %config.store.backend,
        embedder = components.embedder.model_name(),
        resolver = components.resolver.name(),
        source = %components.source.source_label(),
        "service assembled"
    );
    Ok(assemble(components, config))
}
