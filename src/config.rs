use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use trailscout_core::geo::Coordinate;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub geocode: GeocodeConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// `"sqlite"` or `"memory"`.
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
            collection: default_collection(),
        }
    }
}

fn default_store_backend() -> String {
    "sqlite".to_string()
}
fn default_store_path() -> PathBuf {
    PathBuf::from("./data/trails.sqlite")
}
fn default_collection() -> String {
    "trails".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"hash"`, `"openai"`, `"ollama"`, or `"local"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_remote(&self) -> bool {
        matches!(self.provider.as_str(), "openai" | "ollama")
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeocodeConfig {
    /// `"google"` or `"static"`.
    #[serde(default = "default_geocode_provider")]
    pub provider: String,
    /// Environment variable holding the Google API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// ISO country code used to bias Google results.
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default = "default_geocode_timeout")]
    pub timeout_secs: u64,
    /// Named places for the static resolver (keys are matched case-insensitively).
    #[serde(default)]
    pub places: HashMap<String, Coordinate>,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            provider: default_geocode_provider(),
            api_key_env: default_api_key_env(),
            country: None,
            timeout_secs: default_geocode_timeout(),
            places: HashMap::new(),
        }
    }
}

fn default_geocode_provider() -> String {
    "static".to_string()
}
fn default_api_key_env() -> String {
    "GOOGLE_MAPS_API_KEY".to_string()
}
fn default_geocode_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// `"catalog"` (local JSON / JSON Lines file) or `"http"` (paged endpoint).
    #[serde(default = "default_source_kind")]
    pub kind: String,
    /// Label recorded with each fetched record and used in fallback ids.
    #[serde(default = "default_source_name")]
    pub name: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            name: default_source_name(),
            path: None,
            url: None,
            page_limit: default_page_limit(),
            request_delay_ms: default_request_delay_ms(),
            timeout_secs: default_source_timeout(),
        }
    }
}

fn default_source_kind() -> String {
    "catalog".to_string()
}
fn default_source_name() -> String {
    "catalog".to_string()
}
fn default_page_limit() -> u32 {
    10
}
fn default_request_delay_ms() -> u64 {
    500
}
fn default_source_timeout() -> u64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_radius")]
    pub default_radius_miles: f64,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Radius used by explicit `scrape_region` calls that give none.
    #[serde(default = "default_scrape_radius")]
    pub scrape_radius_miles: f64,
    /// Advisory delay returned when a search triggers a background fetch.
    #[serde(default = "default_retry_after")]
    pub retry_after_secs: u64,
    /// How long a failed region is left alone before a search re-triggers it.
    #[serde(default = "default_failure_cooldown")]
    pub failure_cooldown_secs: u64,
    /// Place names too coarse to fetch as a single region.
    #[serde(default = "default_broad_locations")]
    pub broad_locations: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_radius_miles: default_radius(),
            default_limit: default_limit(),
            scrape_radius_miles: default_scrape_radius(),
            retry_after_secs: default_retry_after(),
            failure_cooldown_secs: default_failure_cooldown(),
            broad_locations: default_broad_locations(),
        }
    }
}

fn default_radius() -> f64 {
    5.0
}
fn default_limit() -> usize {
    5
}
fn default_scrape_radius() -> f64 {
    50.0
}
fn default_retry_after() -> u64 {
    150
}
fn default_failure_cooldown() -> u64 {
    120
}
fn default_broad_locations() -> Vec<String> {
    [
        "washington",
        "wa",
        "washington state",
        "california",
        "ca",
        "oregon",
        "or",
        "idaho",
        "id",
        "seattle area",
        "puget sound",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CoordinatorConfig {
    /// Upper bound on a single background fetch; the job fails past it.
    #[serde(default = "default_max_job_secs")]
    pub max_job_secs: u64,
    /// Regions remembered before the oldest finished ones are forgotten.
    #[serde(default = "default_max_tracked_regions")]
    pub max_tracked_regions: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_job_secs: default_max_job_secs(),
            max_tracked_regions: default_max_tracked_regions(),
        }
    }
}

fn default_max_tracked_regions() -> usize {
    crate::coordinator::DEFAULT_REGION_LIMIT
}

fn default_max_job_secs() -> u64 {
    900
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    /// `tracing` filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a TOML configuration document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.store.backend.as_str() {
        "sqlite" | "memory" => {}
        other => bail!(
            "Unknown store backend: '{}'. Must be sqlite or memory.",
            other
        ),
    }
    if config.store.collection.trim().is_empty() {
        bail!("store.collection must not be empty");
    }

    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "hash" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, ollama, or local.",
            other
        ),
    }
    if embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if embedding.is_remote() {
        if embedding.dims.is_none() {
            bail!(
                "embedding.dims must be set when provider is '{}'",
                embedding.provider
            );
        }
        if embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                embedding.provider
            );
        }
    }
    if embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.geocode.provider.as_str() {
        "google" | "static" => {}
        other => bail!(
            "Unknown geocode provider: '{}'. Must be google or static.",
            other
        ),
    }
    for (name, coord) in &config.geocode.places {
        if !coord.is_valid() {
            bail!("geocode.places.'{}' is not a valid coordinate", name);
        }
    }

    match config.source.kind.as_str() {
        "catalog" => {
            if config.source.path.is_none() {
                bail!("source.path is required when source.kind is 'catalog'");
            }
        }
        "http" => {
            if config.source.url.is_none() {
                bail!("source.url is required when source.kind is 'http'");
            }
            if config.source.page_limit == 0 {
                bail!("source.page_limit must be >= 1");
            }
        }
        other => bail!(
            "Unknown source kind: '{}'. Must be catalog or http.",
            other
        ),
    }

    let search = &config.search;
    if !(search.default_radius_miles.is_finite() && search.default_radius_miles > 0.0) {
        bail!("search.default_radius_miles must be > 0");
    }
    if !(search.scrape_radius_miles.is_finite() && search.scrape_radius_miles > 0.0) {
        bail!("search.scrape_radius_miles must be > 0");
    }
    if search.default_limit == 0 {
        bail!("search.default_limit must be >= 1");
    }
    if config.coordinator.max_job_secs == 0 {
        bail!("coordinator.max_job_secs must be > 0");
    }
    if config.coordinator.max_tracked_regions == 0 {
        bail!("coordinator.max_tracked_regions must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [source]
        path = "./data/catalog.jsonl"
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.store.backend, "sqlite");
        assert_eq!(config.store.collection, "trails");
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.search.default_radius_miles, 5.0);
        assert_eq!(config.search.default_limit, 5);
        assert_eq!(config.search.retry_after_secs, 150);
        assert!(config.search.broad_locations.contains(&"puget sound".to_string()));
        assert_eq!(config.source.page_limit, 10);
        assert_eq!(config.coordinator.max_job_secs, 900);
        assert_eq!(config.coordinator.max_tracked_regions, 10_000);
    }

    #[test]
    fn test_static_places_parse() {
        let config = parse_config(
            r#"
            [geocode.places]
            "Olympic National Park" = { latitude = 47.8021, longitude = -123.6044 }

            [source]
            path = "catalog.jsonl"
            "#,
        )
        .unwrap();
        let coord = config.geocode.places["Olympic National Park"];
        assert_eq!(coord, Coordinate::new(47.8021, -123.6044));
    }

    #[test]
    fn test_remote_embedding_requires_model_and_dims() {
        let err = parse_config(
            r#"
            [embedding]
            provider = "openai"
            dims = 1536

            [source]
            path = "c.jsonl"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_catalog_requires_path() {
        let err = parse_config("").unwrap_err();
        assert!(err.to_string().contains("source.path"));
    }

    #[test]
    fn test_http_source_requires_url() {
        let err = parse_config(
            r#"
            [source]
            kind = "http"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("source.url"));
    }

    #[test]
    fn test_rejects_unknown_backend() {
        let err = parse_config(
            r#"
            [store]
            backend = "postgres"

            [source]
            path = "c.jsonl"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unknown store backend"));
    }

    #[test]
    fn test_rejects_invalid_place() {
        let err = parse_config(
            r#"
            [geocode.places]
            nowhere = { latitude = 123.0, longitude = 0.0 }

            [source]
            path = "c.jsonl"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }
}
