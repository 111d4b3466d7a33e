//! Catalog file source.
//!
//! Serves trails from a local file, either JSON Lines (one object per line)
//! or a single JSON array. Each fetch re-reads the file, so edits are picked
//! up by the next job. Only records inside the requested region are yielded.
//!
//! # Configuration
//!
//! ```toml
//! [source]
//! kind = "catalog"
//! name = "wta"
//! path = "./data/catalog.jsonl"
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

use crate::config::SourceConfig;
use crate::normalize::RawTrail;
use crate::region::RegionDescriptor;
use crate::source::{in_region, TrailCursor, TrailSource};

pub struct CatalogSource {
    name: String,
    path: PathBuf,
}

impl CatalogSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let path = config
            .path
            .clone()
            .ok_or_else(|| anyhow::anyhow!("source.path required for catalog source"))?;
        Ok(Self::new(config.name.clone(), path))
    }
}

/// Lines of a JSON Lines catalog, or the elements of a JSON array catalog.
enum Entries {
    Lines(std::vec::IntoIter<(usize, String)>),
    Array(std::vec::IntoIter<RawTrail>),
}

struct CatalogCursor {
    entries: Entries,
    region: RegionDescriptor,
    path: PathBuf,
}

#[async_trait]
impl TrailCursor for CatalogCursor {
    async fn next_item(&mut self) -> Option<Result<RawTrail>> {
        loop {
            let raw = match &mut self.entries {
                Entries::Array(items) => items.next()?,
                Entries::Lines(lines) => {
                    let (lineno, line) = lines.next()?;
                    match serde_json::from_str::<RawTrail>(&line) {
                        Ok(raw) => raw,
                        Err(e) => {
                            return Some(Err(anyhow::anyhow!(
                                "{}:{}: invalid JSON: {}",
                                self.path.display(),
                                lineno,
                                e
                            )))
                        }
                    }
                }
            };
            if in_region(&raw, &self.region) {
                return Some(Ok(raw));
            }
        }
    }
}

#[async_trait]
impl TrailSource for CatalogSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Trails from a local JSON / JSON Lines catalog"
    }

    fn source_type(&self) -> &str {
        "catalog"
    }

    async fn open(&self, region: &RegionDescriptor) -> Result<Box<dyn TrailCursor>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read catalog: {}", self.path.display()))?;

        let entries = if content.trim_start().starts_with('[') {
            let items: Vec<RawTrail> = serde_json::from_str(&content)
                .with_context(|| format!("Catalog is not a valid JSON array: {}", self.path.display()))?;
            Entries::Array(items.into_iter())
        } else {
            let lines: Vec<(usize, String)> = content
                .lines()
                .enumerate()
                .filter(|(_, l)| !l.trim().is_empty())
                .map(|(i, l)| (i + 1, l.to_string()))
                .collect();
            Entries::Lines(lines.into_iter())
        };

        Ok(Box::new(CatalogCursor {
            entries,
            region: region.clone(),
            path: self.path.clone(),
        }))
    }
}
