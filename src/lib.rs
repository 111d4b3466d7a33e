//! # trailscout
//!
//! Location-aware semantic search over hiking trails that acquires data
//! lazily: a search near a place with no stored trails schedules a
//! background fetch of that region and tells the caller to retry.
//!
//! ## Architecture
//!
//! ```text
//!   search_trails ──▶ GeoResolver ──▶ VectorStore.query ──▶ results
//!                                         │ miss
//!                                         ▼
//!                                  ScrapeCoordinator ──spawn──▶ TrailIngester
//!                                  (dedup per region)           source → normalize
//!                                                               → embed → upsert
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error types per layer |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | SQLite-backed trail store |
//! | [`embedding`] | Embedding providers |
//! | [`vector_store`] | Embed-and-store facade over a [`Store`](trailscout_core::store::Store) |
//! | [`geocode`] | Place name → coordinate resolvers |
//! | [`region`] | Region keys and descriptors |
//! | [`normalize`] | Raw source records → trail records |
//! | [`source`] | Trail source trait and factory |
//! | [`source_catalog`] | Local JSON / JSON Lines catalog source |
//! | [`source_http`] | Paged HTTP JSON source |
//! | [`ingest`] | Region ingestion runs |
//! | [`coordinator`] | Background fetch scheduling |
//! | [`search`] | The search service |
//! | [`app`] | Service wiring from config |
//! | [`traits`] | Agent-callable tools |
//! | [`server`] | HTTP tool server |
//! | [`cli`] | CLI command runners |

pub mod app;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod embedding;
pub mod error;
pub mod geocode;
pub mod ingest;
pub mod migrate;
pub mod normalize;
pub mod region;
pub mod search;
pub mod server;
pub mod source;
pub mod source_catalog;
pub mod source_http;
pub mod sqlite_store;
pub mod traits;
pub mod vector_store;
