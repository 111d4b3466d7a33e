//! # Trailscout Core
//!
//! Runtime-agnostic logic for Trailscout: trail models and stable ids,
//! haversine geo filtering, the store abstraction with an in-memory
//! backend, the ranking algorithm, and the embedding trait.
//!
//! This crate contains no tokio, sqlx, network, or filesystem
//! dependencies; the `trailscout` app crate supplies those.

pub mod embedding;
pub mod geo;
pub mod models;
pub mod search;
pub mod store;
