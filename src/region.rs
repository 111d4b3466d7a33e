//! Region identity for background acquisition.
//!
//! Two searches that describe the same circle must map to the same
//! [`RegionKey`] so the coordinator can collapse them into one fetch. Keys
//! snap the center to 3 decimal places (about 110 m) and the radius to a
//! tenth of a mile.

use serde::Serialize;
use std::fmt;

use trailscout_core::geo::{Coordinate, GeoFilter};

/// Canonical identifier of a fetchable region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RegionKey(String);

/// Round to `places` decimals, folding negative zero into zero.
fn snap(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor + 0.0
}

impl RegionKey {
    /// Derive the key for a circle, optionally namespaced by `qualifier`
    /// (lower-cased and trimmed; empty qualifiers are ignored).
    pub fn derive(center: Coordinate, radius_miles: f64, qualifier: Option<&str>) -> Self {
        let mut key = format!(
            "{:.3},{:.3}~{:.1}mi",
            snap(center.latitude, 3),
            snap(center.longitude, 3),
            snap(radius_miles, 1)
        );
        if let Some(q) = qualifier.map(|q| q.trim().to_lowercase()) {
            if !q.is_empty() {
                key.push('#');
                key.push_str(&q);
            }
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a fetch job needs to know about its region.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionDescriptor {
    pub key: RegionKey,
    /// Human-readable name (usually the location the caller typed).
    pub label: String,
    pub center: Coordinate,
    pub radius_miles: f64,
}

impl RegionDescriptor {
    pub fn new(label: impl Into<String>, center: Coordinate, radius_miles: f64) -> Self {
        Self {
            key: RegionKey::derive(center, radius_miles, None),
            label: label.into(),
            center,
            radius_miles,
        }
    }

    pub fn geo_filter(&self) -> GeoFilter {
        GeoFilter::new(self.center, self.radius_miles)
    }
}
