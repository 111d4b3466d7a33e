//! Great-circle distance and radius filtering.
//!
//! Distances are in statute miles using the haversine formula over a
//! spherical Earth of radius [`EARTH_RADIUS_MILES`].

use serde::{Deserialize, Serialize};

/// Mean Earth radius in miles.
pub const EARTH_RADIUS_MILES: f64 = 3959.0;

/// A WGS84 point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// True when both components are finite and inside the valid
    /// latitude/longitude ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Parse a `"lat,lon"` literal such as `"47.80, -123.60"`.
    ///
    /// Returns `None` for anything that is not exactly two comma-separated
    /// numbers forming a valid coordinate.
    pub fn parse_literal(input: &str) -> Option<Self> {
        let (lat, lon) = input.split_once(',')?;
        let lat: f64 = lat.trim().parse().ok()?;
        let lon: f64 = lon.trim().parse().ok()?;
        let coord = Self::new(lat, lon);
        coord.is_valid().then_some(coord)
    }

    /// Haversine distance to `other`, in miles.
    pub fn distance_miles(&self, other: &Coordinate) -> f64 {
        haversine_miles(*self, *other)
    }
}

/// Great-circle distance between two coordinates, in miles.
pub fn haversine_miles(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Clamp guards asin against h drifting past 1.0 for antipodal points.
    2.0 * EARTH_RADIUS_MILES * h.sqrt().min(1.0).asin()
}

/// A circular region: every point within `radius_miles` of `center`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFilter {
    pub center: Coordinate,
    pub radius_miles: f64,
}

impl GeoFilter {
    pub fn new(center: Coordinate, radius_miles: f64) -> Self {
        Self {
            center,
            radius_miles,
        }
    }

    /// Distance from the center when `point` lies inside the radius
    /// (boundary inclusive), otherwise `None`.
    pub fn distance_if_within(&self, point: &Coordinate) -> Option<f64> {
        let d = self.center.distance_miles(point);
        (d <= self.radius_miles).then_some(d)
    }

    pub fn contains(&self, point: &Coordinate) -> bool {
        self.distance_if_within(point).is_some()
    }
}
