//! Raw source records → [`TrailRecord`].
//!
//! Sources hand over loosely-shaped JSON objects. This module validates the
//! fields every trail must have (name, coordinate, an identity to derive a
//! stable id from), lifts tags and timestamps into their slots, and keeps
//! every other field in `metadata`. It also builds the text the trail is
//! embedded from.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use trailscout_core::geo::Coordinate;
use trailscout_core::models::{canonical_url, stable_id, TrailRecord};

use crate::error::ItemParseError;

/// A record exactly as a source produced it.
pub type RawTrail = Value;

const NAME_KEYS: &[&str] = &["name", "title"];
const ID_KEYS: &[&str] = &["slug", "id"];
const LAT_KEYS: &[&str] = &["latitude", "lat"];
const LON_KEYS: &[&str] = &["longitude", "lon", "lng"];
const TAG_KEYS: &[&str] = &["tags", "features"];
const TIMESTAMP_KEYS: &[&str] = &["updated_at", "source_timestamp", "last_updated"];
const CONSUMED: &[&str] = &[
    "name",
    "title",
    "description",
    "url",
    "slug",
    "id",
    "location",
    "latitude",
    "lat",
    "longitude",
    "lon",
    "lng",
    "tags",
    "features",
    "updated_at",
    "source_timestamp",
    "last_updated",
];

const GETTING_THERE_CHARS: usize = 300;
const MAX_ALERTS: usize = 5;

fn first_str<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn first_number(obj: &Map<String, Value>, keys: &[&str]) -> Option<Result<f64, ItemParseError>> {
    keys.iter().find_map(|k| obj.get(*k)).map(|v| {
        as_f64(v).ok_or_else(|| ItemParseError::InvalidCoordinate(format!("not a number: {}", v)))
    })
}

/// Pull the trail coordinate from a raw object.
///
/// Accepts a nested `location` object or top-level fields, with
/// `latitude`/`lat` and `longitude`/`lon`/`lng` spellings, as numbers or
/// numeric strings.
pub fn extract_coordinate(obj: &Map<String, Value>) -> Result<Coordinate, ItemParseError> {
    let scope = match obj.get("location") {
        Some(Value::Object(loc)) => loc,
        Some(Value::Null) | None => obj,
        Some(other) => {
            return Err(ItemParseError::InvalidCoordinate(format!(
                "location is not an object: {}",
                other
            )))
        }
    };

    let lat = first_number(scope, LAT_KEYS).ok_or(ItemParseError::MissingField("latitude"))??;
    let lon = first_number(scope, LON_KEYS).ok_or(ItemParseError::MissingField("longitude"))??;
    let coord = Coordinate::new(lat, lon);
    if !coord.is_valid() {
        return Err(ItemParseError::InvalidCoordinate(format!(
            "{},{} is out of range",
            lat, lon
        )));
    }
    Ok(coord)
}

/// Derive the stable id: canonical URL when present, else `source:slug`.
fn derive_id(obj: &Map<String, Value>, source_label: &str) -> Result<String, ItemParseError> {
    if let Some(url) = first_str(obj, &["url"]) {
        return Ok(stable_id(&canonical_url(url)));
    }
    let local = ID_KEYS.iter().find_map(|k| match obj.get(*k) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    });
    match local {
        Some(local) => Ok(stable_id(&format!("{}:{}", source_label, local))),
        None => Err(ItemParseError::MissingIdentity),
    }
}

fn collect_tags(obj: &Map<String, Value>) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for key in TAG_KEYS {
        if let Some(Value::Array(items)) = obj.get(*key) {
            for tag in items.iter().filter_map(|t| t.as_str()).map(str::trim) {
                if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
                    tags.push(tag.to_string());
                }
            }
        }
    }
    tags
}

fn parse_timestamp(obj: &Map<String, Value>) -> Option<DateTime<Utc>> {
    let raw = first_str(obj, TIMESTAMP_KEYS)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Validate `raw` and turn it into a [`TrailRecord`].
///
/// `fetched_at` is used when the record carries no parseable timestamp.
pub fn normalize(
    raw: &RawTrail,
    source_label: &str,
    fetched_at: DateTime<Utc>,
) -> Result<TrailRecord, ItemParseError> {
    let obj = raw.as_object().ok_or(ItemParseError::NotAnObject)?;

    let name = first_str(obj, NAME_KEYS).ok_or(ItemParseError::MissingField("name"))?;
    let location = extract_coordinate(obj)?;
    let id = derive_id(obj, source_label)?;
    let description = first_str(obj, &["description"]).unwrap_or_default();
    let url = first_str(obj, &["url"]).map(str::to_string);
    let tags = collect_tags(obj);
    let source_timestamp = parse_timestamp(obj).unwrap_or(fetched_at);

    let metadata: Map<String, Value> = obj
        .iter()
        .filter(|(k, v)| !CONSUMED.contains(&k.as_str()) && !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let search_text = searchable_text(name, description, &tags, &metadata);

    Ok(TrailRecord {
        id,
        name: name.to_string(),
        description: description.to_string(),
        url,
        location,
        tags,
        metadata,
        source_timestamp,
        search_text,
    })
}

fn display_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(true) => Some("yes".to_string()),
        Value::Bool(false) => Some("no".to_string()),
        _ => None,
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Build the embedding text: name and description followed by labelled
/// trail facts found in `metadata`.
pub fn searchable_text(
    name: &str,
    description: &str,
    tags: &[String],
    metadata: &Map<String, Value>,
) -> String {
    let mut parts = vec![name.to_string()];
    if !description.is_empty() {
        parts.push(description.to_string());
    }

    let labelled: &[(&str, &str, &str)] = &[
        ("length_mi", "Length: ", " miles"),
        ("elevation_gain_ft", "Elevation gain: ", " ft"),
        ("highest_point_ft", "Highest point: ", " ft"),
        ("difficulty", "Difficulty: ", ""),
        ("calculated_difficulty", "Difficulty: ", ""),
        ("permits_required", "Permits: ", ""),
        ("rating", "Rating: ", "/5"),
        ("region", "Region: ", ""),
    ];
    for (key, prefix, suffix) in labelled {
        if let Some(text) = metadata.get(*key).and_then(display_value) {
            parts.push(format!("{}{}{}", prefix, text, suffix));
        }
    }

    if !tags.is_empty() {
        parts.push(format!("Features: {}", tags.join(", ")));
    }
    if let Some(fee) = metadata.get("parking_pass_entry_fee").and_then(display_value) {
        parts.push(format!("Parking: {}", fee));
    }
    if let Some(directions) = metadata.get("getting_there").and_then(display_value) {
        parts.push(format!(
            "Getting there: {}",
            truncate_chars(&directions, GETTING_THERE_CHARS)
        ));
    }
    if let Some(Value::Array(alerts)) = metadata.get("alerts") {
        let alerts: Vec<String> = alerts
            .iter()
            .filter_map(display_value)
            .take(MAX_ALERTS)
            .collect();
        if !alerts.is_empty() {
            parts.push(format!("Alerts: {}", alerts.join("; ")));
        }
    }

    parts.join("\n")
}
