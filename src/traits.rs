//! Agent-callable tools.
//!
//! Every operation an agent can invoke is a [`Tool`]: a name, a
//! description, a JSON Schema for its parameters, and an async
//! `execute`. The HTTP server lists tools from a [`ToolRegistry`] and
//! dispatches `POST /tools/{name}` to them after [`validate_params`].
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  ToolRegistry                    │
//! │  search_trails  scrape_region  scrape_status     │
//! │  list_stored_trails  get_trail_count  get_trail  │
//! │  + custom Rust tools                             │
//! └──────────────────────┬───────────────────────────┘
//!                        ▼
//!              ToolContext → SearchService
//! ```
//!
//! # Usage
//!
//! ```rust
//! use trailscout::traits::ToolRegistry;
//!
//! let mut tools = ToolRegistry::with_builtins();
//! // tools.register(Box::new(MyTool::new()));
//! assert!(tools.find("search_trails").is_some());
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::search::{SearchRequest, SearchService};

/// A tool callable by agents over `POST /tools/{name}`.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use serde_json::{json, Value};
/// use trailscout::traits::{Tool, ToolContext};
///
/// pub struct RegionCount;
///
/// #[async_trait]
/// impl Tool for RegionCount {
///     fn name(&self) -> &str { "region_count" }
///     fn description(&self) -> &str { "Number of regions seen by this process" }
///     fn parameters_schema(&self) -> Value {
///         json!({ "type": "object", "properties": {} })
///     }
///     async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
///         let regions = ctx.service().coordinator().regions().await;
///         Ok(json!({ "regions": regions.len() }))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name; becomes the route `POST /tools/{name}`.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Whether this tool ships with the crate. Reported in `GET /tools/list`.
    fn is_builtin(&self) -> bool {
        false
    }

    /// JSON Schema (`type: "object"`) describing the parameters.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. `params` has been validated and had defaults filled in.
    /// The return value is wrapped as `{ "result": ... }`.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// What a tool can reach while executing.
#[derive(Clone)]
pub struct ToolContext {
    service: Arc<SearchService>,
}

impl ToolContext {
    pub fn new(service: Arc<SearchService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &SearchService {
        &self.service
    }
}

/// Serializable tool description for `GET /tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub builtin: bool,
    pub parameters: Value,
}

impl ToolInfo {
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            builtin: tool.is_builtin(),
            parameters: tool.parameters_schema(),
        }
    }
}

fn optional_f64(params: &Value, key: &str) -> Option<f64> {
    params.get(key).and_then(Value::as_f64)
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    match params.get(key).and_then(Value::as_str).map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => bail!("{} must not be empty", key),
    }
}

// ============ Built-in tools ============

pub struct SearchTrailsTool;

#[async_trait]
impl Tool for SearchTrailsTool {
    fn name(&self) -> &str {
        "search_trails"
    }

    fn description(&self) -> &str {
        "Search stored hiking trails by meaning, optionally near a location. \
         If nothing is stored near the location yet, trails there are fetched \
         in the background and the response says when to retry."
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What kind of hike, e.g. 'waterfall with old growth'" },
                "location": { "type": "string", "description": "Place name or 'lat,lon'" },
                "radius_miles": { "type": "number", "description": "Search radius around location" },
                "limit": { "type": "integer", "description": "Max results" },
                "lazy_scrape": { "type": "boolean", "description": "Fetch the region on a miss", "default": true },
                "rescrape": { "type": "boolean", "description": "Force a fresh fetch of the region", "default": false }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let request: SearchRequest =
            serde_json::from_value(params).context("invalid search_trails parameters")?;
        let response = ctx.service().search(request).await?;
        Ok(serde_json::to_value(response)?)
    }
}

pub struct ScrapeRegionTool;

#[async_trait]
impl Tool for ScrapeRegionTool {
    fn name(&self) -> &str {
        "scrape_region"
    }

    fn description(&self) -> &str {
        "Fetch trails around a place in the background so later searches find them"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "region": { "type": "string", "description": "Place name or 'lat,lon'" },
                "radius_miles": { "type": "number", "description": "Fetch radius around the place" },
                "rescrape": { "type": "boolean", "description": "Refetch even if already loaded", "default": false }
            },
            "required": ["region"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let region = required_str(&params, "region")?;
        let rescrape = params["rescrape"].as_bool().unwrap_or(false);
        let response = ctx
            .service()
            .scrape_region(region, optional_f64(&params, "radius_miles"), rescrape)
            .await?;
        Ok(serde_json::to_value(response)?)
    }
}

pub struct ScrapeStatusTool;

#[async_trait]
impl Tool for ScrapeStatusTool {
    fn name(&self) -> &str {
        "scrape_status"
    }

    fn description(&self) -> &str {
        "Report whether trails around a place are loaded, loading, or failed"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "region": { "type": "string", "description": "Place name or 'lat,lon'" },
                "radius_miles": { "type": "number", "description": "Radius the region was searched or fetched with" }
            },
            "required": ["region"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let region = required_str(&params, "region")?;
        let snapshot = ctx
            .service()
            .scrape_status(region, optional_f64(&params, "radius_miles"))
            .await?;
        Ok(serde_json::to_value(snapshot)?)
    }
}

pub struct ListStoredTrailsTool;

#[async_trait]
impl Tool for ListStoredTrailsTool {
    fn name(&self) -> &str {
        "list_stored_trails"
    }

    fn description(&self) -> &str {
        "List every stored trail"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let trails = ctx.service().list_stored_trails().await?;
        Ok(json!({ "count": trails.len(), "trails": trails }))
    }
}

pub struct TrailCountTool;

#[async_trait]
impl Tool for TrailCountTool {
    fn name(&self) -> &str {
        "get_trail_count"
    }

    fn description(&self) -> &str {
        "Number of stored trails"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let count = ctx.service().get_trail_count().await?;
        Ok(json!({ "count": count }))
    }
}

pub struct GetTrailTool;

#[async_trait]
impl Tool for GetTrailTool {
    fn name(&self) -> &str {
        "get_trail"
    }

    fn description(&self) -> &str {
        "Full stored record for one trail id"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Trail id from a search result" }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let id = required_str(&params, "id")?;
        match ctx.service().get_trail(id).await? {
            Some(record) => Ok(serde_json::to_value(record)?),
            None => bail!("trail not found: {}", id),
        }
    }
}

// ============ Registry ============

/// Ordered collection of tools; lookups are by name.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchTrailsTool));
        registry.register(Box::new(ScrapeRegionTool));
        registry.register(Box::new(ScrapeStatusTool));
        registry.register(Box::new(ListStoredTrailsTool));
        registry.register(Box::new(TrailCountTool));
        registry.register(Box::new(GetTrailTool));
        registry
    }

    /// Register a tool. Names are unique; a duplicate is logged and dropped.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        if self.find(tool.name()).is_some() {
            tracing::warn!(tool = tool.name(), "duplicate tool name ignored");
            return;
        }
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn into_tools(self) -> Vec<Box<dyn Tool>> {
        self.tools
    }

    pub fn infos(&self) -> Vec<ToolInfo> {
        self.tools.iter().map(|t| ToolInfo::of(t.as_ref())).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Parameter validation ============

/// Check `params` against a tool's JSON Schema and fill in defaults.
///
/// Covers what tool schemas here use: `required`, per-property `type`
/// and `enum`, and `default`. Unknown properties are passed through.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let mut result = match params {
        Value::Object(obj) => obj.clone(),
        Value::Null => serde_json::Map::new(),
        other => bail!("parameters must be a JSON object, got {}", json_type_name(other)),
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !result.contains_key(field) {
                bail!("missing required parameter: {}", field);
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(Value::Object(result));
    };

    for (name, prop) in properties {
        let Some(value) = result.get(name) else {
            if let Some(default) = prop.get("default") {
                result.insert(name.clone(), default.clone());
            }
            continue;
        };

        if let Some(expected) = prop.get("type").and_then(Value::as_str) {
            let ok = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok {
                bail!(
                    "parameter '{}' must be of type '{}', got {}",
                    name,
                    expected,
                    json_type_name(value)
                );
            }
        }

        if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                let allowed: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
                bail!(
                    "parameter '{}' must be one of [{}], got {}",
                    name,
                    allowed.join(", "),
                    value
                );
            }
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered_once() {
        let mut registry = ToolRegistry::with_builtins();
        assert_eq!(registry.len(), 6);
        registry.register(Box::new(TrailCountTool));
        assert_eq!(registry.len(), 6);
        let names: Vec<String> = registry.infos().into_iter().map(|i| i.name).collect();
        assert_eq!(
            names,
            [
                "search_trails",
                "scrape_region",
                "scrape_status",
                "list_stored_trails",
                "get_trail_count",
                "get_trail"
            ]
        );
    }

    #[test]
    fn test_validate_fills_defaults() {
        let schema = SearchTrailsTool.parameters_schema();
        let out = validate_params(&schema, &json!({ "query": "lakes" })).unwrap();
        assert_eq!(out["lazy_scrape"], json!(true));
        assert_eq!(out["rescrape"], json!(false));
        assert!(out.get("radius_miles").is_none());
    }

    #[test]
    fn test_validate_rejects_missing_and_mistyped() {
        let schema = SearchTrailsTool.parameters_schema();
        let err = validate_params(&schema, &json!({ "location": "Olympic" })).unwrap_err();
        assert!(err.to_string().contains("missing required parameter: query"));

        let err = validate_params(&schema, &json!({ "query": "x", "limit": 2.5 })).unwrap_err();
        assert!(err.to_string().contains("'limit' must be of type 'integer'"));

        let err = validate_params(&schema, &json!(["query"])).unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn test_validate_enum() {
        let schema = json!({
            "type": "object",
            "properties": { "unit": { "type": "string", "enum": ["mi", "km"] } }
        });
        assert!(validate_params(&schema, &json!({ "unit": "mi" })).is_ok());
        let err = validate_params(&schema, &json!({ "unit": "ft" })).unwrap_err();
        assert!(err.to_string().contains("must be one of"));
    }
}
