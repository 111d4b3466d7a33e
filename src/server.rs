//! HTTP tool server.
//!
//! Exposes the [`ToolRegistry`] over JSON HTTP so agents can call trail
//! tools directly.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Status, version, trail count, running fetch jobs |
//! | `GET`  | `/tools/list` | Registered tools with parameter schemas |
//! | `POST` | `/tools/{name}` | Call a tool; body is its parameter object |
//!
//! Successful calls return `{ "result": ... }`. Errors return
//!
//! ```json
//! { "error": { "code": "location_not_found", "message": "could not find location 'Zzzqx123'" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `location_not_found`, `not_found` | 404 |
//! | `rate_limited` | 429 |
//! | `location_lookup_failed` | 502 |
//! | `storage_unavailable`, `shutting_down` | 503 |
//! | `embedding_failed`, `tool_error` | 500 |
//!
//! # Shutdown
//!
//! On shutdown the listener stops accepting requests first, then the
//! coordinator is drained so background fetches finish before exit.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::app::build_service;
use crate::config::Config;
use crate::error::SearchError;
use crate::search::SearchService;
use crate::traits::{validate_params, ToolContext, ToolInfo, ToolRegistry};

#[derive(Clone)]
struct AppState {
    service: Arc<SearchService>,
    tools: Arc<ToolRegistry>,
}

/// Build the router for `service` and `tools`.
pub fn router(service: Arc<SearchService>, tools: Arc<ToolRegistry>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .layer(cors)
        .with_state(AppState { service, tools })
}

/// Serve on an already-bound listener until `shutdown` resolves, then
/// drain background jobs.
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    service: Arc<SearchService>,
    tools: Arc<ToolRegistry>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(Arc::clone(&service), tools);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    service.coordinator().shutdown().await;
    Ok(())
}

/// Start the server on `[server].bind` and run until ctrl-c or SIGTERM.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    run_server_with_extensions(config, ToolRegistry::new()).await
}

/// Like [`run_server`], also serving the tools in `extra`.
pub async fn run_server_with_extensions(config: &Config, extra: ToolRegistry) -> anyhow::Result<()> {
    let service = build_service(config).await?;

    let mut registry = ToolRegistry::with_builtins();
    for tool in extra.into_tools() {
        registry.register(tool);
    }
    for t in registry.tools() {
        tracing::debug!(tool = t.name(), builtin = t.is_builtin(), "tool registered");
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, tools = registry.len(), "tool server listening");

    serve(listener, service, Arc::new(registry), shutdown_signal()).await
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown requested, finishing background fetches");
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn status_for(err: &SearchError) -> StatusCode {
    match err {
        SearchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        SearchError::LocationNotFound { .. } => StatusCode::NOT_FOUND,
        SearchError::LocationResolutionRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        SearchError::LocationResolutionFailed { .. } => StatusCode::BAD_GATEWAY,
        SearchError::StorageUnavailable(_) | SearchError::ShuttingDown => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        SearchError::Embedding(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Map a tool failure to a response. Typed search errors carry their own
/// code; anything else is classified by message.
fn classify_tool_error(tool_name: &str, err: anyhow::Error) -> AppError {
    if let Some(search_err) = err.downcast_ref::<SearchError>() {
        return AppError::new(status_for(search_err), search_err.code(), search_err.to_string());
    }

    let msg = format!("{:#}", err);
    if msg.contains("not found") {
        AppError::new(StatusCode::NOT_FOUND, "not_found", msg)
    } else if msg.contains("must not be empty") || msg.contains("invalid") {
        AppError::new(StatusCode::BAD_REQUEST, "bad_request", msg)
    } else {
        tracing::error!(tool = tool_name, error = %msg, "tool failed");
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "tool_error",
            format!("{}: {}", tool_name, msg),
        )
    }
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    trails: Option<usize>,
    #[serde(rename = "jobsInFlight")]
    jobs_in_flight: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let trails = state.service.get_trail_count().await.ok();
    Json(HealthResponse {
        status: if trails.is_some() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        trails,
        jobs_in_flight: state.service.coordinator().in_flight(),
    })
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.tools.infos(),
    })
}

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tool = state.tools.find(&name).ok_or_else(|| {
        AppError::new(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no tool registered with name: {}", name),
        )
    })?;

    let params = validate_params(&tool.parameters_schema(), &params)
        .map_err(|e| AppError::new(StatusCode::BAD_REQUEST, "bad_request", e.to_string()))?;

    let ctx = ToolContext::new(Arc::clone(&state.service));
    let result = tool
        .execute(params, &ctx)
        .await
        .map_err(|e| classify_tool_error(&name, e))?;

    Ok(Json(serde_json::json!({ "result": result })))
}
