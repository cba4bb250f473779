//! Read-only HTTP API over [`TeamService`].

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use teamlens_core::service::DiscoverySummary;
use teamlens_core::types::{Communication, SessionInfo, Task};
use teamlens_core::{SessionDetail, TeamService, TeammateDetail, TimelinePage};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

type AppState = Arc<TeamService>;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

/// Errors surfaced to HTTP clients.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Internal(String),
}

impl From<teamlens_core::Error> for ApiError {
    fn from(err: teamlens_core::Error) -> Self {
        if err.is_not_found() {
            ApiError::NotFound(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Build the API router with permissive GET/OPTIONS CORS and request tracing.
pub fn build_router(service: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/sessions", get(list_sessions))
        .route("/api/summary", get(summary))
        .route("/api/sessions/{id}", get(session_detail))
        .route("/api/sessions/{id}/timeline", get(timeline))
        .route("/api/sessions/{id}/communications", get(communications))
        .route("/api/sessions/{id}/tasks", get(tasks))
        .route("/api/sessions/{id}/teammates/{agent_id}", get(teammate))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(service)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(service: AppState, bind: &str) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind to {}", bind))?;

    tracing::info!(
        bind = %bind,
        projects_dir = %service.projects_dir().display(),
        "teamlens server listening"
    );
    println!("teamlens listening on http://{}", bind);

    axum::serve(listener, build_router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("teamlens server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_sessions(State(service): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(service.discover().await)
}

async fn summary(State(service): State<AppState>) -> Json<DiscoverySummary> {
    Json(service.summary().await)
}

async fn session_detail(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<SessionDetail> {
    Ok(Json(service.session_detail(&id).await?))
}

async fn timeline(
    State(service): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TimelineQuery>,
) -> ApiResult<TimelinePage> {
    Ok(Json(
        service.timeline(&id, query.page, query.page_size).await?,
    ))
}

async fn communications(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<Communication>> {
    Ok(Json(service.communications(&id).await?))
}

async fn tasks(State(service): State<AppState>, Path(id): Path<String>) -> ApiResult<Vec<Task>> {
    Ok(Json(service.tasks(&id).await?))
}

async fn teammate(
    State(service): State<AppState>,
    Path((id, agent_id)): Path<(String, String)>,
) -> ApiResult<TeammateDetail> {
    Ok(Json(service.teammate(&id, &agent_id).await?))
}
