// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use axum::{
    body::Bytes,
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tlytics::{total_pages, Event, PageRequest};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::api::*;
use crate::errors::NodeError;
use crate::ingest::{FlushOutcome, IngestHandle, StoreSink};
use crate::store::{EventStore, StoreError};

use axum::extract::Request as AxumRequest;
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::{from_fn_with_state, Next};
use axum::response::Response;

pub struct AppState {
    pub buffer: IngestHandle<StoreSink>,
    pub store: Arc<EventStore>,
    pub port: u16,
    pub max_page_size: usize,
}

pub type SharedState = Arc<AppState>;

async fn auth_guard(
    State(token): State<Arc<String>>,
    req: AxumRequest,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|val| val.to_str().ok())
        .and_then(|val| val.strip_prefix("Bearer "));

    if provided == Some(token.as_str()) {
        return Ok(next.run(req).await);
    }
    Err(StatusCode::UNAUTHORIZED)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<_> = origins.iter().filter_map(|s| s.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Ingestion routes (`/events`, `/batch`, `/flush`) sit behind the bearer
/// guard when a token is configured; reads and probes stay open.
pub fn build_router(state: SharedState, auth_token: Option<String>, cors_origins: &[String]) -> Router {
    let mut ingest: Router<SharedState> = Router::new()
        .route("/events", post(ingest_events))
        .route("/batch", post(ingest_batch))
        .route("/flush", post(flush));

    if let Some(token) = auth_token {
        tracing::info!("Auth Enabled: Bearer token required for ingestion");
        ingest = ingest.route_layer(from_fn_with_state(Arc::new(token), auth_guard));
    } else {
        tracing::warn!("Auth Disabled: No token configured");
    }

    Router::new()
        .merge(ingest)
        .route("/view", get(view))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(cors_layer(cors_origins))
}

fn queue(state: &AppState, events: Vec<Event>) -> Result<Json<QueuedResponse>, NodeError> {
    // Reject the whole request before anything reaches the buffer
    if events.iter().any(|e| e.validate().is_err()) {
        return Err(NodeError::InvalidInput("Event key is required".to_string()));
    }

    let count = events.len();
    for event in events {
        state.buffer.emit(event)?;
    }

    Ok(Json(QueuedResponse {
        message: format!("Successfully queued {} events", count),
        count,
    }))
}

async fn ingest_events(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<QueuedResponse>, NodeError> {
    let events: Vec<Event> = serde_json::from_slice(&body)
        .map_err(|_| NodeError::InvalidInput("Invalid JSON format".to_string()))?;
    queue(&state, events)
}

async fn ingest_batch(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<QueuedResponse>, NodeError> {
    let batch: BatchRequest = serde_json::from_slice(&body)
        .map_err(|_| NodeError::InvalidInput("Invalid JSON format".to_string()))?;

    let events = batch
        .events
        .into_iter()
        .map(serde_json::from_value::<Event>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| NodeError::InvalidInput("Invalid event format".to_string()))?;

    queue(&state, events)
}

async fn view(
    State(state): State<SharedState>,
    Query(params): Query<ViewParams>,
) -> Result<Json<ViewResponse>, NodeError> {
    let req = PageRequest::sanitized(
        params.page.and_then(|p| p.trim().parse().ok()),
        params.page_size.and_then(|s| s.trim().parse().ok()),
        state.max_page_size,
    );

    let store = state.store.clone();
    let page = tokio::task::spawn_blocking(move || store.get_events(req.limit(), req.offset()))
        .await
        .map_err(|e| StoreError::Join(e.to_string()))??;

    Ok(Json(ViewResponse {
        total_pages: total_pages(page.total, req.page_size),
        events: page.events,
        total: page.total,
        page: req.page,
        page_size: req.page_size,
    }))
}

async fn flush(State(state): State<SharedState>) -> Result<Json<FlushResponse>, NodeError> {
    let outcome = state.buffer.flush().await?;
    let label = match outcome {
        FlushOutcome::Empty => "empty",
        FlushOutcome::Committed { .. } => "committed",
        FlushOutcome::Spilled { .. } => "spilled",
        FlushOutcome::Dropped { .. } => "dropped",
    };
    Ok(Json(FlushResponse {
        flushed: outcome.committed(),
        outcome: label.to_string(),
    }))
}

async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        port: state.port,
    })
}

async fn metrics_handler() -> String {
    crate::telemetry::get_metrics()
}
