//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to the hub and services.

use axum::{
    body::Body,
    extract::{connect_info::ConnectInfo, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::ws::{producer_ws_handler, viewer_ws_handler};
use crate::api::AppState;
use crate::error::{ReverieError, ReverieResult};
use crate::protocol_constants::{APP_NAME, EMBED_HEIGHT, EMBED_WIDTH, SERVICE_ID};

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/dreams/status", get(dream_status))
        .route("/api/dreams/current", get(current_frame))
        .route("/api/dreams/embed", get(embed_info))
        .route("/ws/dreams", get(viewer_ws_handler))
        .route("/ws/gpu", get(producer_ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Liveness probe: "Is the process running?"
async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": SERVICE_ID,
    }))
}

/// Readiness probe: "Can the service handle requests?"
///
/// Ready once the listener port has been bound.
async fn readiness_check(State(state): State<AppState>) -> Response {
    let port = state.network.get_port();
    let ready = port > 0;

    let body = json!({
        "status": if ready { "ready" } else { "not_ready" },
        "ready": ready,
        "checks": {
            "port": { "ready": ready, "value": port },
        },
    });

    if ready {
        Json(body).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

/// GET /api/dreams/status
///
/// Consolidated stream status: hub + cache + playback + presence + pod.
/// Rate limited; each successful hit counts as read-API activity and may
/// wake the GPU.
async fn dream_status(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
) -> ReverieResult<Response> {
    state.rate_limiter.check(remote_addr.ip())?;
    state.presence.on_api_access(true);

    let pod = state.pod.refresh_status().await;
    let snapshot = state.hub.snapshot();

    let mut body = serde_json::to_value(&snapshot)
        .map_err(|e| ReverieError::Internal(e.to_string()))?;
    if let serde_json::Value::Object(ref mut map) = body {
        map.insert(
            "pod".to_string(),
            serde_json::to_value(&pod).map_err(|e| ReverieError::Internal(e.to_string()))?,
        );
    }

    Ok(Json(body).into_response())
}

/// GET /api/dreams/current
///
/// The current frame as a WebP image, or 204 when nothing is cached yet.
async fn current_frame(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
) -> ReverieResult<Response> {
    state.rate_limiter.check(remote_addr.ip())?;
    state.presence.on_api_access(true);

    let Some(frame) = state.frame_cache.current() else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    Response::builder()
        .header(header::CONTENT_TYPE, "image/webp")
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header("X-Frame-Number", frame.frame_number.to_string())
        .header("X-Keyframe-Number", frame.keyframe_number.to_string())
        .header("X-Generation-Time-Ms", frame.gen_time_ms.to_string())
        .body(Body::from(frame.payload))
        .map_err(|e| ReverieError::Internal(e.to_string()))
}

/// GET /api/dreams/embed
///
/// URLs and nominal resolution for embedding the dream window.
async fn embed_info(State(state): State<AppState>) -> impl IntoResponse {
    let urls = state.network.url_builder();
    Json(json!({
        "title": APP_NAME,
        "iframe_url": urls.embed_page_url(),
        "image_url": urls.current_frame_url(),
        "stream_url": urls.viewer_socket_url(),
        "status_url": urls.status_url(),
        "width": EMBED_WIDTH,
        "height": EMBED_HEIGHT,
    }))
}
