//! Operations endpoints
//!
//! Liveness, readiness (component map, 503 until everything reports
//! healthy), and the aggregated metrics snapshot.

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Response {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_secs": state.started.elapsed().as_secs(),
    }))
    .into_response()
}

/// `GET /ready`
pub async fn ready(State(state): State<AppState>) -> Response {
    let cache_healthy = !state.cache.is_degraded();
    let queue_healthy = state.queue.is_running();
    let subscription_healthy = state.subscription.is_active();

    let components = json!({
        "cache": if cache_healthy { "healthy" } else { "degraded" },
        "queue": if queue_healthy { "healthy" } else { "stopped" },
        "subscription": if subscription_healthy { "healthy" } else { "inactive" },
    });

    if cache_healthy && queue_healthy && subscription_healthy {
        (StatusCode::OK, Json(json!({ "status": "ready", "components": components })))
            .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not-ready", "components": components })),
        )
            .into_response()
    }
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> Response {
    let rate = state.rate_limiter.stats(&state.mailbox).await;
    Json(json!({
        "pipeline": state.metrics.snapshot(),
        "queue": state.queue.stats(),
        "dead_letters": state.queue.dead_letters(),
        "poll": state.poll.stats(),
        "rate": rate,
        "subscription": state.subscription.snapshot(),
    }))
    .into_response()
}
