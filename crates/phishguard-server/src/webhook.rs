//! Mail webhook endpoint
//!
//! Handles the provider's validation handshake, change notifications
//! (message ids enqueued for the push pipeline), and lifecycle
//! notifications (forwarded to the subscription manager). Notifications
//! whose `clientState` does not match the configured secret are
//! rejected before any id is read.

use crate::state::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use phishguard_mail::LifecycleEvent;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

const MAX_VALIDATION_TOKEN_LEN: usize = 4096;

#[derive(Debug, Deserialize)]
struct NotificationEnvelope {
    value: Vec<Notification>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Notification {
    #[serde(default)]
    client_state: Option<String>,
    #[serde(default)]
    change_type: Option<String>,
    #[serde(default)]
    resource_data: Option<ResourceData>,
    #[serde(default)]
    lifecycle_event: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResourceData {
    #[serde(default)]
    id: Option<String>,
}

/// `POST /webhooks/mail`
pub async fn mail_webhook(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    body: String,
) -> Response {
    // Validation handshake: echo the token back as text/plain.
    if let Some(token) = params.get("validationToken") {
        if token.len() <= MAX_VALIDATION_TOKEN_LEN && state.validation_token_re.is_match(token) {
            return (StatusCode::OK, token.clone()).into_response();
        }
        return (StatusCode::BAD_REQUEST, "invalid validation token").into_response();
    }

    let envelope: NotificationEnvelope = match serde_json::from_str(&body) {
        Ok(envelope) => envelope,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "malformed notification body" })),
            )
                .into_response();
        }
    };
    if envelope.value.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "empty notification batch" })),
        )
            .into_response();
    }

    // Any mismatched clientState poisons the whole batch.
    let authentic = envelope
        .value
        .iter()
        .all(|n| n.client_state.as_deref() == Some(state.client_state.as_str()));
    if !authentic {
        tracing::warn!("webhook notification with bad clientState rejected");
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "clientState mismatch" })),
        )
            .into_response();
    }

    let arrival = Utc::now();
    let mut enqueued = 0usize;
    for notification in &envelope.value {
        if let Some(event) = notification
            .lifecycle_event
            .as_deref()
            .and_then(LifecycleEvent::parse)
        {
            state.subscription.lifecycle(event).await;
            continue;
        }
        if notification.change_type.as_deref() != Some("created") {
            continue;
        }
        let Some(id) = notification
            .resource_data
            .as_ref()
            .and_then(|r| r.id.as_deref())
        else {
            continue;
        };
        if state.queue.enqueue(id, arrival) {
            enqueued += 1;
        }
    }

    tracing::debug!(
        notifications = envelope.value.len(),
        enqueued,
        "webhook batch accepted"
    );
    (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))).into_response()
}
