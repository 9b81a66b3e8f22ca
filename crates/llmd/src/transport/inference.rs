// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OpenAI-compatible inference endpoints: `/v1/chat/completions`, `/v1/models`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::AppError;
use crate::state::AppState;

/// `POST /v1/chat/completions`.
///
/// Pipeline: require an active model, reject while switching, acquire a
/// Scheduler slot, refresh the Upstream pointer, delegate to the streaming
/// proxy, release on return (including on client disconnect).
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    if !state.switcher.has_active_model().await {
        return AppError::ModelNotSelected.to_http_response("no model is currently selected");
    }
    if state.switcher.is_switching() {
        return AppError::ModelSwitching.to_http_response("a model switch is in progress");
    }

    let interactive = headers
        .get("x-vlm-interactive")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "1")
        .unwrap_or(false);

    // Child of the daemon shutdown token: a request still queued when the
    // daemon starts shutting down is dequeued immediately rather than
    // holding up graceful shutdown. Dropping this future outright (client
    // disconnect) drops the queued waiter's receiver, which `drain` also
    // recognizes and skips without spending a slot.
    let cancel = state.shutdown.child_token();
    let guard = match state.scheduler.acquire(interactive, &cancel).await {
        Ok(guard) => guard,
        Err(e) => return e.to_http_response(e.as_str()),
    };

    // Refresh the pointer after acquiring: a switch may have completed
    // while this request was queued.
    let upstream = match state.switcher.upstream_url() {
        Some(url) => url,
        None => {
            guard.release();
            return AppError::ModelNotSelected.to_http_response("no model is currently selected");
        }
    };

    let response = crate::proxy::forward(
        &state.proxy_client,
        &upstream,
        Method::POST,
        "/v1/chat/completions",
        &headers,
        axum::body::Body::from(body),
    )
    .await;

    guard.release();
    response
}

#[derive(Debug, serde::Serialize)]
struct ModelListResponse {
    object: &'static str,
    data: Vec<ModelListEntry>,
}

#[derive(Debug, serde::Serialize)]
struct ModelListEntry {
    id: String,
    object: &'static str,
    created: u64,
    owned_by: &'static str,
}

/// `GET /v1/models` — OpenAI-compatible model listing, distinct from the
/// richer `/api/v1/models` control endpoint.
pub async fn list_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let created = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let data = state
        .models
        .list()
        .into_iter()
        .map(|m| ModelListEntry { id: m.id, object: "model", created, owned_by: "local" })
        .collect();

    Json(ModelListResponse { object: "list", data })
}
