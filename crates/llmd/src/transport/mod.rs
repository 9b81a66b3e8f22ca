// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport for the process manager daemon.

pub mod auth;
pub mod http;
pub mod inference;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum `Router` with the control and inference routes, bearer
/// auth, and ambient request tracing.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Control surface (public health, everything else behind auth).
        .route("/api/v1/health", get(http::health))
        .route("/api/v1/status", get(http::status))
        .route("/api/v1/models", get(http::list_models))
        .route("/api/v1/models/select", post(http::select_model))
        .route("/api/v1/models/rescan", post(http::rescan_models))
        .route("/api/v1/profiles", get(http::list_profiles))
        .route("/api/v1/logs", get(http::logs))
        // OpenAI-compatible inference surface.
        .route("/v1/chat/completions", post(inference::chat_completions))
        .route("/v1/models", get(inference::list_models))
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
