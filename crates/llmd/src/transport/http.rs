// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control endpoints: health, status, model discovery/selection, profiles,
//! and the stderr log tail.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::error::{ApiError, AppError};
use crate::state::AppState;

#[derive(Debug, serde::Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime: u64,
}

/// `GET /api/v1/health` — always public.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse { status: "ok", uptime: state.uptime_secs() })
}

#[derive(Debug, serde::Serialize)]
pub struct StatusResponse {
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<i64>,
    pub scheduler: crate::scheduler::SchedulerStats,
    pub is_switching: bool,
}

/// `GET /api/v1/status`.
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let switcher_status = state.switcher.status().await;
    Json(StatusResponse {
        state: switcher_status.state,
        model_id: switcher_status.model_id,
        profile: switcher_status.profile,
        upstream_port: switcher_status.upstream_port,
        uptime: switcher_status.uptime_secs,
        scheduler: state.scheduler.stats(),
        is_switching: switcher_status.is_switching,
    })
}

#[derive(Debug, serde::Serialize)]
pub struct ModelsResponse {
    pub models: Vec<crate::registry::ModelInfo>,
    pub count: usize,
}

/// `GET /api/v1/models`.
pub async fn list_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let models = state.models.list();
    Json(ModelsResponse { count: models.len(), models })
}

/// `POST /api/v1/models/rescan`.
pub async fn rescan_models(State(state): State<Arc<AppState>>) -> axum::response::Response {
    match state.models.rescan() {
        Ok(models) => Json(ModelsResponse { count: models.len(), models }).into_response(),
        Err(e) => ApiError::new(AppError::Internal, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct SelectModelRequest {
    pub model_id: String,
    #[serde(default)]
    pub profile: Option<String>,
}

/// `POST /api/v1/models/select`.
pub async fn select_model(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SelectModelRequest>,
) -> axum::response::Response {
    if req.model_id.trim().is_empty() {
        return ApiError::new(AppError::InvalidRequest, "model_id must not be empty").into_response();
    }

    let model = match state.models.find(&req.model_id) {
        Some(model) => model,
        None => {
            return ApiError::new(AppError::ModelNotFound, format!("model not found: {}", req.model_id))
                .into_response()
        }
    };

    let profile = match req.profile.as_deref() {
        Some(name) => state.profiles.get(name),
        None => state.profiles.default_profile(),
    };
    let profile = match profile {
        Some(profile) => profile,
        None => {
            return ApiError::new(AppError::InvalidRequest, "no matching launch profile configured")
                .into_response()
        }
    };
    let profile_name = profile.name.clone();

    match state.switcher.switch(model.path, model.id, profile).await {
        Ok(result) => {
            state.profiles.set_active(&profile_name);
            Json(result).into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ProfileView {
    pub name: String,
    pub backend_tag: Option<String>,
    pub is_active: bool,
}

/// `GET /api/v1/profiles`.
pub async fn list_profiles(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let profiles: Vec<ProfileView> = state
        .profiles
        .list_with_active()
        .into_iter()
        .map(|(p, is_active)| ProfileView { name: p.name, backend_tag: p.backend_tag, is_active })
        .collect();
    Json(profiles)
}

#[derive(Debug, serde::Serialize)]
pub struct LogsResponse {
    pub logs: String,
}

/// `GET /api/v1/logs` — the active child's stderr tail, if any.
pub async fn logs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(LogsResponse { logs: state.switcher.stderr_tail().await })
}
