// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the daemon's HTTP surface.
//!
//! Uses `axum_test::TestServer` — no real TCP needed. No real inference
//! child is spawned: these scenarios exercise the control endpoints and the
//! parts of the inference pipeline that don't require a live upstream.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use axum_test::TestServer;
use tokio_util::sync::CancellationToken;

use llmd::config::DaemonConfig;
use llmd::state::AppState;
use llmd::transport::build_router;

fn test_config() -> DaemonConfig {
    DaemonConfig {
        host: "127.0.0.1".into(),
        port: 0,
        auth_token: None,
        auth_require_for_inference: false,
        model_dir: None,
        profiles_config: None,
        max_concurrent_requests: 2,
        interactive_reserve: 1,
        queue_size: 64,
        startup_timeout_ms: 60_000,
        graceful_timeout_ms: 8_000,
        ready_poll_ms: 500,
        health_check_ms: 10_000,
        health_timeout_ms: 5_000,
        ring_capacity: 100,
        port_range_start: 23_500,
        port_range_end: 23_600,
    }
}

fn test_state() -> Arc<AppState> {
    Arc::new(AppState::new(test_config(), CancellationToken::new()).expect("state construction"))
}

fn test_server(state: Arc<AppState>) -> TestServer {
    let router = build_router(state);
    TestServer::new(router).expect("failed to create test server")
}

#[tokio::test]
async fn health_is_public_and_reports_uptime() -> anyhow::Result<()> {
    let server = test_server(test_state());
    let resp = server.get("/api/v1/health").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "ok");
    assert!(body["uptime"].is_u64());
    Ok(())
}

#[tokio::test]
async fn status_reports_no_model_selected_initially() -> anyhow::Result<()> {
    let server = test_server(test_state());
    let resp = server.get("/api/v1/status").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["is_switching"], false);
    assert_eq!(body["state"], "stopped");
    Ok(())
}

#[tokio::test]
async fn chat_completion_before_select_returns_model_not_selected() -> anyhow::Result<()> {
    let server = test_server(test_state());
    let resp = server
        .post("/v1/chat/completions")
        .json(&serde_json::json!({
            "model": "x",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .await;
    resp.assert_status(axum::http::StatusCode::CONFLICT);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "MODEL_NOT_SELECTED");
    Ok(())
}

#[tokio::test]
async fn select_unknown_model_returns_404() -> anyhow::Result<()> {
    let server = test_server(test_state());
    let resp = server.post("/api/v1/models/select").json(&serde_json::json!({ "model_id": "ghost" })).await;
    resp.assert_status(axum::http::StatusCode::NOT_FOUND);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "MODEL_NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn select_empty_model_id_returns_400() -> anyhow::Result<()> {
    let server = test_server(test_state());
    let resp = server.post("/api/v1/models/select").json(&serde_json::json!({ "model_id": "" })).await;
    resp.assert_status(axum::http::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");
    Ok(())
}

#[tokio::test]
async fn unauthorized_when_token_configured_and_missing() -> anyhow::Result<()> {
    let mut config = test_config();
    config.auth_token = Some("secret".into());
    let state = Arc::new(AppState::new(config, CancellationToken::new())?);
    let server = test_server(state);

    let resp = server.get("/api/v1/status").await;
    resp.assert_status(axum::http::StatusCode::UNAUTHORIZED);

    // Health stays public even with auth configured.
    let health = server.get("/api/v1/health").await;
    health.assert_status_ok();
    Ok(())
}

#[tokio::test]
async fn authorized_with_correct_bearer_token() -> anyhow::Result<()> {
    let mut config = test_config();
    config.auth_token = Some("secret".into());
    let state = Arc::new(AppState::new(config, CancellationToken::new())?);
    let server = test_server(state);

    let resp = server.get("/api/v1/status").authorization_bearer("secret").await;
    resp.assert_status_ok();
    Ok(())
}

#[tokio::test]
async fn inference_endpoints_exempt_from_auth_by_default() -> anyhow::Result<()> {
    let mut config = test_config();
    config.auth_token = Some("secret".into());
    let state = Arc::new(AppState::new(config, CancellationToken::new())?);
    let server = test_server(state);

    // No bearer token supplied, but inference is exempt unless
    // `auth_require_for_inference` is set.
    let resp = server
        .post("/v1/chat/completions")
        .json(&serde_json::json!({ "model": "x", "messages": [] }))
        .await;
    resp.assert_status(axum::http::StatusCode::CONFLICT); // MODEL_NOT_SELECTED, not 401

    // Control endpoints still require it.
    let resp = server.get("/api/v1/status").await;
    resp.assert_status(axum::http::StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn inference_endpoints_require_auth_when_flag_set() -> anyhow::Result<()> {
    let mut config = test_config();
    config.auth_token = Some("secret".into());
    config.auth_require_for_inference = true;
    let state = Arc::new(AppState::new(config, CancellationToken::new())?);
    let server = test_server(state);

    let resp = server
        .post("/v1/chat/completions")
        .json(&serde_json::json!({ "model": "x", "messages": [] }))
        .await;
    resp.assert_status(axum::http::StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn rescan_models_lists_discovered_gguf_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("demo.gguf"), b"fake")?;

    let mut config = test_config();
    config.model_dir = Some(dir.path().to_path_buf());
    let state = Arc::new(AppState::new(config, CancellationToken::new())?);
    let server = test_server(state);

    let resp = server.post("/api/v1/models/rescan").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["count"], 1);
    assert_eq!(body["models"][0]["id"], "demo");
    Ok(())
}

#[tokio::test]
async fn v1_models_lists_discovered_models_openai_shape() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("demo.gguf"), b"fake")?;

    let mut config = test_config();
    config.model_dir = Some(dir.path().to_path_buf());
    let state = Arc::new(AppState::new(config, CancellationToken::new())?);
    let server = test_server(state);

    let resp = server.get("/v1/models").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["object"], "list");
    assert_eq!(body["data"][0]["id"], "demo");
    assert_eq!(body["data"][0]["owned_by"], "local");
    Ok(())
}
