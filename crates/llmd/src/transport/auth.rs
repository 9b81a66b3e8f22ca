// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;
use crate::state::AppState;

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Validate a Bearer token from HTTP headers.
pub fn validate_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), AppError> {
    let expected = match expected {
        Some(tok) => tok,
        None => return Ok(()),
    };

    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let token = header.strip_prefix("Bearer ").ok_or(AppError::Unauthorized)?;
    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

/// Axum middleware that enforces Bearer token authentication.
///
/// Exempt: `/api/v1/health` is always public. Control endpoints (the rest
/// of `/api/v1/*`) require the token whenever one is configured. The
/// OpenAI-compatible `/v1/*` inference endpoints require it only when
/// `auth_require_for_inference` is also set — a deployment may want the
/// control surface locked down without forcing every inference client to
/// carry the token.
pub async fn auth_layer(state: State<Arc<AppState>>, req: Request<axum::body::Body>, next: Next) -> Response {
    let path = req.uri().path();

    if path == "/api/v1/health" {
        return next.run(req).await;
    }

    let is_inference = path.starts_with("/v1/");
    let required = if is_inference { state.config.auth_require_for_inference } else { true };

    if required {
        if let Err(code) = validate_bearer(req.headers(), state.config.auth_token.as_deref()) {
            return code.to_http_response("missing or invalid bearer token");
        }
    }

    next.run(req).await
}
