// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for the daemon's HTTP surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppError {
    InvalidRequest,
    ModelNotFound,
    ModelNotSelected,
    ModelSwitching,
    SwitchFailed,
    QueueFull,
    UpstreamUnavailable,
    Unauthorized,
    Internal,
}

impl AppError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::ModelNotFound => 404,
            Self::ModelNotSelected => 409,
            Self::ModelSwitching => 503,
            Self::SwitchFailed => 500,
            Self::QueueFull => 503,
            Self::UpstreamUnavailable => 502,
            Self::Unauthorized => 401,
            Self::Internal => 500,
        }
    }

    /// Some error codes carry a `Retry-After` hint for the client.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::ModelSwitching | Self::QueueFull => Some(5),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::ModelNotFound => "MODEL_NOT_FOUND",
            Self::ModelNotSelected => "MODEL_NOT_SELECTED",
            Self::ModelSwitching => "MODEL_SWITCHING",
            Self::SwitchFailed => "SWITCH_FAILED",
            Self::QueueFull => "QUEUE_FULL",
            Self::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody {
            code: self.as_str().to_owned(),
            message: message.into(),
        }
    }

    pub fn to_http_response(&self, message: impl Into<String>) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse {
            error: self.to_error_body(message),
        };
        let mut resp = (status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs() {
            if let Ok(value) = axum::http::HeaderValue::from_str(&secs.to_string()) {
                resp.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        resp
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use axum::response::{IntoResponse, Response};

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.to_http_response(self.as_str())
    }
}

/// Wraps an `AppError` with a caller-supplied human-readable message, plus
/// optional extra JSON fields merged into the error body (e.g. `stderr_tail`).
pub struct ApiError {
    pub code: AppError,
    pub message: String,
    pub extra: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: AppError, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), extra: None }
    }

    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = Some(extra);
        self
    }
}

impl From<AppError> for ApiError {
    fn from(code: AppError) -> Self {
        let message = code.as_str().to_owned();
        Self::new(code, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut value = serde_json::to_value(ErrorResponse { error: self.code.to_error_body(self.message) })
            .unwrap_or_default();
        if let Some(extra) = self.extra {
            if let (Some(obj), Some(extra_obj)) = (value.as_object_mut(), extra.as_object()) {
                for (k, v) in extra_obj {
                    obj.insert(k.clone(), v.clone());
                }
            }
        }
        let mut resp = (status, Json(value)).into_response();
        if let Some(secs) = self.code.retry_after_secs() {
            if let Ok(hv) = axum::http::HeaderValue::from_str(&secs.to_string()) {
                resp.headers_mut().insert(axum::http::header::RETRY_AFTER, hv);
            }
        }
        resp
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
