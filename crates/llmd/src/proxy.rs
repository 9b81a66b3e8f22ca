// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSE/NDJSON-aware streaming reverse proxy. Forwards a client request to
//! whatever base URL the Upstream pointer currently holds.

use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use reqwest::Client;

use crate::error::AppError;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Builds the shared reqwest client used for proxied requests. Separate
/// from `upstream::client::UpstreamClient`, which is for short supervision
/// probes rather than long-lived streaming completions.
pub fn build_proxy_client() -> Client {
    Client::builder()
        .no_gzip()
        .no_brotli()
        .no_deflate()
        .pool_idle_timeout(Duration::from_secs(90))
        .timeout(Duration::from_secs(600))
        .build()
        .unwrap_or_default()
}

fn is_streaming_content_type(content_type: &str) -> bool {
    let ct = content_type.split(';').next().unwrap_or("").trim();
    matches!(ct, "text/event-stream" | "application/x-ndjson" | "application/json-lines")
}

/// Forward `method`/`path`/`body` to `<upstream_base><path>`, streaming the
/// response body through when the upstream's Content-Type indicates SSE or
/// NDJSON, otherwise copying it in one shot.
///
/// If `upstream_base` is `None`, the caller is expected to have already
/// rejected the request with `MODEL_NOT_SELECTED` — this function assumes a
/// base URL is present.
pub async fn forward(
    client: &Client,
    upstream_base: &str,
    method: Method,
    path: &str,
    headers: &HeaderMap,
    body: Body,
) -> Response {
    let url = format!("{upstream_base}{path}");

    let mut req = client.request(method, &url);
    for (name, value) in headers.iter() {
        if HOP_BY_HOP.contains(&name.as_str().to_ascii_lowercase().as_str()) {
            continue;
        }
        req = req.header(name, value);
    }

    let body_stream = body.into_data_stream().map(|chunk| chunk.map_err(std::io::Error::other));
    req = req.body(reqwest::Body::wrap_stream(body_stream));

    let upstream_resp = match req.send().await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!(err = %e, "upstream request failed");
            return AppError::UpstreamUnavailable.to_http_response(e.to_string());
        }
    };

    let status = StatusCode::from_u16(upstream_resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = upstream_resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_owned();

    let mut resp_headers = HeaderMap::new();
    for (name, value) in upstream_resp.headers().iter() {
        let lower = name.as_str().to_ascii_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            resp_headers.insert(name, value);
        }
    }
    resp_headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    resp_headers.insert(
        axum::http::header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );

    let response_body = if is_streaming_content_type(&content_type) {
        let stream = upstream_resp.bytes_stream().map(|chunk| chunk.map_err(std::io::Error::other));
        Body::from_stream(stream)
    } else {
        match upstream_resp.bytes().await {
            Ok(bytes) => Body::from(bytes),
            Err(e) => return AppError::UpstreamUnavailable.to_http_response(e.to_string()),
        }
    };

    let mut response = match Response::builder().status(status).body(response_body) {
        Ok(response) => response,
        Err(_) => return StatusCode::BAD_GATEWAY.into_response(),
    };
    *response.headers_mut() = resp_headers;
    response
}
