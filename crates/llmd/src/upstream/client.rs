// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for probing a single child inference process.

use std::time::Duration;

use reqwest::Client;
use serde_json::json;

/// HTTP client wrapper for one child's readiness/health probes.
///
/// Distinct from the streaming proxy client in `proxy.rs`: this one issues
/// short, bounded, non-streaming requests used only for supervision.
pub struct UpstreamClient {
    base_url: String,
    client: Client,
}

impl UpstreamClient {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { base_url, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET `/health` with the given timeout. Any 2xx counts as live.
    pub async fn health(&self, timeout: Duration) -> anyhow::Result<()> {
        let resp = self
            .client
            .get(self.url("/health"))
            .timeout(timeout)
            .send()
            .await?;
        resp.error_for_status()?;
        Ok(())
    }

    /// Issue a minimal chat completion to check the inference slot is
    /// actually usable, not merely that the port is bound. A 200 is "ready".
    pub async fn readiness_probe(&self, timeout: Duration) -> anyhow::Result<bool> {
        let body = json!({
            "model": "probe",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1,
            "stream": false,
        });

        let result = self
            .client
            .post(self.url("/v1/chat/completions"))
            .timeout(timeout)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}
