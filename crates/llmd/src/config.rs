// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::path::PathBuf;

/// Configuration for the llmd process manager daemon.
#[derive(Debug, Clone, clap::Parser)]
pub struct DaemonConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "LLMD_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8790, env = "LLMD_PORT")]
    pub port: u16,

    /// Bearer token for API auth. If unset, auth is disabled entirely.
    #[arg(long, env = "LLMD_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Require the bearer token on `/v1/*` inference endpoints too. Control
    /// endpoints always require it once a token is configured; inference
    /// endpoints are exempt unless this flag is set.
    #[arg(long, default_value_t = false, env = "LLMD_AUTH_REQUIRE_INFERENCE")]
    pub auth_require_for_inference: bool,

    /// Directory scanned non-recursively for `*.gguf` model files.
    #[arg(long, env = "LLMD_MODEL_DIR")]
    pub model_dir: Option<PathBuf>,

    /// Path to a JSON file describing launch profiles. See `Profile`.
    #[arg(long, env = "LLMD_PROFILES_CONFIG")]
    pub profiles_config: Option<PathBuf>,

    /// Maximum concurrent inference requests (`M`).
    #[arg(long, default_value_t = 2, env = "LLMD_MAX_CONCURRENT")]
    pub max_concurrent_requests: usize,

    /// Interactive slot reserve (`R`, out of `M`).
    #[arg(long, default_value_t = 1, env = "LLMD_INTERACTIVE_RESERVE")]
    pub interactive_reserve: usize,

    /// Bounded wait queue capacity.
    #[arg(long, default_value_t = 64, env = "LLMD_QUEUE_SIZE")]
    pub queue_size: usize,

    /// Startup timeout in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "LLMD_STARTUP_TIMEOUT_MS")]
    pub startup_timeout_ms: u64,

    /// Graceful-stop timeout in milliseconds.
    #[arg(long, default_value_t = 8_000, env = "LLMD_GRACEFUL_TIMEOUT_MS")]
    pub graceful_timeout_ms: u64,

    /// Readiness poll interval in milliseconds.
    #[arg(long, default_value_t = 500, env = "LLMD_READY_POLL_MS")]
    pub ready_poll_ms: u64,

    /// Health check interval in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "LLMD_HEALTH_CHECK_MS")]
    pub health_check_ms: u64,

    /// Health request timeout in milliseconds.
    #[arg(long, default_value_t = 5_000, env = "LLMD_HEALTH_TIMEOUT_MS")]
    pub health_timeout_ms: u64,

    /// Capacity of each child's stderr ring log buffer, in lines.
    #[arg(long, default_value_t = 100, env = "LLMD_RING_CAPACITY")]
    pub ring_capacity: usize,

    /// Lower bound of the ephemeral port range used for spawned children.
    #[arg(long, default_value_t = 23_000, env = "LLMD_PORT_RANGE_START")]
    pub port_range_start: u16,

    /// Upper bound (exclusive) of the ephemeral port range used for spawned children.
    #[arg(long, default_value_t = 24_000, env = "LLMD_PORT_RANGE_END")]
    pub port_range_end: u16,
}

impl DaemonConfig {
    pub fn startup_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn graceful_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.graceful_timeout_ms)
    }

    pub fn ready_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.ready_poll_ms)
    }

    pub fn health_check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.health_check_ms)
    }

    pub fn health_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.health_timeout_ms)
    }

    /// Load the profile table from `profiles_config`, or a single
    /// `default` profile with no binary configured when unset.
    pub fn load_profiles(&self) -> anyhow::Result<HashMap<String, Profile>> {
        match &self.profiles_config {
            Some(path) => {
                let contents = std::fs::read_to_string(path)?;
                let profiles: Vec<Profile> = serde_json::from_str(&contents)?;
                Ok(profiles.into_iter().map(|p| (p.name.clone(), p)).collect())
            }
            None => Ok(HashMap::new()),
        }
    }
}

/// A named recipe for launching the inference binary. Immutable once loaded.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Profile {
    pub name: String,
    pub binary_path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub backend_tag: Option<String>,
}
