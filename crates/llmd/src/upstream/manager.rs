// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Owns one child inference process: spawn, stdio capture, readiness probe,
//! health ticker, graceful stop, forced kill.

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::config::{DaemonConfig, Profile};
use crate::ring::RingBuffer;
use crate::upstream::client::UpstreamClient;

/// Lifecycle state of a Process Manager's child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl ManagerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        }
    }
}

/// Owns one child process: the inference binary loading a single model.
pub struct ProcessManager {
    pub profile: Profile,
    pub model_path: PathBuf,
    pub model_id: String,
    pub port: u16,
    state: RwLock<ManagerState>,
    last_error: RwLock<Option<String>>,
    start_time: RwLock<Option<std::time::Instant>>,
    last_health_ms: AtomicI64,
    ring: Arc<RingBuffer>,
    child: RwLock<Option<Child>>,
    shutdown: CancellationToken,
}

impl ProcessManager {
    /// Choose a free loopback port in `[range_start, range_end)`.
    fn pick_port(range_start: u16, range_end: u16) -> anyhow::Result<u16> {
        for port in range_start..range_end {
            if TcpListener::bind(("127.0.0.1", port)).is_ok() {
                return Ok(port);
            }
        }
        anyhow::bail!("no free port in range {range_start}..{range_end}")
    }

    pub fn new(
        profile: Profile,
        model_path: PathBuf,
        model_id: String,
        config: &DaemonConfig,
        ring_capacity: usize,
    ) -> anyhow::Result<Self> {
        let port = Self::pick_port(config.port_range_start, config.port_range_end)?;
        Ok(Self {
            profile,
            model_path,
            model_id,
            port,
            state: RwLock::new(ManagerState::Stopped),
            last_error: RwLock::new(None),
            start_time: RwLock::new(None),
            last_health_ms: AtomicI64::new(0),
            ring: Arc::new(RingBuffer::new(ring_capacity)),
            child: RwLock::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn state(&self) -> ManagerState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: ManagerState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = next;
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn uptime_secs(&self) -> Option<i64> {
        self.start_time
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .map(|t| t.elapsed().as_secs() as i64)
    }

    pub fn last_health_ms(&self) -> i64 {
        self.last_health_ms.load(Ordering::Relaxed)
    }

    /// Returns the ring buffer snapshot as a single newline-delimited string.
    pub fn stderr_tail(&self) -> String {
        self.ring.join()
    }

    /// Spawn the child and poll readiness until it succeeds, the deadline
    /// elapses, or `cancel` fires. On failure the child is killed and the
    /// manager moves to `Failed` with `lastError` carrying the stderr tail.
    pub async fn start(&self, config: &DaemonConfig, cancel: &CancellationToken) -> anyhow::Result<()> {
        let precondition = matches!(self.state(), ManagerState::Stopped | ManagerState::Failed);
        anyhow::ensure!(precondition, "process manager must be stopped or failed to start");

        if !self.model_path.exists() {
            self.fail("model file does not exist");
            anyhow::bail!("model file does not exist: {}", self.model_path.display());
        }

        let mut cmd = Command::new(&self.profile.binary_path);
        cmd.arg("--model").arg(&self.model_path);
        cmd.arg("--port").arg(self.port.to_string());
        cmd.arg("--host").arg("127.0.0.1");
        cmd.args(&self.profile.args);
        for (key, value) in &self.profile.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.fail(format!("spawn failed: {e}"));
                anyhow::bail!("spawn failed: {e}");
            }
        };

        self.set_state(ManagerState::Starting);
        *self.start_time.write().unwrap_or_else(|e| e.into_inner()) = Some(std::time::Instant::now());

        if let Some(stdout) = child.stdout.take() {
            let model_id = self.model_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(model_id = %model_id, "child stdout: {line}");
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            let ring = Arc::clone(&self.ring);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    ring.write(line);
                }
            });
        }

        *self.child.write().unwrap_or_else(|e| e.into_inner()) = Some(child);

        let ready = self.poll_readiness(config, cancel).await;
        match ready {
            Ok(true) => {
                self.set_state(ManagerState::Running);
                Ok(())
            }
            Ok(false) => {
                let tail = self.stderr_tail();
                self.kill().await;
                self.fail(format!("startup timed out; stderr tail: {tail}"));
                anyhow::bail!("startup timed out");
            }
            Err(e) => {
                let tail = self.stderr_tail();
                self.kill().await;
                self.fail(format!("{e}; stderr tail: {tail}"));
                Err(e)
            }
        }
    }

    /// Poll until the child exits, marking `Failed` if the exit was
    /// unprompted (i.e. observed while still `Running`). Intended to be
    /// driven by a dedicated task spawned by the Switcher after a
    /// successful `start`, so a crash is noticed promptly rather than on
    /// the next health tick.
    pub async fn watch_for_exit(&self) {
        loop {
            let exited = {
                let mut guard = self.child.write().unwrap_or_else(|e| e.into_inner());
                match guard.as_mut() {
                    Some(child) => matches!(child.try_wait(), Ok(Some(_))),
                    None => true,
                }
            };
            if exited || self.shutdown.is_cancelled() {
                if exited && self.state() == ManagerState::Running {
                    self.fail("child process exited unexpectedly");
                }
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        }
    }

    async fn poll_readiness(
        &self,
        config: &DaemonConfig,
        cancel: &CancellationToken,
    ) -> anyhow::Result<bool> {
        let client = UpstreamClient::new(self.base_url());
        let deadline = tokio::time::Instant::now() + config.startup_timeout();
        let mut interval = tokio::time::interval(config.ready_poll_interval());

        loop {
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                _ = interval.tick() => {}
            }
            if let Ok(true) = client.readiness_probe(config.ready_poll_interval()).await {
                return Ok(true);
            }
            if let Some(child) = self.child.write().unwrap_or_else(|e| e.into_inner()).as_mut() {
                if let Ok(Some(_status)) = child.try_wait() {
                    return Err(anyhow::anyhow!("child exited during startup"));
                }
            }
        }
    }

    /// Periodic health probe. Call from the health ticker task.
    pub async fn check_health(&self, config: &DaemonConfig) {
        if !matches!(self.state(), ManagerState::Running | ManagerState::Starting) {
            return;
        }
        let client = UpstreamClient::new(self.base_url());
        if client.health(config.health_timeout()).await.is_ok() {
            self.last_health_ms.store(epoch_ms(), Ordering::Relaxed);
        } else if self.state() == ManagerState::Running {
            if let Some(child) = self.child.write().unwrap_or_else(|e| e.into_inner()).as_mut() {
                if let Ok(Some(_status)) = child.try_wait() {
                    self.fail("child process exited unexpectedly");
                }
            }
        }
    }

    fn fail(&self, message: impl Into<String>) {
        *self.last_error.write().unwrap_or_else(|e| e.into_inner()) = Some(message.into());
        self.set_state(ManagerState::Failed);
    }

    /// Graceful stop: SIGTERM, wait up to `graceful_timeout`, then SIGKILL.
    /// Idempotent if already terminal.
    pub async fn stop(&self, config: &DaemonConfig) {
        if matches!(self.state(), ManagerState::Stopped | ManagerState::Failed) {
            return;
        }
        self.set_state(ManagerState::Stopping);

        let pid = self
            .child
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(|c| c.id());

        if let Some(pid) = pid {
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }

        let wait_result = tokio::time::timeout(config.graceful_timeout(), self.wait_for_exit()).await;
        if wait_result.is_err() {
            self.kill().await;
        } else {
            self.set_state(ManagerState::Stopped);
        }
        self.shutdown.cancel();
    }

    /// Unconditional force-termination. Converges to `Stopped`.
    pub async fn kill(&self) {
        let mut guard = self.child.write().unwrap_or_else(|e| e.into_inner());
        if let Some(child) = guard.as_mut() {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
        drop(guard);
        self.set_state(ManagerState::Stopped);
        self.shutdown.cancel();
    }

    async fn wait_for_exit(&self) {
        loop {
            let done = {
                let mut guard = self.child.write().unwrap_or_else(|e| e.into_inner());
                match guard.as_mut() {
                    Some(child) => matches!(child.try_wait(), Ok(Some(_))),
                    None => true,
                }
            };
            if done {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}

fn epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_profile() -> Profile {
        Profile {
            name: "default".into(),
            binary_path: "/nonexistent/binary".into(),
            args: vec![],
            env: HashMap::new(),
            backend_tag: None,
        }
    }

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
            startup_timeout_ms: 200,
            graceful_timeout_ms: 200,
            ready_poll_ms: 50,
            health_check_ms: 1000,
            health_timeout_ms: 200,
            ring_capacity: 100,
            port_range_start: 23100,
            port_range_end: 23200,
        }
    }

    #[test]
    fn new_manager_starts_stopped() {
        let config = test_config();
        let manager = ProcessManager::new(test_profile(), "/tmp/model.gguf".into(), "m".into(), &config, 10).unwrap();
        assert_eq!(manager.state(), ManagerState::Stopped);
    }

    #[tokio::test]
    async fn start_fails_when_model_missing() {
        let config = test_config();
        let manager =
            ProcessManager::new(test_profile(), "/tmp/does-not-exist.gguf".into(), "m".into(), &config, 10).unwrap();
        let cancel = CancellationToken::new();
        let result = manager.start(&config, &cancel).await;
        assert!(result.is_err());
        assert_eq!(manager.state(), ManagerState::Failed);
        assert!(manager.last_error().is_some());
    }

    #[tokio::test]
    async fn stop_on_stopped_manager_is_noop() {
        let config = test_config();
        let manager = ProcessManager::new(test_profile(), "/tmp/model.gguf".into(), "m".into(), &config, 10).unwrap();
        manager.stop(&config).await;
        assert_eq!(manager.state(), ManagerState::Stopped);
    }
}
