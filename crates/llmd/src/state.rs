// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::config::DaemonConfig;
use crate::registry::{ModelRegistry, ProfileTable};
use crate::scheduler::Scheduler;
use crate::switcher::Switcher;
use crate::upstream::pointer::UpstreamPointer;

/// Shared daemon state, wired once at startup and handed to every handler.
pub struct AppState {
    pub config: DaemonConfig,
    pub shutdown: CancellationToken,
    pub switcher: Switcher,
    pub scheduler: Scheduler,
    pub upstream: Arc<UpstreamPointer>,
    pub models: ModelRegistry,
    pub profiles: ProfileTable,
    pub proxy_client: Client,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: DaemonConfig, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let upstream = Arc::new(UpstreamPointer::new());
        let profiles = config.load_profiles()?;
        let config_arc = Arc::new(config.clone());

        Ok(Self {
            switcher: Switcher::new(Arc::clone(&upstream), Arc::clone(&config_arc), shutdown.clone()),
            scheduler: Scheduler::new(config.max_concurrent_requests, config.interactive_reserve, config.queue_size),
            upstream,
            models: ModelRegistry::new(config.model_dir.clone()),
            profiles: ProfileTable::new(profiles),
            proxy_client: crate::proxy::build_proxy_client(),
            start_time: std::time::Instant::now(),
            config,
            shutdown,
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
