// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background health ticker for a single running child.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::DaemonConfig;
use crate::upstream::manager::ProcessManager;

/// Spawn a dedicated task that health-probes `manager` at
/// `health_check_interval` until `shutdown` fires.
pub fn spawn_health_ticker(
    manager: Arc<ProcessManager>,
    config: Arc<DaemonConfig>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(config.health_check_interval());
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            manager.check_health(&config).await;
        }
    });
}
