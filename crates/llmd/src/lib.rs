// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! llmd: a single-host control plane that supervises a local llama-server–
//! style inference binary, switching which model is loaded on demand while
//! presenting a stable, OpenAI-compatible HTTP surface to clients.

pub mod config;
pub mod error;
pub mod proxy;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod switcher;
pub mod transport;
pub mod upstream;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::DaemonConfig;
use crate::state::AppState;
use crate::transport::build_router;

/// Run the daemon until shutdown.
pub async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let state = Arc::new(AppState::new(config, shutdown.clone())?);
    state.scheduler.spawn_drain_task(shutdown.clone());

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received termination signal, shutting down");
                shutdown.cancel();
            }
        });
    }

    tracing::info!("llmd listening on {addr}");
    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;

    let shutdown_signal = {
        let state = Arc::clone(&state);
        async move {
            shutdown.cancelled().await;
            state.switcher.stop().await;
        }
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}
