// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::registry::Registry;
use anyhow::Result;
use log::{info, warn};
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::time::{Duration, timeout};

const SUPERVISION_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Handlers for the signals that stop the daemon: SIGTERM, SIGINT and SIGABRT.
pub struct ShutdownSignals {
    sigterm: Signal,
    sigint: Signal,
    sigabrt: Signal,
}

impl ShutdownSignals {
    /// Install the handlers. Signals delivered from here on are not lost.
    pub fn install() -> Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
            sigabrt: signal(SignalKind::from_raw(libc::SIGABRT))?,
        })
    }

    pub async fn recv(&mut self) {
        tokio::select! {
            _ = self.sigterm.recv() => info!("received SIGTERM"),
            _ = self.sigint.recv() => info!("received SIGINT"),
            _ = self.sigabrt.recv() => info!("received SIGABRT"),
        }
    }
}

/// Set the shutdown flag, kill every role's process, and wait for the
/// supervision loops to wind down.
pub async fn shutdown_all(registry: &Registry) {
    registry.cancel();
    for supervisor in registry.supervisors() {
        info!("[{}] shutting down", supervisor.role());
        supervisor.shutdown();
    }

    for (role, task) in registry.take_tasks() {
        match timeout(SUPERVISION_STOP_TIMEOUT, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("[{role}] supervision task failed: {e}"),
            Err(_) => warn!(
                "[{role}] supervision still running after {}s, giving up",
                SUPERVISION_STOP_TIMEOUT.as_secs()
            ),
        }
    }
}
