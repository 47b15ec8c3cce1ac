//! Signal handling for graceful shutdown

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing::debug;

/// Which signal ended the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Terminate,
    Interrupt,
}

/// Waits for SIGTERM or SIGINT
#[derive(Debug, Default)]
pub struct ShutdownSignal;

impl ShutdownSignal {
    pub fn new() -> Self {
        Self
    }

    /// Wait for a shutdown signal
    pub async fn wait(&self) -> Result<Shutdown> {
        let mut sigterm =
            signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("failed to register SIGINT handler")?;

        let received = tokio::select! {
            _ = sigterm.recv() => Shutdown::Terminate,
            _ = sigint.recv() => Shutdown::Interrupt,
        };
        debug!(?received, "shutdown signal");
        Ok(received)
    }
}
