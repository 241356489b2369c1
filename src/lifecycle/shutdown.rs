//! Signal handling for graceful shutdown

use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

/// Handles shutdown signals (SIGTERM, SIGINT)
pub struct ShutdownSignal;

impl ShutdownSignal {
    pub fn new() -> Self {
        Self
    }

    /// Wait for SIGTERM or SIGINT.
    ///
    /// Fails only if the signal handlers cannot be registered.
    pub async fn wait(&self) -> std::io::Result<()> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!(signal = "SIGTERM", "shutdown requested");
            }
            _ = sigint.recv() => {
                info!(signal = "SIGINT", "shutdown requested");
            }
        }

        Ok(())
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
