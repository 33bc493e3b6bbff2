//! OS signal handling.
//!
//! # Signals
//! - Unix: SIGINT, SIGTERM, SIGQUIT
//! - Other platforms: Ctrl-C
//!
//! The first signal fires the process-wide [`Shutdown`]; later ones are logged
//! and ignored while the shutdown sequence runs.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::lifecycle::Shutdown;

/// Wait for the next termination signal.
#[cfg(unix)]
pub async fn wait_for_interrupt() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Wait for the next termination signal.
#[cfg(not(unix))]
pub async fn wait_for_interrupt() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Arm the process signal handlers against `shutdown`.
pub fn arm(shutdown: Arc<Shutdown>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = wait_for_interrupt().await {
                tracing::error!(error = %e, "Failed to install signal handlers");
                return;
            }
            if shutdown.trigger() {
                tracing::info!("Interrupt received");
            } else {
                tracing::warn!("Interrupt received while already shutting down, ignoring");
            }
        }
    })
}
