//! Translates external termination signals into one manager shutdown call.
//!
//! On Unix, SIGINT, SIGTERM, and SIGQUIT are handled; elsewhere only
//! Ctrl-C. The waiting happens on an ordinary task, so the handler context
//! stays trivial and repeated signals are harmless (shutdown is
//! idempotent).

use crate::engine::ShutdownHandle;

#[cfg(unix)]
pub async fn wait_for_termination() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_termination() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Spawn the task that forwards the first termination signal to the engine.
pub fn spawn_shutdown_watcher(handle: ShutdownHandle) {
    tokio::spawn(async move {
        match wait_for_termination().await {
            Ok(()) => {
                tracing::info!("termination signal received, shutting down");
                handle.shutdown();
            }
            Err(error) => {
                tracing::error!(%error, "signal handler failed, shutting down");
                handle.shutdown();
            }
        }
    });
}
