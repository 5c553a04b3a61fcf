//! Signal adapter
//!
//! Process signal delivery is outside this crate's core logic — the
//! orchestrator only ever consumes a single "termination requested" event,
//! delivered by calling [`crate::orchestrator::Orchestrator::start_shutdown`].
//! This module is a thin, optional convenience that wires that event to
//! `SIGTERM`/`SIGINT` on Unix and Ctrl-C elsewhere, mirroring the teacher's
//! own `cfg(unix)`/`cfg(not(unix))` split for signal handling.

use tracing::info;

use crate::orchestrator::Orchestrator;

/// Spawn a task that awaits the platform's termination signal(s) and calls
/// `orchestrator.start_shutdown()` exactly once.
pub fn install_signal_handler(orchestrator: Orchestrator) {
    tokio::spawn(async move {
        wait_for_termination().await;
        info!("termination signal received, starting shutdown");
        orchestrator.start_shutdown().await;
    });
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(%err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(%err, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
