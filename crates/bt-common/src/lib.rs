//! Shared plumbing for the Baton workspace: logging setup and the wiring
//! from OS signals to an in-process cancellation signal.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub mod logging;

/// Resolves on the first SIGINT (Ctrl+C) or SIGTERM.
///
/// If a handler cannot be installed the corresponding branch never resolves,
/// so the process keeps running and can still be stopped by the other signal.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Spawn a task that cancels `token` once a shutdown signal arrives.
///
/// Returns the token for convenience so callers can write
/// `let shutdown = cancel_on_shutdown_signal(CancellationToken::new());`.
pub fn cancel_on_shutdown_signal(token: CancellationToken) -> CancellationToken {
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => {
                info!("Shutdown signal received");
                trigger.cancel();
            }
            // Cancelled from elsewhere; nothing left to wire.
            _ = trigger.cancelled() => {}
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_exits_when_token_cancelled_elsewhere() {
        let token = cancel_on_shutdown_signal(CancellationToken::new());
        token.cancel();
        // Idempotent: a second cancel is a no-op.
        token.cancel();
        assert!(token.is_cancelled());
    }
}
