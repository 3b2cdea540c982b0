use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use eyre::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Bridges OS signals to the ambient cancellation token every operation
/// threads through its suspension points.
pub struct GracefulShutdown {
    token: CancellationToken,
    shutdown_initiated: Arc<AtomicBool>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The token operations should observe.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    /// Manually trigger shutdown (useful for tests and API-driven stops).
    pub fn trigger_shutdown(&self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            tracing::info!("shutdown triggered");
            self.token.cancel();
        }
    }

    /// Listen for SIGTERM / SIGINT and cancel the token when either fires.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::debug!("signal handler started, listening for SIGTERM and SIGINT");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("received SIGINT, cancelling in-flight operations");
            }
            _ = wait_for_sigterm() => {
                tracing::info!("received SIGTERM, cancelling in-flight operations");
            }
        }

        self.trigger_shutdown();
        Ok(())
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // On non-Unix systems, we only have Ctrl+C
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_cancels_the_token() {
        let shutdown = GracefulShutdown::new();
        let token = shutdown.cancellation_token();

        assert!(!shutdown.is_shutdown_initiated());
        assert!(!token.is_cancelled());

        shutdown.trigger_shutdown();
        assert!(shutdown.is_shutdown_initiated());
        assert!(token.is_cancelled());

        // A second trigger is a no-op.
        shutdown.trigger_shutdown();
        assert!(token.is_cancelled());
    }
}
