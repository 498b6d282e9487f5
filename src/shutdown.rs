//! Termination-signal handling.
//!
//! `ShutdownCoordinator` fans a single shutdown request out to every clone.
//! The dispatcher watches it to stop taking new requests; the in-flight
//! handler is left to finish under its own timeout.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

/// Shared shutdown flag with async waiting.
///
/// ```rust
/// use nodedex::shutdown::ShutdownCoordinator;
///
/// async fn example() {
///     let coordinator = ShutdownCoordinator::new();
///     coordinator.start_signal_listener();
///
///     coordinator.wait_for_shutdown().await;
/// }
/// ```
#[derive(Clone)]
pub struct ShutdownCoordinator {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Request shutdown. Safe to call repeatedly.
    pub fn request_shutdown(&self) {
        let first = self.sender.send_if_modified(|requested| {
            let changed = !*requested;
            *requested = true;
            changed
        });
        if first {
            info!("Shutdown requested");
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once shutdown has been requested (immediately if it already was).
    pub async fn wait_for_shutdown(&self) {
        let mut receiver = self.sender.subscribe();
        // Only errs if the sender is dropped; `self` owns it.
        let _ = receiver.wait_for(|requested| *requested).await;
    }

    /// Spawn a task that requests shutdown on SIGTERM/SIGINT (Ctrl+C elsewhere).
    pub fn start_signal_listener(&self) {
        let coordinator = self.clone();

        tokio::spawn(async move {
            #[cfg(unix)]
            {
                let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate())
                {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("Failed to create SIGTERM handler: {}", e);
                        signal::ctrl_c().await.ok();
                        coordinator.request_shutdown();
                        return;
                    }
                };
                let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("Failed to create SIGINT handler: {}", e);
                        sigterm.recv().await;
                        coordinator.request_shutdown();
                        return;
                    }
                };

                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, closing connection");
                    }
                    _ = sigint.recv() => {
                        info!("Received SIGINT, closing connection");
                    }
                }
            }

            #[cfg(not(unix))]
            {
                if let Err(e) = signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                    return;
                }
                info!("Received Ctrl+C, closing connection");
            }

            coordinator.request_shutdown();
        });
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
