//! Shutdown signalling for long-running operations.
//!
//! A [`ShutdownTrigger`] owns the sending half; any number of cloned
//! [`ShutdownSignal`]s observe it. Retry loops race their sleeps against the
//! signal so an explicit shutdown aborts them promptly.

use tokio::signal;
use tokio::sync::watch;
use tracing::info;

/// Sending half of a shutdown channel.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Creates a new trigger together with its first signal.
    #[must_use]
    pub fn new() -> (Self, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, ShutdownSignal { rx: Some(rx) })
    }

    /// Gets an additional signal receiver
    #[must_use]
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: Some(self.tx.subscribe()),
        }
    }

    /// Fires the shutdown signal. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half of a shutdown channel.
///
/// A signal created with [`ShutdownSignal::never`] never fires.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl ShutdownSignal {
    /// A signal that is never triggered.
    #[must_use]
    pub const fn never() -> Self {
        Self { rx: None }
    }

    /// Checks if shutdown has been signaled (non-blocking)
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Waits until shutdown is signaled.
    ///
    /// If every trigger has been dropped without firing, this never resolves.
    pub async fn recv(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending().await;
        };
        if rx.wait_for(|fired| *fired).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::never()
    }
}

/// Fires `trigger` when the process receives Ctrl+C.
///
/// # Errors
///
/// Returns an error if the signal handler cannot be installed.
pub async fn trigger_on_ctrl_c(trigger: ShutdownTrigger) -> std::io::Result<()> {
    signal::ctrl_c().await?;
    info!("Received Ctrl+C, initiating shutdown");
    trigger.trigger();
    Ok(())
}
