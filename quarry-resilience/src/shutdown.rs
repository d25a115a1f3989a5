//! Shutdown signalling shared by the probe loop and in-flight calls

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

/// Owner side of the shutdown signal.
///
/// Hand every cooperating task a [`ShutdownToken`] via [`token`], then
/// call [`shutdown`] once; all tokens fire, including ones cloned
/// after the signal. Dropping the controller has the same effect, so
/// an early exit from the owning scope still stops every task.
///
/// [`token`]: ShutdownController::token
/// [`shutdown`]: ShutdownController::shutdown
pub struct ShutdownController {
    sender: broadcast::Sender<()>,
    fired: Arc<AtomicBool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A token observing this controller's signal.
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            receiver: self.sender.subscribe(),
            fired: Arc::clone(&self.fired),
        }
    }

    /// Signal shutdown to every token.
    pub fn shutdown(&self) {
        debug!("shutdown signalled");
        self.fired.store(true, Ordering::Release);
        // Send only fails when no token is listening, which is fine.
        let _ = self.sender.send(());
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of the shutdown signal. Cheap to clone; once fired it
/// stays fired.
///
/// The fired flag is shared with the controller so a token cloned
/// after the signal was sent still reports cancelled even though its
/// broadcast subscription started past the message.
pub struct ShutdownToken {
    receiver: broadcast::Receiver<()>,
    fired: Arc<AtomicBool>,
}

impl Clone for ShutdownToken {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.resubscribe(),
            fired: Arc::clone(&self.fired),
        }
    }
}

impl ShutdownToken {
    /// Wait until shutdown is signalled. Returns immediately if it
    /// already was.
    pub async fn cancelled(&mut self) {
        if self.fired.load(Ordering::Acquire) {
            return;
        }
        loop {
            match self.receiver.recv().await {
                // Closed means the controller is gone, which ends the
                // process's interest in us running either way.
                Ok(()) | Err(RecvError::Closed) => {
                    self.fired.store(true, Ordering::Release);
                    return;
                }
                Err(RecvError::Lagged(_)) => continue,
            }
        }
    }

    /// Non-blocking check, for callers between suspension points.
    pub fn is_cancelled(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}
