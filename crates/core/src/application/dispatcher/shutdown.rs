// Dispatcher Shutdown Token

use tokio::sync::watch;

/// Receiving half of the stop request, held by `Dispatcher::run`
///
/// The loop checks it before each claim and races it against idle and
/// error-recovery sleeps. It is never consulted while a command runs, so
/// a stop request lets the in-flight job finish and record its outcome.
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// True once any sender has requested a stop
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when a stop is requested
    ///
    /// Returns at once if the stop was already requested or the sender was
    /// dropped.
    pub async fn wait(&mut self) {
        if self.is_shutdown() {
            return;
        }
        let _ = self.rx.changed().await;
    }
}

/// Sending half, owned by whoever handles the stop signal (Ctrl+C in the CLI)
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    /// Ask the dispatcher to stop after the current job
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Paired sender and token, initially not stopped
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_returns_after_shutdown() {
        let (tx, mut token) = shutdown_channel();
        assert!(!token.is_shutdown());
        tx.shutdown();
        token.wait().await;
        assert!(token.is_shutdown());
        // Already signalled: must not block again
        token.wait().await;
    }

    #[tokio::test]
    async fn test_dropped_sender_releases_waiters() {
        let (tx, mut token) = shutdown_channel();
        drop(tx);
        tokio::time::timeout(std::time::Duration::from_secs(1), token.wait())
            .await
            .unwrap();
        assert!(!token.is_shutdown());
    }
}
