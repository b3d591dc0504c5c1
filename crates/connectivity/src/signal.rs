//! Readiness Signal

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Shared boolean readiness flag that tasks can wait on.
///
/// Clones observe and drive the same flag.
#[derive(Clone)]
pub struct ReadySignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ReadySignal {
    /// Create a signal in the not-ready state
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the flag, returning true if the value changed
    pub fn set(&self, ready: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == ready {
                false
            } else {
                *current = ready;
                true
            }
        })
    }

    /// Current value
    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the flag is set
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Wait until the flag is set, giving up after `timeout`
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReadySignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadySignal")
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_reports_changes() {
        let signal = ReadySignal::new();
        assert!(!signal.is_ready());
        assert!(signal.set(true));
        assert!(!signal.set(true));
        assert!(signal.is_ready());
        assert!(signal.set(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_expires() {
        let signal = ReadySignal::new();
        assert!(!signal.wait_timeout(Duration::from_secs(10)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_wakes_on_set() {
        let signal = ReadySignal::new();
        let setter = signal.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            setter.set(true);
        });

        assert!(signal.wait_timeout(Duration::from_secs(10)).await);
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_ready() {
        let signal = ReadySignal::new();
        signal.set(true);
        signal.wait().await;
    }
}
