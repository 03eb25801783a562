use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Single-fire shutdown rendezvous.
///
/// Every clone observes the same trigger. The first call to [`ShutdownToken::trigger`] flips the
/// flag and broadcasts over the watch channel; any later call is a no-op, so a second SIGTERM
/// arriving mid-shutdown can never re-run teardown.
#[derive(Clone)]
pub struct ShutdownToken {
    inner: Arc<Inner>,
}

struct Inner {
    fired: AtomicBool,
    tx: watch::Sender<bool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        ShutdownToken {
            inner: Arc::new(Inner {
                fired: AtomicBool::new(false),
                tx,
            }),
        }
    }

    /// Returns true if this call was the one that initiated shutdown.
    pub fn trigger(&self) -> bool {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        // send_replace succeeds even when nobody is currently subscribed.
        self.inner.tx.send_replace(true);
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Completes once shutdown has been triggered, immediately if it already was.
    pub async fn wait(&self) {
        let mut rx = self.inner.tx.subscribe();
        // The sender lives inside `self`, so the channel cannot close while we wait.
        rx.wait_for(|fired| *fired).await.ok();
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn first_trigger_wins() {
        let token = ShutdownToken::new();
        assert!(!token.is_triggered());
        assert!(token.trigger());
        assert!(!token.trigger());
        assert!(!token.clone().trigger());
        assert!(token.is_triggered());
    }

    #[tokio::test]
    async fn wait_returns_after_trigger() {
        let token = ShutdownToken::new();
        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.wait().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        token.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn wait_after_trigger_is_immediate() {
        let token = ShutdownToken::new();
        token.trigger();
        tokio::time::timeout(Duration::from_millis(100), token.wait())
            .await
            .unwrap();
    }
}
