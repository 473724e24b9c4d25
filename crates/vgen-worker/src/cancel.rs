//! Cooperative cancellation.
//!
//! A [`CancelToken`] is checked between stages and raced against
//! long-running work. Child tokens observe their parent, so cancelling a
//! batch cancels every task in it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    parent: Option<Box<CancelToken>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            parent: None,
        }
    }

    /// A token cancelled by either itself or `self`.
    pub fn child(&self) -> Self {
        let mut child = Self::new();
        child.parent = Some(Box::new(self.clone()));
        child
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow() || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    /// Receiver for this token only (not its parent), for FFmpeg runners.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Resolve once this token or any ancestor is cancelled.
    pub async fn cancelled(&self) {
        let mut receivers = Vec::new();
        let mut current = Some(self);
        while let Some(token) = current {
            receivers.push(token.tx.subscribe());
            current = token.parent.as_deref();
        }

        let waits = receivers.into_iter().map(|mut rx| {
            Box::pin(async move {
                // A dropped sender never cancels
                if rx.wait_for(|c| *c).await.is_err() {
                    std::future::pending::<()>().await;
                }
            })
        });
        futures::future::select_all(waits).await;
    }

    /// Sleep for `delay`; returns `true` if cancelled first.
    pub async fn sleep_or_cancel(&self, delay: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        tokio::select! {
            _ = self.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_observes_parent() {
        let parent = CancelToken::new();
        let child = parent.child();
        let sibling = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!sibling.is_cancelled());
        assert!(!parent.is_cancelled());

        parent.cancel();
        assert!(sibling.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_on_parent() {
        let parent = CancelToken::new();
        let child = parent.child();

        let waiter = tokio::spawn(async move { child.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        parent.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_sleep_or_cancel() {
        let token = CancelToken::new();
        assert!(!token.sleep_or_cancel(Duration::from_millis(1)).await);

        token.cancel();
        assert!(token.sleep_or_cancel(Duration::from_secs(60)).await);
    }
}
