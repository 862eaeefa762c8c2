//! Rearmable one-shot timer.
//!
//! Arms a callback to fire after a delay on the shared tokio timer
//! wheel. Re-arming or cancelling aborts the previously scheduled
//! firing. Arming and disarming are cheap synchronous operations so
//! they can be driven from a conference's serial queue.

use std::time::Duration;

use tokio::task::JoinHandle;

/// One-shot timer that can be re-armed or cancelled at any time.
///
/// At most one firing is pending; arming while armed replaces the
/// pending firing. The callback runs on a spawned task, never inline.
#[derive(Debug, Default)]
pub struct RearmableTimer {
    pending: Option<JoinHandle<()>>,
}

impl RearmableTimer {
    pub fn new() -> Self {
        Self { pending: None }
    }

    /// Schedule `f` to run once after `delay`, replacing any pending
    /// firing.
    pub fn arm<F>(&mut self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        }));
    }

    /// Cancel the pending firing, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    /// Whether a firing is currently scheduled.
    pub fn is_armed(&self) -> bool {
        self.pending.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}

impl Drop for RearmableTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_timer_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = RearmableTimer::new();

        let f = fired.clone();
        timer.arm(Duration::from_millis(10), move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed());
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = RearmableTimer::new();

        let f = fired.clone();
        timer.arm(Duration::from_millis(10), move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rearm_replaces_pending_firing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = RearmableTimer::new();

        let f1 = fired.clone();
        timer.arm(Duration::from_millis(10), move || {
            f1.fetch_add(1, Ordering::SeqCst);
        });
        let f2 = fired.clone();
        timer.arm(Duration::from_millis(20), move || {
            f2.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }
}
