//! Tracks whether a renderer has actually issued its HTTP GET against a
//! published stream (§4.7 DLNA driver, §4.8 HTTP gateway).
//!
//! Grounded on `engine/mod.rs`'s first-chunk `Notify` idiom: one `Notify`
//! per stream id, `notify_waiters` on observation (losing the signal if
//! nobody is waiting is fine — the only consumer, `wait_observed`, is
//! spawned eagerly right after `SetAVTransportURI` and checks `observed`
//! first in case the GET already landed).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;

struct StreamWaiter {
    observed: AtomicBool,
    notify: Notify,
}

/// Shared by the HTTP gateway (marks streams observed) and output drivers
/// that need to gate a `Play` command on the renderer actually connecting.
#[derive(Default)]
pub struct StreamObserverRegistry {
    waiters: DashMap<String, Arc<StreamWaiter>>,
}

impl StreamObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, stream_id: &str) -> Arc<StreamWaiter> {
        self.waiters
            .entry(stream_id.to_string())
            .or_insert_with(|| {
                Arc::new(StreamWaiter {
                    observed: AtomicBool::new(false),
                    notify: Notify::new(),
                })
            })
            .clone()
    }

    /// Called by the HTTP gateway when a `GET /streams/<zoneId>/<streamId>.*`
    /// request arrives.
    pub fn mark_observed(&self, stream_id: &str) {
        let waiter = self.entry(stream_id);
        waiter.observed.store(true, Ordering::SeqCst);
        waiter.notify.notify_waiters();
    }

    /// Waits up to `timeout` for `stream_id` to be observed; returns whether
    /// it was. Safe to call before or after `mark_observed`.
    pub async fn wait_observed(&self, stream_id: &str, timeout: Duration) -> bool {
        let waiter = self.entry(stream_id);
        if waiter.observed.load(Ordering::SeqCst) {
            return true;
        }
        let _ = tokio::time::timeout(timeout, waiter.notify.notified()).await;
        waiter.observed.load(Ordering::SeqCst)
    }

    /// Drops bookkeeping for a stream once its session ends.
    pub fn forget(&self, stream_id: &str) {
        self.waiters.remove(stream_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_observed_returns_true_immediately_if_already_marked() {
        let registry = StreamObserverRegistry::new();
        registry.mark_observed("s1");
        assert!(registry.wait_observed("s1", Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn wait_observed_times_out_when_never_marked() {
        let registry = StreamObserverRegistry::new();
        assert!(!registry.wait_observed("s1", Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn wait_observed_wakes_on_late_mark() {
        let registry = Arc::new(StreamObserverRegistry::new());
        let r2 = registry.clone();
        let handle = tokio::spawn(async move { r2.wait_observed("s1", Duration::from_secs(2)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.mark_observed("s1");
        assert!(handle.await.unwrap());
    }
}
