//! Synchronized-join gate for the stream gateway (§4.8): holds back the
//! first bytes of a request tagged with `?sync=<token>&expect=<N>` until
//! `N` requests carrying the same token have arrived, so every renderer in
//! the batch starts consuming from (approximately) the same wall-clock
//! moment.
//!
//! Grounded on [`crate::stream_observer::StreamObserverRegistry`]'s
//! `Notify`-per-key idiom, generalized from a one-shot "has this happened
//! yet" flag to an arrival counter with a release threshold.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;

struct SyncGate {
    expect: usize,
    arrived: AtomicUsize,
    notify: Notify,
}

/// Shared by every `GET /streams/<zone>/<streamId>.<ext>` handler that
/// carries a `sync` token.
#[derive(Default)]
pub struct SyncJoinRegistry {
    gates: DashMap<String, Arc<SyncGate>>,
}

impl SyncJoinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one arrival for `token` and waits until `expect` total
    /// arrivals have registered or `timeout` elapses, whichever comes
    /// first. The gate is torn down once the last holder observes it
    /// satisfied or timed out, so a stale token cannot wedge a future join
    /// under the same name.
    pub async fn join(&self, token: &str, expect: usize, timeout: Duration) {
        let expect = expect.max(1);
        let gate = self
            .gates
            .entry(token.to_string())
            .or_insert_with(|| {
                Arc::new(SyncGate {
                    expect,
                    arrived: AtomicUsize::new(0),
                    notify: Notify::new(),
                })
            })
            .clone();

        let arrived = gate.arrived.fetch_add(1, Ordering::SeqCst) + 1;
        if arrived >= gate.expect {
            gate.notify.notify_waiters();
        } else {
            let _ = tokio::time::timeout(timeout, gate.notify.notified()).await;
        }

        self.gates.remove_if(token, |_, g| Arc::ptr_eq(g, &gate));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn releases_immediately_once_expect_is_reached() {
        let registry = Arc::new(SyncJoinRegistry::new());
        let r2 = registry.clone();
        let first = tokio::spawn(async move { r2.join("tok", 2, Duration::from_secs(2)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.join("tok", 2, Duration::from_secs(2)).await;
        first.await.unwrap();
    }

    #[tokio::test]
    async fn single_expect_never_blocks() {
        let registry = SyncJoinRegistry::new();
        let start = tokio::time::Instant::now();
        registry.join("solo", 1, Duration::from_secs(5)).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn times_out_when_expect_never_reached() {
        let registry = SyncJoinRegistry::new();
        let start = tokio::time::Instant::now();
        registry.join("partial", 3, Duration::from_millis(30)).await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
