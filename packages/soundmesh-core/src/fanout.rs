//! Per (zone, profile) broadcaster from one engine output to many subscriber
//! streams (§4.3).
//!
//! Grounded on `stream::manager::StreamState`/`StreamRegistry`'s
//! ring-buffer + broadcast idiom, generalized so each subscriber has its own
//! hard byte bound and drop policy instead of sharing one `broadcast`
//! channel's uniform lag behavior.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::model::OutputProfile;
use crate::protocol_constants::SUBSCRIBER_DROP_LOG_RATE_LIMIT_MS;

/// One message flowing from a fanout to a subscriber's channel.
#[derive(Debug, Clone)]
pub enum FanoutMessage {
    Data(Bytes),
    /// Producer ended normally; the subscriber stream should end too.
    End,
    /// Producer failed; the subscriber stream should be destroyed with this
    /// error.
    Error(String),
}

/// Options accepted by [`Fanout::subscribe`], mirroring `createStream`'s
/// `{primeWithBuffer, label}` (§4.2).
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    pub prime_with_buffer: bool,
    pub label: String,
}

/// Snapshot returned by [`Fanout::stats`].
#[derive(Debug, Clone, Default)]
pub struct FanoutStats {
    pub subscribers: usize,
    pub subscriber_drops: u64,
    pub prebuffer_bytes: usize,
}

struct SubscriberSlot {
    tx: mpsc::Sender<FanoutMessage>,
    queued_bytes: AtomicUsize,
    max_bytes: usize,
    drops: AtomicU64,
    last_log_at_ms: AtomicU64,
    #[allow(dead_code)]
    label: String,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A live subscription returned by [`Fanout::subscribe`]. Consumers read
/// from it with [`Self::recv`]; each byte handed back is released from the
/// subscriber's outstanding-bytes counter so the drop policy stays accurate.
pub struct FanoutSubscription {
    id: u64,
    rx: mpsc::Receiver<FanoutMessage>,
    slot: Arc<SubscriberSlot>,
    fanout: Arc<FanoutInner>,
}

impl FanoutSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<FanoutMessage> {
        let msg = self.rx.recv().await?;
        if let FanoutMessage::Data(ref chunk) = msg {
            self.slot
                .queued_bytes
                .fetch_sub(chunk.len().min(self.slot.queued_bytes.load(Ordering::Relaxed)), Ordering::Relaxed);
        }
        Some(msg)
    }
}

impl Drop for FanoutSubscription {
    fn drop(&mut self) {
        self.fanout.subscribers.remove(&self.id);
    }
}

struct FanoutInner {
    profile: OutputProfile,
    prebuffer_cap_bytes: usize,
    prebuffer: Mutex<VecDeque<Bytes>>,
    prebuffer_bytes: AtomicUsize,
    subscribers: DashMap<u64, Arc<SubscriberSlot>>,
    next_id: AtomicU64,
    total_drops: AtomicU64,
}

/// Per (zoneId, profile) broadcaster (§4.3).
#[derive(Clone)]
pub struct Fanout(Arc<FanoutInner>);

/// Channel depth in messages; the byte bound on [`SubscribeOptions`]/
/// [`Fanout::subscribe`]'s `max_bytes` is the binding constraint, this is
/// only a backstop against unbounded message-count growth.
const SUBSCRIBER_CHANNEL_DEPTH: usize = 1024;

impl Fanout {
    pub fn new(profile: OutputProfile, prebuffer_cap_bytes: usize) -> Self {
        Self(Arc::new(FanoutInner {
            profile,
            prebuffer_cap_bytes,
            prebuffer: Mutex::new(VecDeque::new()),
            prebuffer_bytes: AtomicUsize::new(0),
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            total_drops: AtomicU64::new(0),
        }))
    }

    pub fn profile(&self) -> OutputProfile {
        self.0.profile
    }

    /// Registers a new subscriber and returns its handle and subscription.
    pub fn subscribe(&self, max_bytes: usize, opts: SubscribeOptions) -> FanoutSubscription {
        let id = self.0.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_DEPTH);
        let slot = Arc::new(SubscriberSlot {
            tx,
            queued_bytes: AtomicUsize::new(0),
            max_bytes,
            drops: AtomicU64::new(0),
            last_log_at_ms: AtomicU64::new(0),
            label: opts.label,
        });

        if opts.prime_with_buffer {
            let prebuffer = self.0.prebuffer.lock();
            let mut primed_bytes = 0usize;
            for chunk in prebuffer.iter() {
                primed_bytes += chunk.len();
                slot.queued_bytes.fetch_add(chunk.len(), Ordering::Relaxed);
                let _ = slot.tx.try_send(FanoutMessage::Data(chunk.clone()));
            }
            let _ = primed_bytes;
        }

        self.0.subscribers.insert(id, slot.clone());
        FanoutSubscription {
            id,
            rx,
            slot,
            fanout: self.0.clone(),
        }
    }

    /// Pushes a chunk of engine output to the prebuffer and every subscriber
    /// (§4.3). Drops are per-subscriber only; other subscribers are
    /// unaffected (§8 boundary behavior).
    pub fn push(&self, chunk: Bytes) {
        {
            let mut prebuffer = self.0.prebuffer.lock();
            prebuffer.push_back(chunk.clone());
            self.0
                .prebuffer_bytes
                .fetch_add(chunk.len(), Ordering::Relaxed);
            while self.0.prebuffer_bytes.load(Ordering::Relaxed) > self.0.prebuffer_cap_bytes {
                match prebuffer.pop_front() {
                    Some(evicted) => {
                        self.0
                            .prebuffer_bytes
                            .fetch_sub(evicted.len(), Ordering::Relaxed);
                    }
                    None => break,
                }
            }
        }

        for entry in self.0.subscribers.iter() {
            self.deliver(entry.value(), chunk.clone());
        }
    }

    fn deliver(&self, slot: &Arc<SubscriberSlot>, chunk: Bytes) {
        let queued = slot.queued_bytes.load(Ordering::Relaxed);
        if queued + chunk.len() > slot.max_bytes {
            slot.drops.fetch_add(1, Ordering::Relaxed);
            self.0.total_drops.fetch_add(1, Ordering::Relaxed);
            let now = now_ms();
            let last_log = slot.last_log_at_ms.load(Ordering::Relaxed);
            if now.saturating_sub(last_log) >= SUBSCRIBER_DROP_LOG_RATE_LIMIT_MS {
                slot.last_log_at_ms.store(now, Ordering::Relaxed);
                log::debug!(
                    "fanout[{:?}]: dropping chunk for slow subscriber ({} bytes queued, bound {})",
                    self.0.profile,
                    queued,
                    slot.max_bytes
                );
            }
            return;
        }
        slot.queued_bytes.fetch_add(chunk.len(), Ordering::Relaxed);
        if slot.tx.try_send(FanoutMessage::Data(chunk)).is_err() {
            slot.drops.fetch_add(1, Ordering::Relaxed);
            self.0.total_drops.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Normal producer end: flush queues and end every subscriber stream.
    pub fn end(&self) {
        for entry in self.0.subscribers.iter() {
            let _ = entry.value().tx.try_send(FanoutMessage::End);
        }
    }

    /// Producer error: destroy every subscriber stream with the error.
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        for entry in self.0.subscribers.iter() {
            let _ = entry
                .value()
                .tx
                .try_send(FanoutMessage::Error(message.clone()));
        }
    }

    /// Rebinds a subscriber from `self` to `target` atomically, used by
    /// engine handoff (§4.2/§4.3). The subscriber keeps its existing channel
    /// and byte counter, so its prebuffer position is not reset.
    pub fn migrate_subscriber(&self, id: u64, target: &Fanout) -> bool {
        match self.0.subscribers.remove(&id) {
            Some((_, slot)) => {
                target.0.subscribers.insert(id, slot);
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.0.subscribers.len()
    }

    /// Moves every current subscriber from `self` to `target`, used by
    /// engine handoff to atomically migrate a profile's whole listener set
    /// in one step (§4.2 `startWithHandoff`).
    pub fn migrate_all(&self, target: &Fanout) {
        let ids: Vec<u64> = self.0.subscribers.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((id, slot)) = self.0.subscribers.remove(&id) {
                target.0.subscribers.insert(id, slot);
            }
        }
    }

    pub fn stats(&self) -> FanoutStats {
        FanoutStats {
            subscribers: self.0.subscribers.len(),
            subscriber_drops: self.0.total_drops.load(Ordering::Relaxed),
            prebuffer_bytes: self.0.prebuffer_bytes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_pushed_chunks() {
        let fanout = Fanout::new(OutputProfile::Mp3, 64 * 1024);
        let mut sub = fanout.subscribe(1024, SubscribeOptions::default());
        fanout.push(Bytes::from_static(b"abc"));
        let msg = sub.recv().await.unwrap();
        assert!(matches!(msg, FanoutMessage::Data(ref b) if b.as_ref() == b"abc"));
    }

    #[tokio::test]
    async fn late_subscriber_is_primed_from_prebuffer() {
        let fanout = Fanout::new(OutputProfile::Pcm, 64 * 1024);
        fanout.push(Bytes::from_static(b"early"));
        let mut sub = fanout.subscribe(
            1024,
            SubscribeOptions {
                prime_with_buffer: true,
                label: "late".into(),
            },
        );
        let msg = sub.recv().await.unwrap();
        assert!(matches!(msg, FanoutMessage::Data(ref b) if b.as_ref() == b"early"));
    }

    #[tokio::test]
    async fn slow_subscriber_drops_without_affecting_others() {
        let fanout = Fanout::new(OutputProfile::Mp3, 64 * 1024);
        let mut slow = fanout.subscribe(4, SubscribeOptions::default());
        let mut fast = fanout.subscribe(1024, SubscribeOptions::default());

        fanout.push(Bytes::from_static(b"1234"));
        fanout.push(Bytes::from_static(b"5678"));

        assert_eq!(fanout.stats().subscriber_drops, 1);
        let first = slow.recv().await.unwrap();
        assert!(matches!(first, FanoutMessage::Data(ref b) if b.as_ref() == b"1234"));

        let f1 = fast.recv().await.unwrap();
        let f2 = fast.recv().await.unwrap();
        assert!(matches!(f1, FanoutMessage::Data(ref b) if b.as_ref() == b"1234"));
        assert!(matches!(f2, FanoutMessage::Data(ref b) if b.as_ref() == b"5678"));
    }

    #[tokio::test]
    async fn migration_preserves_subscriber_without_reset() {
        let old_fanout = Fanout::new(OutputProfile::Pcm, 64 * 1024);
        let new_fanout = Fanout::new(OutputProfile::Pcm, 64 * 1024);
        let mut sub = old_fanout.subscribe(1024, SubscribeOptions::default());
        let id = sub.id();

        assert!(old_fanout.migrate_subscriber(id, &new_fanout));
        assert_eq!(old_fanout.subscriber_count(), 0);
        assert_eq!(new_fanout.subscriber_count(), 1);

        new_fanout.push(Bytes::from_static(b"post-handoff"));
        let msg = sub.recv().await.unwrap();
        assert!(matches!(msg, FanoutMessage::Data(ref b) if b.as_ref() == b"post-handoff"));
    }

    #[tokio::test]
    async fn end_flushes_and_terminates_subscriber() {
        let fanout = Fanout::new(OutputProfile::Aac, 64 * 1024);
        let mut sub = fanout.subscribe(1024, SubscribeOptions::default());
        fanout.push(Bytes::from_static(b"tail"));
        fanout.end();

        let first = sub.recv().await.unwrap();
        assert!(matches!(first, FanoutMessage::Data(_)));
        let second = sub.recv().await.unwrap();
        assert!(matches!(second, FanoutMessage::End));
    }
}
