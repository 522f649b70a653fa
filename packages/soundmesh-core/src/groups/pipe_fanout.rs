//! PipeFanout (§4.9): writes a leader's PCM tap into per-member named pipes.
//!
//! The input-side counterpart to [`crate::engine::process`]'s output fifos —
//! that module's `default_pipe_dir` doc comment names this module as the
//! intended writer of the `in-<streamId>` convention. Grounded on
//! `fanout.rs`'s per-subscriber byte-bounded queue and drop-on-overflow
//! policy, adapted from "many readers of one broadcaster" to "one writer
//! task per opened named pipe", since each mixed-group member's own engine
//! session is the only reader of its pipe.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::engine::process;
use crate::protocol_constants::{SUBSCRIBER_DROP_LOG_RATE_LIMIT_MS, SUBSCRIBER_QUEUE_MAX_BYTES};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Channel depth in messages; [`SUBSCRIBER_QUEUE_MAX_BYTES`] is the binding
/// constraint via `queued_bytes`, this is only a backstop.
const PIPE_CHANNEL_DEPTH: usize = 256;

struct PipeHandle {
    tx: mpsc::Sender<Bytes>,
    queued_bytes: AtomicUsize,
    last_log_at_ms: AtomicU64,
}

/// Owns one opened named pipe per registered `stream_id`, feeding it from a
/// bounded in-memory queue so a member whose engine session is slow to start
/// reading doesn't stall the leader's tap (§4.9: "slow members are dropped").
pub struct PipeFanout {
    pipe_dir: PathBuf,
    pipes: DashMap<String, Arc<PipeHandle>>,
}

impl PipeFanout {
    pub fn new(pipe_dir: PathBuf) -> Self {
        Self {
            pipe_dir,
            pipes: DashMap::new(),
        }
    }

    /// Creates (if needed) the named pipe for `stream_id` and spawns the task
    /// that drains the bounded queue into it. Opening a FIFO for write blocks
    /// until a reader opens the other end, which here is ffmpeg's own
    /// blocking open on `-i <fifo>` for the member's `pipe` source.
    pub async fn open(&self, stream_id: String) -> std::io::Result<()> {
        let path = process::input_pipe_path(&self.pipe_dir, &stream_id);
        process::ensure_fifo(&path).await?;

        let (tx, mut rx) = mpsc::channel::<Bytes>(PIPE_CHANNEL_DEPTH);
        let handle = Arc::new(PipeHandle {
            tx,
            queued_bytes: AtomicUsize::new(0),
            last_log_at_ms: AtomicU64::new(0),
        });
        self.pipes.insert(stream_id.clone(), handle.clone());

        tokio::spawn(async move {
            let mut file = match tokio::fs::OpenOptions::new().write(true).open(&path).await {
                Ok(file) => file,
                Err(e) => {
                    log::warn!("pipe_fanout: failed to open input pipe {}: {e}", path.display());
                    return;
                }
            };
            while let Some(chunk) = rx.recv().await {
                handle.queued_bytes.fetch_sub(
                    chunk.len().min(handle.queued_bytes.load(Ordering::Relaxed)),
                    Ordering::Relaxed,
                );
                if file.write_all(&chunk).await.is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    /// Queues `chunk` for `stream_id`'s writer task, dropping it (rate-limited
    /// log) once the unwritten backlog exceeds [`SUBSCRIBER_QUEUE_MAX_BYTES`]
    /// instead of blocking the leader's tap on a slow member.
    pub async fn feed(&self, stream_id: &str, chunk: Bytes) {
        let Some(handle) = self.pipes.get(stream_id).map(|e| e.clone()) else {
            return;
        };
        let queued = handle.queued_bytes.load(Ordering::Relaxed);
        if queued + chunk.len() > SUBSCRIBER_QUEUE_MAX_BYTES {
            let now = now_ms();
            let last = handle.last_log_at_ms.load(Ordering::Relaxed);
            if now.saturating_sub(last) >= SUBSCRIBER_DROP_LOG_RATE_LIMIT_MS {
                handle.last_log_at_ms.store(now, Ordering::Relaxed);
                log::debug!("pipe_fanout[{stream_id}]: dropping chunk, backlog {queued} bytes");
            }
            return;
        }
        handle.queued_bytes.fetch_add(chunk.len(), Ordering::Relaxed);
        let _ = handle.tx.try_send(chunk);
    }

    pub async fn close(&self, stream_id: &str) {
        self.pipes.remove(stream_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn feed_is_noop_for_unregistered_stream() {
        let fanout = PipeFanout::new(std::env::temp_dir().join("soundmesh-pipe-fanout-test"));
        fanout.feed("missing", Bytes::from_static(b"x")).await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let fanout = PipeFanout::new(std::env::temp_dir().join("soundmesh-pipe-fanout-test"));
        fanout.close("never-opened").await;
        fanout.close("never-opened").await;
    }
}
