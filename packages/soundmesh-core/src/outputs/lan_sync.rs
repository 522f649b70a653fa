//! Group-member LAN driver (sendspin-style, §4.7).
//!
//! Grounded on [`crate::fanout::Fanout`]'s bounded per-subscriber `mpsc`
//! channel idiom: rather than a real WebSocket client, this driver registers
//! a zone's PCM frames with an in-process distribution hub over the same
//! bounded-channel shape the HTTP fanout uses for its subscribers, since the
//! "upstream house-automation controller protocol" wire format is explicitly
//! out of scope.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{SoundMeshError, SoundMeshResult};
use crate::model::{HttpPreferences, HttpProfile, OutputProfile, PreferredOutput};
use crate::outputs::{DriverSession, OutputDriver};

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[derive(Debug, Clone)]
pub struct TimestampedFrame {
    pub wall_clock_ms: u64,
    pub pcm: bytes::Bytes,
}

/// The embedded central audio-distribution hub a `LanSyncDriver` registers
/// against. One hub instance is shared by every zone's LAN-sync driver.
#[derive(Default)]
pub struct LanSyncHub {
    registrations: dashmap::DashMap<String, mpsc::Sender<TimestampedFrame>>,
}

impl LanSyncHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, client_id: &str) -> mpsc::Receiver<TimestampedFrame> {
        let (tx, rx) = mpsc::channel(256);
        self.registrations.insert(client_id.to_string(), tx);
        rx
    }

    /// Pushes one PCM frame, stamped with the current wall clock, to a
    /// registered client. Silently drops if the client has disconnected.
    pub fn push_frame(&self, client_id: &str, pcm: bytes::Bytes) {
        if let Some(tx) = self.registrations.get(client_id) {
            let _ = tx.try_send(TimestampedFrame { wall_clock_ms: now_ms(), pcm });
        }
    }

    fn unregister(&self, client_id: &str) {
        self.registrations.remove(client_id);
    }
}

/// LAN-sync output driver: registers `client_id` with the embedded hub and
/// buffers incoming frames so `get_future_frames` can answer "what's coming
/// in the next `min_future_ms`" for sync-aware scheduling (§4.7).
pub struct LanSyncDriver {
    hub: Arc<LanSyncHub>,
    client_id: String,
    buffer: Mutex<VecDeque<TimestampedFrame>>,
}

impl LanSyncDriver {
    pub fn new(hub: Arc<LanSyncHub>, client_id: String) -> Self {
        let _rx = hub.register(&client_id);
        Self {
            hub,
            client_id,
            buffer: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns buffered frames whose wall-clock timestamp falls within
    /// `min_future_ms` of now, without consuming them — downstream callers
    /// may poll repeatedly as the schedule horizon advances.
    pub fn get_future_frames(&self, min_future_ms: u64) -> Vec<TimestampedFrame> {
        let horizon = now_ms() + min_future_ms;
        self.buffer
            .lock()
            .iter()
            .filter(|frame| frame.wall_clock_ms <= horizon)
            .cloned()
            .collect()
    }

    pub fn ingest(&self, frame: TimestampedFrame) {
        let mut buffer = self.buffer.lock();
        buffer.push_back(frame);
        while buffer.len() > 512 {
            buffer.pop_front();
        }
    }
}

#[async_trait]
impl OutputDriver for LanSyncDriver {
    async fn play(&self, session: &DriverSession) -> SoundMeshResult<()> {
        log::info!("[lan_sync] registering {} for zone {}", self.client_id, session.zone_id);
        Ok(())
    }

    async fn pause(&self) -> SoundMeshResult<()> {
        Ok(())
    }

    async fn resume(&self) -> SoundMeshResult<()> {
        Ok(())
    }

    async fn stop(&self) -> SoundMeshResult<()> {
        self.buffer.lock().clear();
        Ok(())
    }

    async fn set_volume(&self, _volume: u8) -> SoundMeshResult<()> {
        Err(SoundMeshError::RendererFault(format!(
            "lan_sync driver for {} has no local volume control; the hub's member is server-authoritative",
            self.client_id
        )))
    }

    async fn update_metadata(&self, _title: Option<&str>, _artist: Option<&str>, _cover_url: Option<&str>) -> SoundMeshResult<()> {
        Ok(())
    }

    async fn dispose(&self) {
        self.hub.unregister(&self.client_id);
    }

    fn preferred_output(&self) -> PreferredOutput {
        PreferredOutput {
            profile: OutputProfile::Pcm,
            sample_rate: 44_100,
            channels: 2,
        }
    }

    fn http_preferences(&self) -> HttpPreferences {
        HttpPreferences {
            http_profile: HttpProfile::ForcedContentLength,
            icy_enabled: false,
            icy_interval: None,
            icy_name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_future_frames_excludes_frames_past_the_horizon() {
        let hub = Arc::new(LanSyncHub::new());
        let driver = LanSyncDriver::new(hub, "zone-1".into());
        let now = now_ms();
        driver.ingest(TimestampedFrame { wall_clock_ms: now + 10, pcm: bytes::Bytes::new() });
        driver.ingest(TimestampedFrame { wall_clock_ms: now + 10_000, pcm: bytes::Bytes::new() });
        let near = driver.get_future_frames(100);
        assert_eq!(near.len(), 1);
    }

    #[test]
    fn buffer_caps_at_512_frames() {
        let hub = Arc::new(LanSyncHub::new());
        let driver = LanSyncDriver::new(hub, "zone-1".into());
        for _ in 0..600 {
            driver.ingest(TimestampedFrame { wall_clock_ms: now_ms(), pcm: bytes::Bytes::new() });
        }
        assert_eq!(driver.buffer.lock().len(), 512);
    }
}
