//! Per-protocol output drivers (§4.7): DLNA/UPnP, Sonos, AirPlay,
//! Chromecast, the group-member LAN driver and the slave-player driver all
//! implement the same [`OutputDriver`] capability set.
//!
//! Grounded on `sonos/traits.rs`'s trait-abstraction-over-a-renderer shape,
//! generalized from a single Sonos-specific trait bundle (`SonosPlayback` +
//! `SonosTopology` + ...) to one protocol-agnostic trait every driver
//! implements, since §4.7 explicitly requires "the same capability set"
//! across drivers rather than Sonos-specific affordances leaking upward.

pub mod airplay;
pub mod chromecast;
pub mod dlna;
pub mod lan_sync;
pub mod slave_player;
pub mod sonos;

use async_trait::async_trait;

use crate::error::SoundMeshResult;
use crate::model::{HttpPreferences, PreferredOutput};

/// A published playback session as seen by an output driver: the absolute
/// stream URL, display metadata and the zone/session identifiers needed to
/// notify back on failure.
#[derive(Debug, Clone)]
pub struct DriverSession {
    pub zone_id: String,
    pub stream_url: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub cover_url: Option<String>,
}

/// Common capability set every output driver implements (§4.7). Drivers must
/// be re-entrant: a `play` during an active play replaces the current target
/// without surfacing an intermediate error.
#[async_trait]
pub trait OutputDriver: Send + Sync {
    /// Starts or retargets playback to `session`. Re-entrant.
    async fn play(&self, session: &DriverSession) -> SoundMeshResult<()>;

    async fn pause(&self) -> SoundMeshResult<()>;

    async fn resume(&self) -> SoundMeshResult<()>;

    async fn stop(&self) -> SoundMeshResult<()>;

    /// `0..100`.
    async fn set_volume(&self, volume: u8) -> SoundMeshResult<()>;

    /// Pushes updated display metadata without interrupting playback.
    async fn update_metadata(&self, title: Option<&str>, artist: Option<&str>, cover_url: Option<&str>) -> SoundMeshResult<()>;

    /// Releases any held connections/subscriptions. Called once, on removal.
    async fn dispose(&self);

    /// `{profile, sampleRate, channels}` this driver wants the engine to
    /// produce for it.
    fn preferred_output(&self) -> PreferredOutput;

    /// `{httpProfile, icyEnabled, icyInterval?, icyName?}` this driver wants
    /// the HTTP gateway to shape responses with.
    fn http_preferences(&self) -> HttpPreferences;
}

/// Reports a driver-originated playback failure to the zone owner. Grounded
/// on the `notifyOutputError(zoneId, reason)` callback named in §4.7; routed
/// through the same [`crate::events::EventEmitter::emit_zone`] seam
/// `audio_manager.rs` uses for engine-originated errors, rather than a
/// second bespoke callback type.
pub trait OutputErrorSink: Send + Sync {
    fn notify_output_error(&self, zone_id: &str, reason: &str);
}

impl<T: crate::events::EventEmitter> OutputErrorSink for T {
    fn notify_output_error(&self, zone_id: &str, reason: &str) {
        self.emit_zone(crate::events::ZoneEvent::Error {
            zone_id: zone_id.to_string(),
            reason: reason.to_string(),
            timestamp: crate::utils::now_millis(),
        });
    }
}
