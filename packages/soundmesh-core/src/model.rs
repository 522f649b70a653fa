//! Core data model shared across the playback pipeline (§3).
//!
//! These types carry no behavior beyond small validated constructors and
//! equivalence checks; the components in this crate own the state machines
//! that mutate them.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol_constants::{
    DEFAULT_CHANNELS, DEFAULT_HTTP_FALLBACK_SECONDS, DEFAULT_MP3_BITRATE_KBPS,
    DEFAULT_PCM_BIT_DEPTH, DEFAULT_PREBUFFER_BYTES, DEFAULT_SAMPLE_RATE,
};

/// A unique identifier for a configured playback zone.
pub type ZoneId = String;

/// PCM sample encoding for `pipe` sources (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PcmFormat {
    S16le,
    S24le,
    S32le,
}

/// Tagged variant mapping to exactly one input kind (§3 invariant: exactly
/// one variant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaybackSource {
    File {
        path: String,
        #[serde(default)]
        r#loop: bool,
        #[serde(default)]
        pad_tail_sec: f64,
        #[serde(default)]
        pre_delay_ms: u64,
        #[serde(default)]
        start_at_sec: f64,
        #[serde(default)]
        real_time: bool,
    },
    Url {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        decryption_key: Option<String>,
        #[serde(default = "default_true")]
        tls_verify_host: bool,
        #[serde(default)]
        input_format: Option<String>,
        #[serde(default)]
        start_at_sec: f64,
        #[serde(default)]
        real_time: bool,
        #[serde(default)]
        low_latency: bool,
        #[serde(default)]
        restart_on_failure: bool,
    },
    Pipe {
        /// Opaque identity token of the underlying stream. Two `Pipe` sources
        /// are "the same source" (§4.5 reuse-vs-restart) iff this matches.
        stream_id: String,
        format: PcmFormat,
        sample_rate: u32,
        channels: u16,
        #[serde(default)]
        real_time: bool,
    },
}

fn default_true() -> bool {
    true
}

impl PlaybackSource {
    /// Validates the §3 invariants that are not already enforced by the type
    /// system (`startAtSec >= 0`; pipe `sampleRate>0, channels in {1,2}`).
    pub fn validate(&self) -> Result<(), String> {
        match self {
            PlaybackSource::File { start_at_sec, .. } | PlaybackSource::Url { start_at_sec, .. } => {
                if *start_at_sec < 0.0 {
                    return Err("startAtSec must be >= 0".into());
                }
                Ok(())
            }
            PlaybackSource::Pipe {
                sample_rate,
                channels,
                ..
            } => {
                if *sample_rate == 0 {
                    return Err("pipe sampleRate must be > 0".into());
                }
                if *channels != 1 && *channels != 2 {
                    return Err("pipe channels must be 1 or 2".into());
                }
                Ok(())
            }
        }
    }

    /// §4.5 source equivalence used to decide reuse vs restart.
    pub fn is_equivalent_to(&self, other: &PlaybackSource) -> bool {
        match (self, other) {
            (
                PlaybackSource::File {
                    path: p1,
                    real_time: r1,
                    start_at_sec: s1,
                    ..
                },
                PlaybackSource::File {
                    path: p2,
                    real_time: r2,
                    start_at_sec: s2,
                    ..
                },
            ) => p1 == p2 && r1 == r2 && s1 == s2,
            (
                PlaybackSource::Url {
                    url: u1,
                    headers: h1,
                    decryption_key: k1,
                    input_format: f1,
                    tls_verify_host: t1,
                    start_at_sec: s1,
                    ..
                },
                PlaybackSource::Url {
                    url: u2,
                    headers: h2,
                    decryption_key: k2,
                    input_format: f2,
                    tls_verify_host: t2,
                    start_at_sec: s2,
                    ..
                },
            ) => u1 == u2 && h1 == h2 && k1 == k2 && f1 == f2 && t1 == t2 && s1 == s2,
            (
                PlaybackSource::Pipe { stream_id: i1, .. },
                PlaybackSource::Pipe { stream_id: i2, .. },
            ) => i1 == i2,
            _ => false,
        }
    }

    pub fn is_radio(&self) -> bool {
        matches!(self, PlaybackSource::Url { real_time: true, .. })
    }

    pub fn start_at_sec(&self) -> f64 {
        match self {
            PlaybackSource::File { start_at_sec, .. } | PlaybackSource::Url { start_at_sec, .. } => {
                *start_at_sec
            }
            PlaybackSource::Pipe { .. } => 0.0,
        }
    }
}

/// The encoded form the engine is asked to produce (§3, glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputProfile {
    Mp3,
    Aac,
    Pcm,
}

impl OutputProfile {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputProfile::Mp3 => "mp3",
            OutputProfile::Aac => "aac",
            OutputProfile::Pcm => "wav",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputProfile::Mp3 => "audio/mpeg",
            OutputProfile::Aac => "audio/aac",
            OutputProfile::Pcm => "audio/wav",
        }
    }

    pub fn is_compressed(&self) -> bool {
        !matches!(self, OutputProfile::Pcm)
    }
}

/// One of `chunked` or `forced_content_length` (§3, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpProfile {
    Chunked,
    ForcedContentLength,
}

/// Process-wide default, overridden per zone (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioOutputSettings {
    pub sample_rate: u32,
    pub channels: u16,
    pub pcm_bit_depth: u16,
    pub mp3_bitrate_kbps: u32,
    pub prebuffer_bytes: usize,
    pub http_profile: HttpProfile,
    pub http_icy_enabled: bool,
    pub http_icy_interval: usize,
    pub http_icy_name: String,
    pub http_fallback_seconds: u64,
}

impl Default for AudioOutputSettings {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            pcm_bit_depth: DEFAULT_PCM_BIT_DEPTH,
            mp3_bitrate_kbps: DEFAULT_MP3_BITRATE_KBPS,
            prebuffer_bytes: DEFAULT_PREBUFFER_BYTES,
            http_profile: HttpProfile::Chunked,
            http_icy_enabled: false,
            http_icy_interval: crate::protocol_constants::ICY_METAINT,
            http_icy_name: crate::protocol_constants::APP_NAME.to_string(),
            http_fallback_seconds: DEFAULT_HTTP_FALLBACK_SECONDS,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// `{id, url, coverUrl, createdAt}` (§3). A fresh `StreamHandle` is generated
/// on every engine (re)start so stale renderer URLs 404.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamHandle {
    pub id: String,
    pub url: String,
    pub cover_url: String,
    pub created_at: u64,
}

impl StreamHandle {
    pub fn new(zone_id: &ZoneId, profile: OutputProfile) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            url: format!("/streams/{zone_id}/{id}.{}", profile.extension()),
            cover_url: format!("/streams/{zone_id}/{id}/cover"),
            id,
            created_at: now_millis(),
        }
    }
}

/// `{title, artist, album, coverurl, duration, isRadio, audiopath, trackId,
/// station, stationIndex, queue, queueIndex}` (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaybackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub coverurl: Option<String>,
    /// Seconds; `0` means unknown duration.
    pub duration: f64,
    pub is_radio: bool,
    pub audiopath: Option<String>,
    pub track_id: Option<String>,
    pub station: Option<String>,
    pub station_index: Option<u32>,
    pub queue: Vec<String>,
    pub queue_index: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
}

/// Per zone, owned exclusively by AudioManager (§3).
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    pub zone_id: ZoneId,
    pub source_label: String,
    pub metadata: PlaybackMetadata,
    pub stream: Option<StreamHandle>,
    pub pcm_stream: Option<StreamHandle>,
    pub state: PlaybackState,
    pub elapsed: f64,
    pub duration: f64,
    pub started_at: u64,
    pub updated_at: u64,
    pub playback_source: PlaybackSource,
    pub cover: Option<Vec<u8>>,
    pub profiles: Vec<OutputProfile>,
    pub output_settings: AudioOutputSettings,
}

impl PlaybackSession {
    pub fn new(
        zone_id: ZoneId,
        source_label: String,
        playback_source: PlaybackSource,
        profiles: Vec<OutputProfile>,
        output_settings: AudioOutputSettings,
    ) -> Self {
        let now = now_millis();
        let duration = 0.0;
        Self {
            zone_id,
            source_label,
            metadata: PlaybackMetadata::default(),
            stream: None,
            pcm_stream: None,
            state: PlaybackState::Stopped,
            elapsed: playback_source.start_at_sec(),
            duration,
            started_at: now,
            updated_at: now,
            playback_source,
            cover: None,
            profiles,
            output_settings,
        }
    }

    /// §8 invariant: `elapsed <= duration + endGuard` when `duration>0`.
    pub fn within_duration_guard(&self, end_guard_sec: f64) -> bool {
        self.duration <= 0.0 || self.elapsed <= self.duration + end_guard_sec
    }

    /// Re-bases `started_at` so that `now - started_at == elapsed * 1000`,
    /// used on resume (§4.5).
    pub fn rebase_started_at(&mut self, now_ms: u64) {
        let elapsed_ms = (self.elapsed * 1000.0) as u64;
        self.started_at = now_ms.saturating_sub(elapsed_ms);
    }
}

/// Per-profile delivery statistics surfaced by `getSessionStats` (§4.2).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileStats {
    pub bytes: u64,
    pub bps: f64,
    pub subscribers: usize,
    pub subscriber_drops: u64,
    pub restarts: u32,
    pub last_error: Option<String>,
    pub last_exit_code: Option<i32>,
}

/// Owned by PlaybackService (§3).
#[derive(Debug, Clone)]
pub struct EngineOutputSpec {
    pub profile: OutputProfile,
    pub sample_rate: u32,
    pub channels: u16,
    pub pcm_bit_depth: u16,
    pub mp3_bitrate_kbps: u32,
}

/// `{id, profile, primeWithBuffer, label, queue(bounded), lastDropAt}` (§3).
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    pub id: u64,
    pub profile: OutputProfile,
    pub prime_with_buffer: bool,
    pub label: String,
    pub last_drop_at: Option<u64>,
    pub drops: u64,
}

/// `{leader, members, backend, externalId?, source, updatedAt}` (§3).
/// Invariants enforced by `GroupTracker::upsert_group` in `groups::tracker`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub leader: ZoneId,
    pub members: Vec<ZoneId>,
    pub backend: String,
    pub external_id: Option<String>,
    pub source: GroupSource,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupSource {
    Manual,
    Backend,
}

impl GroupRecord {
    /// §3/§8 invariant check: `leader ∈ members`, members unique.
    pub fn is_valid(&self) -> bool {
        if !self.members.contains(&self.leader) {
            return false;
        }
        let mut seen = std::collections::HashSet::new();
        self.members.iter().all(|m| seen.insert(m))
    }
}

/// `{profile, sampleRate, channels}` advertised by every output driver
/// (§4.7).
#[derive(Debug, Clone, Copy)]
pub struct PreferredOutput {
    pub profile: OutputProfile,
    pub sample_rate: u32,
    pub channels: u16,
}

/// `{httpProfile, icyEnabled, icyInterval?, icyName?}` advertised by every
/// output driver (§4.7).
#[derive(Debug, Clone)]
pub struct HttpPreferences {
    pub http_profile: HttpProfile,
    pub icy_enabled: bool,
    pub icy_interval: Option<usize>,
    pub icy_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_source_requires_valid_channels() {
        let src = PlaybackSource::Pipe {
            stream_id: "s1".into(),
            format: PcmFormat::S16le,
            sample_rate: 48000,
            channels: 3,
            real_time: true,
        };
        assert!(src.validate().is_err());
    }

    #[test]
    fn negative_start_at_is_invalid() {
        let src = PlaybackSource::File {
            path: "a.flac".into(),
            r#loop: false,
            pad_tail_sec: 0.0,
            pre_delay_ms: 0,
            start_at_sec: -1.0,
            real_time: false,
        };
        assert!(src.validate().is_err());
    }

    #[test]
    fn url_equivalence_ignores_unrelated_fields() {
        let a = PlaybackSource::Url {
            url: "http://x/y".into(),
            headers: HashMap::new(),
            decryption_key: None,
            tls_verify_host: true,
            input_format: None,
            start_at_sec: 10.0,
            real_time: false,
            low_latency: true,
            restart_on_failure: false,
        };
        let mut b = a.clone();
        if let PlaybackSource::Url { low_latency, .. } = &mut b {
            *low_latency = false;
        }
        assert!(a.is_equivalent_to(&b));
    }

    #[test]
    fn group_record_rejects_leader_not_in_members() {
        let g = GroupRecord {
            leader: "z1".into(),
            members: vec!["z2".into()],
            backend: "dlna".into(),
            external_id: None,
            source: GroupSource::Manual,
            updated_at: 0,
        };
        assert!(!g.is_valid());
    }
}
