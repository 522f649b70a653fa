//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by external specifications (UPnP, SSDP, ICY) or by
//! behavior this server commits to preserving for renderer compatibility;
//! changing them would break protocol compliance or a documented contract.

// ─────────────────────────────────────────────────────────────────────────────
// Application identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used in protocol data (DIDL-Lite metadata, ICY headers).
pub const APP_NAME: &str = "SoundMesh";

/// Service identifier used for discovery/health probes.
pub const SERVICE_ID: &str = "soundmesh";

// ─────────────────────────────────────────────────────────────────────────────
// Audio defaults (§3 AudioOutputSettings process-wide default)
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
pub const DEFAULT_CHANNELS: u16 = 2;
pub const DEFAULT_PCM_BIT_DEPTH: u16 = 16;
pub const DEFAULT_MP3_BITRATE_KBPS: u32 = 192;

/// Default per-profile prebuffer size fed to new subscribers (§4.3).
pub const DEFAULT_PREBUFFER_BYTES: usize = 64 * 1024;

/// Hard upper bound on a single subscriber's queue (§4.3, §8 boundary test).
pub const SUBSCRIBER_QUEUE_MAX_BYTES: usize = 512 * 1024;

/// Default `httpFallbackSeconds` used to size `Content-Length` when duration
/// is unknown and `httpProfile=forced_content_length` (§3, §4.8).
pub const DEFAULT_HTTP_FALLBACK_SECONDS: u64 = 3600;

/// Used to signal an effectively-unbounded `Content-Length` for live/unknown
/// duration PCM/WAV streams some renderers refuse to treat as chunked.
pub const CONTENT_LENGTH_MAX: u64 = u32::MAX as u64;

// ─────────────────────────────────────────────────────────────────────────────
// ICY protocol (Shoutcast/Icecast metadata, §4.8, §6)
// ─────────────────────────────────────────────────────────────────────────────

/// Bytes between in-band ICY metadata blocks.
pub const ICY_METAINT: usize = 8192;

// ─────────────────────────────────────────────────────────────────────────────
// SSDP / UPnP discovery (§4.7)
// ─────────────────────────────────────────────────────────────────────────────

pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250:1900";
/// `MX` value advertised in M-SEARCH requests (§4.7).
pub const SSDP_MX_SECS: u8 = 2;
pub const SSDP_SEARCH_TARGETS: &[&str] = &[
    "urn:schemas-upnp-org:device:MediaRenderer:1",
    "urn:schemas-upnp-org:service:AVTransport:1",
    "ssdp:all",
];

// ─────────────────────────────────────────────────────────────────────────────
// Outbound HTTP timeouts (§5 cancellation and timeouts)
// ─────────────────────────────────────────────────────────────────────────────

pub const SOAP_TIMEOUT_SECS: u64 = 10;
pub const DEVICE_DESCRIPTION_TIMEOUT_SECS: u64 = 5;
pub const PROXY_FETCH_TIMEOUT_SECS: u64 = 30;
pub const PLAYLIST_FETCH_TIMEOUT_SECS: u64 = 10;

/// §4.7 DLNA driver: how long to wait for the gateway to observe the
/// renderer's HTTP GET after a timed-out `SetAVTransportURI` before deciding
/// whether to still issue `Play`.
pub const DLNA_STREAM_OBSERVED_TIMEOUT_SECS: u64 = 12;

/// §4.2 restart policy: exponential backoff cap.
pub const ENGINE_RESTART_BACKOFF_CAP_SECS: u64 = 16;

/// §4.2: default timeout waiting for first bytes on the primary profile when
/// the source is not real-time.
pub const ENGINE_NO_DATA_TIMEOUT_SECS: u64 = 15;

/// §4.6 ZonePlayer: barrier before the position ticker starts regardless of
/// whether the first chunk has arrived.
pub const POSITION_TICKER_START_BARRIER_SECS: u64 = 15;

/// §4.6 ZonePlayer: position ticker cadence.
pub const POSITION_TICKER_INTERVAL_MS: u64 = 1000;

/// §4.5 termination callback: restart delay for a flaky pipe source.
/// Heuristic, preserved verbatim per DESIGN.md's open-question decision.
pub const PIPE_RESTART_DELAY_MS: u64 = 250;

/// §4.8 synchronized-join endpoint: time to wait for `expect` clients.
pub const SYNC_JOIN_TIMEOUT_SECS: u64 = 10;

/// §4.7 Chromecast driver: minimum interval between connect retries.
pub const CHROMECAST_RETRY_COOLDOWN_SECS: u64 = 5;

/// §4.7 AirPlay driver: delay before the flow-pacing buffer is considered
/// "ready" to avoid overwhelming the device on start.
pub const AIRPLAY_READY_GATE_MS: u64 = 150;

/// §4.3 SubscriberFanout drop-log rate limit.
pub const SUBSCRIBER_DROP_LOG_RATE_LIMIT_MS: u64 = 2000;

/// §4.10 OutputStreamProxy playlist fetch cap.
pub const PLAYLIST_FETCH_MAX_BYTES: usize = 1024 * 1024;

/// §4.9 MixedGroupCoordinator: session considered "fresh-start" below this
/// age, preferring `now-startedAt` over `state.time` for local-tap start-at.
pub const MIXED_GROUP_FRESH_START_SECS: u64 = 3;

/// §4.9 applySpecGroupVolume: iteration cap and convergence epsilon.
pub const GROUP_VOLUME_MAX_ITERATIONS: u32 = 10;
pub const GROUP_VOLUME_CONVERGENCE_EPSILON: f64 = 1e-4;
