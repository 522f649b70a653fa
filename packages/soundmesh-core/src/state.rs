//! Process-wide configuration.
//!
//! Grounded on the teacher's `state.rs` validated-defaults convention; the
//! Sonos-topology-specific runtime state (`SonosState`, `ManualSpeakerConfig`)
//! that used to live here is superseded by [`crate::groups::tracker::GroupTracker`],
//! which owns group membership for every backend rather than one persisted
//! per-IP cache.

use serde::{Deserialize, Serialize};

/// Top-level server configuration, loaded once at startup and handed to
/// [`crate::bootstrap::bootstrap_services`].
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// HTTP bind port (0 = auto-allocate).
    pub bind_port: u16,

    /// LAN IP advertised in stream URLs and mDNS records; auto-detected when
    /// `None`.
    pub advertise_ip: Option<String>,

    /// Interval for refreshing renderer topology (seconds).
    pub topology_refresh_interval: u64,

    /// Enable SSDP multicast discovery.
    pub discovery_ssdp_multicast: bool,

    /// Enable SSDP broadcast discovery (for networks that block multicast).
    pub discovery_ssdp_broadcast: bool,

    /// Enable mDNS/Bonjour discovery (AirPlay, Chromecast, Sonos).
    pub discovery_mdns: bool,

    /// mDNS browse timeout (milliseconds).
    pub mdns_browse_timeout_ms: u64,

    /// ffmpeg binary name or absolute path.
    pub ffmpeg_binary_path: String,

    /// Directory for persisted data (custom artwork, manual renderer list).
    pub data_dir: std::path::PathBuf,

    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,

    /// §4.6 per-zone default: seconds added to `duration` before `ended`
    /// fires, absorbing encoder trailing bytes.
    pub zone_end_guard_sec: f64,

    /// Process-wide default output shape, overridden per zone.
    #[serde(default)]
    pub default_output_settings: crate::model::AudioOutputSettings,

    /// External URL for hosted artwork; see [`crate::artwork::ArtworkConfig`].
    pub artwork_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_port: 0,
            advertise_ip: None,
            topology_refresh_interval: 30,
            discovery_ssdp_multicast: true,
            discovery_ssdp_broadcast: true,
            discovery_mdns: true,
            mdns_browse_timeout_ms: 2000,
            ffmpeg_binary_path: "ffmpeg".to_string(),
            data_dir: std::path::PathBuf::from("."),
            event_channel_capacity: 256,
            zone_end_guard_sec: 0.0,
            default_output_settings: crate::model::AudioOutputSettings::default(),
            artwork_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_is_sensible() {
        let config = Config::default();
        assert_eq!(config.bind_port, 0);
        assert!(config.discovery_ssdp_multicast);
        assert!(config.discovery_mdns);
        assert_eq!(config.ffmpeg_binary_path, "ffmpeg");
    }
}
