//! Multi-method Sonos/DLNA renderer discovery: SSDP multicast/broadcast and
//! mDNS, reconciled into a list of candidate hosts for device-description
//! fetch (§4.7 DLNA driver).

pub mod mdns;
pub mod ssdp;
pub mod types;

pub use ssdp::{discover_broadcast, discover_multicast, SsdpConfig};
pub use types::{DiscoveredSpeaker, DiscoveryError, DiscoveryErrorKind, DiscoveryMethod, DiscoveryResult, Speaker};
