//! Sonos/DLNA renderer discovery and SOAP control primitives, consumed by
//! the [`crate::outputs`] driver family.
//!
//! # Module structure
//!
//! - `types` - Domain types for zone groups and transport state
//! - `services` - UPnP service definitions (URNs, control paths)
//! - `discovery` - Multi-method speaker discovery (SSDP multicast/broadcast + mDNS)
//! - `soap` - Low-level SOAP envelope building, transport and fault handling
//! - `didl` - DIDL-Lite metadata XML formatting
//! - `utils` - Shared XML/URL string helpers
//!
//! The zone-audio driver model (§4.7) issues SOAP calls directly through
//! `soap`/`services`/`didl` rather than through a GENA-subscription client;
//! there is no persistent per-speaker session object here.

pub mod didl;
pub mod discovery;
pub mod services;
pub mod soap;
pub mod types;
pub mod utils;

pub use services::SonosService;
