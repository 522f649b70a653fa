//! SoundMesh Core - shared library for the SoundMesh zone-audio server.
//!
//! This crate provides the core functionality for SoundMesh, a multi-zone
//! network audio server: resolving playback sources, transcoding them through
//! a supervised ffmpeg pipeline, fanning the encoded bytes out to HTTP
//! subscribers and renderer output drivers, and grouping zones for
//! synchronized playback.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`model`]: Core data types shared across the playback pipeline
//! - [`source_resolver`]: Pure URI → `PlaybackSource` resolution
//! - [`engine`]: Supervised per-zone transcode process management
//! - [`audio_manager`]: Owner of every zone's playback session
//! - [`zone_player`]: Per-zone position ticker and play/pause/stop state machine
//! - [`outputs`]: Protocol-specific renderer output drivers
//! - [`fanout`]: Per-profile subscriber fanout with bounded per-subscriber queues
//! - [`groups`]: Zone group membership, native group joins, and PCM replication for mixed-protocol groups
//! - [`http`]: Stream gateway, synchronized-join gate, and output-stream proxy
//! - [`runtime`]: Task spawning abstraction for async runtime independence
//! - [`events`]: Event system for real-time client communication
//! - [`context`]: Network configuration and URL building
//! - [`state`]: Core application configuration
//! - [`sonos`]: Renderer discovery and SOAP control primitives (UPnP/DLNA/Sonos)
//! - [`stream`]: Audio streaming and transcoding support shared with `engine`
//! - [`bootstrap`]: Composition root wiring every service together
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The crate defines several traits to decouple core logic from platform-specific
//! implementations:
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): Emitting domain events
//! - [`IpDetector`](context::IpDetector): Local IP detection
//!
//! Each trait has a default implementation suitable for the standalone server.

// Allow missing docs for now during migration - will be cleaned up later
#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod artwork;
pub mod audio_manager;
pub mod bootstrap;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod fanout;
pub mod groups;
pub mod http;
mod mdns_advertise;
pub mod model;
pub mod outputs;
pub mod playback_service;
pub mod protocol_constants;
pub mod runtime;
pub mod sonos;
pub mod source_resolver;
pub mod state;
pub mod stream;
pub mod stream_observer;
pub mod utils;
pub mod zone_player;

// Re-export commonly used types at the crate root
pub use artwork::{ArtworkConfig, ArtworkSource};
pub use audio_manager::{AudioManager, ProfileRequirement, ZoneAudioConfig};
pub use bootstrap::{bootstrap_services, bootstrap_services_with_network, BootstrappedServices};
pub use playback_service::PlaybackService;
pub use zone_player::{EndGuard, ZonePlayer};
pub use context::{IpDetector, LocalIpDetector, NetworkContext, NetworkError, UrlBuilder};
pub use engine::{StartOptions, StopReason, TerminationEvent, TranscodeEngine};
pub use error::{ErrorCode, SoundMeshError, SoundMeshResult, TransportError};
pub use events::{
    BroadcastEvent, BroadcastEventBridge, EventEmitter, LatencyEvent, NetworkEvent, NetworkHealth,
    SonosEvent, StreamEvent, TopologyEvent,
};
pub use fanout::{Fanout, FanoutMessage, FanoutStats, FanoutSubscription, SubscribeOptions};
pub use groups::{AudioSyncGroupPayload, GroupCapable, GroupChangeKind, GroupManager, GroupTracker, MixedGroupCoordinator, PipeFanout};
pub use http::{build_router, GatewayState};
pub use model::{
    AudioOutputSettings, EngineOutputSpec, GroupRecord, GroupSource, HttpPreferences, HttpProfile,
    PcmFormat, PlaybackMetadata, PlaybackSession, PlaybackSource, PlaybackState, PreferredOutput,
    ProfileStats, StreamHandle, SubscriberHandle, ZoneId,
};
pub use outputs::{DriverSession, OutputDriver, OutputErrorSink};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use source_resolver::resolve_source;
pub use state::Config;
pub use stream_observer::StreamObserverRegistry;
pub use utils::{now_millis, validate_speaker_ip, IpValidationError};

// Re-export Sonos/DLNA discovery and protocol types
pub use sonos::discovery::Speaker;
pub use sonos::types::{TransportState, ZoneGroup, ZoneGroupMember};
pub use sonos::SonosService;

// Re-export stream types
pub use stream::{AudioCodec, AudioFormat, CleanupOrder, StreamMetadata};

/// Default artwork for zone cover-art display.
///
/// This image is embedded at compile time and served via the `/artwork.jpg`
/// HTTP endpoint when no custom artwork is configured. The [`ArtworkConfig`]
/// resolution chain uses this as the final fallback.
pub static DEFAULT_ARTWORK: &[u8] = include_bytes!("../assets/artwork-template.jpg");
