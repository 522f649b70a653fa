//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::artwork::{ArtworkConfig, ArtworkSource};
use crate::audio_manager::{AudioManager, ZoneAudioConfig};
use crate::context::{IpDetector, LocalIpDetector, NetworkContext};
use crate::engine::TranscodeEngine;
use crate::error::{SoundMeshError, SoundMeshResult};
use crate::events::{BroadcastEventBridge, EventEmitter};
use crate::http::sync_join::SyncJoinRegistry;
use crate::outputs::dlna::DeviceDescriptionCache;
use crate::outputs::lan_sync::LanSyncHub;
use crate::outputs::slave_player::SlavePlayerRegistry;
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::state::Config;
use crate::stream_observer::StreamObserverRegistry;

/// Container for all bootstrapped services, the single handle
/// [`crate::http::build_router`] and the binary entry point pass around
/// instead of threading a dozen `Arc`s individually.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Owner of every zone's playback session.
    pub audio_manager: Arc<AudioManager>,
    /// Per-zone transcode process supervisor, shared so `MixedGroupCoordinator`
    /// can subscribe to a mixed-group leader's existing PCM fanout.
    pub engine: Arc<TranscodeEngine>,
    /// Network configuration (bind port, advertise IP).
    pub network: NetworkContext,
    /// Event bridge feeding the WebSocket/SSE transport.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Tracks which published streams a renderer has actually fetched.
    pub stream_observer: Arc<StreamObserverRegistry>,
    /// Per-host cached `controlURL`s for plain DLNA/Sonos renderers.
    pub device_cache: Arc<DeviceDescriptionCache>,
    /// Shared distribution hub for the LAN-sync output driver.
    pub lan_sync_hub: Arc<LanSyncHub>,
    /// Registry of announced slave-player subprocesses.
    pub slave_registry: Arc<SlavePlayerRegistry>,
    /// Resolved fallback artwork served by the stream gateway's cover
    /// endpoint when a zone has no per-track cover of its own.
    pub artwork: ArtworkSource,
    /// Pending synchronized-start rendezvous for multi-renderer joins.
    pub sync_joins: Arc<SyncJoinRegistry>,
    /// Task spawner for background operations.
    pub spawner: Arc<dyn TaskSpawner>,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
    /// The configuration this instance was bootstrapped from.
    pub config: Config,
}

impl BootstrappedServices {
    /// Initiates graceful shutdown of all services.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        self.cancel_token.cancel();

        for zone_id in self.audio_manager.zone_ids() {
            if let Err(err) = self.audio_manager.stop(&zone_id).await {
                log::warn!("[Bootstrap] Failed to stop zone {zone_id} during shutdown: {err}");
            }
        }

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Bootstraps all application services with their dependencies.
///
/// This is the composition root where all services are instantiated and
/// wired together. The wiring order matters - services are created in
/// dependency order:
///
/// 1. Shared infrastructure (event bridge, cancellation token, task spawner)
/// 2. Network context (explicit bind config, or auto-detected LAN IP)
/// 3. Transcode engine + its termination-event channel
/// 4. `AudioManager` on top of the engine
/// 5. Shared renderer-driver caches (device descriptions, LAN-sync hub,
///    slave-player registry, stream observer)
///
/// # Errors
///
/// Returns an error if local IP auto-detection fails in auto-detect mode.
pub fn bootstrap_services(config: &Config) -> SoundMeshResult<BootstrappedServices> {
    bootstrap_services_with_network(config, None)
}

/// Same as [`bootstrap_services`], but accepts a pre-built [`NetworkContext`]
/// (explicit bind port/IP) instead of auto-detecting the local IP. Used by
/// the standalone server when `advertise_ip` is set in configuration.
pub fn bootstrap_services_with_network(
    config: &Config,
    network: Option<NetworkContext>,
) -> SoundMeshResult<BootstrappedServices> {
    let event_bridge = Arc::new(BroadcastEventBridge::new(config.event_channel_capacity));
    let cancel_token = CancellationToken::new();
    let spawner: Arc<dyn TaskSpawner> = Arc::new(TokioSpawner::current());

    let network = match network {
        Some(network) => network,
        None => {
            let ip_detector: Arc<dyn IpDetector> = LocalIpDetector::arc();
            NetworkContext::auto_detect(config.bind_port, ip_detector)
                .map_err(|e| SoundMeshError::Network(e.to_string()))?
        }
    };

    let (termination_tx, termination_rx) = mpsc::channel(config.event_channel_capacity);
    let engine = Arc::new(TranscodeEngine::new(termination_tx, spawner.clone()));

    let audio_manager = Arc::new(AudioManager::new(
        Arc::clone(&engine),
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        spawner.clone(),
        ZoneAudioConfig {
            binary_path: config.ffmpeg_binary_path.clone(),
            end_guard_sec: config.zone_end_guard_sec,
        },
    ));

    spawner.spawn(Box::pin({
        let audio_manager = Arc::clone(&audio_manager);
        async move {
            audio_manager.run_termination_loop(termination_rx).await;
        }
    }));

    Ok(BootstrappedServices {
        audio_manager,
        engine,
        network,
        event_bridge,
        stream_observer: Arc::new(StreamObserverRegistry::new()),
        device_cache: Arc::new(DeviceDescriptionCache::new()),
        lan_sync_hub: Arc::new(LanSyncHub::new()),
        slave_registry: Arc::new(SlavePlayerRegistry::new()),
        artwork: ArtworkConfig::new(config.artwork_url.clone(), Some(config.data_dir.clone())).resolve(),
        sync_joins: Arc::new(SyncJoinRegistry::new()),
        spawner,
        cancel_token,
        config: config.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_wires_services_with_explicit_network() {
        let config = Config::default();
        let network = NetworkContext::explicit(49400, "127.0.0.1".parse().unwrap());
        let services = bootstrap_services_with_network(&config, Some(network)).unwrap();
        assert_eq!(services.network.get_port(), 49400);
        assert!(!services.cancel_token.is_cancelled());
    }

    #[tokio::test]
    async fn shutdown_cancels_token() {
        let config = Config::default();
        let network = NetworkContext::explicit(0, "127.0.0.1".parse().unwrap());
        let services = bootstrap_services_with_network(&config, Some(network)).unwrap();
        services.shutdown().await;
        assert!(services.cancel_token.is_cancelled());
    }
}
