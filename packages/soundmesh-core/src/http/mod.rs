//! Outward-facing HTTP surface: the `/streams/...` stream gateway (§4.8),
//! its synchronized-join gate, and the output-stream proxy (§4.10).
//!
//! Grounded on the teacher's `api/http.rs::create_router` for route layout
//! and its convention of a single `Clone`-able state struct threaded through
//! every handler via axum's `State` extractor.

pub mod gateway;
pub mod proxy;
pub mod sync_join;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::artwork::ArtworkSource;
use crate::audio_manager::AudioManager;
use crate::bootstrap::BootstrappedServices;
use crate::context::NetworkContext;
use crate::engine::TranscodeEngine;
use crate::stream_observer::StreamObserverRegistry;
use sync_join::SyncJoinRegistry;

/// Shared state for every handler in this module. Cheap to clone: every
/// field is either an `Arc` or, for [`NetworkContext`], already internally
/// `Arc`-backed.
#[derive(Clone)]
pub struct GatewayState {
    pub audio_manager: Arc<AudioManager>,
    pub engine: Arc<TranscodeEngine>,
    pub stream_observer: Arc<StreamObserverRegistry>,
    pub artwork: ArtworkSource,
    pub sync_joins: Arc<SyncJoinRegistry>,
    pub network: NetworkContext,
    pub http_client: reqwest::Client,
}

impl GatewayState {
    /// Builds gateway state from the services a [`BootstrappedServices`]
    /// already holds, adding only the `reqwest::Client` the proxy handler
    /// needs for outbound fetches.
    #[must_use]
    pub fn from_services(services: &BootstrappedServices) -> Self {
        Self {
            audio_manager: Arc::clone(&services.audio_manager),
            engine: Arc::clone(&services.engine),
            stream_observer: Arc::clone(&services.stream_observer),
            artwork: services.artwork.clone(),
            sync_joins: Arc::clone(&services.sync_joins),
            network: services.network.clone(),
            http_client: reqwest::Client::new(),
        }
    }
}

/// Assembles the stream gateway and proxy router (§4.8, §4.10). The caller
/// merges this into the application's outer router alongside the
/// REST/WebSocket API surface. `proxy::proxy_handler` extracts
/// `ConnectInfo<SocketAddr>`, so the binary must serve the final merged
/// router with `into_make_service_with_connect_info::<SocketAddr>()` rather
/// than plain `into_make_service()`.
#[must_use]
pub fn build_router(services: &BootstrappedServices) -> Router {
    Router::new()
        .route("/streams/proxy", get(proxy::proxy_handler))
        .route("/streams/{zone_id}/{stream_id_and_ext}", get(gateway::stream_handler))
        .route("/streams/{zone_id}/{stream_id}/cover", get(gateway::cover_handler))
        .with_state(GatewayState::from_services(services))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Config;

    #[tokio::test]
    async fn build_router_accepts_bootstrapped_services() {
        let config = Config::default();
        let network = NetworkContext::explicit(0, "127.0.0.1".parse().unwrap());
        let services = crate::bootstrap::bootstrap_services_with_network(&config, Some(network)).unwrap();
        let _router = build_router(&services);
    }
}
