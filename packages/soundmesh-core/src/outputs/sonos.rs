//! Sonos output driver (§4.7): extends [`super::dlna::DlnaDriver`]'s
//! AVTransport/RenderingControl behavior with Sonos group-join semantics.
//!
//! Grounded on `sonos::client.rs`'s `join_group`/`leave_group` SOAP action
//! shape (`SetAVTransportURI` with an `x-rincon:<UDN>` URI for S1 groups),
//! adapted onto `outputs::dlna`'s controlURL-resolved SOAP transport instead
//! of the teacher's fixed-port-1400 Sonos-only one, since every Sonos unit
//! is itself a DLNA AVTransport renderer underneath.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::SoundMeshResult;
use crate::model::{HttpPreferences, PreferredOutput};
use crate::outputs::dlna::{post_soap, RendererEndpoints};
use crate::outputs::{DriverSession, OutputDriver};
use crate::stream_observer::StreamObserverRegistry;

const AV_TRANSPORT_URN: &str = "urn:schemas-upnp-org:service:AVTransport:1";

/// Distinguishes S1 (SetAVTransportURI join) from S2 (dedicated group
/// control client) Sonos generations, per §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SonosGeneration {
    S1,
    S2,
}

/// Sonos output driver: delegates transport/volume control to the same
/// AVTransport/RenderingControl SOAP actions as [`super::dlna::DlnaDriver`],
/// and additionally knows how to join/leave a Sonos group.
pub struct SonosDriver {
    inner: super::dlna::DlnaDriver,
    client: Client,
    endpoints: RendererEndpoints,
    generation: SonosGeneration,
    /// RINCON UUID, resolved from `device_description.xml` or, failing
    /// that, `/status/zp` (§4.7).
    udn: String,
}

impl SonosDriver {
    pub fn new(
        client: Client,
        endpoints: RendererEndpoints,
        observer: Arc<StreamObserverRegistry>,
        generation: SonosGeneration,
        udn: String,
    ) -> Self {
        Self {
            inner: super::dlna::DlnaDriver::new(client.clone(), endpoints.clone(), observer),
            client,
            endpoints,
            generation,
            udn,
        }
    }

    /// Joins a group led by `coordinator_udn`. S1 groups join by pointing
    /// this unit's AVTransport at `x-rincon:<UDN>`; S2 groups use a
    /// dedicated group-control client this driver does not itself own (the
    /// caller is expected to route S2 joins through that client instead).
    pub async fn join_group(&self, coordinator_udn: &str) -> SoundMeshResult<()> {
        match self.generation {
            SonosGeneration::S1 => {
                let uri = format!("x-rincon:{coordinator_udn}");
                post_soap(
                    &self.client,
                    &self.endpoints.av_transport_control_url,
                    AV_TRANSPORT_URN,
                    "SetAVTransportURI",
                    &[("InstanceID", "0"), ("CurrentURI", &uri), ("CurrentURIMetaData", "")],
                    true,
                )
                .await
                .map(|_| ())
            }
            SonosGeneration::S2 => {
                log::warn!("[sonos] S2 group join requested for {}; route through the S2 client", self.udn);
                Ok(())
            }
        }
    }

    /// Leaves the current group, switching this unit back to standalone
    /// AVTransport control of its own queue.
    pub async fn leave_group(&self) -> SoundMeshResult<()> {
        if self.generation == SonosGeneration::S1 {
            let uri = format!("x-rincon-queue:{}#0", self.udn);
            post_soap(
                &self.client,
                &self.endpoints.av_transport_control_url,
                AV_TRANSPORT_URN,
                "SetAVTransportURI",
                &[("InstanceID", "0"), ("CurrentURI", &uri), ("CurrentURIMetaData", "")],
                true,
            )
            .await
            .map(|_| ())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl OutputDriver for SonosDriver {
    async fn play(&self, session: &DriverSession) -> SoundMeshResult<()> {
        self.inner.play(session).await
    }

    async fn pause(&self) -> SoundMeshResult<()> {
        self.inner.pause().await
    }

    async fn resume(&self) -> SoundMeshResult<()> {
        self.inner.resume().await
    }

    async fn stop(&self) -> SoundMeshResult<()> {
        self.inner.stop().await
    }

    async fn set_volume(&self, volume: u8) -> SoundMeshResult<()> {
        self.inner.set_volume(volume).await
    }

    async fn update_metadata(&self, title: Option<&str>, artist: Option<&str>, cover_url: Option<&str>) -> SoundMeshResult<()> {
        self.inner.update_metadata(title, artist, cover_url).await
    }

    async fn dispose(&self) {
        self.inner.dispose().await
    }

    fn preferred_output(&self) -> PreferredOutput {
        self.inner.preferred_output()
    }

    fn http_preferences(&self) -> HttpPreferences {
        self.inner.http_preferences()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_join_uri_uses_x_rincon_scheme() {
        let uri = format!("x-rincon:{}", "RINCON_000E5812345601400");
        assert!(uri.starts_with("x-rincon:RINCON_"));
    }
}
