//! DLNA/UPnP (AVTransport) output driver (§4.7).
//!
//! Discovery is grounded on `sonos::discovery::ssdp::discover_multicast`;
//! playback/volume commands are grounded on `sonos::soap`'s envelope
//! builder and `sonos::didl::format_didl_lite`'s metadata shape, generalized
//! from Sonos-only endpoints (hardcoded port 1400, `/MediaRenderer/...`
//! paths) to `controlURL`s resolved from each renderer's own device
//! description, since plain DLNA renderers don't share Sonos's fixed layout.

use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use reqwest::Client;

use crate::error::{SoundMeshError, SoundMeshResult};
use crate::model::{HttpPreferences, HttpProfile, PreferredOutput};
use crate::outputs::{DriverSession, OutputDriver};
use crate::protocol_constants::{DLNA_STREAM_OBSERVED_TIMEOUT_SECS, DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE};
use crate::sonos::didl::format_didl_lite;
use crate::sonos::discovery::{discover_multicast, DiscoveryError, SsdpConfig};
use crate::sonos::soap::SoapError;
use crate::stream::{AudioCodec, AudioFormat, StreamMetadata};
use crate::stream_observer::StreamObserverRegistry;
use async_trait::async_trait;
use std::sync::Arc;

/// `controlURL`s for the two services every AVTransport renderer exposes,
/// resolved against the device description's `URLBase` (or the description
/// URL itself when `URLBase` is absent).
#[derive(Debug, Clone)]
pub struct RendererEndpoints {
    pub av_transport_control_url: String,
    pub rendering_control_control_url: String,
}

/// Per-host device-description cache (§4.7: "results are cached per host").
#[derive(Default)]
pub struct DeviceDescriptionCache {
    entries: DashMap<String, RendererEndpoints>,
}

impl DeviceDescriptionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, host: &str) -> Option<RendererEndpoints> {
        self.entries.get(host).map(|e| e.clone())
    }

    pub fn insert(&self, host: &str, endpoints: RendererEndpoints) {
        self.entries.insert(host.to_string(), endpoints);
    }
}

/// Runs SSDP M-SEARCH against the standard DLNA/Sonos search targets,
/// retrying `send_count` times per §4.7 ("retries per target").
pub async fn discover_renderers(send_count: u64) -> Result<Vec<crate::sonos::discovery::DiscoveredSpeaker>, DiscoveryError> {
    let config = SsdpConfig {
        send_count,
        mx_value: 2,
        ..SsdpConfig::default()
    };
    discover_multicast(&config).await
}

/// Fetches and parses a device description XML document, resolving the
/// `AVTransport`/`RenderingControl` `controlURL`s.
pub async fn fetch_device_description(client: &Client, description_url: &str) -> SoundMeshResult<RendererEndpoints> {
    let body = client
        .get(description_url)
        .timeout(Duration::from_secs(crate::protocol_constants::DEVICE_DESCRIPTION_TIMEOUT_SECS))
        .send()
        .await
        .map_err(|e| SoundMeshError::RendererFault(format!("device description fetch failed: {e}")))?
        .text()
        .await
        .map_err(|e| SoundMeshError::RendererFault(format!("device description read failed: {e}")))?;

    let base = extract_tag(&body, "URLBase").unwrap_or_else(|| base_of(description_url));

    let av = find_control_url(&body, "urn:schemas-upnp-org:service:AVTransport:1")
        .ok_or_else(|| SoundMeshError::RendererFault("device description missing AVTransport service".to_string()))?;
    let rc = find_control_url(&body, "urn:schemas-upnp-org:service:RenderingControl:1")
        .ok_or_else(|| SoundMeshError::RendererFault("device description missing RenderingControl service".to_string()))?;

    Ok(RendererEndpoints {
        av_transport_control_url: join_url(&base, &av),
        rendering_control_control_url: join_url(&base, &rc),
    })
}

fn base_of(url: &str) -> String {
    match url.find("://").and_then(|i| url[i + 3..].find('/').map(|j| i + 3 + j)) {
        Some(end) => url[..end].to_string(),
        None => url.to_string(),
    }
}

fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else if path.starts_with('/') {
        format!("{}{}", base.trim_end_matches('/'), path)
    } else {
        format!("{}/{}", base.trim_end_matches('/'), path)
    }
}

fn extract_tag(xml: &str, tag: &str) -> Option<String> {
    crate::sonos::utils::extract_xml_text(xml, tag)
}

/// Scans `<service>` blocks for one whose `serviceType` matches `urn`,
/// returning its `controlURL`. Device descriptions nest several `<service>`
/// siblings flatly enough that a block-local `extract_xml_text` is enough.
fn find_control_url(xml: &str, urn: &str) -> Option<String> {
    for block in xml.split("<service>").skip(1) {
        let end = block.find("</service>").unwrap_or(block.len());
        let block = &block[..end];
        if extract_tag(block, "serviceType").as_deref() == Some(urn) {
            return extract_tag(block, "controlURL");
        }
    }
    None
}

pub(crate) async fn post_soap(
    client: &Client,
    control_url: &str,
    urn: &str,
    action: &str,
    args: &[(&str, &str)],
    soft_fault_ok: bool,
) -> SoundMeshResult<String> {
    match send_soap_to_url(client, control_url, urn, action, args).await {
        Ok(body) => Ok(body),
        Err(SoapError::HttpStatus(500, body)) if soft_fault_ok && body.contains("<s:Fault>") => {
            log::debug!("[dlna] soft SOAP fault tolerated for {action}");
            Ok(body)
        }
        Err(e) => Err(SoundMeshError::RendererFault(format!("{action} failed: {e}"))),
    }
}

/// `send_soap_request` takes `(ip, path)` pairs assuming port 1400; plain
/// DLNA renderers publish an arbitrary absolute `controlURL`, so this issues
/// the same envelope directly against that URL instead.
async fn send_soap_to_url(
    client: &Client,
    control_url: &str,
    urn: &str,
    action: &str,
    args: &[(&str, &str)],
) -> Result<String, SoapError> {
    let mut body = format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body><u:{action} xmlns:u="{urn}">"#,
    );
    for (k, v) in args {
        body.push_str(&format!("<{k}>{}</{k}>", crate::sonos::utils::escape_xml(v)));
    }
    body.push_str(&format!("</u:{action}></s:Body></s:Envelope>"));

    let res = client
        .post(control_url)
        .header("Content-Type", "text/xml; charset=\"utf-8\"")
        .header("SOAPAction", format!("\"{urn}#{action}\""))
        .body(body)
        .timeout(Duration::from_secs(crate::protocol_constants::SOAP_TIMEOUT_SECS))
        .send()
        .await?;

    let status = res.status();
    let text = res.text().await?;
    if text.contains("<s:Fault>") || text.contains("<soap:Fault>") {
        return Err(SoapError::Fault(
            crate::sonos::utils::extract_xml_text(&text, "faultstring").unwrap_or_else(|| "unknown fault".into()),
        ));
    }
    if !status.is_success() {
        return Err(SoapError::HttpStatus(status.as_u16(), text));
    }
    Ok(text)
}

/// One `OutputDriver` instance targets one renderer. Re-entrant `play`:
/// overwriting `current_uri` and re-issuing `SetAVTransportURI`/`Play` is
/// exactly what a retarget requires, no extra state machine needed.
pub struct DlnaDriver {
    client: Client,
    endpoints: RendererEndpoints,
    observer: Arc<StreamObserverRegistry>,
    current_stream_id: Mutex<Option<String>>,
    soft_fault_ok: bool,
}

impl DlnaDriver {
    pub fn new(client: Client, endpoints: RendererEndpoints, observer: Arc<StreamObserverRegistry>) -> Self {
        Self {
            client,
            endpoints,
            observer,
            current_stream_id: Mutex::new(None),
            soft_fault_ok: true,
        }
    }

    fn rendering_control_args(&self, volume: u8) -> Vec<(&'static str, String)> {
        vec![
            ("InstanceID", "0".to_string()),
            ("Channel", "Master".to_string()),
            ("DesiredVolume", volume.to_string()),
        ]
    }
}

#[async_trait]
impl OutputDriver for DlnaDriver {
    async fn play(&self, session: &DriverSession) -> SoundMeshResult<()> {
        let metadata = StreamMetadata {
            title: session.title.clone(),
            artist: session.artist.clone(),
            source: None,
        };
        let audio_format = AudioFormat {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            bits_per_sample: 16,
        };
        let didl = format_didl_lite(
            &session.stream_url,
            AudioCodec::Mp3,
            &audio_format,
            Some(&metadata),
            session.cover_url.as_deref().unwrap_or(""),
        );

        let args: Vec<(&str, &str)> = vec![
            ("InstanceID", "0"),
            ("CurrentURI", &session.stream_url),
            ("CurrentURIMetaData", &didl),
        ];
        post_soap(
            &self.client,
            &self.endpoints.av_transport_control_url,
            "urn:schemas-upnp-org:service:AVTransport:1",
            "SetAVTransportURI",
            &args,
            self.soft_fault_ok,
        )
        .await?;

        let stream_id = stream_id_from_url(&session.stream_url);
        *self.current_stream_id.lock() = Some(stream_id.clone());
        let observed = self
            .observer
            .wait_observed(&stream_id, Duration::from_secs(DLNA_STREAM_OBSERVED_TIMEOUT_SECS))
            .await;
        if !observed {
            log::warn!("[dlna] renderer never issued GET for {stream_id}, skipping Play");
            return Ok(());
        }

        post_soap(
            &self.client,
            &self.endpoints.av_transport_control_url,
            "urn:schemas-upnp-org:service:AVTransport:1",
            "Play",
            &[("InstanceID", "0"), ("Speed", "1")],
            self.soft_fault_ok,
        )
        .await?;
        Ok(())
    }

    async fn pause(&self) -> SoundMeshResult<()> {
        post_soap(
            &self.client,
            &self.endpoints.av_transport_control_url,
            "urn:schemas-upnp-org:service:AVTransport:1",
            "Pause",
            &[("InstanceID", "0")],
            self.soft_fault_ok,
        )
        .await
        .map(|_| ())
    }

    async fn resume(&self) -> SoundMeshResult<()> {
        post_soap(
            &self.client,
            &self.endpoints.av_transport_control_url,
            "urn:schemas-upnp-org:service:AVTransport:1",
            "Play",
            &[("InstanceID", "0"), ("Speed", "1")],
            self.soft_fault_ok,
        )
        .await
        .map(|_| ())
    }

    async fn stop(&self) -> SoundMeshResult<()> {
        post_soap(
            &self.client,
            &self.endpoints.av_transport_control_url,
            "urn:schemas-upnp-org:service:AVTransport:1",
            "Stop",
            &[("InstanceID", "0")],
            self.soft_fault_ok,
        )
        .await
        .map(|_| ())
    }

    async fn set_volume(&self, volume: u8) -> SoundMeshResult<()> {
        let owned = self.rendering_control_args(volume);
        let args: Vec<(&str, &str)> = owned.iter().map(|(k, v)| (*k, v.as_str())).collect();
        post_soap(
            &self.client,
            &self.endpoints.rendering_control_control_url,
            "urn:schemas-upnp-org:service:RenderingControl:1",
            "SetVolume",
            &args,
            self.soft_fault_ok,
        )
        .await
        .map(|_| ())
    }

    async fn update_metadata(&self, _title: Option<&str>, _artist: Option<&str>, _cover_url: Option<&str>) -> SoundMeshResult<()> {
        // AVTransport metadata is only sent once, at `SetAVTransportURI` time;
        // live updates flow to the renderer through ICY StreamTitle instead.
        Ok(())
    }

    async fn dispose(&self) {
        if let Some(id) = self.current_stream_id.lock().take() {
            self.observer.forget(&id);
        }
    }

    fn preferred_output(&self) -> PreferredOutput {
        PreferredOutput {
            profile: crate::model::OutputProfile::Mp3,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
        }
    }

    fn http_preferences(&self) -> HttpPreferences {
        HttpPreferences {
            http_profile: HttpProfile::Chunked,
            icy_enabled: true,
            icy_interval: Some(crate::protocol_constants::ICY_METAINT),
            icy_name: None,
        }
    }
}

fn stream_id_from_url(url: &str) -> String {
    url.rsplit('/').next().unwrap_or(url).split('.').next().unwrap_or(url).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_control_url_matches_requested_service_type() {
        let xml = r#"<root><device><serviceList>
            <service><serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType><controlURL>/MediaRenderer/RenderingControl/Control</controlURL></service>
            <service><serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType><controlURL>/MediaRenderer/AVTransport/Control</controlURL></service>
        </serviceList></device></root>"#;
        assert_eq!(
            find_control_url(xml, "urn:schemas-upnp-org:service:AVTransport:1").as_deref(),
            Some("/MediaRenderer/AVTransport/Control")
        );
    }

    #[test]
    fn join_url_handles_absolute_and_relative_paths() {
        assert_eq!(join_url("http://10.0.0.5:1400", "/a/b"), "http://10.0.0.5:1400/a/b");
        assert_eq!(join_url("http://10.0.0.5:1400", "http://elsewhere/x"), "http://elsewhere/x");
    }

    #[test]
    fn stream_id_from_url_strips_path_and_extension() {
        assert_eq!(stream_id_from_url("http://h/streams/z1/abc123.mp3"), "abc123");
    }
}
