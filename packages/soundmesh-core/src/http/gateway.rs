//! `/streams/...` HTTP stream gateway (§4.8).
//!
//! Grounded on the teacher's `api/http.rs::stream_audio` for the overall
//! handler shape (content-type/ICY/Content-Length header assembly, ICY
//! injection, WAV header prepend) and its `create_router` for route layout.
//! The teacher's cadence-paced silence injection and epoch/resume hooks are
//! Sonos-specific accommodations for its renderer's connection-drop behavior
//! and have no counterpart here; backpressure and reconnection are already
//! handled by [`crate::fanout::Fanout`]'s per-subscriber drop policy and
//! [`crate::audio_manager::AudioManager::resume`].

use std::time::Duration;

use async_stream::stream;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;

use crate::error::{SoundMeshError, SoundMeshResult};
use crate::fanout::{FanoutMessage, SubscribeOptions};
use crate::http::GatewayState;
use crate::model::{HttpProfile, OutputProfile, PlaybackSession};
use crate::protocol_constants::{CONTENT_LENGTH_MAX, SYNC_JOIN_TIMEOUT_SECS};
use crate::stream::{IcyMetadataInjector, StreamMetadata};

#[derive(Debug, Deserialize, Default)]
pub struct StreamQuery {
    sync: Option<String>,
    #[serde(default)]
    expect: usize,
}

fn profile_for_extension(stream_id_and_ext: &str) -> Option<(String, OutputProfile)> {
    let (id, ext) = stream_id_and_ext.rsplit_once('.')?;
    let profile = match ext {
        "mp3" => OutputProfile::Mp3,
        "aac" => OutputProfile::Aac,
        "wav" => OutputProfile::Pcm,
        _ => return None,
    };
    Some((id.to_string(), profile))
}

fn stream_id_matches(session: &PlaybackSession, stream_id: &str) -> bool {
    stream_id == "current"
        || session.stream.as_ref().is_some_and(|s| s.id == stream_id)
        || session.pcm_stream.as_ref().is_some_and(|s| s.id == stream_id)
}

/// `GET /streams/<zoneId>/<streamId>.<mp3|aac|wav>` (§4.8).
pub async fn stream_handler(
    Path((zone_id, stream_id_and_ext)): Path<(String, String)>,
    Query(query): Query<StreamQuery>,
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> SoundMeshResult<Response> {
    let (stream_id, profile) = profile_for_extension(&stream_id_and_ext)
        .ok_or_else(|| SoundMeshError::InvalidRequest(format!("unsupported stream extension: {stream_id_and_ext}")))?;

    let session = state
        .audio_manager
        .session(&zone_id)
        .ok_or_else(|| SoundMeshError::ZoneNotFound(zone_id.clone()))?;

    if !stream_id_matches(&session, &stream_id) || !session.profiles.contains(&profile) {
        return Err(SoundMeshError::StreamNotFound(format!("{zone_id}/{stream_id_and_ext}")));
    }

    state.stream_observer.mark_observed(&stream_id);

    let wants_sync = query.sync.is_some();
    let subscription = state.engine.create_stream(
        &zone_id,
        profile,
        crate::protocol_constants::SUBSCRIBER_QUEUE_MAX_BYTES,
        SubscribeOptions {
            prime_with_buffer: !wants_sync,
            label: format!("gateway:{zone_id}:{stream_id}"),
        },
    )?;

    if let Some(token) = query.sync.as_deref() {
        state
            .sync_joins
            .join(token, query.expect, Duration::from_secs(SYNC_JOIN_TIMEOUT_SECS))
            .await;
    }

    let icy_supported = profile != OutputProfile::Pcm && session.output_settings.http_icy_enabled;
    let wants_icy = icy_supported
        && headers
            .get("icy-metadata")
            .and_then(|v| v.to_str().ok())
            == Some("1");

    let content_length = match session.output_settings.http_profile {
        HttpProfile::Chunked => None,
        HttpProfile::ForcedContentLength => Some(forced_content_length(&session, profile)),
    };

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, profile.mime_type())
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive");

    if wants_icy {
        builder = builder
            .header("icy-name", session.output_settings.http_icy_name.clone())
            .header("icy-metaint", session.output_settings.http_icy_interval.to_string());
    }
    if let Some(len) = content_length {
        builder = builder.header(header::CONTENT_LENGTH, len.to_string());
    }

    let body_stream = drain_subscription(subscription);

    let body: Body = if wants_icy {
        let icy_metadata = StreamMetadata {
            title: session.metadata.title.clone(),
            artist: session.metadata.artist.clone(),
            source: Some(session.source_label.clone()),
        };
        let mut injector = IcyMetadataInjector::new();
        Body::from_stream(stream! {
            let mut body_stream = std::pin::pin!(body_stream);
            use futures::StreamExt;
            while let Some(chunk) = body_stream.next().await {
                match chunk {
                    Ok(bytes) => yield Ok::<Bytes, std::io::Error>(injector.inject(&bytes, &icy_metadata)),
                    Err(e) => { yield Err(e); break; }
                }
            }
        })
    } else if profile == OutputProfile::Pcm {
        let header_bytes = crate::stream::create_wav_header(
            session.output_settings.sample_rate,
            session.output_settings.channels,
            session.output_settings.pcm_bit_depth,
        );
        Body::from_stream(stream! {
            yield Ok::<Bytes, std::io::Error>(header_bytes);
            let mut body_stream = std::pin::pin!(body_stream);
            use futures::StreamExt;
            while let Some(chunk) = body_stream.next().await {
                yield chunk;
            }
        })
    } else {
        Body::from_stream(body_stream)
    };

    builder
        .body(body)
        .map_err(|e| SoundMeshError::Internal(e.to_string()))
}

fn forced_content_length(session: &PlaybackSession, profile: OutputProfile) -> u64 {
    let settings = &session.output_settings;
    let bytes_per_second: u64 = match profile {
        OutputProfile::Pcm => {
            settings.sample_rate as u64 * settings.channels as u64 * (settings.pcm_bit_depth as u64 / 8)
        }
        OutputProfile::Mp3 | OutputProfile::Aac => settings.mp3_bitrate_kbps as u64 * 1000 / 8,
    };
    let duration_sec = if session.duration > 0.0 {
        session.duration.ceil() as u64
    } else {
        settings.http_fallback_seconds
    };
    bytes_per_second
        .saturating_mul(duration_sec)
        .min(CONTENT_LENGTH_MAX)
}

fn drain_subscription(
    mut subscription: crate::fanout::FanoutSubscription,
) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> {
    stream! {
        loop {
            match subscription.recv().await {
                Some(FanoutMessage::Data(chunk)) => yield Ok(chunk),
                Some(FanoutMessage::End) | None => break,
                Some(FanoutMessage::Error(e)) => {
                    yield Err(std::io::Error::other(e));
                    break;
                }
            }
        }
    }
}

/// `GET /streams/<zoneId>/<streamId>/cover` (§4.8). Falls back to the
/// process-wide default artwork when the zone has no per-track cover.
pub async fn cover_handler(
    Path((zone_id, stream_id)): Path<(String, String)>,
    State(state): State<GatewayState>,
) -> SoundMeshResult<Response> {
    let session = state
        .audio_manager
        .session(&zone_id)
        .ok_or_else(|| SoundMeshError::ZoneNotFound(zone_id.clone()))?;

    if !stream_id_matches(&session, &stream_id) {
        return Err(SoundMeshError::StreamNotFound(format!("{zone_id}/{stream_id}/cover")));
    }

    let bytes = session
        .cover
        .map(Bytes::from)
        .or_else(|| state.artwork.as_bytes().cloned())
        .unwrap_or_default();

    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AudioOutputSettings, PlaybackSession, PlaybackSource};

    #[test]
    fn profile_for_extension_maps_known_suffixes() {
        assert_eq!(
            profile_for_extension("abc123.mp3"),
            Some(("abc123".to_string(), OutputProfile::Mp3))
        );
        assert_eq!(
            profile_for_extension("abc123.wav"),
            Some(("abc123".to_string(), OutputProfile::Pcm))
        );
        assert_eq!(profile_for_extension("abc123.flac"), None);
        assert_eq!(profile_for_extension("no-extension"), None);
    }

    fn sample_session() -> PlaybackSession {
        let source = PlaybackSource::File {
            path: "/music/track.flac".to_string(),
            r#loop: false,
            pad_tail_sec: 0.0,
            pre_delay_ms: 0,
            start_at_sec: 0.0,
            real_time: false,
        };
        PlaybackSession::new(
            "living-room".to_string(),
            "Local file".to_string(),
            source,
            vec![OutputProfile::Mp3],
            AudioOutputSettings::default(),
        )
    }

    #[test]
    fn stream_id_matches_accepts_current_alias_and_real_ids() {
        let mut session = sample_session();
        session.stream = Some(crate::model::StreamHandle::new("living-room", OutputProfile::Mp3));
        let real_id = session.stream.as_ref().unwrap().id.clone();

        assert!(stream_id_matches(&session, "current"));
        assert!(stream_id_matches(&session, &real_id));
        assert!(!stream_id_matches(&session, "not-the-right-id"));
    }

    #[test]
    fn forced_content_length_uses_fallback_seconds_when_duration_unknown() {
        let mut session = sample_session();
        session.duration = 0.0;
        session.output_settings.http_fallback_seconds = 10;
        session.output_settings.mp3_bitrate_kbps = 128;

        let length = forced_content_length(&session, OutputProfile::Mp3);
        assert_eq!(length, 128 * 1000 / 8 * 10);
    }

    #[test]
    fn forced_content_length_uses_session_duration_when_known() {
        let mut session = sample_session();
        session.duration = 3.4;
        session.output_settings.mp3_bitrate_kbps = 320;

        let length = forced_content_length(&session, OutputProfile::Mp3);
        assert_eq!(length, 320 * 1000 / 8 * 4);
    }
}
