//! Pure URI → [`PlaybackSource`] resolution (§4.1).
//!
//! This module performs no I/O. It recognizes a small set of schemes and
//! decorates internet-radio sources with the headers/flags §4.1 and §4.5
//! require; everything else about a source's lifecycle belongs to
//! `audio_manager`.

use std::collections::HashMap;

use regex::Regex;
use std::sync::OnceLock;

use crate::model::PlaybackSource;

/// Host patterns treated as internet radio regardless of scheme, matching
/// the "regex on decoded payload" requirement of §4.1/§4.5.
fn radio_host_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(icecast|shoutcast|radio|stream)").expect("valid regex")
    })
}

/// Resolves an opaque content URI into a [`PlaybackSource`].
///
/// Recognized shapes:
/// - `file:///abs/path` or a bare filesystem path → `PlaybackSource::File`.
/// - `http(s)://...` → `PlaybackSource::Url`, decorated as radio when the
///   scheme/host looks like a broadcast stream.
/// - `proxy:/u=<percent-encoded-url>` → `PlaybackSource::Url` pointed at the
///   local output-stream proxy, with an `X-Zone-Id` header attached so the
///   proxy (§4.10) can attribute ICY metadata back to this zone.
/// - `pipe:<stream-id>?format=s16le&rate=48000&channels=2` → a handoff from a
///   provider-specific producer already running in-process.
///
/// Returns `None` when the scheme is unrecognized (§7: resolution failure is
/// a logged warning upstream, not a panic here).
pub fn resolve_source(zone_id: &str, uri: &str) -> Option<PlaybackSource> {
    if let Some(rest) = uri.strip_prefix("proxy:/u=") {
        let decoded = percent_decode(rest);
        return Some(radio_url_source(&decoded, Some(zone_id)));
    }

    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Some(radio_url_source(uri, None));
    }

    if let Some(rest) = uri.strip_prefix("pipe:") {
        return resolve_pipe(rest);
    }

    if let Some(path) = uri.strip_prefix("file://") {
        return Some(file_source(path));
    }

    if !uri.contains("://") && !uri.is_empty() {
        return Some(file_source(uri));
    }

    None
}

fn is_radio_url(url: &str) -> bool {
    radio_host_pattern().is_match(url)
}

fn radio_url_source(url: &str, zone_id_for_proxy: Option<&str>) -> PlaybackSource {
    let radio = is_radio_url(url);
    let mut headers = HashMap::new();
    if radio {
        headers.insert("Icy-MetaData".to_string(), "1".to_string());
    }
    if let Some(zone_id) = zone_id_for_proxy {
        headers.insert("X-Zone-Id".to_string(), zone_id.to_string());
    }
    PlaybackSource::Url {
        url: url.to_string(),
        headers,
        decryption_key: None,
        tls_verify_host: true,
        input_format: None,
        start_at_sec: 0.0,
        real_time: radio,
        low_latency: radio,
        restart_on_failure: radio,
    }
}

fn file_source(path: &str) -> PlaybackSource {
    PlaybackSource::File {
        path: path.to_string(),
        r#loop: false,
        pad_tail_sec: 0.0,
        pre_delay_ms: 0,
        start_at_sec: 0.0,
        real_time: false,
    }
}

fn resolve_pipe(rest: &str) -> Option<PlaybackSource> {
    let (stream_id, query) = rest.split_once('?').unwrap_or((rest, ""));
    if stream_id.is_empty() {
        return None;
    }
    let params = parse_query(query);
    let format = match params.get("format").map(String::as_str) {
        Some("s24le") => crate::model::PcmFormat::S24le,
        Some("s32le") => crate::model::PcmFormat::S32le,
        _ => crate::model::PcmFormat::S16le,
    };
    let sample_rate: u32 = params
        .get("rate")
        .and_then(|v| v.parse().ok())
        .unwrap_or(crate::protocol_constants::DEFAULT_SAMPLE_RATE);
    let channels: u16 = params
        .get("channels")
        .and_then(|v| v.parse().ok())
        .unwrap_or(crate::protocol_constants::DEFAULT_CHANNELS);

    Some(PlaybackSource::Pipe {
        stream_id: stream_id.to_string(),
        format,
        sample_rate,
        channels,
        real_time: true,
    })
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), percent_decode(v)))
        .collect()
}

/// Minimal percent-decoding; the proxy/pipe handoff URIs we accept never
/// carry multi-byte sequences that would need full UTF-8 validation beyond
/// what `String::from_utf8_lossy` already provides.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&input[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(bytes[i]);
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_plain_http_url_as_non_radio() {
        let src = resolve_source("z1", "http://music.example/track.mp3").unwrap();
        match src {
            PlaybackSource::Url { real_time, headers, .. } => {
                assert!(!real_time);
                assert!(!headers.contains_key("Icy-MetaData"));
            }
            _ => panic!("expected url source"),
        }
    }

    #[test]
    fn resolves_radio_host_with_icy_header() {
        let src = resolve_source("z1", "http://radio.example/stream").unwrap();
        match src {
            PlaybackSource::Url {
                real_time,
                restart_on_failure,
                headers,
                ..
            } => {
                assert!(real_time);
                assert!(restart_on_failure);
                assert_eq!(headers.get("Icy-MetaData"), Some(&"1".to_string()));
            }
            _ => panic!("expected url source"),
        }
    }

    #[test]
    fn proxy_uri_attaches_zone_id_header() {
        let src = resolve_source("z9", "proxy:/u=http%3A%2F%2Fradio.example%2Fstream").unwrap();
        match src {
            PlaybackSource::Url { url, headers, .. } => {
                assert_eq!(url, "http://radio.example/stream");
                assert_eq!(headers.get("X-Zone-Id"), Some(&"z9".to_string()));
            }
            _ => panic!("expected url source"),
        }
    }

    #[test]
    fn resolves_bare_path_as_file() {
        let src = resolve_source("z1", "/music/track.flac").unwrap();
        assert!(matches!(src, PlaybackSource::File { .. }));
    }

    #[test]
    fn resolves_pipe_with_query_params() {
        let src = resolve_source("z1", "pipe:abc123?format=s24le&rate=48000&channels=2").unwrap();
        match src {
            PlaybackSource::Pipe {
                stream_id,
                format,
                sample_rate,
                channels,
                ..
            } => {
                assert_eq!(stream_id, "abc123");
                assert_eq!(format, crate::model::PcmFormat::S24le);
                assert_eq!(sample_rate, 48000);
                assert_eq!(channels, 2);
            }
            _ => panic!("expected pipe source"),
        }
    }

    #[test]
    fn unrecognized_scheme_resolves_to_none() {
        assert!(resolve_source("z1", "spotify://track/123").is_none());
    }

    #[test]
    fn never_performs_io_and_is_deterministic() {
        let a = resolve_source("z1", "http://radio.example/stream");
        let b = resolve_source("z1", "http://radio.example/stream");
        assert_eq!(format!("{:?}", a), format!("{:?}", b));
    }
}
