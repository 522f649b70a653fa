//! `GET /streams/proxy?u=<url>&h=<headers>` output-stream proxy (§4.10).
//!
//! Grounded on `other_examples/.../proxy/http_stream.rs`'s `proxy_http_stream`
//! (connect-timeout-only client, passthrough body, uniform response headers)
//! and its `attempt_rewrite_hls_playlist` helper, generalized here from
//! HLS-only rewriting to the three playlist formats §4.10 names (M3U, M3U8,
//! PLS) and to ICY in-band metadata extraction, which the teacher that file
//! is grounded on has no use for.

use std::net::IpAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde::Deserialize;
use std::net::SocketAddr;

use crate::http::GatewayState;
use crate::protocol_constants::{
    PLAYLIST_FETCH_MAX_BYTES, PLAYLIST_FETCH_TIMEOUT_SECS, PROXY_FETCH_TIMEOUT_SECS,
};

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    u: String,
    h: Option<String>,
}

fn is_local_client(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

fn decode_forwarded_headers(encoded: Option<&str>) -> HeaderMap {
    let mut out = HeaderMap::new();
    let Some(encoded) = encoded else {
        return out;
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        return out;
    };
    let Ok(map) = serde_json::from_slice::<std::collections::HashMap<String, String>>(&decoded) else {
        return out;
    };
    for (k, v) in map {
        if let (Ok(name), Ok(value)) = (
            header::HeaderName::from_bytes(k.as_bytes()),
            HeaderValue::from_str(&v),
        ) {
            out.insert(name, value);
        }
    }
    out
}

fn looks_like_playlist(url: &str, content_type: &str) -> bool {
    let lower_ct = content_type.to_ascii_lowercase();
    let lower_url = url.to_ascii_lowercase();
    lower_ct.contains("mpegurl")
        || lower_ct.contains("scpls")
        || lower_url.ends_with(".m3u")
        || lower_url.ends_with(".m3u8")
        || lower_url.ends_with(".pls")
}

/// `GET /streams/proxy?u=<absolute>&h=<base64-json-headers>` (§4.10).
pub async fn proxy_handler(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    Query(query): Query<ProxyQuery>,
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Response {
    let zone_hint = headers
        .get("x-zone-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if !is_local_client(&remote_addr.ip()) {
        return (StatusCode::FORBIDDEN, "proxy is only reachable from local interfaces").into_response();
    }

    let forwarded = decode_forwarded_headers(query.h.as_deref());
    let mut request = state
        .http_client
        .get(&query.u)
        .timeout(Duration::from_secs(PROXY_FETCH_TIMEOUT_SECS));
    for (name, value) in forwarded.iter() {
        request = request.header(name, value);
    }
    if let Some(range) = headers.get(header::RANGE) {
        request = request.header(header::RANGE, range);
    }

    let upstream = match request.send().await {
        Ok(resp) => resp,
        Err(e) => {
            return (StatusCode::BAD_GATEWAY, format!("proxy upstream failure: {e}")).into_response();
        }
    };

    if !upstream.status().is_success() {
        return (StatusCode::BAD_GATEWAY, format!("upstream status {}", upstream.status())).into_response();
    }

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    if looks_like_playlist(&query.u, &content_type) {
        return rewrite_playlist(upstream, &query.u, &state).await;
    }

    let icy_metaint: Option<usize> = upstream
        .headers()
        .get("icy-metaint")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok());
    let upstream_status = upstream.status();
    let accept_ranges = upstream.headers().get(header::ACCEPT_RANGES).cloned();
    let content_range = upstream.headers().get(header::CONTENT_RANGE).cloned();

    let mut builder = Response::builder()
        .status(upstream_status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache");
    if let Some(len) = upstream.headers().get(header::CONTENT_LENGTH).cloned() {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }
    if let Some(accept_ranges) = accept_ranges {
        builder = builder.header(header::ACCEPT_RANGES, accept_ranges);
    }
    if let Some(content_range) = content_range {
        builder = builder.header(header::CONTENT_RANGE, content_range);
    }

    let body = match icy_metaint {
        Some(metaint) => {
            let zone_id = zone_hint.clone();
            let audio_manager = state.audio_manager.clone();
            let mut interceptor = IcyInterceptor::new(metaint);
            let passthrough = upstream.bytes_stream().map(move |chunk| {
                chunk.map_err(|e| std::io::Error::other(e.to_string()))
            });
            axum::body::Body::from_stream(passthrough.map(move |chunk| {
                let chunk = chunk?;
                let stripped = interceptor.strip(&chunk);
                if let (Some(zone_id), Some((title, artist))) = (&zone_id, interceptor.take_update()) {
                    audio_manager.update_radio_metadata(zone_id, title, artist);
                }
                Ok::<Bytes, std::io::Error>(stripped)
            }))
        }
        None => {
            let passthrough = upstream
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| std::io::Error::other(e.to_string())));
            axum::body::Body::from_stream(passthrough)
        }
    };

    match builder.body(body) {
        Ok(resp) => resp,
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn rewrite_playlist(upstream: reqwest::Response, source_url: &str, state: &GatewayState) -> Response {
    let base = match url::Url::parse(source_url) {
        Ok(url) => url,
        Err(e) => return (StatusCode::BAD_GATEWAY, format!("invalid upstream url: {e}")).into_response(),
    };

    let body = match tokio::time::timeout(
        Duration::from_secs(PLAYLIST_FETCH_TIMEOUT_SECS),
        read_capped(upstream, PLAYLIST_FETCH_MAX_BYTES),
    )
    .await
    {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => return (StatusCode::BAD_GATEWAY, format!("playlist fetch failed: {e}")).into_response(),
        Err(_) => return (StatusCode::GATEWAY_TIMEOUT, "playlist fetch timed out").into_response(),
    };

    let text = String::from_utf8_lossy(&body);
    let proxy_base = state.network.url_builder().proxy_base_url();
    let rewritten = rewrite_playlist_text(&text, &base, &proxy_base);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(axum::body::Body::from(rewritten))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn read_capped(response: reqwest::Response, cap: usize) -> Result<Bytes, reqwest::Error> {
    let mut stream = response.bytes_stream();
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > cap {
            buf.extend_from_slice(&chunk[..cap.saturating_sub(buf.len())]);
            break;
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Rewrites every absolute/relative media reference in an M3U/M3U8/PLS
/// playlist so it resolves through `proxy_base`, including HLS `URI="..."`
/// attributes embedded in `#EXT-X-*` tag lines.
fn rewrite_playlist_text(text: &str, base: &url::Url, proxy_base: &str) -> String {
    let mut out = String::with_capacity(text.len() + 256);
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            out.push('\n');
            continue;
        }
        if trimmed.starts_with('#') {
            out.push_str(&rewrite_hls_attribute_uris(trimmed, base, proxy_base));
            out.push('\n');
            continue;
        }
        if let Some(key_eq) = trimmed.strip_prefix("File").filter(|_| trimmed.contains('=')) {
            // PLS "FileN=<url>" entries.
            if let Some((key, value)) = key_eq.split_once('=') {
                out.push_str("File");
                out.push_str(key);
                out.push('=');
                out.push_str(&proxied_url(value.trim(), base, proxy_base));
                out.push('\n');
                continue;
            }
        }
        out.push_str(&proxied_url(trimmed, base, proxy_base));
        out.push('\n');
    }
    out
}

fn rewrite_hls_attribute_uris(tag_line: &str, base: &url::Url, proxy_base: &str) -> String {
    const NEEDLE: &str = "URI=\"";
    let Some(start) = tag_line.find(NEEDLE) else {
        return tag_line.to_string();
    };
    let uri_start = start + NEEDLE.len();
    let Some(end) = tag_line[uri_start..].find('"') else {
        return tag_line.to_string();
    };
    let uri = &tag_line[uri_start..uri_start + end];
    let rewritten = proxied_url(uri, base, proxy_base);
    format!("{}{}{}", &tag_line[..uri_start], rewritten, &tag_line[uri_start + end..])
}

fn proxied_url(raw: &str, base: &url::Url, proxy_base: &str) -> String {
    let absolute = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        match base.join(raw) {
            Ok(joined) => joined.to_string(),
            Err(_) => return raw.to_string(),
        }
    };
    format!("{proxy_base}?u={}", percent_encode_query_value(&absolute))
}

/// Percent-encodes a value for use in a query string, per RFC 3986's
/// unreserved set plus the characters safe inside `application/x-www-form-urlencoded`.
fn percent_encode_query_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Strips in-band ICY metadata frames from a live passthrough body and
/// surfaces the most recently parsed `StreamTitle` (§4.10). Distinct from
/// [`crate::stream::IcyMetadataInjector`], which runs the opposite
/// direction for streams this crate itself encodes.
struct IcyInterceptor {
    metaint: usize,
    bytes_since_meta: usize,
    pending_update: Option<(Option<String>, Option<String>)>,
    last_title: Option<String>,
}

impl IcyInterceptor {
    fn new(metaint: usize) -> Self {
        Self {
            metaint: metaint.max(1),
            bytes_since_meta: 0,
            pending_update: None,
            last_title: None,
        }
    }

    fn take_update(&mut self) -> Option<(Option<String>, Option<String>)> {
        self.pending_update.take()
    }

    fn strip(&mut self, chunk: &[u8]) -> Bytes {
        let mut out = BytesMut::with_capacity(chunk.len());
        let mut i = 0;
        while i < chunk.len() {
            let remaining_audio = self.metaint - self.bytes_since_meta;
            let take = remaining_audio.min(chunk.len() - i);
            out.extend_from_slice(&chunk[i..i + take]);
            i += take;
            self.bytes_since_meta += take;

            if self.bytes_since_meta >= self.metaint && i < chunk.len() {
                let len_byte = chunk[i] as usize * 16;
                i += 1;
                if len_byte > 0 && i + len_byte <= chunk.len() {
                    self.parse_metadata(&chunk[i..i + len_byte]);
                    i += len_byte;
                }
                self.bytes_since_meta = 0;
            }
        }
        out.freeze()
    }

    fn parse_metadata(&mut self, block: &[u8]) {
        let text = String::from_utf8_lossy(block);
        let Some(title_raw) = text
            .split(';')
            .find_map(|field| field.trim().strip_prefix("StreamTitle="))
        else {
            return;
        };
        let title_raw = title_raw.trim().trim_matches('\'');
        if Some(title_raw) == self.last_title.as_deref() {
            return;
        }
        self.last_title = Some(title_raw.to_string());

        let (artist, title) = match title_raw.split_once(" - ") {
            Some((a, t)) => (Some(a.trim().to_string()), Some(t.trim().to_string())),
            None => (None, Some(title_raw.to_string())),
        };
        self.pending_update = Some((title, artist));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_playlist_text_resolves_relative_entries() {
        let base = url::Url::parse("http://radio.example/station/playlist.m3u8").unwrap();
        let out = rewrite_playlist_text("#EXTM3U\nchunk1.ts\n", &base, "http://me/streams/proxy");
        assert!(out.contains("http://me/streams/proxy?u="));
        assert!(out.contains("chunk1.ts"));
    }

    #[test]
    fn rewrite_hls_attribute_uris_rewrites_uri_field() {
        let base = url::Url::parse("http://radio.example/station/master.m3u8").unwrap();
        let line = r#"#EXT-X-KEY:METHOD=AES-128,URI="key.bin""#;
        let rewritten = rewrite_hls_attribute_uris(line, &base, "http://me/streams/proxy");
        assert!(rewritten.contains("http://me/streams/proxy?u="));
        assert!(rewritten.starts_with("#EXT-X-KEY:METHOD=AES-128,URI=\""));
    }

    #[test]
    fn icy_interceptor_extracts_artist_and_title() {
        let mut interceptor = IcyInterceptor::new(8);
        let mut frame = Vec::from(b"audio123".as_slice());
        let meta = b"StreamTitle='Artist - Title';";
        let mut padded = meta.to_vec();
        while padded.len() % 16 != 0 {
            padded.push(0);
        }
        frame.push((padded.len() / 16) as u8);
        frame.extend_from_slice(&padded);
        frame.extend_from_slice(b"more audio");

        let stripped = interceptor.strip(&frame);
        assert!(!stripped.as_ref().windows(4).any(|w| w == b"Arti"));
        let (title, artist) = interceptor.take_update().unwrap();
        assert_eq!(title.unwrap(), "Title");
        assert_eq!(artist.unwrap(), "Artist");
    }

    #[test]
    fn icy_interceptor_suppresses_duplicate_updates() {
        let mut interceptor = IcyInterceptor::new(4);
        let meta = b"StreamTitle='Same - Song';";
        let mut padded = meta.to_vec();
        while padded.len() % 16 != 0 {
            padded.push(0);
        }
        let mut frame = vec![0u8; 4];
        frame.push((padded.len() / 16) as u8);
        frame.extend_from_slice(&padded);
        interceptor.strip(&frame);
        assert!(interceptor.take_update().is_some());

        let mut frame2 = vec![0u8; 4];
        frame2.push((padded.len() / 16) as u8);
        frame2.extend_from_slice(&padded);
        interceptor.strip(&frame2);
        assert!(interceptor.take_update().is_none());
    }
}
