//! Codec identity and DIDL-Lite display metadata shared by the renderer
//! drivers (§3, §4.7) and the ICY injector (§4.8).

use serde::{Deserialize, Serialize};

/// Supported audio codecs for a zone's encoded output.
///
/// `Pcm` is carried in a WAV container (PCM + RIFF header) for renderer
/// compatibility; the MIME type and file extension remain `audio/wav`/`.wav`
/// even though the payload itself is uncompressed.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Pcm,
    Aac,
    Mp3,
}

/// Cleanup ordering for stream teardown.
///
/// Renderers behave differently depending on the codec, which affects the
/// safe order for closing the HTTP stream vs sending SOAP stop commands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CleanupOrder {
    /// Close the HTTP stream before sending SOAP stop commands.
    ///
    /// Required for PCM: some renderers block on HTTP reads for uncompressed
    /// audio, so a SOAP command would time out if the HTTP connection is
    /// still open.
    HttpFirst,
    /// Send SOAP stop commands before closing the HTTP stream.
    ///
    /// Required for compressed codecs: the renderer has an internal decoder
    /// buffer, so stopping playback first prevents it draining buffered
    /// audio after the stream source disappears.
    SoapFirst,
}

impl AudioCodec {
    /// Returns the cleanup ordering required for this codec during stream
    /// teardown.
    #[must_use]
    pub const fn cleanup_order(&self) -> CleanupOrder {
        match self {
            Self::Pcm => CleanupOrder::HttpFirst,
            _ => CleanupOrder::SoapFirst,
        }
    }

    /// Returns the codec as a short string identifier (e.g., "pcm", "aac").
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm => "pcm",
            Self::Aac => "aac",
            Self::Mp3 => "mp3",
        }
    }

    /// Returns the MIME type for this codec.
    #[must_use]
    pub const fn mime_type(&self) -> &'static str {
        match self {
            Self::Pcm => "audio/wav",
            Self::Aac => "audio/aac",
            Self::Mp3 => "audio/mpeg",
        }
    }
}

/// Display metadata carried alongside a zone's encoded stream.
///
/// DIDL-Lite and ICY both use this rather than per-track album art, since
/// neither wire format can update artwork mid-stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    /// Source label (e.g. "Radio", "Spotify") formatted into DIDL-Lite album
    /// as "{source} • {APP_NAME}".
    pub source: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_requires_http_first_cleanup() {
        assert_eq!(AudioCodec::Pcm.cleanup_order(), CleanupOrder::HttpFirst);
        assert_eq!(AudioCodec::Mp3.cleanup_order(), CleanupOrder::SoapFirst);
    }

    #[test]
    fn mime_type_matches_codec() {
        assert_eq!(AudioCodec::Pcm.mime_type(), "audio/wav");
        assert_eq!(AudioCodec::Aac.mime_type(), "audio/aac");
    }
}
