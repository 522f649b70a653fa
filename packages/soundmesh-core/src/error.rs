//! Centralized error types for the soundmesh core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Explicit error sum type for outbound transport operations (§9 redesign
/// flag: replace "exceptions-as-control-flow" with explicit kinds instead of
/// distinguishing timeout-vs-abort by message text).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request canceled")]
    Canceled,
    #[error("request timed out")]
    TimedOut,
    #[error("transport fault: status={status} body={body}")]
    TransportFault { status: u16, body: String },
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TimedOut | Self::Canceled)
            || matches!(self, Self::TransportFault { status, .. } if *status >= 500)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::TimedOut
        } else if let Some(status) = err.status() {
            Self::TransportFault {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            Self::Upstream(err.to_string())
        }
    }
}

/// Application-wide error type for the soundmesh server.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum SoundMeshError {
    /// §4.1/§7: SourceResolver could not map the URI, or resolved metadata is
    /// missing required fields.
    #[error("source resolution failed: {0}")]
    Resolution(String),

    /// §4.2/§7: transcode engine failed to spawn, crashed, or timed out with
    /// no data while the session should be considered an error.
    #[error("engine failure: {0}")]
    EngineFailure(String),

    /// §7: hard renderer protocol fault (SOAP fault without `softFaultOk`,
    /// AirPlay start failure surfaced, Chromecast connect failure).
    #[error("renderer fault: {0}")]
    RendererFault(String),

    /// §4.10/§7: the output stream proxy could not reach the upstream.
    #[error("proxy upstream failure: {0}")]
    ProxyUpstream(String),

    /// §3/§8: a GroupRecord invariant would be violated by the requested
    /// mutation (leader not in members, duplicate members, two leaders).
    #[error("group invariant violated: {0}")]
    GroupInvariant(String),

    /// Zone id referenced in a request does not correspond to a configured
    /// zone.
    #[error("zone not found: {0}")]
    ZoneNotFound(String),

    /// Requested stream id does not exist or does not match the current
    /// session's stream id (§4.8).
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// Client sent an invalid or malformed request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Network-related error (IP detection, socket bind, SSDP failures).
    #[error("network error: {0}")]
    Network(String),

    /// Server configuration error (missing/invalid settings).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal server error / invariant broken inside the core.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorCode for SoundMeshError {
    fn code(&self) -> &'static str {
        match self {
            Self::Resolution(_) => "resolution_failed",
            Self::EngineFailure(_) => "engine_failure",
            Self::RendererFault(_) => "renderer_fault",
            Self::ProxyUpstream(_) => "proxy_upstream_failure",
            Self::GroupInvariant(_) => "group_invariant_violated",
            Self::ZoneNotFound(_) => "zone_not_found",
            Self::StreamNotFound(_) => "stream_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Network(_) => "network_error",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl SoundMeshError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        ErrorCode::code(self)
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ZoneNotFound(_) | Self::StreamNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) | Self::GroupInvariant(_) => StatusCode::BAD_REQUEST,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ProxyUpstream(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type SoundMeshResult<T> = Result<T, SoundMeshError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for SoundMeshError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<TransportError> for SoundMeshError {
    fn from(err: TransportError) -> Self {
        Self::RendererFault(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_not_found_maps_to_404() {
        let err = SoundMeshError::StreamNotFound("abc".into());
        assert_eq!(err.code(), "stream_not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn group_invariant_maps_to_400() {
        let err = SoundMeshError::GroupInvariant("leader missing".into());
        assert_eq!(err.code(), "group_invariant_violated");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn proxy_upstream_maps_to_502() {
        let err = SoundMeshError::ProxyUpstream("timeout".into());
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn transport_fault_5xx_is_transient() {
        let err = TransportError::TransportFault {
            status: 503,
            body: String::new(),
        };
        assert!(err.is_transient());
        let err = TransportError::TransportFault {
            status: 404,
            body: String::new(),
        };
        assert!(!err.is_transient());
    }
}
