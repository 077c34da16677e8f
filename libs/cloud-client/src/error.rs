use std::time::Duration;
use thiserror::Error;

/// Boxed error used at the transport and marshaling seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure reported by a [`TokenRetriever`](crate::TokenRetriever).
///
/// The message never contains the access token itself.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TokenError {
    /// The identity provider could not be reached or rejected the request.
    #[error("token request failed: {0}")]
    Request(String),

    /// The identity provider answered with something that is not a token.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// Retriever-specific failure with its original source preserved.
    #[error("token retriever failed: {0}")]
    Other(#[source] BoxError),
}

/// Client error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ClientError {
    /// Conflicting or missing construction options
    #[error("invalid client configuration: {0}")]
    Config(String),

    /// Token retriever failed while refreshing an expiring token
    #[error("error retrieving token: {0}")]
    TokenRetrieval(#[from] TokenError),

    /// Tenant-based URL requested without a tenant
    #[error("a non-empty tenant must be specified")]
    EmptyTenant,

    /// System-namespace URL requested on a tenant-scoped client without a region
    #[error("region cannot be empty")]
    RegionRequired,

    /// Path template failed to parse or render
    #[error("failed to render path template: {0}")]
    PathTemplate(String),

    /// Assembled URL could not be parsed
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Request building failed
    #[error("failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header name
    #[error("invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Body declared `multipart/form-data` but is not form data
    #[error("bad request of form data: {0}")]
    FormData(String),

    /// Reading the form-data stream failed
    #[error("failed to read form data stream: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or parsing error
    #[error("JSON processing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A body's own per-method marshaler failed
    #[error("failed to marshal request body: {0}")]
    Marshal(#[source] BoxError),

    /// Single request attempt timed out
    #[error("request attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Transport error (network, connection, etc)
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    /// TLS setup error
    #[error("TLS error: {0}")]
    Tls(#[source] BoxError),

    /// Response body exceeded size limit
    #[error("response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// HTTP 4xx/5xx status, produced by the status translator
    #[error("HTTP {status}: {body_preview}")]
    HttpStatus {
        status: http::StatusCode,
        body_preview: String,
        content_type: Option<String>,
    },

    /// Internal transport worker is gone
    #[error("transport unavailable: internal failure")]
    ServiceClosed,
}

impl ClientError {
    /// HTTP status carried by this error, if it is a translated status error.
    #[must_use]
    pub fn status(&self) -> Option<http::StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error came from the network layer rather than the server.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_) | Self::Tls(_))
    }
}
