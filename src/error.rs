//! Error types for the requests crate.

use std::io;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, sending or decoding a request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The server answered with a status other than 200 OK.
    #[error("unexpected response status: {message}")]
    Status {
        /// Numeric status code.
        code: u16,
        /// Status line, e.g. `404 Not Found`.
        message: String,
        /// Value of the `Location` header, empty when absent.
        location: String,
    },

    /// The server declared a zero-length body.
    #[error("empty body")]
    EmptyBody,

    /// `send` was called twice on the same request.
    #[error("already sent")]
    AlreadySent,

    /// JSON decoding failed; `body` holds the payload that was rejected.
    #[error("{source}: {body}")]
    Decode {
        #[source]
        source: serde_json::Error,
        body: String,
    },

    /// HTTP protocol error.
    #[error("HTTP protocol error: {0}")]
    HttpProtocol(String),

    /// Header name or value rejected by the `http` crate.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Query or form serialization failed.
    #[error("Query encode error: {0}")]
    QueryEncode(String),

    /// Struct to header serialization failed.
    #[error("Header encode error: {0}")]
    HeaderEncode(String),

    /// Header to struct deserialization failed.
    #[error("Header decode error: {0}")]
    HeaderDecode(String),

    /// Decompression error.
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Missing required field or data.
    #[error("Missing required: {0}")]
    Missing(String),

    /// Connect timeout (TCP + TLS handshake).
    #[error("Connect timeout after {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// No response headers within the time-to-first-byte deadline.
    #[error("No response headers within {0:?}")]
    TtfbTimeout(std::time::Duration),

    /// Total request deadline exceeded.
    #[error("Total request deadline exceeded after {0:?}")]
    TotalTimeout(std::time::Duration),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Proxy configuration or tunnel error.
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// QUIC/HTTP3 error.
    #[error("QUIC error: {0}")]
    Quic(String),
}

impl Error {
    /// Create a status error from a response status and its `Location` header.
    pub fn status(status: http::StatusCode, location: impl Into<String>) -> Self {
        let message = match status.canonical_reason() {
            Some(reason) => format!("{} {}", status.as_u16(), reason),
            None => status.as_u16().to_string(),
        };
        Self::Status {
            code: status.as_u16(),
            message,
            location: location.into(),
        }
    }

    /// Create a missing field error.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::Missing(field.into())
    }

    /// Create an HTTP protocol error.
    pub fn http_protocol(message: impl Into<String>) -> Self {
        Self::HttpProtocol(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a proxy error.
    pub fn proxy(message: impl Into<String>) -> Self {
        Self::Proxy(message.into())
    }

    /// Create a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Create a QUIC error.
    pub fn quic(message: impl Into<String>) -> Self {
        Self::Quic(message.into())
    }

    /// Status code carried by a [`Error::Status`], if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// `Location` carried by a [`Error::Status`], if non-empty.
    pub fn location(&self) -> Option<&str> {
        match self {
            Self::Status { location, .. } if !location.is_empty() => Some(location),
            _ => None,
        }
    }
}
