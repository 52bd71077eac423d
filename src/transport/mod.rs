//! HTTP transport implementations.
//!
//! - HTTP/1.1 and HTTP/2 via hyper + tokio-boring
//! - HTTP/3 via quiche
//!
//! Every transport implements [`Conn`]; [`crate::new_conn`] picks one from a
//! [`crate::ConnConfig`].

pub mod connector;
pub mod h1;
pub mod h2;
pub mod h3;
pub mod native;
pub mod pool;
pub mod proxy;
pub mod tcp;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, USER_AGENT};
use http::Uri;
use http_body_util::BodyExt;
use hyper::body::Incoming;

use crate::error::{Error, Result};
use crate::response::Response;
use crate::version::HttpVersion;

pub use h1::Http1Conn;
pub use h2::Http2Conn;
pub use h3::Http3Conn;
pub use native::NativeConn;

/// Default `User-Agent` when the caller sets none.
pub const DEFAULT_USER_AGENT: &str = concat!("requests/", env!("CARGO_PKG_VERSION"));

/// Headers that are meaningless (or forbidden) outside HTTP/1.1.
const CONNECTION_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// A transport that can execute one request and return the full response.
#[async_trait]
pub trait Conn: Send + Sync {
    /// Send `request` and read the whole response. Redirects are not followed.
    async fn round_trip(&self, request: http::Request<Bytes>) -> Result<Response>;

    /// Protocol this transport speaks.
    fn version(&self) -> HttpVersion;
}

/// Scheme, host and port a connection is made to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    pub scheme: String,
    /// Host without IPv6 brackets.
    pub host: String,
    pub port: u16,
}

impl Origin {
    /// Extract the origin from an absolute URI.
    pub fn from_uri(uri: &Uri) -> Result<Self> {
        let scheme = uri
            .scheme_str()
            .ok_or_else(|| Error::missing("URL scheme"))?
            .to_ascii_lowercase();
        let default_port = match scheme.as_str() {
            "https" => 443,
            "http" => 80,
            other => {
                return Err(Error::http_protocol(format!("Unsupported scheme: {}", other)));
            }
        };
        let host = uri
            .host()
            .ok_or_else(|| Error::missing("URL host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri.port_u16().unwrap_or(default_port);
        Ok(Self { scheme, host, port })
    }

    /// Whether the origin uses TLS.
    pub fn is_https(&self) -> bool {
        self.scheme == "https"
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}

/// Pool key: the origin, plus the proxy when one is in the path.
pub(crate) fn pool_key(origin: &Origin, proxy: Option<&proxy::Proxy>) -> String {
    match proxy {
        Some(proxy) => format!("{} via {}:{}", origin, proxy.host(), proxy.port()),
        None => origin.to_string(),
    }
}

/// Fill in headers every transport sends.
pub(crate) fn apply_default_headers(headers: &mut HeaderMap) {
    headers
        .entry(USER_AGENT)
        .or_insert(HeaderValue::from_static(DEFAULT_USER_AGENT));
}

/// Drop connection-specific headers for HTTP/2 and HTTP/3.
pub(crate) fn strip_connection_headers(headers: &mut HeaderMap) {
    for name in CONNECTION_HEADERS {
        headers.remove(*name);
    }
}

/// Read a hyper response to the end.
pub(crate) async fn collect_response(
    response: hyper::Response<Incoming>,
    version: HttpVersion,
    uri: &Uri,
) -> Result<Response> {
    let (parts, body) = response.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| Error::http_protocol(format!("Failed to read body: {}", e)))?
        .to_bytes();

    Ok(Response::new(parts.status, parts.headers, body, version).with_url(uri.to_string()))
}
