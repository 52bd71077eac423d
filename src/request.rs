//! A built request bound to a transport.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderValue, HOST, LOCATION};
use http::StatusCode;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::ConnConfig;
use crate::error::{Error, Result};
use crate::fingerprint::ClientHello;
use crate::response::Response;
use crate::timeouts::{with_deadline, DEFAULT_TOTAL_TIMEOUT};
use crate::transport::{Conn, Http1Conn, NativeConn};
use crate::version::HttpVersion;

/// Request payload.
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Bytes),
    /// Drained into memory when the request is sent.
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl Body {
    pub(crate) async fn into_bytes(self) -> Result<Bytes> {
        match self {
            Self::Empty => Ok(Bytes::new()),
            Self::Bytes(bytes) => Ok(bytes),
            Self::Reader(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Reader(_) => f.write_str("Reader"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

/// A request ready to send. Created by [`crate::Builder::build`].
///
/// Sending is one-shot: a second [`Request::send`] returns
/// [`Error::AlreadySent`].
pub struct Request {
    inner: http::Request<Body>,
    transport: Option<Arc<dyn Conn>>,
    timeout: Option<Duration>,
    error: Option<Error>,
    sent: bool,
}

impl Request {
    pub fn new(inner: http::Request<Body>) -> Self {
        Self {
            inner,
            transport: None,
            timeout: Some(DEFAULT_TOTAL_TIMEOUT),
            error: None,
            sent: false,
        }
    }

    /// Send through `transport` instead of the default one.
    pub fn with_transport(mut self, transport: Arc<dyn Conn>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Send through a plain HTTP/1.1 transport via `proxy`.
    /// An invalid proxy URL is reported by [`Request::send`].
    pub fn with_proxy_transport(mut self, proxy: &str) -> Self {
        let config = ConnConfig::default()
            .proxy(proxy)
            .client_hello(ClientHello::Native);
        match Http1Conn::new(&config) {
            Ok(conn) => self.transport = Some(Arc::new(conn)),
            Err(e) => self.fail(e),
        }
        self
    }

    /// Override the `Host` header; the connection still goes to the URL host.
    pub fn with_host(mut self, host: &str) -> Self {
        match HeaderValue::from_str(host) {
            Ok(value) => {
                self.inner.headers_mut().insert(HOST, value);
            }
            Err(e) => self.fail(Error::InvalidHeader(format!("Host {:?}: {}", host, e))),
        }
        self
    }

    /// Replace the total deadline (120 s by default).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Remove the total deadline.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn inner(&self) -> &http::Request<Body> {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut http::Request<Body> {
        &mut self.inner
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    fn fail(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// Send the request. Redirects are returned, not followed.
    pub async fn send(&mut self) -> Result<Response> {
        if self.sent {
            return Err(Error::AlreadySent);
        }
        self.sent = true;
        if let Some(err) = self.error.take() {
            return Err(err);
        }

        let transport = match &self.transport {
            Some(transport) => transport.clone(),
            None => default_transport(),
        };
        let body = std::mem::take(self.inner.body_mut());

        let mut request = http::Request::new(Bytes::new());
        *request.method_mut() = self.inner.method().clone();
        *request.uri_mut() = self.inner.uri().clone();
        *request.headers_mut() = self.inner.headers().clone();

        tracing::debug!(
            method = %request.method(),
            url = %request.uri(),
            version = %transport.version(),
            "sending request"
        );

        with_deadline(self.timeout, Error::TotalTimeout, async move {
            *request.body_mut() = body.into_bytes().await?;
            transport.round_trip(request).await
        })
        .await
    }

    /// Send and return the decoded body of a `200 OK` response.
    ///
    /// Any other status is [`Error::Status`]. A declared `Content-Length: 0`
    /// is [`Error::EmptyBody`], as is an HTTP/2 response that ends with its
    /// headers and declares no length.
    pub async fn want_body(&mut self) -> Result<Bytes> {
        let response = self.send().await?;
        if response.status() != StatusCode::OK {
            let location = response.header(LOCATION.as_str()).unwrap_or_default();
            return Err(Error::status(response.status(), location));
        }
        let empty = match response.content_length() {
            Some(len) => len == 0,
            None => response.version() == HttpVersion::Http2 && response.body().is_empty(),
        };
        if empty {
            return Err(Error::EmptyBody);
        }
        response.decoded_body()
    }

    /// [`Request::want_body`] decoded as JSON.
    pub async fn want_json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let body = self.want_body().await?;
        serde_json::from_slice(&body).map_err(|source| Error::Decode {
            source,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", self.inner.method())
            .field("uri", self.inner.uri())
            .field("timeout", &self.timeout)
            .field("sent", &self.sent)
            .finish()
    }
}

/// Process-wide default transport, created on first use.
fn default_transport() -> Arc<dyn Conn> {
    static DEFAULT: OnceLock<Arc<dyn Conn>> = OnceLock::new();
    DEFAULT
        .get_or_init(|| Arc::new(NativeConn::from_env()))
        .clone()
}
