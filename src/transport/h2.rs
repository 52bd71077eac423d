//! HTTP/2 transport via hyper.
//!
//! One multiplexed connection per origin, negotiated through ALPN `h2`.
//! SETTINGS and window sizes come from [`Http2Settings`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::HOST;
use http::uri::{Authority, Uri};
use http::Version;
use http_body_util::Full;
use hyper_util::rt::TokioIo;

use crate::config::ConnConfig;
use crate::error::{Error, Result};
use crate::fingerprint::{ClientHello, Http2Settings};
use crate::response::Response;
use crate::timeouts::with_deadline;
use crate::transport::connector::{Alpn, BoringConnector, MaybeHttpsStream};
use crate::transport::pool::{H2Sender, Pool};
use crate::transport::{
    apply_default_headers, collect_response, pool_key, strip_connection_headers, Conn, Origin,
};
use crate::version::HttpVersion;

/// HTTP/2 transport. Only `https` URLs are accepted.
pub struct Http2Conn {
    connector: BoringConnector,
    settings: Http2Settings,
    pool: Pool,
    ttfb: Option<Duration>,
    total: Option<Duration>,
}

impl Http2Conn {
    /// Build from a config; the default hello is `Randomized`.
    pub fn new(config: &ConnConfig) -> Result<Self> {
        let hello = config.client_hello.unwrap_or(ClientHello::Randomized);
        if !hello.sends_alpn() {
            return Err(Error::tls(format!(
                "{:?} sends no ALPN and cannot negotiate HTTP/2",
                hello
            )));
        }
        let connector = BoringConnector::new(hello, Alpn::H2)
            .with_root_certificates(config.root_certificates.clone())
            .with_connect_timeout(config.timeouts.connect);

        Ok(Self {
            connector,
            settings: config.http2.clone(),
            pool: Pool::new(config.max_idle_per_host),
            ttfb: config.timeouts.ttfb,
            total: config.timeouts.total,
        })
    }

    async fn exchange(&self, request: http::Request<Bytes>) -> Result<Response> {
        let origin = Origin::from_uri(request.uri())?;
        if !origin.is_https() {
            return Err(Error::http_protocol(format!(
                "HTTP/2 transport requires https, got {}",
                origin
            )));
        }

        let key = pool_key(&origin, None);
        let sender = match self.pool.h2(&key) {
            Some(sender) => sender,
            None => self.dial(&origin, &key).await?,
        };

        send(sender, &request, self.ttfb).await
    }

    /// Open the shared connection for `key`, or join one a concurrent
    /// caller finished while this one waited.
    async fn dial(&self, origin: &Origin, key: &str) -> Result<H2Sender> {
        let _gate = self.pool.dial_gate(key).await;
        if let Some(sender) = self.pool.h2(key) {
            return Ok(sender);
        }

        let stream = self.connector.connect(origin, None).await?;
        if !stream.is_h2() {
            return Err(Error::tls(format!("{} did not negotiate h2 via ALPN", origin)));
        }
        let sender = handshake(stream, &self.settings).await?;
        self.pool.insert_h2(key, sender.clone());
        Ok(sender)
    }
}

#[async_trait]
impl Conn for Http2Conn {
    async fn round_trip(&self, request: http::Request<Bytes>) -> Result<Response> {
        with_deadline(self.total, Error::TotalTimeout, self.exchange(request)).await
    }

    fn version(&self) -> HttpVersion {
        HttpVersion::Http2
    }
}

/// Run the HTTP/2 preface and SETTINGS exchange on a negotiated stream.
pub(crate) async fn handshake(stream: MaybeHttpsStream, settings: &Http2Settings) -> Result<H2Sender> {
    let (sender, conn) = settings
        .builder()
        .handshake(TokioIo::new(stream))
        .await
        .map_err(|e| Error::http_protocol(format!("HTTP/2 handshake failed: {}", e)))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::error!("HTTP/2 connection error: {}", e);
        }
    });

    Ok(sender)
}

/// Send one request on a (possibly shared) HTTP/2 connection.
pub(crate) async fn send(
    mut sender: H2Sender,
    request: &http::Request<Bytes>,
    ttfb: Option<Duration>,
) -> Result<Response> {
    sender
        .ready()
        .await
        .map_err(|e| Error::connection(format!("HTTP/2 connection unusable: {}", e)))?;

    let prepared = prepare_request(request)?;
    let response = with_deadline(ttfb, Error::TtfbTimeout, async {
        sender
            .send_request(prepared)
            .await
            .map_err(|e| Error::http_protocol(format!("HTTP/2 request failed: {}", e)))
    })
    .await?;

    collect_response(response, HttpVersion::Http2, request.uri()).await
}

/// A `Host` header becomes `:authority`; connection-specific headers go.
pub(crate) fn prepare_request(request: &http::Request<Bytes>) -> Result<http::Request<Full<Bytes>>> {
    let mut headers = request.headers().clone();
    let mut uri = request.uri().clone();

    if let Some(host) = headers.remove(HOST) {
        let authority = Authority::try_from(host.as_bytes())
            .map_err(|e| Error::InvalidHeader(format!("Host {:?}: {}", host, e)))?;
        let mut parts = uri.into_parts();
        parts.authority = Some(authority);
        uri = Uri::from_parts(parts)
            .map_err(|e| Error::http_protocol(format!("Invalid URI: {}", e)))?;
    }
    strip_connection_headers(&mut headers);
    apply_default_headers(&mut headers);

    let mut out = http::Request::new(Full::new(request.body().clone()));
    *out.method_mut() = request.method().clone();
    *out.uri_mut() = uri;
    *out.version_mut() = Version::HTTP_2;
    *out.headers_mut() = headers;
    Ok(out)
}
