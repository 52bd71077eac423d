//! HTTP/1.1 transport via hyper.
//!
//! Connections are pooled per origin (and proxy). A request on a reused
//! connection that dies before the response starts is retried once on a
//! newly dialed connection when the method is idempotent.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderValue, HOST, PROXY_AUTHORIZATION};
use http::Uri;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;

use crate::config::ConnConfig;
use crate::error::{Error, Result};
use crate::fingerprint::ClientHello;
use crate::response::Response;
use crate::timeouts::with_deadline;
use crate::transport::connector::{Alpn, BoringConnector, MaybeHttpsStream};
use crate::transport::pool::{H1Sender, Pool};
use crate::transport::proxy::Proxy;
use crate::transport::{apply_default_headers, collect_response, pool_key, Conn, Origin};
use crate::version::HttpVersion;

/// HTTP/1.1 transport, optionally through a forward proxy.
pub struct Http1Conn {
    connector: BoringConnector,
    proxy: Option<Proxy>,
    pool: Pool,
    ttfb: Option<Duration>,
    total: Option<Duration>,
}

impl Http1Conn {
    /// Build from a config; the default hello is `RandomizedNoAlpn`.
    pub fn new(config: &ConnConfig) -> Result<Self> {
        let proxy = config.proxy.as_deref().map(Proxy::parse).transpose()?;
        let hello = config.client_hello.unwrap_or(ClientHello::RandomizedNoAlpn);
        let connector = BoringConnector::new(hello, Alpn::Http1)
            .with_root_certificates(config.root_certificates.clone())
            .with_connect_timeout(config.timeouts.connect);

        Ok(Self {
            connector,
            proxy,
            pool: Pool::new(config.max_idle_per_host),
            ttfb: config.timeouts.ttfb,
            total: config.timeouts.total,
        })
    }

    /// Idle connections currently pooled for `uri`'s origin.
    pub fn idle_connections(&self, uri: &Uri) -> Result<usize> {
        let origin = Origin::from_uri(uri)?;
        Ok(self.pool.idle_h1(&pool_key(&origin, self.proxy.as_ref())))
    }
}

#[async_trait]
impl Conn for Http1Conn {
    async fn round_trip(&self, request: http::Request<Bytes>) -> Result<Response> {
        with_deadline(self.total, Error::TotalTimeout, self.exchange(request)).await
    }

    fn version(&self) -> HttpVersion {
        HttpVersion::Http1_1
    }
}

impl Http1Conn {
    async fn exchange(&self, request: http::Request<Bytes>) -> Result<Response> {
        let origin = Origin::from_uri(request.uri())?;
        let proxy = self.proxy.as_ref();
        let key = pool_key(&origin, proxy);
        let via = proxy.filter(|_| !origin.is_https());

        if let Some(response) = send_on_idle(&self.pool, &key, &request, via, self.ttfb).await? {
            return Ok(response);
        }

        let stream = self.connector.connect(&origin, proxy).await?;
        send_on_new(&self.pool, &key, stream, &request, via, self.ttfb).await
    }
}

/// Try one idle connection for `key`. `Ok(None)` means the caller should
/// dial: either nothing was idle, or the pooled connection died before
/// answering an idempotent request.
pub(crate) async fn send_on_idle(
    pool: &Pool,
    key: &str,
    request: &http::Request<Bytes>,
    via: Option<&Proxy>,
    ttfb: Option<Duration>,
) -> Result<Option<Response>> {
    let Some(mut sender) = pool.checkout_h1(key) else {
        return Ok(None);
    };
    if sender.ready().await.is_err() {
        return Ok(None);
    }
    match dispatch(&mut sender, prepare_request(request, via)?, ttfb).await? {
        Ok(response) => finish(pool, key, sender, response, request.uri()).await.map(Some),
        Err(e) if is_retryable(request, &e) => {
            tracing::debug!(%key, error = %e, "reused connection failed, retrying on a new one");
            Ok(None)
        }
        Err(e) => Err(Error::http_protocol(format!("HTTP/1.1 request failed: {}", e))),
    }
}

/// Run a request on a freshly connected stream, then pool the connection.
pub(crate) async fn send_on_new(
    pool: &Pool,
    key: &str,
    stream: MaybeHttpsStream,
    request: &http::Request<Bytes>,
    via: Option<&Proxy>,
    ttfb: Option<Duration>,
) -> Result<Response> {
    let mut sender = handshake(stream).await?;
    let response = dispatch(&mut sender, prepare_request(request, via)?, ttfb)
        .await?
        .map_err(|e| Error::http_protocol(format!("HTTP/1.1 request failed: {}", e)))?;
    finish(pool, key, sender, response, request.uri()).await
}

async fn handshake(stream: MaybeHttpsStream) -> Result<H1Sender> {
    let (sender, conn) = http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| Error::http_protocol(format!("HTTP/1.1 handshake failed: {}", e)))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::error!("HTTP/1.1 connection error: {}", e);
        }
    });

    Ok(sender)
}

/// Send and wait for the response head, bounded by the TTFB deadline.
/// The outer error is the deadline; the inner one is hyper's.
async fn dispatch(
    sender: &mut H1Sender,
    request: http::Request<Full<Bytes>>,
    ttfb: Option<Duration>,
) -> Result<std::result::Result<hyper::Response<Incoming>, hyper::Error>> {
    with_deadline(ttfb, Error::TtfbTimeout, async {
        Ok(sender.send_request(request).await)
    })
    .await
}

async fn finish(
    pool: &Pool,
    key: &str,
    sender: H1Sender,
    response: hyper::Response<Incoming>,
    uri: &Uri,
) -> Result<Response> {
    let response = collect_response(response, HttpVersion::Http1_1, uri).await?;
    pool.checkin_h1(key, sender);
    Ok(response)
}

fn is_retryable(request: &http::Request<Bytes>, err: &hyper::Error) -> bool {
    request.method().is_idempotent() && (err.is_canceled() || err.is_incomplete_message())
}

/// Build the wire request: origin form, or absolute form when `via` is a
/// proxy carrying plain-HTTP traffic.
pub(crate) fn prepare_request(
    request: &http::Request<Bytes>,
    via: Option<&Proxy>,
) -> Result<http::Request<Full<Bytes>>> {
    let uri = if via.is_some() {
        request.uri().clone()
    } else {
        let target = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .filter(|pq| !pq.is_empty())
            .unwrap_or("/");
        target
            .parse::<Uri>()
            .map_err(|e| Error::http_protocol(format!("Invalid request target {}: {}", target, e)))?
    };

    let mut headers = request.headers().clone();
    if !headers.contains_key(HOST) {
        let authority = request
            .uri()
            .authority()
            .ok_or_else(|| Error::missing("URL host"))?;
        let host = authority.as_str().rsplit('@').next().unwrap_or_default();
        let value = HeaderValue::from_str(host).map_err(|e| Error::InvalidHeader(e.to_string()))?;
        headers.insert(HOST, value);
    }
    if let Some(auth) = via.and_then(Proxy::authorization) {
        headers.insert(PROXY_AUTHORIZATION, auth.clone());
    }
    apply_default_headers(&mut headers);

    let mut out = http::Request::new(Full::new(request.body().clone()));
    *out.method_mut() = request.method().clone();
    *out.uri_mut() = uri;
    *out.headers_mut() = headers;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> http::Request<Bytes> {
        http::Request::builder()
            .uri(uri)
            .body(Bytes::new())
            .unwrap()
    }

    #[test]
    fn test_origin_form_and_host() {
        let out = prepare_request(&request("http://example.com:8080/a/b?x=1"), None).unwrap();
        assert_eq!(out.uri().to_string(), "/a/b?x=1");
        assert_eq!(out.headers()[HOST], "example.com:8080");
        assert!(out.headers().contains_key(http::header::USER_AGENT));
    }

    #[test]
    fn test_empty_path_becomes_slash() {
        let out = prepare_request(&request("http://example.com"), None).unwrap();
        assert_eq!(out.uri().to_string(), "/");
    }

    #[test]
    fn test_host_override_kept() {
        let mut req = request("http://127.0.0.1/");
        req.headers_mut()
            .insert(HOST, HeaderValue::from_static("virtual.test"));
        let out = prepare_request(&req, None).unwrap();
        assert_eq!(out.headers()[HOST], "virtual.test");
    }

    #[test]
    fn test_absolute_form_through_proxy() {
        let proxy = Proxy::parse("http://u:p@proxy:3128").unwrap();
        let out = prepare_request(&request("http://example.com/x?y=z"), Some(&proxy)).unwrap();
        assert_eq!(out.uri().to_string(), "http://example.com/x?y=z");
        assert_eq!(out.headers()[PROXY_AUTHORIZATION], "Basic dTpw");
    }
}
