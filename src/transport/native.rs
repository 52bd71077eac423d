//! Default transport: BoringSSL defaults, ALPN `h2,http/1.1`, environment proxies.
//!
//! HTTPS origins speak whatever ALPN selected; plain HTTP is always HTTP/1.1.
//! An origin that negotiated h2 once keeps its shared connection until it closes.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::ConnConfig;
use crate::error::{Error, Result};
use crate::fingerprint::{ClientHello, Http2Settings};
use crate::response::Response;
use crate::timeouts::with_deadline;
use crate::transport::connector::{Alpn, BoringConnector};
use crate::transport::pool::Pool;
use crate::transport::proxy::{EnvProxy, Proxy};
use crate::transport::{h1, h2, pool_key, Conn, Origin};
use crate::version::HttpVersion;

/// Where proxies come from.
#[derive(Debug, Clone)]
enum ProxySource {
    Env(EnvProxy),
    Fixed(Proxy),
}

/// Transport used when a request names none.
pub struct NativeConn {
    connector: BoringConnector,
    proxies: ProxySource,
    settings: Http2Settings,
    pool: Pool,
    ttfb: Option<Duration>,
    total: Option<Duration>,
}

impl NativeConn {
    /// Default settings with proxies from `HTTP_PROXY`/`HTTPS_PROXY`/`NO_PROXY`.
    pub fn from_env() -> Self {
        Self::build(&ConnConfig::default(), ProxySource::Env(EnvProxy::from_env()))
    }

    /// Build from a config. `config.proxy` replaces the environment;
    /// `disable_h2` and `enable_h3` are ignored.
    pub fn new(config: &ConnConfig) -> Result<Self> {
        let proxies = match config.proxy.as_deref() {
            Some(proxy) => ProxySource::Fixed(Proxy::parse(proxy)?),
            None => ProxySource::Env(EnvProxy::from_env()),
        };
        Ok(Self::build(config, proxies))
    }

    fn build(config: &ConnConfig, proxies: ProxySource) -> Self {
        let hello = config.client_hello.unwrap_or(ClientHello::Native);
        let connector = BoringConnector::new(hello, Alpn::H2Http1)
            .with_root_certificates(config.root_certificates.clone())
            .with_connect_timeout(config.timeouts.connect);

        Self {
            connector,
            proxies,
            settings: config.http2.clone(),
            pool: Pool::new(config.max_idle_per_host),
            ttfb: config.timeouts.ttfb,
            total: config.timeouts.total,
        }
    }

    fn proxy_for(&self, origin: &Origin) -> Option<&Proxy> {
        match &self.proxies {
            ProxySource::Env(env) => env.for_target(&origin.scheme, &origin.host),
            ProxySource::Fixed(proxy) => Some(proxy),
        }
    }

    async fn exchange(&self, request: http::Request<Bytes>) -> Result<Response> {
        let origin = Origin::from_uri(request.uri())?;
        let proxy = self.proxy_for(&origin);
        let key = pool_key(&origin, proxy);
        let via = proxy.filter(|_| !origin.is_https());

        if let Some(sender) = self.pool.h2(&key) {
            return h2::send(sender, &request, self.ttfb).await;
        }
        if let Some(response) = h1::send_on_idle(&self.pool, &key, &request, via, self.ttfb).await? {
            return Ok(response);
        }

        // Only https origins can negotiate h2.
        let gate = if origin.is_https() {
            Some(self.pool.dial_gate(&key).await)
        } else {
            None
        };
        if let Some(sender) = self.pool.h2(&key) {
            drop(gate);
            return h2::send(sender, &request, self.ttfb).await;
        }

        let stream = self.connector.connect(&origin, proxy).await?;
        if stream.is_h2() {
            let sender = h2::handshake(stream, &self.settings).await?;
            self.pool.insert_h2(&key, sender.clone());
            drop(gate);
            return h2::send(sender, &request, self.ttfb).await;
        }
        drop(gate);
        h1::send_on_new(&self.pool, &key, stream, &request, via, self.ttfb).await
    }
}

impl Default for NativeConn {
    fn default() -> Self {
        Self::from_env()
    }
}

#[async_trait]
impl Conn for NativeConn {
    async fn round_trip(&self, request: http::Request<Bytes>) -> Result<Response> {
        with_deadline(self.total, Error::TotalTimeout, self.exchange(request)).await
    }

    fn version(&self) -> HttpVersion {
        HttpVersion::Auto
    }
}
