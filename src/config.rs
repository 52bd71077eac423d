//! Transport configuration and selection.

use std::sync::Arc;

use crate::error::Result;
use crate::fingerprint::{ClientHello, Http2Settings};
use crate::timeouts::Timeouts;
use crate::transport::pool::DEFAULT_MAX_IDLE_PER_HOST;
use crate::transport::{Conn, Http1Conn, Http2Conn, Http3Conn};
use crate::version::HttpVersion;

/// Options for [`new_conn`].
///
/// Selection, first match wins:
/// 1. `proxy` set or `disable_h2` → HTTP/1.1
/// 2. `enable_h3` → HTTP/3
/// 3. otherwise → HTTP/2
#[derive(Debug, Clone)]
pub struct ConnConfig {
    /// `http://[user:pass@]host:port` forward proxy; selects HTTP/1.1 in [`new_conn`].
    pub proxy: Option<String>,
    pub disable_h2: bool,
    pub enable_h3: bool,
    /// `None` uses the transport's own default hello.
    pub client_hello: Option<ClientHello>,
    pub timeouts: Timeouts,
    /// Extra trust anchors, DER or PEM.
    pub root_certificates: Vec<Vec<u8>>,
    pub max_idle_per_host: usize,
    pub http2: Http2Settings,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            disable_h2: false,
            enable_h3: false,
            client_hello: None,
            timeouts: Timeouts::default(),
            root_certificates: Vec::new(),
            max_idle_per_host: DEFAULT_MAX_IDLE_PER_HOST,
            http2: Http2Settings::default(),
        }
    }
}

impl ConnConfig {
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn disable_h2(mut self) -> Self {
        self.disable_h2 = true;
        self
    }

    pub fn enable_h3(mut self) -> Self {
        self.enable_h3 = true;
        self
    }

    pub fn client_hello(mut self, hello: ClientHello) -> Self {
        self.client_hello = Some(hello);
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn add_root_certificate(mut self, cert: impl Into<Vec<u8>>) -> Self {
        self.root_certificates.push(cert.into());
        self
    }

    pub fn max_idle_per_host(mut self, max: usize) -> Self {
        self.max_idle_per_host = max;
        self
    }

    pub fn http2_settings(mut self, settings: Http2Settings) -> Self {
        self.http2 = settings;
        self
    }

    /// Protocol [`new_conn`] will pick for this config.
    pub fn protocol(&self) -> HttpVersion {
        if self.proxy.is_some() || self.disable_h2 {
            HttpVersion::Http1_1
        } else if self.enable_h3 {
            HttpVersion::Http3
        } else {
            HttpVersion::Http2
        }
    }
}

/// Build a transport from `config`; `None` means the defaults (HTTP/2).
pub fn new_conn(config: Option<ConnConfig>) -> Result<Arc<dyn Conn>> {
    let config = config.unwrap_or_default();
    let conn: Arc<dyn Conn> = match config.protocol() {
        HttpVersion::Http1_1 => Arc::new(Http1Conn::new(&config)?),
        HttpVersion::Http3 => Arc::new(Http3Conn::new(&config)?),
        _ => Arc::new(Http2Conn::new(&config)?),
    };
    tracing::debug!(version = %conn.version(), "transport created");
    Ok(conn)
}
