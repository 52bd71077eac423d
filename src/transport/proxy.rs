//! HTTP forward proxy support.
//!
//! `http` targets are sent to the proxy in absolute form; `https` targets go
//! through a `CONNECT` tunnel before the TLS handshake.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::HeaderValue;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use url::Url;

use crate::error::{Error, Result};

/// Upper bound on a CONNECT reply header block.
const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

/// A parsed `http://` proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    host: String,
    port: u16,
    authorization: Option<HeaderValue>,
}

impl Proxy {
    /// Parse a proxy URL. A bare `host:port` is treated as `http://host:port`.
    pub fn parse(proxy: &str) -> Result<Self> {
        let url = match Url::parse(proxy) {
            Ok(url) if url.has_host() => url,
            _ => Url::parse(&format!("http://{}", proxy))
                .map_err(|e| Error::proxy(format!("invalid proxy URL {:?}: {}", proxy, e)))?,
        };

        if url.scheme() != "http" {
            return Err(Error::proxy(format!("unsupported proxy scheme: {}", url.scheme())));
        }

        let host = url
            .host_str()
            .ok_or_else(|| Error::proxy(format!("proxy URL {:?} has no host", proxy)))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url.port().unwrap_or(80);

        let authorization = if url.username().is_empty() {
            None
        } else {
            let user = percent_decode(url.username());
            let pass = url.password().map(percent_decode).unwrap_or_default();
            let token = STANDARD.encode(format!("{}:{}", user, pass));
            let value = HeaderValue::from_str(&format!("Basic {}", token))
                .map_err(|e| Error::proxy(format!("invalid proxy credentials: {}", e)))?;
            Some(value)
        };

        Ok(Self {
            host,
            port,
            authorization,
        })
    }

    /// Proxy host without brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Proxy port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `Proxy-Authorization` value derived from the URL userinfo.
    pub fn authorization(&self) -> Option<&HeaderValue> {
        self.authorization.as_ref()
    }
}

/// Proxies read from `HTTP_PROXY`, `HTTPS_PROXY` and `NO_PROXY`.
#[derive(Debug, Clone, Default)]
pub struct EnvProxy {
    http: Option<Proxy>,
    https: Option<Proxy>,
    no_proxy: Vec<String>,
}

impl EnvProxy {
    /// Snapshot the proxy environment. Unparseable proxy values are ignored.
    pub fn from_env() -> Self {
        let read = |upper: &str, lower: &str| {
            std::env::var(upper)
                .or_else(|_| std::env::var(lower))
                .ok()
                .filter(|v| !v.is_empty())
        };
        let parse = |value: Option<String>| {
            value.and_then(|v| match Proxy::parse(&v) {
                Ok(proxy) => Some(proxy),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring proxy from environment");
                    None
                }
            })
        };

        Self {
            http: parse(read("HTTP_PROXY", "http_proxy")),
            https: parse(read("HTTPS_PROXY", "https_proxy")),
            no_proxy: read("NO_PROXY", "no_proxy")
                .map(|v| parse_no_proxy(&v))
                .unwrap_or_default(),
        }
    }

    /// Build from explicit values, mainly for tests.
    pub fn new(http: Option<Proxy>, https: Option<Proxy>, no_proxy: &str) -> Self {
        Self {
            http,
            https,
            no_proxy: parse_no_proxy(no_proxy),
        }
    }

    /// Proxy to use for a target, if any.
    pub fn for_target(&self, scheme: &str, host: &str) -> Option<&Proxy> {
        if self.bypass(host) {
            return None;
        }
        match scheme {
            "https" => self.https.as_ref(),
            "http" => self.http.as_ref(),
            _ => None,
        }
    }

    fn bypass(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        // Loopback never goes through an environment proxy.
        if host == "localhost"
            || host
                .parse::<std::net::IpAddr>()
                .is_ok_and(|ip| ip.is_loopback())
        {
            return true;
        }
        self.no_proxy.iter().any(|entry| {
            entry == "*"
                || host == *entry
                || entry
                    .strip_prefix('.')
                    .map_or_else(
                        || host.ends_with(&format!(".{}", entry)),
                        |suffix| host == suffix || host.ends_with(&format!(".{}", suffix)),
                    )
        })
    }
}

fn parse_no_proxy(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| {
            let entry = entry.trim().to_ascii_lowercase();
            // Drop a port suffix; matching is by host only.
            match entry.rsplit_once(':') {
                Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => {
                    host.to_string()
                }
                _ => entry,
            }
        })
        .filter(|entry| !entry.is_empty())
        .collect()
}

fn percent_decode(s: &str) -> String {
    form_urlencoded::parse(format!("x={}", s.replace('+', "%2B")).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

/// Open a `CONNECT` tunnel to `host:port` over an established proxy stream.
pub async fn tunnel<S>(stream: &mut S, host: &str, port: u16, proxy: &Proxy) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let authority = if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    };

    let mut request = format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n", authority);
    if let Some(auth) = proxy.authorization() {
        let auth = auth
            .to_str()
            .map_err(|e| Error::proxy(format!("invalid proxy credentials: {}", e)))?;
        request.push_str(&format!("Proxy-Authorization: {}\r\n", auth));
    }
    request.push_str("\r\n");

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| Error::proxy(format!("Failed to write CONNECT: {}", e)))?;
    stream
        .flush()
        .await
        .map_err(|e| Error::proxy(format!("Failed to flush CONNECT: {}", e)))?;

    // Read byte-wise so nothing past the header block is consumed from the tunnel.
    let mut buf = Vec::with_capacity(512);
    loop {
        let byte = stream
            .read_u8()
            .await
            .map_err(|e| Error::proxy(format!("Failed to read CONNECT response: {}", e)))?;
        buf.push(byte);
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
        if buf.len() > MAX_CONNECT_RESPONSE {
            return Err(Error::proxy("CONNECT response headers too large"));
        }
    }

    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut response = httparse::Response::new(&mut headers);
    match response.parse(&buf) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(Error::proxy("incomplete CONNECT response"));
        }
        Err(e) => return Err(Error::proxy(format!("malformed CONNECT response: {}", e))),
    }

    let code = response.code.unwrap_or(0);
    if !(200..300).contains(&code) {
        return Err(Error::proxy(format!(
            "CONNECT {} rejected: {} {}",
            authority,
            code,
            response.reason.unwrap_or("")
        )));
    }

    tracing::debug!(%authority, "proxy tunnel established");
    Ok(())
}
