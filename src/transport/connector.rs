//! BoringSSL TLS connector.
//!
//! Dials TCP (directly or through a proxy tunnel), then runs the TLS
//! handshake with the configured ClientHello and ALPN list. SNI is the
//! target host without its port.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use boring::ssl::{SslConnector, SslMethod, SslSessionCacheMode};
use boring::x509::X509;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_boring::SslStream;

use crate::error::{Error, Result};
use crate::fingerprint::ClientHello;
use crate::timeouts::with_deadline;
use crate::transport::proxy::{tunnel, Proxy};
use crate::transport::tcp::dial;
use crate::transport::Origin;

/// ALPN protocols offered in the ClientHello.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alpn {
    /// No ALPN extension.
    None,
    /// `http/1.1` only.
    Http1,
    /// `h2` only.
    H2,
    /// `h2`, then `http/1.1`.
    H2Http1,
}

impl Alpn {
    /// ALPN list in wire format.
    fn wire(&self) -> Option<&'static [u8]> {
        match self {
            Self::None => None,
            Self::Http1 => Some(b"\x08http/1.1"),
            Self::H2 => Some(b"\x02h2"),
            Self::H2Http1 => Some(b"\x02h2\x08http/1.1"),
        }
    }
}

/// BoringSSL-based connector shared by the TCP transports.
#[derive(Clone)]
pub struct BoringConnector {
    client_hello: ClientHello,
    alpn: Alpn,
    root_certs: Arc<Vec<Vec<u8>>>,
    connect_timeout: Option<Duration>,
}

impl BoringConnector {
    /// Create a connector; ALPN is dropped when the hello carries none.
    pub fn new(client_hello: ClientHello, alpn: Alpn) -> Self {
        let alpn = if client_hello.sends_alpn() {
            alpn
        } else {
            Alpn::None
        };
        Self {
            client_hello,
            alpn,
            root_certs: Arc::new(Vec::new()),
            connect_timeout: None,
        }
    }

    /// Add custom root certificates (DER or PEM).
    pub fn with_root_certificates(mut self, certs: Vec<Vec<u8>>) -> Self {
        self.root_certs = Arc::new(certs);
        self
    }

    /// Bound DNS + TCP + tunnel + TLS handshake.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// ALPN list this connector offers.
    pub fn alpn(&self) -> Alpn {
        self.alpn
    }

    fn configure_ssl(&self) -> Result<SslConnector> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())
            .map_err(|e| Error::tls(format!("Failed to create SSL connector: {}", e)))?;

        for cert_bytes in self.root_certs.iter() {
            let cert = X509::from_der(cert_bytes).or_else(|_| X509::from_pem(cert_bytes));
            match cert {
                Ok(cert) => builder
                    .cert_store_mut()
                    .add_cert(cert)
                    .map_err(|e| Error::tls(format!("Failed to add root certificate: {}", e)))?,
                Err(e) => tracing::warn!(error = %e, "ignoring unparseable root certificate"),
            }
        }

        if let Some(fp) = self.client_hello.tls_fingerprint() {
            fp.apply(&mut builder, true)?;
        }

        builder.set_session_cache_mode(SslSessionCacheMode::CLIENT);

        if let Some(protos) = self.alpn.wire() {
            builder
                .set_alpn_protos(protos)
                .map_err(|e| Error::tls(format!("Failed to set ALPN: {}", e)))?;
        }

        Ok(builder.build())
    }

    /// Connect to `origin`, optionally through `proxy`.
    ///
    /// For `http` origins behind a proxy the returned stream is connected to
    /// the proxy itself and requests must use absolute form.
    pub async fn connect(&self, origin: &Origin, proxy: Option<&Proxy>) -> Result<MaybeHttpsStream> {
        with_deadline(
            self.connect_timeout,
            Error::ConnectTimeout,
            self.connect_inner(origin, proxy),
        )
        .await
    }

    async fn connect_inner(&self, origin: &Origin, proxy: Option<&Proxy>) -> Result<MaybeHttpsStream> {
        let tcp_stream = match proxy {
            Some(proxy) => {
                let mut stream = dial(proxy.host(), proxy.port()).await?;
                if origin.is_https() {
                    tunnel(&mut stream, &origin.host, origin.port, proxy).await?;
                }
                stream
            }
            None => dial(&origin.host, origin.port).await?,
        };

        if !origin.is_https() {
            return Ok(MaybeHttpsStream::Http(tcp_stream));
        }

        let ssl_config = self
            .configure_ssl()?
            .configure()
            .map_err(|e| Error::tls(format!("Failed to configure SSL: {}", e)))?;

        let ssl_stream = tokio_boring::connect(ssl_config, &origin.host, tcp_stream)
            .await
            .map_err(|e| Error::tls(format!("TLS handshake with {} failed: {}", origin.host, e)))?;

        let stream = MaybeHttpsStream::Https(ssl_stream);
        tracing::debug!(host = %origin.host, alpn = ?stream.alpn_protocol(), "tls established");
        Ok(stream)
    }
}

/// Negotiated ALPN protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlpnProtocol {
    /// HTTP/2 ("h2")
    H2,
    /// HTTP/1.1 ("http/1.1")
    Http1,
    /// No ALPN negotiated or unknown protocol
    Unknown,
}

impl AlpnProtocol {
    /// Check if HTTP/2 was negotiated.
    pub fn is_h2(&self) -> bool {
        matches!(self, Self::H2)
    }
}

/// Stream that can be either HTTP (plain TCP) or HTTPS (TLS).
#[derive(Debug)]
pub enum MaybeHttpsStream {
    /// Plain TCP stream for HTTP.
    Http(TcpStream),
    /// TLS-wrapped stream for HTTPS.
    Https(SslStream<TcpStream>),
}

impl MaybeHttpsStream {
    /// Get the negotiated ALPN protocol; plain TCP reports `Unknown`.
    pub fn alpn_protocol(&self) -> AlpnProtocol {
        match self {
            MaybeHttpsStream::Http(_) => AlpnProtocol::Unknown,
            MaybeHttpsStream::Https(stream) => match stream.ssl().selected_alpn_protocol() {
                Some(b"h2") => AlpnProtocol::H2,
                Some(b"http/1.1") => AlpnProtocol::Http1,
                _ => AlpnProtocol::Unknown,
            },
        }
    }

    /// Check if HTTP/2 was negotiated via ALPN.
    pub fn is_h2(&self) -> bool {
        self.alpn_protocol().is_h2()
    }
}

impl AsyncRead for MaybeHttpsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeHttpsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_flush(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_alpn_hello_drops_alpn() {
        let connector = BoringConnector::new(ClientHello::RandomizedNoAlpn, Alpn::Http1);
        assert_eq!(connector.alpn(), Alpn::None);

        let connector = BoringConnector::new(ClientHello::Randomized, Alpn::H2);
        assert_eq!(connector.alpn(), Alpn::H2);
    }

    #[test]
    fn test_configure_ssl_for_every_hello() {
        for hello in [
            ClientHello::Randomized,
            ClientHello::RandomizedNoAlpn,
            ClientHello::Chrome,
            ClientHello::Firefox,
            ClientHello::Native,
        ] {
            BoringConnector::new(hello, Alpn::H2Http1)
                .configure_ssl()
                .unwrap();
        }
    }

    #[test]
    fn test_alpn_wire_format() {
        assert_eq!(Alpn::H2Http1.wire().unwrap(), b"\x02h2\x08http/1.1");
        assert!(Alpn::None.wire().is_none());
    }
}
