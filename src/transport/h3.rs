//! HTTP/3 transport via quiche.
//!
//! Each round trip opens a fresh QUIC connection, sends one request on
//! stream 0 and closes the connection once the response stream finishes.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use boring::ssl::{SslContextBuilder, SslMethod, SslVerifyMode};
use boring::x509::X509;
use bytes::Bytes;
use getrandom::fill as getrandom_fill;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use quiche::h3::NameValue;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::config::ConnConfig;
use crate::error::{Error, Result};
use crate::fingerprint::ClientHello;
use crate::response::Response;
use crate::timeouts::with_deadline;
use crate::transport::{apply_default_headers, strip_connection_headers, Conn, Origin};
use crate::version::HttpVersion;

/// Maximum datagram size for QUIC.
const MAX_DATAGRAM_SIZE: usize = 1350;

/// QUIC idle timeout in milliseconds.
const QUIC_IDLE_TIMEOUT_MS: u64 = 30_000;

/// Initial maximum data for QUIC connection.
const INITIAL_MAX_DATA: u64 = 10_000_000;

/// Upper bound on a single socket wait, so quiche timers are serviced.
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// HTTP/3 `H3_NO_ERROR` application close code.
const H3_NO_ERROR: u64 = 0x100;

/// HTTP/3 transport over QUIC. Only `https` URLs are accepted.
pub struct Http3Conn {
    client_hello: ClientHello,
    root_certs: Vec<Vec<u8>>,
    connect_timeout: Option<Duration>,
    ttfb: Option<Duration>,
    total: Option<Duration>,
}

impl Http3Conn {
    /// Build from a config; the default hello is `Native`.
    pub fn new(config: &ConnConfig) -> Result<Self> {
        let conn = Self {
            client_hello: config.client_hello.unwrap_or(ClientHello::Native),
            root_certs: config.root_certificates.clone(),
            connect_timeout: config.timeouts.connect,
            ttfb: config.timeouts.ttfb,
            total: config.timeouts.total,
        };
        // Surface TLS configuration errors at construction time.
        conn.configure_quic()?;
        Ok(conn)
    }

    /// Configure quiche QUIC connection settings.
    fn configure_quic(&self) -> Result<quiche::Config> {
        let mut ssl = SslContextBuilder::new(SslMethod::tls_client())
            .map_err(|e| Error::tls(format!("Failed to create SSL context: {}", e)))?;
        ssl.set_default_verify_paths()
            .map_err(|e| Error::tls(format!("Failed to load system roots: {}", e)))?;
        for cert_bytes in &self.root_certs {
            match X509::from_der(cert_bytes).or_else(|_| X509::from_pem(cert_bytes)) {
                Ok(cert) => ssl
                    .cert_store_mut()
                    .add_cert(cert)
                    .map_err(|e| Error::tls(format!("Failed to add root certificate: {}", e)))?,
                Err(e) => tracing::warn!(error = %e, "ignoring unparseable root certificate"),
            }
        }
        ssl.set_verify(SslVerifyMode::PEER);

        // QUIC is TLS 1.3 only, whose suites BoringSSL does not let us pick.
        if let Some(fp) = self.client_hello.tls_fingerprint() {
            fp.apply(&mut ssl, false)?;
        }

        let mut config = quiche::Config::with_boring_ssl_ctx_builder(quiche::PROTOCOL_VERSION, ssl)
            .map_err(|e| Error::quic(format!("Failed to create quiche config: {}", e)))?;

        config
            .set_application_protos(quiche::h3::APPLICATION_PROTOCOL)
            .map_err(|e| Error::quic(format!("Failed to set ALPN: {}", e)))?;
        config.verify_peer(true);
        config.set_max_idle_timeout(QUIC_IDLE_TIMEOUT_MS);
        config.set_max_recv_udp_payload_size(65535);
        config.set_max_send_udp_payload_size(MAX_DATAGRAM_SIZE);
        config.set_initial_max_data(INITIAL_MAX_DATA);
        config.set_initial_max_stream_data_bidi_local(1_000_000);
        config.set_initial_max_stream_data_bidi_remote(1_000_000);
        config.set_initial_max_stream_data_uni(1_000_000);
        config.set_initial_max_streams_bidi(100);
        config.set_initial_max_streams_uni(100);
        config.set_disable_active_migration(true);

        Ok(config)
    }

    /// Resolve, bind and complete the QUIC handshake.
    async fn connect(&self, origin: &Origin) -> Result<(UdpSocket, quiche::Connection, SocketAddr)> {
        let peer = tokio::net::lookup_host((origin.host.as_str(), origin.port))
            .await
            .map_err(|e| Error::connection(format!("Failed to resolve {}: {}", origin, e)))?
            .next()
            .ok_or_else(|| Error::connection(format!("No address found for {}", origin)))?;

        let bind: SocketAddr = if peer.is_ipv6() {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        let local = socket.local_addr()?;

        let scid_bytes = generate_cid()?;
        let scid = quiche::ConnectionId::from_ref(&scid_bytes);
        let mut config = self.configure_quic()?;
        let mut conn = quiche::connect(Some(&origin.host), &scid, local, peer, &mut config)
            .map_err(|e| Error::quic(format!("Failed to create QUIC connection: {}", e)))?;

        loop {
            flush_egress(&mut conn, &socket, peer).await?;

            if conn.is_established() {
                break;
            }
            if conn.is_closed() {
                return Err(Error::quic(format!(
                    "QUIC connection closed during handshake: peer={:?} local={:?}",
                    conn.peer_error(),
                    conn.local_error()
                )));
            }

            wait_ingress(&socket, &mut conn).await?;
        }

        tracing::debug!(%origin, %peer, "quic established");
        Ok((socket, conn, peer))
    }

    async fn exchange(&self, request: http::Request<Bytes>) -> Result<Response> {
        let origin = Origin::from_uri(request.uri())?;
        if !origin.is_https() {
            return Err(Error::http_protocol(format!(
                "HTTP/3 transport requires https, got {}",
                origin
            )));
        }

        let (socket, mut conn, peer) =
            with_deadline(self.connect_timeout, Error::ConnectTimeout, self.connect(&origin)).await?;

        let h3_config = quiche::h3::Config::new()
            .map_err(|e| Error::quic(format!("Failed to create HTTP/3 config: {}", e)))?;
        let mut h3_conn = quiche::h3::Connection::with_transport(&mut conn, &h3_config)
            .map_err(|e| Error::quic(format!("Failed to create HTTP/3 connection: {}", e)))?;

        let headers = request_headers(&request)?;
        let body = request.body();
        let stream_id = h3_conn
            .send_request(&mut conn, &headers, body.is_empty())
            .map_err(|e| Error::quic(format!("Failed to send HTTP/3 request: {}", e)))?;

        let mut written = 0;
        while written < body.len() {
            match h3_conn.send_body(&mut conn, stream_id, &body[written..], true) {
                Ok(n) => written += n,
                Err(quiche::h3::Error::Done) | Err(quiche::h3::Error::StreamBlocked) => {
                    flush_egress(&mut conn, &socket, peer).await?;
                    wait_ingress(&socket, &mut conn).await?;
                }
                Err(e) => return Err(Error::quic(format!("Failed to send HTTP/3 body: {}", e))),
            }
        }
        flush_egress(&mut conn, &socket, peer).await?;

        let mut exchange = ResponseState::default();
        let mut read = read_response(&mut exchange, &mut h3_conn, &mut conn, &socket, peer, stream_id);
        let status = with_deadline(self.ttfb, Error::TtfbTimeout, read.head()).await?;
        read.body().await?;

        let _ = conn.close(true, H3_NO_ERROR, b"");
        let _ = flush_egress(&mut conn, &socket, peer).await;

        Ok(Response::new(status, exchange.headers, Bytes::from(exchange.body), HttpVersion::Http3)
            .with_url(request.uri().to_string()))
    }
}

#[async_trait]
impl Conn for Http3Conn {
    async fn round_trip(&self, request: http::Request<Bytes>) -> Result<Response> {
        with_deadline(self.total, Error::TotalTimeout, self.exchange(request)).await
    }

    fn version(&self) -> HttpVersion {
        HttpVersion::Http3
    }
}

/// Pseudo-headers first, then the caller's headers minus `host` and
/// connection-specific ones.
fn request_headers(request: &http::Request<Bytes>) -> Result<Vec<quiche::h3::Header>> {
    let uri = request.uri();
    let mut headers = request.headers().clone();
    let authority = match headers.remove(http::header::HOST) {
        Some(host) => host.as_bytes().to_vec(),
        None => uri
            .authority()
            .map(|a| a.as_str().as_bytes().to_vec())
            .ok_or_else(|| Error::missing("URL host"))?,
    };
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|pq| !pq.is_empty())
        .unwrap_or("/");

    strip_connection_headers(&mut headers);
    apply_default_headers(&mut headers);

    let mut out = vec![
        quiche::h3::Header::new(b":method", request.method().as_str().as_bytes()),
        quiche::h3::Header::new(b":scheme", b"https"),
        quiche::h3::Header::new(b":authority", &authority),
        quiche::h3::Header::new(b":path", path.as_bytes()),
    ];
    out.extend(
        headers
            .iter()
            .map(|(name, value)| quiche::h3::Header::new(name.as_str().as_bytes(), value.as_bytes())),
    );
    Ok(out)
}

#[derive(Default)]
struct ResponseState {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
    finished: bool,
}

struct ResponseReader<'a> {
    state: &'a mut ResponseState,
    h3_conn: &'a mut quiche::h3::Connection,
    conn: &'a mut quiche::Connection,
    socket: &'a UdpSocket,
    peer: SocketAddr,
    stream_id: u64,
}

fn read_response<'a>(
    state: &'a mut ResponseState,
    h3_conn: &'a mut quiche::h3::Connection,
    conn: &'a mut quiche::Connection,
    socket: &'a UdpSocket,
    peer: SocketAddr,
    stream_id: u64,
) -> ResponseReader<'a> {
    ResponseReader {
        state,
        h3_conn,
        conn,
        socket,
        peer,
        stream_id,
    }
}

impl ResponseReader<'_> {
    /// Drive the connection until the final response head arrives.
    async fn head(&mut self) -> Result<StatusCode> {
        loop {
            self.poll_events()?;
            if let Some(status) = self.state.status {
                return Ok(status);
            }
            self.step().await?;
        }
    }

    /// Drive the connection until the response stream finishes.
    async fn body(mut self) -> Result<()> {
        loop {
            self.poll_events()?;
            if self.state.finished {
                return Ok(());
            }
            self.step().await?;
        }
    }

    async fn step(&mut self) -> Result<()> {
        if self.conn.is_closed() {
            return Err(Error::quic(format!(
                "QUIC connection closed before response completed: peer={:?}",
                self.conn.peer_error()
            )));
        }
        flush_egress(self.conn, self.socket, self.peer).await?;
        wait_ingress(self.socket, self.conn).await
    }

    fn poll_events(&mut self) -> Result<()> {
        loop {
            match self.h3_conn.poll(self.conn) {
                Ok((id, quiche::h3::Event::Headers { list, .. })) if id == self.stream_id => {
                    self.on_headers(list)?;
                }
                Ok((id, quiche::h3::Event::Data)) if id == self.stream_id => {
                    let mut buf = vec![0u8; 65535];
                    while let Ok(amount) = self.h3_conn.recv_body(self.conn, id, &mut buf) {
                        if amount == 0 {
                            break;
                        }
                        self.state.body.extend_from_slice(&buf[..amount]);
                    }
                }
                Ok((id, quiche::h3::Event::Finished)) if id == self.stream_id => {
                    self.state.finished = true;
                }
                Ok((id, quiche::h3::Event::Reset(code))) if id == self.stream_id => {
                    return Err(Error::http_protocol(format!("HTTP/3 stream reset: {:#x}", code)));
                }
                Ok((_, quiche::h3::Event::GoAway)) if self.state.status.is_none() => {
                    return Err(Error::http_protocol("HTTP/3 GOAWAY before response"));
                }
                Ok(_) => {}
                Err(quiche::h3::Error::Done) => return Ok(()),
                Err(e) => return Err(Error::quic(format!("HTTP/3 poll error: {}", e))),
            }
        }
    }

    fn on_headers(&mut self, list: Vec<quiche::h3::Header>) -> Result<()> {
        let mut status = None;
        let mut headers = HeaderMap::new();
        for header in &list {
            if header.name() == b":status" {
                status = std::str::from_utf8(header.value())
                    .ok()
                    .and_then(|s| s.parse::<u16>().ok())
                    .and_then(|code| StatusCode::from_u16(code).ok());
                continue;
            }
            if header.name().starts_with(b":") {
                continue;
            }
            let name = HeaderName::from_bytes(header.name())
                .map_err(|e| Error::InvalidHeader(e.to_string()))?;
            let value = HeaderValue::from_bytes(header.value())
                .map_err(|e| Error::InvalidHeader(e.to_string()))?;
            headers.append(name, value);
        }

        let status = status.ok_or_else(|| Error::http_protocol("HTTP/3 response without :status"))?;
        // Interim (1xx) heads are skipped; a later block is trailers.
        if status.is_informational() || self.state.status.is_some() {
            return Ok(());
        }
        self.state.status = Some(status);
        self.state.headers = headers;
        Ok(())
    }
}

/// Generate a random connection ID.
fn generate_cid() -> Result<Vec<u8>> {
    let mut cid = vec![0u8; quiche::MAX_CONN_ID_LEN];
    getrandom_fill(&mut cid)
        .map_err(|e| Error::quic(format!("Failed to generate connection ID: {}", e)))?;
    Ok(cid)
}

/// Flush egress packets from QUIC connection to UDP socket.
async fn flush_egress(conn: &mut quiche::Connection, socket: &UdpSocket, peer: SocketAddr) -> Result<()> {
    let mut out = [0u8; MAX_DATAGRAM_SIZE];
    loop {
        match conn.send(&mut out) {
            Ok((0, _)) => break,
            Ok((len, _)) => {
                socket.send_to(&out[..len], peer).await?;
            }
            Err(quiche::Error::Done) => break,
            Err(e) => return Err(Error::quic(format!("Failed to send QUIC packet: {}", e))),
        }
    }
    Ok(())
}

/// Wait for one datagram or the next quiche timer, whichever comes first.
async fn wait_ingress(socket: &UdpSocket, conn: &mut quiche::Connection) -> Result<()> {
    let wait = conn
        .timeout()
        .map_or(MAX_POLL_INTERVAL, |t| t.min(MAX_POLL_INTERVAL));

    match timeout(wait, recv_ingress(socket, conn)).await {
        Ok(result) => result,
        Err(_) => {
            conn.on_timeout();
            Ok(())
        }
    }
}

/// Receive ingress packets from UDP socket and process with QUIC connection.
async fn recv_ingress(socket: &UdpSocket, conn: &mut quiche::Connection) -> Result<()> {
    let mut buf = vec![0u8; 65535];

    match socket.recv_from(&mut buf).await {
        Ok((len, from)) => {
            let recv_info = quiche::RecvInfo {
                from,
                to: socket.local_addr()?,
            };
            match conn.recv(&mut buf[..len], recv_info) {
                Ok(_) | Err(quiche::Error::Done) => Ok(()),
                Err(e) => Err(Error::quic(format!("Failed to process QUIC packet: {}", e))),
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}
