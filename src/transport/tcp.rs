//! TCP dialing.
//!
//! Resolves the host, tries each address in turn and applies the socket
//! options every transport expects: `TCP_NODELAY` and a 30s keepalive.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{lookup_host, TcpStream};

use crate::error::{Error, Result};

/// Keepalive probe interval for idle pooled connections.
const KEEPALIVE: Duration = Duration::from_secs(30);

/// Connect to `host:port`, trying every resolved address.
pub async fn dial(host: &str, port: u16) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| Error::connection(format!("DNS resolution failed for {}:{}: {}", host, port, e)))?
        .collect();

    if addrs.is_empty() {
        return Err(Error::connection(format!("No addresses found for {}:{}", host, port)));
    }

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                configure_tcp_socket(&stream)
                    .map_err(|e| Error::connection(format!("Failed to configure TCP socket: {}", e)))?;
                tracing::debug!(%addr, "tcp connected");
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "tcp connect failed");
                last_err = Some(e);
            }
        }
    }

    Err(Error::connection(format!(
        "Failed to connect to {}:{}: {}",
        host,
        port,
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// Apply socket options to a connected stream.
pub fn configure_tcp_socket(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    SockRef::from(stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE))?;
    Ok(())
}
