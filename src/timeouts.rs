//! Timeout configuration for request dispatch.
//!
//! # Timeout Types
//!
//! - **connect**: DNS + TCP + TLS/QUIC handshake (and proxy tunnel) deadline
//! - **ttfb**: Time-to-first-byte (request sent until response headers received)
//! - **total**: Absolute deadline for the whole `send`, body included
//!
//! # Usage
//!
//! ```rust,ignore
//! use requests::{new_conn, Builder, ConnConfig, Timeouts};
//! use std::time::Duration;
//!
//! let conn = new_conn(Some(
//!     ConnConfig::default().timeouts(Timeouts::default().ttfb(Duration::from_secs(5))),
//! ))?;
//! let body = Builder::default()
//!     .url("https://example.com/")
//!     .build()?
//!     .with_transport(conn)
//!     .with_timeout(Duration::from_secs(10))
//!     .want_body()
//!     .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default connect deadline.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default total deadline for one `send`.
pub const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout configuration for a request.
///
/// When a field is `None`, no timeout is applied for that phase.
///
/// - **connect**: Does NOT reset. Deadline for establishing the transport connection.
/// - **ttfb**: Does NOT reset. Deadline from request sent to headers received.
/// - **total**: Does NOT reset. Caps connect + request + response body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// Timeout for establishing connection (DNS + TCP + TLS/QUIC handshake).
    pub connect: Option<Duration>,

    /// Time from request written until response headers received.
    pub ttfb: Option<Duration>,

    /// Total request deadline.
    pub total: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Some(DEFAULT_CONNECT_TIMEOUT),
            ttfb: None,
            total: Some(DEFAULT_TOTAL_TIMEOUT),
        }
    }
}

impl Timeouts {
    /// Create Timeouts with every phase unbounded.
    pub fn none() -> Self {
        Self {
            connect: None,
            ttfb: None,
            total: None,
        }
    }

    /// Set connect timeout.
    pub fn connect(mut self, timeout: Duration) -> Self {
        self.connect = Some(timeout);
        self
    }

    /// Set TTFB (time-to-first-byte) timeout.
    pub fn ttfb(mut self, timeout: Duration) -> Self {
        self.ttfb = Some(timeout);
        self
    }

    /// Set total request deadline.
    pub fn total(mut self, timeout: Duration) -> Self {
        self.total = Some(timeout);
        self
    }

    /// Disable connect timeout.
    pub fn no_connect_timeout(mut self) -> Self {
        self.connect = None;
        self
    }

    /// Disable TTFB timeout.
    pub fn no_ttfb_timeout(mut self) -> Self {
        self.ttfb = None;
        self
    }

    /// Disable total timeout.
    pub fn no_total_timeout(mut self) -> Self {
        self.total = None;
        self
    }
}

/// Run `fut` under an optional deadline, mapping expiry through `on_expire`.
pub(crate) async fn with_deadline<T, F>(
    deadline: Option<Duration>,
    on_expire: fn(Duration) -> Error,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| on_expire(limit))?,
        None => fut.await,
    }
}
