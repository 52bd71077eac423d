//! # requests
//!
//! Fluent HTTP request building with selectable transports.
//!
//! A [`Builder`] assembles the URL, method, headers, query and body. The
//! resulting [`Request`] is sent through a [`Conn`]: HTTP/1.1 (optionally
//! through a proxy), HTTP/2 with a customized TLS ClientHello, or HTTP/3
//! over QUIC. Without an explicit transport a process-wide default is used
//! that negotiates HTTP/2 or HTTP/1.1 by ALPN and honours the proxy
//! environment.
//!
//! ```rust,ignore
//! use requests::{new_conn, Builder, ConnConfig};
//!
//! let conn = new_conn(Some(ConnConfig::default().disable_h2()))?;
//! let body = Builder::default()
//!     .url("https://example.com/")
//!     .build()?
//!     .with_transport(conn)
//!     .want_body()
//!     .await?;
//! ```

pub mod builder;
pub mod codec;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod request;
pub mod response;
pub mod timeouts;
pub mod transport;
pub mod version;

pub use builder::Builder;
pub use codec::{marshal_headers, marshal_json, marshal_query, unmarshal_headers};
pub use config::{new_conn, ConnConfig};
pub use error::{Error, Result};
pub use fingerprint::{ClientHello, Http2Settings};
pub use request::{Body, Request};
pub use response::Response;
pub use timeouts::Timeouts;
pub use transport::{Conn, Http1Conn, Http2Conn, Http3Conn, NativeConn};
pub use version::HttpVersion;
