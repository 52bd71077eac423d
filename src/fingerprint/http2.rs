//! HTTP/2 connection settings (SETTINGS frame and flow-control windows).

use hyper::client::conn::http2::Builder;
use hyper_util::rt::TokioExecutor;

/// Largest frame size RFC 9113 allows (2^24 - 1).
pub const MAX_FRAME_SIZE_LIMIT: u32 = 0x00ff_ffff;

/// HTTP/2 settings applied to the client side of a connection.
///
/// The header table stays at the protocol default of 4096 octets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Http2Settings {
    pub max_header_list_size: u32,
    pub max_frame_size: u32,
    pub initial_stream_window_size: u32,
    pub initial_connection_window_size: u32,
}

impl Default for Http2Settings {
    fn default() -> Self {
        Self {
            max_header_list_size: 0xffff_ffff,
            max_frame_size: MAX_FRAME_SIZE_LIMIT,
            initial_stream_window_size: 4 << 20,
            initial_connection_window_size: 1 << 30,
        }
    }
}

impl Http2Settings {
    /// Build a hyper HTTP/2 client builder carrying these settings.
    pub(crate) fn builder(&self) -> Builder<TokioExecutor> {
        let mut builder = Builder::new(TokioExecutor::new());
        builder
            .max_header_list_size(self.max_header_list_size)
            .max_frame_size(self.max_frame_size.clamp(16_384, MAX_FRAME_SIZE_LIMIT))
            .initial_stream_window_size(self.initial_stream_window_size)
            .initial_connection_window_size(self.initial_connection_window_size);
        builder
    }
}
