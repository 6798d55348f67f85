//! Product transfer transport.
//!
//! The worker owns staging and promotion; a `Transport` only moves bytes:
//! one authenticated GET whose body is handed to a sink chunk by chunk.

mod http;
mod parse;

pub use http::CurlTransport;
pub use parse::canonical_reason;

use crate::retry::ErrorKind;

/// What the transport observed about one finished (or refused) request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInfo {
    /// Final HTTP status after redirects.
    pub status: u32,
    /// Reason phrase of the final response (canonical phrase if the server sent none).
    pub reason: String,
    /// Declared body length, when the server sent one that can be trusted.
    pub content_length: Option<u64>,
    /// Body bytes delivered to the sink.
    pub received: u64,
}

/// Transfer failure below the HTTP status level.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// libcurl reported an error (connection reset, timeout, bad chunk framing...).
    #[error("{0}")]
    Curl(#[from] curl::Error),
    /// Stream-level failure reported by a non-curl transport.
    #[error("stream error: {0}")]
    Stream(String),
    /// The sink refused a chunk (local write failure or cancellation).
    #[error("sink: {0}")]
    Sink(#[source] std::io::Error),
}

impl TransportError {
    /// Retry classification of a transport failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Curl(e) => crate::retry::classify_curl_error(e),
            TransportError::Stream(_) => ErrorKind::Connection,
            TransportError::Sink(_) => ErrorKind::Other,
        }
    }
}

/// Chunk consumer handed to a transport. Only bodies of 200 responses reach it.
pub type Sink<'a> = dyn FnMut(&[u8]) -> std::io::Result<()> + 'a;

/// Something that can fetch a product URL with a bearer token.
///
/// Implementations are blocking; the driver runs them on the blocking pool.
/// The body of a non-200 response must not be passed to `sink`.
pub trait Transport: Send + Sync {
    fn fetch(
        &self,
        url: &str,
        token: &str,
        sink: &mut Sink<'_>,
    ) -> Result<TransferInfo, TransportError>;
}
