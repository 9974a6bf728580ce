//! HTTP/2 error codes (RFC 7540 §7).

use num_derive::{FromPrimitive, ToPrimitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    pub fn from_u32(v: u32) -> ErrorCode {
        use num_traits::FromPrimitive;
        ErrorCode::from_u32_checked(v).unwrap_or(ErrorCode::InternalError)
    }

    fn from_u32_checked(v: u32) -> Option<ErrorCode> {
        use num_traits::FromPrimitive;
        <ErrorCode as FromPrimitive>::from_u32(v)
    }

    pub fn to_u32(self) -> u32 {
        use num_traits::ToPrimitive;
        ToPrimitive::to_u32(&self).unwrap()
    }
}

/// Connection- or stream-scoped failures raised by the framing codec,
/// HPACK coder, and connection/stream engines.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A malformed frame, bad header block, or other connection-level
    /// protocol violation. The connection must be closed with a GOAWAY
    /// carrying this message's implied `PROTOCOL_ERROR`.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer reset a single stream with this error code; the connection
    /// otherwise continues.
    #[error("stream reset: {0:?}")]
    StreamReset(ErrorCode),

    /// The peer (or we) sent GOAWAY; `last_stream_id` is the highest stream
    /// guaranteed to be processed.
    #[error("connection going away: {error_code:?} last_stream_id={last_stream_id}")]
    GoAway { last_stream_id: u32, error_code: ErrorCode },
}

impl From<crate::h2::hpack::DecodeError> for Error {
    fn from(e: crate::h2::hpack::DecodeError) -> Self {
        Error::Protocol(format!("hpack: {e}"))
    }
}
