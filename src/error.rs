//! Error kinds shared across the call, connection and cache layers.
//!
//! Mirrors the split the rest of the crate uses throughout: precise
//! `thiserror` enums where a caller or an inner layer needs to branch on the
//! failure, `anyhow` only at the outermost edges.

use thiserror::Error;

/// The user-visible classification of a failed call.
///
/// `execute`/`enqueue` surface exactly one of these to the caller; everything
/// more specific (an HPACK decode failure, a particular RST_STREAM error
/// code) is folded into the matching kind via `From` impls below.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("stream reset by peer: {0:?}")]
    StreamReset(crate::h2::ErrorCode),

    #[error("connection shutting down")]
    ConnectionShutdown,

    #[error("call canceled")]
    Canceled,

    #[error("trust failure: {0}")]
    TrustFailure(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CallError {
    /// Whether retrying this failure on a fresh route could plausibly
    /// help. Connectivity-failure retry is never attempted for protocol
    /// violations or trust failures.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            CallError::Protocol(_) | CallError::TrustFailure(_) | CallError::Canceled
        )
    }
}

impl From<crate::h2::Error> for CallError {
    fn from(err: crate::h2::Error) -> Self {
        match err {
            crate::h2::Error::Io(e) => CallError::Io(e),
            crate::h2::Error::Protocol(msg) => CallError::Protocol(msg),
            crate::h2::Error::StreamReset(code) => CallError::StreamReset(code),
            crate::h2::Error::GoAway { .. } => CallError::ConnectionShutdown,
        }
    }
}
