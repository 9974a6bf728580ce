//! Request/response body abstractions.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// A request body. Bodies are either one-shot (cannot be retransmitted,
/// e.g. a streamed upload already partially consumed) or replayable
/// (`Bytes`, a file). The retry/follow-up policy only retries or redirects
/// replayable bodies.
#[async_trait]
pub trait RequestBody: Send + Sync {
    /// `None` means an unknown (chunked) length; callers map that to `-1`
    /// on the wire where relevant.
    fn content_length(&self) -> Option<u64>;
    fn content_type(&self) -> Option<&str> {
        None
    }
    fn is_one_shot(&self) -> bool {
        false
    }
    /// Whether the body and the response may be in flight concurrently on
    /// the same exchange.
    fn is_duplex(&self) -> bool {
        false
    }
    async fn write_to(&self, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> std::io::Result<()>;
}

/// The common, replayable case: a fixed in-memory payload.
pub struct BytesBody {
    bytes: Bytes,
    content_type: Option<String>,
}

impl BytesBody {
    pub fn new(bytes: impl Into<Bytes>, content_type: Option<String>) -> Self {
        Self { bytes: bytes.into(), content_type }
    }
}

#[async_trait]
impl RequestBody for BytesBody {
    fn content_length(&self) -> Option<u64> {
        Some(self.bytes.len() as u64)
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    async fn write_to(&self, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> std::io::Result<()> {
        sink.write_all(&self.bytes).await
    }
}

/// A response body: single-consumption byte stream with optional
/// content-type and declared length (`None` == -1, unknown).
pub struct ResponseBody {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    bytes: Option<Bytes>,
}

impl ResponseBody {
    pub fn new(bytes: Bytes, content_type: Option<String>) -> Self {
        let content_length = Some(bytes.len() as u64);
        Self { content_type, content_length, bytes: Some(bytes) }
    }

    /// Consumes the body. A second call observes an empty result: a
    /// response body is consumed at most once. Callers that need strict
    /// enforcement should track consumption themselves, this type models
    /// the data, not the policy.
    pub fn take_bytes(&mut self) -> Bytes {
        self.bytes.take().unwrap_or_default()
    }

    pub fn peek_bytes(&self) -> Option<&Bytes> {
        self.bytes.as_ref()
    }
}
