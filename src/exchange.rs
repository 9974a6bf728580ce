//! The exchange codec seam: one HTTP request/response pair driven over
//! whichever wire protocol the connection negotiated.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::body::ResponseBody;
use crate::error::CallError;
use crate::h2::{Connection, ErrorCode, Indexing, Stream};
use crate::headers::Headers;
use crate::request::Request;

/// Status line plus headers, read before the body is available.
pub struct ResponseHead {
    pub status_code: u16,
    pub headers: Headers,
}

/// Drives one request/response exchange on an already-established
/// connection. Implementations exist per wire protocol; callers never see
/// the difference beyond the `ProtocolLabel` they stamp on the `Response`.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn write_request_headers(&mut self, request: &Request) -> Result<(), CallError>;
    async fn write_request_body(&mut self, request: &Request) -> Result<(), CallError>;
    async fn finish_request(&mut self) -> Result<(), CallError>;
    async fn read_response_headers(&mut self) -> Result<ResponseHead, CallError>;
    async fn open_response_body_reader(&mut self) -> Result<ResponseBody, CallError>;
    async fn peek_trailers(&self) -> Option<Headers>;
    async fn cancel(&mut self);
}

/// HTTP/2 leg: one stream per exchange, pseudo-headers first, HPACK-coded
/// by the connection's shared encoder.
pub struct Http2Exchange {
    connection: Arc<Connection>,
    stream: Option<Arc<tokio::sync::Mutex<Stream>>>,
}

impl Http2Exchange {
    pub fn new(connection: Arc<Connection>) -> Self {
        Http2Exchange { connection, stream: None }
    }

    fn pseudo_and_fields(request: &Request) -> Vec<(String, String, Indexing)> {
        let mut fields = vec![
            (":method".to_string(), request.method.to_string(), Indexing::WithoutIndexing),
            (
                ":path".to_string(),
                format!(
                    "{}{}",
                    request.url.path(),
                    request.url.query().map(|q| format!("?{q}")).unwrap_or_default()
                ),
                Indexing::WithoutIndexing,
            ),
            (":scheme".to_string(), request.url.scheme().to_string(), Indexing::WithoutIndexing),
            (":authority".to_string(), request.host().to_string(), Indexing::Incremental),
        ];
        for (name, value) in request.headers.iter() {
            if name.eq_ignore_ascii_case("host") {
                continue;
            }
            fields.push((name.to_ascii_lowercase(), value.to_string(), Indexing::Incremental));
        }
        fields
    }
}

#[async_trait]
impl Exchange for Http2Exchange {
    async fn write_request_headers(&mut self, request: &Request) -> Result<(), CallError> {
        let fields = Self::pseudo_and_fields(request);
        let end_stream = request.body.is_none();
        let stream = self.connection.open_stream(&fields, end_stream, None).await?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn write_request_body(&mut self, request: &Request) -> Result<(), CallError> {
        let Some(body) = request.body.as_ref() else { return Ok(()) };
        let stream = self.stream.as_ref().expect("headers written before body");
        let mut buf: Vec<u8> = Vec::new();
        body.write_to(&mut buf).await.map_err(CallError::Io)?;
        self.connection.write_data(stream, Bytes::from(buf), true).await?;
        Ok(())
    }

    async fn finish_request(&mut self) -> Result<(), CallError> {
        Ok(())
    }

    async fn read_response_headers(&mut self) -> Result<ResponseHead, CallError> {
        let stream = self.stream.as_ref().expect("headers not written yet");
        let headers = loop {
            let s = stream.lock().await;
            if let Some(err) = s.terminal_error() {
                return Err(CallError::StreamReset(err.error_code));
            }
            if let Some(h) = s.response_headers.clone() {
                break h;
            }
            drop(s);
            tokio::task::yield_now().await;
        };
        let status_code: u16 = headers.get(":status").and_then(|v| v.parse().ok()).unwrap_or(0);
        let mut clean_headers = Headers::new();
        for (name, value) in headers.iter() {
            if !name.starts_with(':') {
                clean_headers.add(name, value);
            }
        }
        Ok(ResponseHead { status_code, headers: clean_headers })
    }

    async fn open_response_body_reader(&mut self) -> Result<ResponseBody, CallError> {
        let stream = self.stream.as_ref().expect("headers not written yet");
        let mut collected = BytesMut::new();
        loop {
            let mut s = stream.lock().await;
            let chunk = s
                .read_at_most(64 * 1024, None)
                .await
                .map_err(|e| CallError::StreamReset(e.error_code))?;
            if chunk.is_empty() && s.is_closed() {
                break;
            }
            if chunk.is_empty() {
                drop(s);
                tokio::task::yield_now().await;
                continue;
            }
            collected.extend_from_slice(&chunk);
        }
        Ok(ResponseBody::new(collected.freeze(), None))
    }

    async fn peek_trailers(&self) -> Option<Headers> {
        let stream = self.stream.as_ref()?;
        stream.lock().await.trailers.clone()
    }

    async fn cancel(&mut self) {
        if let Some(stream) = &self.stream {
            let id = stream.lock().await.id;
            let _ = self.connection.reset_stream(id, ErrorCode::Cancel).await;
        }
    }
}
