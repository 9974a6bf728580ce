//! Minimal HTTP/1.1 exchange leg, used when ALPN does not negotiate h2
//! (RFC 7230-style request/status line framing, Content-Length bodies and
//! basic chunked transfer-encoding on read).

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::body::ResponseBody;
use crate::error::CallError;
use crate::exchange::{Exchange, ResponseHead};
use crate::headers::Headers;
use crate::request::Request;
use crate::transport::BoxedSocket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFraming {
    ContentLength(usize),
    Chunked,
    None,
}

pub struct Http1Exchange {
    reader: BufReader<BoxedSocket>,
    framing: BodyFraming,
}

impl Http1Exchange {
    pub fn new(socket: BoxedSocket) -> Self {
        Http1Exchange { reader: BufReader::new(socket), framing: BodyFraming::None }
    }

    /// Reclaims the underlying socket so the pool can offer it for the next
    /// exchange. Any bytes already buffered past the body we read are
    /// discarded with them, which is only correct because we read exactly
    /// `Content-Length`/chunked-terminator bytes above.
    pub fn into_socket(self) -> BoxedSocket {
        self.reader.into_inner()
    }
}

async fn read_line(reader: &mut BufReader<BoxedSocket>) -> Result<String, CallError> {
    let mut line = String::new();
    reader.read_line(&mut line).await.map_err(CallError::Io)?;
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

#[async_trait]
impl Exchange for Http1Exchange {
    async fn write_request_headers(&mut self, request: &Request) -> Result<(), CallError> {
        let path = format!(
            "{}{}",
            request.url.path(),
            request.url.query().map(|q| format!("?{q}")).unwrap_or_default()
        );
        let mut out = format!("{} {} HTTP/1.1\r\n", request.method, path);
        if !request.headers.contains("host") {
            out.push_str(&format!("host: {}\r\n", request.host()));
        }
        let content_length = request.body.as_ref().and_then(|b| b.content_length());
        for (name, value) in request.headers.iter() {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        if let Some(len) = content_length {
            out.push_str(&format!("content-length: {len}\r\n"));
        }
        out.push_str("\r\n");
        self.reader.get_mut().write_all(out.as_bytes()).await.map_err(CallError::Io)?;
        Ok(())
    }

    async fn write_request_body(&mut self, request: &Request) -> Result<(), CallError> {
        if let Some(body) = request.body.as_ref() {
            body.write_to(self.reader.get_mut()).await.map_err(CallError::Io)?;
        }
        Ok(())
    }

    async fn finish_request(&mut self) -> Result<(), CallError> {
        self.reader.get_mut().flush().await.map_err(CallError::Io)?;
        Ok(())
    }

    async fn read_response_headers(&mut self) -> Result<ResponseHead, CallError> {
        let status_line = read_line(&mut self.reader).await?;
        let status_code: u16 = status_line
            .splitn(3, ' ')
            .nth(1)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CallError::Protocol(format!("malformed status line: {status_line:?}")))?;

        let mut headers = Headers::new();
        loop {
            let line = read_line(&mut self.reader).await?;
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.add(name.trim(), value.trim());
            }
        }
        self.framing = if let Some(len) = headers.get("content-length").and_then(|v| v.parse().ok()) {
            BodyFraming::ContentLength(len)
        } else if headers.get("transfer-encoding").map(|v| v.eq_ignore_ascii_case("chunked")).unwrap_or(false) {
            BodyFraming::Chunked
        } else {
            BodyFraming::None
        };
        Ok(ResponseHead { status_code, headers })
    }

    async fn open_response_body_reader(&mut self) -> Result<ResponseBody, CallError> {
        use tokio::io::AsyncReadExt;
        let mut body = BytesMut::new();
        match self.framing {
            BodyFraming::ContentLength(len) => {
                let mut buf = vec![0u8; len];
                self.reader.read_exact(&mut buf).await.map_err(CallError::Io)?;
                body.extend_from_slice(&buf);
            }
            BodyFraming::Chunked => loop {
                let size_line = read_line(&mut self.reader).await?;
                let size = usize::from_str_radix(size_line.trim(), 16)
                    .map_err(|_| CallError::Protocol(format!("bad chunk size: {size_line:?}")))?;
                if size == 0 {
                    // trailing CRLF after the zero chunk; trailers unsupported.
                    let _ = read_line(&mut self.reader).await?;
                    break;
                }
                let mut chunk = vec![0u8; size];
                self.reader.read_exact(&mut chunk).await.map_err(CallError::Io)?;
                let mut crlf = [0u8; 2];
                self.reader.read_exact(&mut crlf).await.map_err(CallError::Io)?;
                body.extend_from_slice(&chunk);
            },
            BodyFraming::None => {}
        }
        Ok(ResponseBody::new(body.freeze(), None))
    }

    async fn peek_trailers(&self) -> Option<Headers> {
        None
    }

    async fn cancel(&mut self) {}
}
