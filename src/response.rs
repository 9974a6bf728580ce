//! `Response`. Fields beyond the body are immutable after construction;
//! the body is single-consumption.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::body::ResponseBody;
use crate::headers::Headers;
use crate::request::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolLabel {
    Http11,
    Http2,
}

impl ProtocolLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolLabel::Http11 => "http/1.1",
            ProtocolLabel::Http2 => "h2",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Status {
    pub code: u16,
    pub message: String,
}

impl Status {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn is_successful(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.code, 300 | 301 | 302 | 303 | 307 | 308)
    }
}

/// A read-only shell of a `Response` with the body stripped, used for the
/// `network_response`/`cache_response`/`prior_response` links so a response
/// chain never holds more than one live body.
#[derive(Debug, Clone)]
pub struct ResponseShell {
    pub status: Status,
    pub protocol: ProtocolLabel,
    pub headers: Headers,
    pub request_url: url::Url,
}

pub struct Response {
    pub request: Request,
    pub status: Status,
    pub protocol: ProtocolLabel,
    pub headers: Headers,
    pub handshake: Option<String>,
    body: Mutex<Option<ResponseBody>>,
    pub sent_at: Instant,
    pub received_at: Instant,
    pub network_response: Option<Arc<ResponseShell>>,
    pub cache_response: Option<Arc<ResponseShell>>,
    pub prior_response: Option<Arc<ResponseShell>>,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("protocol", &self.protocol)
            .field("headers", &self.headers)
            .finish()
    }
}

impl Response {
    pub fn builder(request: Request, status: Status, protocol: ProtocolLabel) -> ResponseBuilder {
        ResponseBuilder {
            request,
            status,
            protocol,
            headers: Headers::new(),
            handshake: None,
            body: None,
            sent_at: Instant::now(),
            received_at: Instant::now(),
            network_response: None,
            cache_response: None,
            prior_response: None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Takes ownership of the body. The invariant "a Response body is
    /// consumed at most once" is enforced by this returning `None` on the
    /// second call.
    pub fn take_body(&self) -> Option<ResponseBody> {
        self.body.lock().unwrap().take()
    }

    pub fn to_shell(&self) -> ResponseShell {
        ResponseShell {
            status: self.status.clone(),
            protocol: self.protocol,
            headers: self.headers.clone(),
            request_url: self.request.url.clone(),
        }
    }

    /// A new `Request` for this response's prior request, reusing it for a
    /// redirect or conditional re-issue.
    pub fn request(&self) -> &Request {
        &self.request
    }
}

pub struct ResponseBuilder {
    request: Request,
    status: Status,
    protocol: ProtocolLabel,
    headers: Headers,
    handshake: Option<String>,
    body: Option<ResponseBody>,
    sent_at: Instant,
    received_at: Instant,
    network_response: Option<Arc<ResponseShell>>,
    cache_response: Option<Arc<ResponseShell>>,
    prior_response: Option<Arc<ResponseShell>>,
}

impl ResponseBuilder {
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: ResponseBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn handshake(mut self, handshake: Option<String>) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn timing(mut self, sent_at: Instant, received_at: Instant) -> Self {
        self.sent_at = sent_at;
        self.received_at = received_at;
        self
    }

    pub fn network_response(mut self, shell: Option<Arc<ResponseShell>>) -> Self {
        self.network_response = shell;
        self
    }

    pub fn cache_response(mut self, shell: Option<Arc<ResponseShell>>) -> Self {
        self.cache_response = shell;
        self
    }

    pub fn prior_response(mut self, shell: Option<Arc<ResponseShell>>) -> Self {
        self.prior_response = shell;
        self
    }

    pub fn build(self) -> Response {
        Response {
            request: self.request,
            status: self.status,
            protocol: self.protocol,
            headers: self.headers,
            handshake: self.handshake,
            body: Mutex::new(self.body),
            sent_at: self.sent_at,
            received_at: self.received_at,
            network_response: self.network_response,
            cache_response: self.cache_response,
            prior_response: self.prior_response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;

    #[test]
    fn body_is_consumed_at_most_once() {
        let req = Request::new(Method::Get, url::Url::parse("https://example.com").unwrap());
        let resp = Response::builder(req, Status::new(200, "OK"), ProtocolLabel::Http2)
            .body(ResponseBody::new(bytes::Bytes::from_static(b"hi"), None))
            .build();
        assert!(resp.take_body().is_some());
        assert!(resp.take_body().is_none());
    }
}
