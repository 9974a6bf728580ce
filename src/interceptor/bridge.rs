//! Bridges the caller-facing `Request` to what the wire actually needs:
//! fills in `Host`, `User-Agent`, `Accept-Encoding`, and content headers,
//! then undoes the gzip it added if the server complied. Compression is
//! opt-in only, this crate never forces encoding on the caller.

use async_trait::async_trait;

use super::{Chain, Interceptor};
use crate::error::CallError;
use crate::request::Request;
use crate::response::Response;

pub struct BridgeInterceptor;

#[async_trait]
impl Interceptor for BridgeInterceptor {
    async fn intercept<'a>(&'a self, chain: Chain<'a>) -> Result<Response, CallError> {
        let mut request = chain.request().clone();

        if !request.headers.contains("host") {
            let host = request.host().to_string();
            request.headers.add("host", host);
        }
        if !request.headers.contains("user-agent") {
            request.headers.add("user-agent", concat!("vellum/", env!("CARGO_PKG_VERSION")));
        }

        let transparent_gzip = !request.headers.contains("accept-encoding");
        if transparent_gzip {
            request.headers.add("accept-encoding", "gzip");
        }

        if let Some(body) = request.body.as_ref() {
            if let Some(len) = body.content_length() {
                if !request.headers.contains("content-length") {
                    request.headers.add("content-length", len.to_string());
                }
            }
            if let Some(ct) = body.content_type() {
                if !request.headers.contains("content-type") {
                    request.headers.add("content-type", ct.to_string());
                }
            }
        }

        let response = chain.proceed(request).await?;

        if transparent_gzip && response.header("content-encoding").map(|v| v.eq_ignore_ascii_case("gzip")).unwrap_or(false) {
            return Ok(ungzip_response(response));
        }
        Ok(response)
    }
}

fn ungzip_response(response: Response) -> Response {
    use std::io::Read;
    let Some(mut body) = response.take_body() else { return response };
    let bytes = body.take_bytes();
    let mut decoder = flate2::read::GzDecoder::new(&bytes[..]);
    let mut decoded = Vec::new();
    if decoder.read_to_end(&mut decoded).is_err() {
        // Malformed gzip body: hand back what the server actually sent
        // rather than fail a call over a decode nicety.
        return response;
    }
    let mut headers = response.headers.clone();
    headers.remove("content-encoding");
    headers.remove("content-length");
    let content_type = response.header("content-type").map(str::to_string);
    crate::response::Response::builder(response.request().clone(), response.status.clone(), response.protocol)
        .headers(headers)
        .body(crate::body::ResponseBody::new(bytes::Bytes::from(decoded), content_type))
        .timing(response.sent_at, response.received_at)
        .network_response(response.network_response.clone())
        .cache_response(response.cache_response.clone())
        .prior_response(response.prior_response.clone())
        .build()
}
