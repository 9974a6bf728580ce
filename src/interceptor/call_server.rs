//! Drives one request/response exchange over an already-open `Exchange`:
//! write the headers, write the body, flush, then read back the status line
//! and headers. The body reader is left open for the caller to consume
//! lazily via the returned `ResponseBody`.

use crate::body::ResponseBody;
use crate::error::CallError;
use crate::exchange::{Exchange, ResponseHead};
use crate::request::Request;

pub async fn execute(
    exchange: &mut dyn Exchange,
    request: &Request,
) -> Result<(ResponseHead, ResponseBody), CallError> {
    exchange.write_request_headers(request).await?;
    exchange.write_request_body(request).await?;
    exchange.finish_request().await?;
    let head = exchange.read_response_headers().await?;
    let body = exchange.open_response_body_reader().await?;
    Ok((head, body))
}
