//! The terminal interceptor: acquires a pooled connection, runs the
//! exchange over it, and returns the connection to the pool. There is no
//! `chain.proceed` call here because nothing comes after the network.

use async_trait::async_trait;

use super::{call_server, Chain, Interceptor};
use crate::address::{Address, TlsConfig};
use crate::error::CallError;
use crate::exchange::Exchange;
use crate::http1::Http1Exchange;
use crate::pool::PooledConnectionKind;
use crate::request::Request;
use crate::response::{ProtocolLabel, Response, Status};

pub struct ConnectInterceptor;

pub(crate) fn address_from_request(request: &Request) -> Result<Address, CallError> {
    let host = request
        .url
        .host_str()
        .ok_or_else(|| CallError::Protocol(format!("request url has no host: {}", request.url)))?;
    let is_https = request.url.scheme() == "https";
    let port = request
        .url
        .port_or_known_default()
        .ok_or_else(|| CallError::Protocol(format!("request url has no known port: {}", request.url)))?;
    let tls = if is_https { Some(TlsConfig::default()) } else { None };
    Ok(Address::new(host, port, tls))
}

fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        421 => "Misdirected Request",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

#[async_trait]
impl Interceptor for ConnectInterceptor {
    async fn intercept<'a>(&'a self, chain: Chain<'a>) -> Result<Response, CallError> {
        let request = chain.request().clone();
        let address = address_from_request(&request)?;
        let pooled = chain.context.pool.acquire(&address).await.map_err(CallError::Io)?;

        let sent_at = std::time::Instant::now();
        let exchange_result = match &pooled.kind {
            PooledConnectionKind::Http2(connection) => {
                let mut exchange = crate::exchange::Http2Exchange::new(connection.clone());
                call_server::execute(&mut exchange, &request).await
            }
            PooledConnectionKind::Http1(socket_slot) => {
                let socket = socket_slot
                    .lock()
                    .await
                    .take()
                    .ok_or_else(|| CallError::Protocol("pooled http/1.1 socket already in use".into()))?;
                let mut exchange = Http1Exchange::new(socket);
                let result = call_server::execute(&mut exchange, &request).await;
                *socket_slot.lock().await = Some(exchange.into_socket());
                result
            }
        };
        let received_at = std::time::Instant::now();

        let protocol = match pooled.protocol() {
            crate::transport::NegotiatedProtocol::Http2 => ProtocolLabel::Http2,
            crate::transport::NegotiatedProtocol::Http11 => ProtocolLabel::Http11,
        };

        let (head, body) = match exchange_result {
            Ok(pair) => pair,
            Err(err) => {
                chain.context.pool.release(&address, pooled).await;
                return Err(err);
            }
        };
        chain.context.pool.release(&address, pooled).await;

        let status = Status::new(head.status_code, reason_phrase(head.status_code));
        let response = Response::builder(request, status, protocol)
            .headers(head.headers)
            .body(body)
            .timing(sent_at, received_at)
            .build();
        Ok(response)
    }
}
