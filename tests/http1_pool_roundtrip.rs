//! Exercises the pool, the HTTP/1.1 exchange leg, and the shared
//! call-server driver together over an in-memory duplex socket, bypassing
//! DNS via a proxy route so the test needs no real network.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use vellum::address::{Address, ProxyConfig, TlsConfig};
use vellum::http1::Http1Exchange;
use vellum::interceptor::call_server;
use vellum::pool::{ConnectionPool, PooledConnectionKind};
use vellum::transport::{BoxedSocket, Connector, NegotiatedProtocol};
use vellum::{Method, Request};

struct DuplexConnector {
    client_half: Mutex<Option<BoxedSocket>>,
}

#[async_trait]
impl Connector for DuplexConnector {
    async fn connect(
        &self,
        _addr: SocketAddr,
        _server_name: &str,
        _tls: Option<&TlsConfig>,
    ) -> std::io::Result<(BoxedSocket, NegotiatedProtocol)> {
        let socket = self.client_half.lock().await.take().expect("connector dialed only once in this test");
        Ok((socket, NegotiatedProtocol::Http11))
    }
}

#[tokio::test]
async fn http1_exchange_round_trips_through_the_pool() {
    let (client_io, mut server_io) = tokio::io::duplex(4096);
    let connector = Arc::new(DuplexConnector { client_half: Mutex::new(Some(Box::new(client_io))) });
    let pool = ConnectionPool::new(connector, 4, Duration::from_secs(60));

    let server = tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        let n = server_io.read(&mut buf).await.unwrap();
        let request_text = String::from_utf8_lossy(&buf[..n]);
        assert!(request_text.starts_with("GET /hello HTTP/1.1"));

        let body = b"hello";
        let response = format!("HTTP/1.1 200 OK\r\ncontent-length: {}\r\n\r\n", body.len());
        server_io.write_all(response.as_bytes()).await.unwrap();
        server_io.write_all(body).await.unwrap();
    });

    let mut address = Address::new("example.invalid", 80, None);
    address.proxy = Some(ProxyConfig { addr: Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)) });

    let pooled = pool.acquire(&address).await.unwrap();
    let request = Request::new(Method::Get, url::Url::parse("http://example.invalid/hello").unwrap());

    let (head, mut body) = match &pooled.kind {
        PooledConnectionKind::Http1(slot) => {
            let socket = slot.lock().await.take().unwrap();
            let mut exchange = Http1Exchange::new(socket);
            let (head, body) = call_server::execute(&mut exchange, &request).await.unwrap();
            *slot.lock().await = Some(exchange.into_socket());
            (head, body)
        }
        PooledConnectionKind::Http2(_) => unreachable!("DuplexConnector always negotiates http/1.1"),
    };

    assert_eq!(head.status_code, 200);
    assert_eq!(body.take_bytes().as_ref(), b"hello");

    pool.release(&address, pooled).await;
    assert_eq!(pool.connection_count(), 1);
    server.await.unwrap();
}
