//! TLS handshake and ALPN selection live behind a seam: a `Connector` that
//! yields an already-negotiated, byte-oriented, split-read/write socket
//! plus the chosen protocol label, with one concrete implementation built
//! on `tokio-rustls` and `webpki-roots` so the crate is runnable end to end.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::address::TlsConfig;

/// The protocol an ALPN negotiation (or lack of TLS) settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiatedProtocol {
    Http11,
    Http2,
}

/// A connected, byte-oriented duplex stream. Concrete transports (cleartext
/// `TcpStream`, `TlsStream<TcpStream>`) are boxed behind this so the rest of
/// the crate never names a TLS type.
pub trait Socket: AsyncRead + AsyncWrite + Send + Sync + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> Socket for T {}

pub type BoxedSocket = Box<dyn Socket>;

/// Establishes the transport-level connection for one `Route`: dial the
/// concrete `SocketAddr`, optionally perform the TLS handshake and ALPN
/// negotiation described by `TlsConfig`, and hand back the byte stream plus
/// the protocol the peer committed to.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        addr: SocketAddr,
        server_name: &str,
        tls: Option<&TlsConfig>,
    ) -> std::io::Result<(BoxedSocket, NegotiatedProtocol)>;
}

/// Default connector: plain TCP when `tls` is absent, otherwise a rustls
/// handshake advertising `h2` then `http/1.1` via ALPN, using the Mozilla
/// root set from `webpki-roots`.
pub struct RustlsConnector {
    roots: rustls::RootCertStore,
}

impl RustlsConnector {
    pub fn new() -> Self {
        let mut roots = rustls::RootCertStore::empty();
        roots.add_server_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|ta| {
            rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));
        Self { roots }
    }

    fn client_config(&self, _tls: &TlsConfig) -> Arc<rustls::ClientConfig> {
        let mut config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(self.roots.clone())
            .with_no_client_auth();
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Arc::new(config)
    }
}

impl Default for RustlsConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for RustlsConnector {
    async fn connect(
        &self,
        addr: SocketAddr,
        server_name: &str,
        tls: Option<&TlsConfig>,
    ) -> std::io::Result<(BoxedSocket, NegotiatedProtocol)> {
        let tcp = TcpStream::connect(addr).await?;
        tcp.set_nodelay(true).ok();

        let Some(tls) = tls else {
            return Ok((Box::new(tcp), NegotiatedProtocol::Http11));
        };

        let config = self.client_config(tls);
        let connector = tokio_rustls::TlsConnector::from(config);
        let name = rustls::ServerName::try_from(server_name)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let stream = connector.connect(name, tcp).await?;

        let negotiated = match stream.get_ref().1.alpn_protocol() {
            Some(b"h2") => NegotiatedProtocol::Http2,
            _ => NegotiatedProtocol::Http11,
        };
        Ok((Box::new(stream), negotiated))
    }
}
