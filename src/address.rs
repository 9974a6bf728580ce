//! `Address` and `Route`: the identity a connection pool keys on, and the
//! concrete attempt it picks to reach it.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::dns::{default_dns, Dns};

/// Client-side protocol preference, most-preferred first. HTTP/3 is out of
/// scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http2,
    Http11,
}

#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Overrides the name used for SNI/certificate verification; defaults to
    /// the origin host.
    pub server_name_override: Option<String>,
}

impl PartialEq for TlsConfig {
    fn eq(&self, other: &Self) -> bool {
        self.server_name_override == other.server_name_override
    }
}
impl Eq for TlsConfig {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyConfig {
    pub addr: Option<SocketAddr>,
}

/// Verifies that a hostname is acceptable for a certificate presented by a
/// coalesced connection. Identity-compared: two addresses are equal only if
/// they share the same verifier instance, matching OkHttp's `Address`
/// equality.
pub trait HostnameVerifier: Send + Sync + std::fmt::Debug {
    fn verify(&self, hostname: &str, certificate_sans: &[String]) -> bool;
}

#[derive(Debug, Default)]
pub struct DefaultHostnameVerifier;

impl HostnameVerifier for DefaultHostnameVerifier {
    fn verify(&self, hostname: &str, certificate_sans: &[String]) -> bool {
        certificate_sans.iter().any(|san| san.eq_ignore_ascii_case(hostname))
    }
}

/// Certificate pins, by SHA-256 of the SPKI, matching OkHttp's
/// `CertificatePinner` in spirit. Empty means "no pinning configured".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificatePinner {
    pub pins: Vec<String>,
}

impl CertificatePinner {
    pub fn check(&self, spki_sha256_pins: &[String]) -> bool {
        self.pins.is_empty() || self.pins.iter().any(|p| spki_sha256_pins.contains(p))
    }
}

/// Identity of an origin server plus the client settings relevant to
/// establishing a connection to it. Two addresses are equal iff every field
/// is equal; the pool keys reuse on this equality.
#[derive(Clone)]
pub struct Address {
    pub host: String,
    pub port: u16,
    pub protocols: Vec<Protocol>,
    pub tls: Option<TlsConfig>,
    pub dns: Arc<dyn Dns>,
    pub proxy: Option<ProxyConfig>,
    pub hostname_verifier: Arc<dyn HostnameVerifier>,
    pub certificate_pinner: CertificatePinner,
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Address")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("protocols", &self.protocols)
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.protocols == other.protocols
            && self.tls == other.tls
            && Arc::ptr_eq(&self.dns, &other.dns)
            && self.proxy == other.proxy
            && Arc::ptr_eq(&self.hostname_verifier, &other.hostname_verifier)
            && self.certificate_pinner == other.certificate_pinner
    }
}
impl Eq for Address {}

impl std::hash::Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16, tls: Option<TlsConfig>) -> Self {
        Self {
            host: host.into(),
            port,
            protocols: if tls.is_some() {
                vec![Protocol::Http2, Protocol::Http11]
            } else {
                vec![Protocol::Http11]
            },
            tls,
            dns: default_dns(),
            proxy: None,
            hostname_verifier: Arc::new(DefaultHostnameVerifier),
            certificate_pinner: CertificatePinner::default(),
        }
    }

    pub fn is_https(&self) -> bool {
        self.tls.is_some()
    }

    pub fn server_name(&self) -> &str {
        self.tls
            .as_ref()
            .and_then(|t| t.server_name_override.as_deref())
            .unwrap_or(&self.host)
    }
}

/// An (address, concrete IP socket address, proxy?) triple chosen to attempt
/// a connection.
#[derive(Debug, Clone)]
pub struct Route {
    pub address: Address,
    pub socket_addr: SocketAddr,
    pub via_proxy: bool,
}

impl Route {
    /// Resolves every IP for `address` via its configured `Dns` and returns
    /// one `Route` per address, in resolver order.
    pub async fn select(address: &Address) -> Result<Vec<Route>, crate::dns::DnsError> {
        if let Some(proxy) = address.proxy.as_ref().and_then(|p| p.addr) {
            return Ok(vec![Route {
                address: address.clone(),
                socket_addr: proxy,
                via_proxy: true,
            }]);
        }
        let ips: Vec<IpAddr> = address.dns.lookup(&address.host).await?;
        Ok(ips
            .into_iter()
            .map(|ip| Route {
                address: address.clone(),
                socket_addr: SocketAddr::new(ip, address.port),
                via_proxy: false,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_with_same_fields_and_shared_singletons_are_equal() {
        let dns = default_dns();
        let verifier: Arc<dyn HostnameVerifier> = Arc::new(DefaultHostnameVerifier);
        let a = Address {
            host: "example.com".into(),
            port: 443,
            protocols: vec![Protocol::Http2],
            tls: Some(TlsConfig::default()),
            dns: dns.clone(),
            proxy: None,
            hostname_verifier: verifier.clone(),
            certificate_pinner: CertificatePinner::default(),
        };
        let b = Address { dns: dns.clone(), hostname_verifier: verifier.clone(), ..a.clone() };
        assert_eq!(a, b);
    }

    #[test]
    fn different_dns_singleton_breaks_equality() {
        let a = Address::new("example.com", 443, Some(TlsConfig::default()));
        let b = Address::new("example.com", 443, Some(TlsConfig::default()));
        // distinct default_dns() Arcs -> not equal, matching OkHttp's
        // identity-sensitive Address equality for collaborator fields.
        assert_ne!(a, b);
    }
}
