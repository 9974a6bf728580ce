//! DNS resolution interface: a trait returning an ordered address list,
//! so callers can swap in their own resolver.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
#[error("dns lookup failed for {host}: {source}")]
pub struct DnsError {
    pub host: String,
    #[source]
    pub source: std::io::Error,
}

/// Resolves a hostname to an ordered list of IP addresses. Order is
/// preserved by `Route` selection (first address tried first).
#[async_trait]
pub trait Dns: Send + Sync + fmt::Debug {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, DnsError>;
}

/// The process-wide default: the platform resolver via tokio.
#[derive(Debug, Default)]
pub struct SystemDns;

#[async_trait]
impl Dns for SystemDns {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
        // lookup_host needs a socket-address-shaped string; the port is
        // discarded by the caller, which re-pairs addresses with the real
        // port for each route.
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|source| DnsError { host: host.to_owned(), source })?
            .collect();
        if addrs.is_empty() {
            return Err(DnsError {
                host: host.to_owned(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
            });
        }
        Ok(addrs.into_iter().map(|a| a.ip()).collect())
    }
}

pub fn default_dns() -> Arc<dyn Dns> {
    Arc::new(SystemDns)
}
