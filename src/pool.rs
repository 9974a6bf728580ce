//! The connection pool: idle connections keyed by `Address`, with a
//! background eviction daemon and a health check before handing an idle
//! connection back out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::debug;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::address::{Address, Route};
use crate::h2::Connection;
use crate::transport::{BoxedSocket, Connector, NegotiatedProtocol};

/// What a pooled entry actually wraps: a full HTTP/2 connection engine, or
/// a bare socket reused for back-to-back HTTP/1.1 exchanges (one exchange
/// at a time, since HTTP/1.1 has no multiplexing).
pub enum PooledConnectionKind {
    Http2(Arc<Connection>),
    Http1(Mutex<Option<BoxedSocket>>),
}

pub struct PooledConnection {
    pub kind: PooledConnectionKind,
    pub route: Route,
    idle_since: Mutex<Option<Instant>>,
}

impl PooledConnection {
    fn new(kind: PooledConnectionKind, route: Route) -> Arc<Self> {
        Arc::new(PooledConnection { kind, route, idle_since: Mutex::new(None) })
    }

    pub fn protocol(&self) -> NegotiatedProtocol {
        match &self.kind {
            PooledConnectionKind::Http2(_) => NegotiatedProtocol::Http2,
            PooledConnectionKind::Http1(_) => NegotiatedProtocol::Http11,
        }
    }

    fn is_usable(&self) -> bool {
        match &self.kind {
            PooledConnectionKind::Http2(c) => !c.is_shutdown(),
            PooledConnectionKind::Http1(socket) => socket.try_lock().map(|s| s.is_some()).unwrap_or(true),
        }
    }

    async fn mark_idle(&self) {
        *self.idle_since.lock().await = Some(Instant::now());
    }

    async fn mark_in_use(&self) {
        *self.idle_since.lock().await = None;
    }

    /// Liveness check before handing an idle connection back out. HTTP/1.1
    /// sockets have no in-band ping, so reuse is optimistic there and a
    /// dead socket simply fails the next write (caught by the retry
    /// interceptor's connectivity-failure rule).
    async fn still_alive(&self) -> bool {
        match &self.kind {
            PooledConnectionKind::Http2(c) => c.degraded_ping().await.is_ok(),
            PooledConnectionKind::Http1(_) => true,
        }
    }
}

pub struct ConnectionPool {
    idle: DashMap<String, Vec<Arc<PooledConnection>>>,
    max_idle_connections: usize,
    keep_alive: Duration,
    connector: Arc<dyn Connector>,
    total_connections: AtomicUsize,
}

fn pool_key(address: &Address) -> String {
    format!("{}:{}:{:?}", address.host, address.port, address.is_https())
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, max_idle_connections: usize, keep_alive: Duration) -> Arc<Self> {
        let pool = Arc::new(ConnectionPool {
            idle: DashMap::new(),
            max_idle_connections,
            keep_alive,
            connector,
            total_connections: AtomicUsize::new(0),
        });
        tokio::spawn(run_eviction_daemon(Arc::downgrade(&pool)));
        pool
    }

    /// Returns a usable connection for `address`: an idle one that still
    /// answers a liveness check, or a freshly dialed one otherwise
    /// (route/address coalescing collapses to "first matching pool-key
    /// entry" here; full cert-SAN coalescing needs TLS introspection, which
    /// is out of scope).
    pub async fn acquire(&self, address: &Address) -> std::io::Result<Arc<PooledConnection>> {
        let key = pool_key(address);
        if let Some(mut bucket) = self.idle.get_mut(&key) {
            while let Some(candidate) = bucket.pop() {
                if !candidate.is_usable() {
                    continue;
                }
                if candidate.still_alive().await {
                    candidate.mark_in_use().await;
                    return Ok(candidate);
                }
            }
        }

        let routes = Route::select(address)
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let route = routes
            .into_iter()
            .next()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no route to host"))?;

        let (socket, negotiated) = self
            .connector
            .connect(route.socket_addr, address.server_name(), address.tls.as_ref())
            .await?;

        let kind = match negotiated {
            NegotiatedProtocol::Http2 => {
                let settings = crate::h2::Settings::local_initial();
                let connection = Connection::handshake(socket, settings)
                    .await
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
                PooledConnectionKind::Http2(connection)
            }
            NegotiatedProtocol::Http11 => PooledConnectionKind::Http1(Mutex::new(Some(socket))),
        };

        self.total_connections.fetch_add(1, Ordering::SeqCst);
        Ok(PooledConnection::new(kind, route))
    }

    /// Returns a connection to the idle set once its exchange finishes,
    /// unless it already hit its cap for this address.
    pub async fn release(&self, address: &Address, pooled: Arc<PooledConnection>) {
        if !pooled.is_usable() {
            self.total_connections.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        pooled.mark_idle().await;
        let key = pool_key(address);
        let mut bucket = self.idle.entry(key).or_default();
        if bucket.len() >= self.max_idle_connections {
            drop(bucket.remove(0));
        }
        bucket.push(pooled);
    }

    /// Drops every idle connection pooled for `address`. Used when a peer
    /// tells us, via a 421 (Misdirected Request), that a coalesced
    /// connection was handed a request it can't actually serve; the retry
    /// must dial fresh rather than reuse that same connection.
    pub fn evict_idle(&self, address: &Address) {
        let key = pool_key(address);
        if let Some((_, bucket)) = self.idle.remove(&key) {
            self.total_connections.fetch_sub(bucket.len(), Ordering::SeqCst);
        }
    }

    async fn evict_stale(&self) {
        let mut empty_keys = Vec::new();
        for mut entry in self.idle.iter_mut() {
            let key = entry.key().clone();
            entry.value_mut().retain(|conn| {
                // retain() can't be async; try_lock is safe here since
                // nothing else holds this lock while a connection sits
                // idle in the pool.
                let idle_for = conn.idle_since.try_lock().ok().and_then(|g| *g).map(|since| since.elapsed());
                !matches!(idle_for, Some(d) if d >= self.keep_alive) && conn.is_usable()
            });
            if entry.value().is_empty() {
                empty_keys.push(key);
            }
        }
        for key in empty_keys {
            self.idle.remove(&key);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.total_connections.load(Ordering::SeqCst)
    }
}

async fn run_eviction_daemon(pool: std::sync::Weak<ConnectionPool>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let Some(pool) = pool.upgrade() else {
            debug!("pool dropped, eviction daemon exiting");
            return;
        };
        pool.evict_stale().await;
    }
}
