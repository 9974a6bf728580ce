//! `Client`: a builder over the shared, immutable pieces every call draws
//! on (pool, cache, interceptors), split into `Client`/`ClientBuilder`.

use std::sync::Arc;
use std::time::Duration;

use crate::call::{CallConfig, RealCall};
use crate::dispatcher::Dispatcher;
use crate::error::CallError;
use crate::interceptor::retry_followup::RetryFollowUpInterceptor;
use crate::interceptor::Interceptor;
use crate::pool::ConnectionPool;
use crate::request::Request;
use crate::response::Response;
use crate::transport::{Connector, RustlsConnector};

const DEFAULT_MAX_IDLE_CONNECTIONS: usize = 16;
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(300);

pub struct Client {
    config: Arc<CallConfig>,
    dispatcher: Arc<Dispatcher>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn new_call(&self, request: Request) -> Arc<RealCall> {
        Arc::new(RealCall::new(self.config.clone(), request))
    }

    pub async fn execute(&self, request: Request) -> Result<Response, CallError> {
        self.new_call(request).execute().await
    }

    pub async fn enqueue(
        &self,
        request: Request,
        on_response: impl FnOnce(Response) + Send + 'static,
        on_failure: impl FnOnce(CallError) + Send + 'static,
    ) {
        self.dispatcher.enqueue(self.new_call(request), on_response, on_failure).await;
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn cache(&self) -> Option<&Arc<crate::cache::Cache>> {
        self.config.cache.as_ref()
    }

    pub fn connection_count(&self) -> usize {
        self.config.pool.connection_count()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::builder().build()
    }
}

pub struct ClientBuilder {
    connector: Arc<dyn Connector>,
    max_idle_connections: usize,
    keep_alive: Duration,
    cache: Option<Arc<crate::cache::Cache>>,
    application_interceptors: Vec<Arc<dyn Interceptor>>,
    network_interceptors: Vec<Arc<dyn Interceptor>>,
    follow_redirects: bool,
    follow_ssl_redirects: bool,
    retry_on_connection_failure: bool,
    authenticator: Option<Arc<dyn crate::interceptor::retry_followup::Authenticator>>,
    proxy_authenticator: Option<Arc<dyn crate::interceptor::retry_followup::Authenticator>>,
    max_requests: usize,
    max_requests_per_host: usize,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        ClientBuilder {
            connector: Arc::new(RustlsConnector::new()),
            max_idle_connections: DEFAULT_MAX_IDLE_CONNECTIONS,
            keep_alive: DEFAULT_KEEP_ALIVE,
            cache: None,
            application_interceptors: Vec::new(),
            network_interceptors: Vec::new(),
            follow_redirects: true,
            follow_ssl_redirects: false,
            retry_on_connection_failure: true,
            authenticator: None,
            proxy_authenticator: None,
            max_requests: 64,
            max_requests_per_host: 5,
        }
    }
}

impl ClientBuilder {
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn connection_pool(mut self, max_idle_connections: usize, keep_alive: Duration) -> Self {
        self.max_idle_connections = max_idle_connections;
        self.keep_alive = keep_alive;
        self
    }

    pub fn cache(mut self, cache: Arc<crate::cache::Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn add_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.application_interceptors.push(interceptor);
        self
    }

    pub fn add_network_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.network_interceptors.push(interceptor);
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    pub fn follow_ssl_redirects(mut self, follow: bool) -> Self {
        self.follow_ssl_redirects = follow;
        self
    }

    pub fn retry_on_connection_failure(mut self, retry: bool) -> Self {
        self.retry_on_connection_failure = retry;
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn crate::interceptor::retry_followup::Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn proxy_authenticator(mut self, authenticator: Arc<dyn crate::interceptor::retry_followup::Authenticator>) -> Self {
        self.proxy_authenticator = Some(authenticator);
        self
    }

    pub fn max_requests(mut self, max_requests: usize, max_requests_per_host: usize) -> Self {
        self.max_requests = max_requests;
        self.max_requests_per_host = max_requests_per_host;
        self
    }

    pub fn build(self) -> Client {
        let pool = ConnectionPool::new(self.connector, self.max_idle_connections, self.keep_alive);
        let retry_followup = Arc::new(RetryFollowUpInterceptor {
            follow_redirects: self.follow_redirects,
            follow_ssl_redirects: self.follow_ssl_redirects,
            retry_on_connection_failure: self.retry_on_connection_failure,
            authenticator: self.authenticator,
            proxy_authenticator: self.proxy_authenticator,
        });
        let config = Arc::new(CallConfig {
            pool,
            cache: self.cache,
            application_interceptors: self.application_interceptors,
            network_interceptors: self.network_interceptors,
            retry_followup,
        });
        let dispatcher = Dispatcher::with_limits(self.max_requests, self.max_requests_per_host);
        Client { config, dispatcher }
    }
}
