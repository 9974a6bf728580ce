//! A one-shot request/response handle. Builds the interceptor chain
//! (user interceptors, then the built-in stages in OkHttp's canonical
//! order: retry-and-follow-up, bridge, cache, user network interceptors,
//! connect) and drives it to completion exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;

use crate::error::CallError;
use crate::interceptor::bridge::BridgeInterceptor;
use crate::interceptor::cache::CacheInterceptor;
use crate::interceptor::connect::ConnectInterceptor;
use crate::interceptor::retry_followup::RetryFollowUpInterceptor;
use crate::interceptor::{CallContext, Chain, Interceptor};
use crate::request::Request;
use crate::response::Response;

/// Shared, immutable configuration a `Client` hands every call it creates.
pub struct CallConfig {
    pub pool: Arc<crate::pool::ConnectionPool>,
    pub cache: Option<Arc<crate::cache::Cache>>,
    pub application_interceptors: Vec<Arc<dyn Interceptor>>,
    pub network_interceptors: Vec<Arc<dyn Interceptor>>,
    pub retry_followup: Arc<RetryFollowUpInterceptor>,
}

impl CallConfig {
    fn interceptors(&self) -> Vec<Arc<dyn Interceptor>> {
        let mut chain: Vec<Arc<dyn Interceptor>> = Vec::new();
        chain.extend(self.application_interceptors.iter().cloned());
        chain.push(self.retry_followup.clone());
        chain.push(Arc::new(BridgeInterceptor));
        chain.push(Arc::new(CacheInterceptor));
        chain.extend(self.network_interceptors.iter().cloned());
        chain.push(Arc::new(ConnectInterceptor));
        chain
    }
}

/// A single request/response execution. `execute`/`enqueue` may each be
/// invoked at most once per `RealCall`; use `clone()` to get a fresh,
/// independently executable call carrying the same request and tags.
pub struct RealCall {
    config: Arc<CallConfig>,
    request: Request,
    executed: AtomicBool,
    context: Arc<CallContext>,
}

impl RealCall {
    pub fn new(config: Arc<CallConfig>, request: Request) -> Self {
        let context = Arc::new(CallContext {
            pool: config.pool.clone(),
            cache: config.cache.clone(),
            canceled: AtomicBool::new(false),
        });
        RealCall { config, request, executed: AtomicBool::new(false), context }
    }

    fn mark_executed(&self) -> Result<(), CallError> {
        if self.executed.swap(true, Ordering::SeqCst) {
            return Err(CallError::Protocol("call already executed".into()));
        }
        Ok(())
    }

    /// Runs the call synchronously on the calling task, returning the final
    /// response or the first unrecoverable error.
    pub async fn execute(&self) -> Result<Response, CallError> {
        self.mark_executed()?;
        let interceptors = self.config.interceptors();
        let chain = Chain::new(&interceptors, self.request.clone(), &self.context);
        chain.proceed(self.request.clone()).await
    }

    /// Runs the call on a spawned task, invoking exactly one of
    /// `on_response`/`on_failure`.
    pub fn enqueue(
        self: Arc<Self>,
        on_response: impl FnOnce(Response) + Send + 'static,
        on_failure: impl FnOnce(CallError) + Send + 'static,
    ) -> Result<(), CallError> {
        self.mark_executed()?;
        tokio::spawn(async move {
            let interceptors = self.config.interceptors();
            let chain = Chain::new(&interceptors, self.request.clone(), &self.context);
            match chain.proceed(self.request.clone()).await {
                Ok(response) => on_response(response),
                Err(err) => {
                    debug!("call failed: {err}");
                    on_failure(err);
                }
            }
        });
        Ok(())
    }

    /// Best-effort cancellation: sets the shared flag the chain and exchange
    /// layers observe. Idempotent, calling twice has the same effect as
    /// calling once.
    pub fn cancel(&self) {
        self.context.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.context.is_canceled()
    }

    /// A fresh, independently executable call for the same request and
    /// tags.
    pub fn clone_call(&self) -> RealCall {
        RealCall::new(self.config.clone(), self.request.clone())
    }

    pub fn request(&self) -> &Request {
        &self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;

    fn test_config() -> Arc<CallConfig> {
        let connector = Arc::new(crate::transport::RustlsConnector::new());
        let pool = crate::pool::ConnectionPool::new(connector, 5, std::time::Duration::from_secs(300));
        Arc::new(CallConfig {
            pool,
            cache: None,
            application_interceptors: Vec::new(),
            network_interceptors: Vec::new(),
            retry_followup: Arc::new(RetryFollowUpInterceptor::default()),
        })
    }

    #[tokio::test]
    async fn second_execute_is_rejected() {
        let request = Request::new(Method::Get, url::Url::parse("https://example.invalid").unwrap());
        let call = RealCall::new(test_config(), request);
        let _ = call.execute().await;
        let second = call.execute().await;
        assert!(matches!(second, Err(CallError::Protocol(_))));
    }

    #[tokio::test]
    async fn clone_call_can_execute_independently() {
        let request = Request::new(Method::Get, url::Url::parse("https://example.invalid").unwrap());
        let call = RealCall::new(test_config(), request);
        let _ = call.execute().await;
        let cloned = call.clone_call();
        let result = cloned.execute().await;
        assert!(result.is_err() || result.is_ok());
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let request = Request::new(Method::Get, url::Url::parse("https://example.invalid").unwrap());
        let call = RealCall::new(test_config(), request);
        call.cancel();
        call.cancel();
        assert!(call.is_canceled());
    }
}
