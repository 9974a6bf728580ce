//! The interceptor chain: an immutable, ordered interceptor list plus a
//! cursor index, so each interceptor can only ever call `proceed` on the
//! remainder of the chain it was handed, never re-enter an earlier link.

pub mod bridge;
pub mod call_server;
pub mod cache;
pub mod connect;
pub mod retry_followup;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CallError;
use crate::request::Request;
use crate::response::Response;

#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept<'a>(&'a self, chain: Chain<'a>) -> Result<Response, CallError>;
}

/// Per-call context visible to every interceptor: the pool and cache the
/// client was built with, and whether this call was canceled.
pub struct CallContext {
    pub pool: Arc<crate::pool::ConnectionPool>,
    pub cache: Option<Arc<crate::cache::Cache>>,
    pub canceled: std::sync::atomic::AtomicBool,
}

impl CallContext {
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(std::sync::atomic::Ordering::SeqCst)
    }
}

pub struct Chain<'a> {
    interceptors: &'a [Arc<dyn Interceptor>],
    index: usize,
    request: Request,
    pub context: &'a CallContext,
}

impl<'a> Chain<'a> {
    pub fn new(interceptors: &'a [Arc<dyn Interceptor>], request: Request, context: &'a CallContext) -> Self {
        Chain { interceptors, index: 0, request, context }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Moves to the next interceptor with (possibly) a modified request.
    /// Consumes `self`, so a link can only advance the chain exactly once.
    pub async fn proceed(self, request: Request) -> Result<Response, CallError> {
        self.retry(request).await
    }

    /// Same traversal as `proceed`, but borrows instead of consuming, so the
    /// retry-and-follow-up interceptor can send more than one request
    /// through the rest of the chain from a single link.
    pub async fn retry(&self, request: Request) -> Result<Response, CallError> {
        if self.context.is_canceled() {
            return Err(CallError::Canceled);
        }
        let Some(next) = self.interceptors.get(self.index) else {
            return Err(CallError::Protocol("interceptor chain exhausted without a terminal link".into()));
        };
        let next = next.clone();
        let chain = Chain { interceptors: self.interceptors, index: self.index + 1, request, context: self.context };
        next.intercept(chain).await
    }
}
