//! Decides whether a failed or redirecting exchange gets retried or
//! followed up, and re-issues the request through the rest of the chain
//! when it does. Sits above the bridge/cache/connect links so every retry
//! still gets its headers bridged and its cache entry consulted afresh.

use std::sync::Arc;

use async_trait::async_trait;

use super::connect::address_from_request;
use super::{Chain, Interceptor};
use crate::error::CallError;
use crate::request::{Method, Request};
use crate::response::{Response, ResponseShell};

const MAX_FOLLOW_UPS: u32 = 20;

/// Produces a credential value in response to a 401/407 challenge, or
/// declines by returning `None`.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, response: &Response) -> Option<String>;
}

pub struct RetryFollowUpInterceptor {
    pub follow_redirects: bool,
    pub follow_ssl_redirects: bool,
    pub retry_on_connection_failure: bool,
    pub authenticator: Option<Arc<dyn Authenticator>>,
    pub proxy_authenticator: Option<Arc<dyn Authenticator>>,
}

impl Default for RetryFollowUpInterceptor {
    fn default() -> Self {
        RetryFollowUpInterceptor {
            follow_redirects: true,
            follow_ssl_redirects: false,
            retry_on_connection_failure: true,
            authenticator: None,
            proxy_authenticator: None,
        }
    }
}

fn request_is_replayable(request: &Request) -> bool {
    request.body.as_ref().map(|b| !b.is_one_shot()).unwrap_or(true)
}

fn attach_prior(response: Response, prior: Arc<ResponseShell>) -> Response {
    let body = response.take_body();
    let mut builder = Response::builder(response.request.clone(), response.status.clone(), response.protocol)
        .headers(response.headers.clone())
        .handshake(response.handshake.clone())
        .timing(response.sent_at, response.received_at)
        .network_response(response.network_response.clone())
        .cache_response(response.cache_response.clone())
        .prior_response(Some(prior));
    if let Some(body) = body {
        builder = builder.body(body);
    }
    builder.build()
}

impl RetryFollowUpInterceptor {
    fn redirect_request(&self, request: &Request, response: &Response) -> Option<Request> {
        let location = response.header("location")?;
        let target = request.url.join(location).ok()?;
        if target.scheme() != request.url.scheme() && !self.follow_ssl_redirects {
            return None;
        }
        let mut next = request.clone();
        next.url = target;
        match response.status.code {
            303 => {
                if request.method != Method::Head {
                    next.method = Method::Get;
                }
                next.body = None;
            }
            301 | 302 => {
                if !matches!(request.method, Method::Get | Method::Head) {
                    next.method = Method::Get;
                    next.body = None;
                }
            }
            307 | 308 => {
                // Same method and body required; a one-shot body can't be
                // retransmitted, so the redirect can't be followed.
                if request.body.as_ref().map(|b| b.is_one_shot()).unwrap_or(false) {
                    return None;
                }
            }
            _ => {}
        }
        next.headers.remove("authorization");
        Some(next)
    }

    async fn authenticate(
        &self,
        authenticator: &Option<Arc<dyn Authenticator>>,
        request: &Request,
        response: &Response,
        header_name: &str,
    ) -> Result<Option<Request>, CallError> {
        let Some(authenticator) = authenticator else { return Ok(None) };
        let Some(credential) = authenticator.authenticate(response).await else { return Ok(None) };
        let mut next = request.clone();
        next.headers.set(header_name, credential);
        Ok(Some(next))
    }
}

#[async_trait]
impl Interceptor for RetryFollowUpInterceptor {
    async fn intercept<'a>(&'a self, chain: Chain<'a>) -> Result<Response, CallError> {
        let mut request = chain.request().clone();
        let mut follow_up_count = 0u32;
        let mut connectivity_retried = false;
        let mut misdirected_retried = false;
        let mut prior: Option<Arc<ResponseShell>> = None;

        loop {
            let response = match chain.retry(request.clone()).await {
                Ok(response) => response,
                Err(err) => {
                    if self.retry_on_connection_failure
                        && !connectivity_retried
                        && err.is_recoverable()
                        && request_is_replayable(&request)
                    {
                        connectivity_retried = true;
                        continue;
                    }
                    return Err(err);
                }
            };

            let close_requested = response.header("connection").map(|v| v.eq_ignore_ascii_case("close")).unwrap_or(false);
            let next: Option<Request> = match response.status.code {
                301 | 302 | 303 | 307 | 308 if self.follow_redirects => self.redirect_request(&request, &response),
                401 => self.authenticate(&self.authenticator, &request, &response, "authorization").await?,
                407 => self.authenticate(&self.proxy_authenticator, &request, &response, "proxy-authorization").await?,
                408 if !close_requested && request_is_replayable(&request) => Some(request.clone()),
                421 if !misdirected_retried => {
                    misdirected_retried = true;
                    // The connection that served this, likely coalesced onto
                    // the wrong origin, can't be trusted for the retry; drop
                    // it so the retry dials a fresh one (RFC 7540 §9.1.2).
                    if let Ok(address) = address_from_request(&request) {
                        chain.context.pool.evict_idle(&address);
                    }
                    Some(request.clone())
                }
                503 if response.header("retry-after") == Some("0") => Some(request.clone()),
                _ => None,
            };

            let Some(next_request) = next else {
                return Ok(match prior {
                    Some(shell) => attach_prior(response, shell),
                    None => response,
                });
            };

            follow_up_count += 1;
            if follow_up_count > MAX_FOLLOW_UPS {
                return Err(CallError::Protocol(format!("too many follow-up requests ({follow_up_count}), giving up")));
            }
            prior = Some(Arc::new(response.to_shell()));
            request = next_request;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replayable_body_check_defaults_true_for_bodyless_request() {
        let req = Request::get(url::Url::parse("https://example.com").unwrap());
        assert!(request_is_replayable(&req));
    }
}
