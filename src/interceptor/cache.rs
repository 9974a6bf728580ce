//! Wraps the cache-policy decision (serve cached, revalidate, go to
//! network) around the rest of the chain, and stores cacheable network
//! responses on the way back.

use std::sync::atomic::Ordering;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;

use super::{Chain, Interceptor};
use crate::body::ResponseBody;
use crate::cache::policy::{self, CachedResponseMeta, Decision};
use crate::cache::CacheEntryMeta;
use crate::error::CallError;
use crate::request::Request;
use crate::response::{Response, Status};

pub struct CacheInterceptor;

fn response_from_cache(request: &Request, meta: &CacheEntryMeta, body: Bytes) -> Response {
    Response::builder(request.clone(), meta.status(), meta.protocol())
        .headers(meta.headers())
        .body(ResponseBody::new(body, None))
        .build()
}

async fn store_if_cacheable(cache: &crate::cache::Cache, request: &Request, response: &Response) {
    if !request.is_cacheable_method() || !response.status.is_successful() {
        return;
    }
    let Some(mut body) = response.take_body() else { return };
    let bytes = body.take_bytes();
    cache
        .put(
            request.effective_cache_url(),
            response.header("vary"),
            &request.headers,
            &response.status,
            response.protocol,
            &response.headers,
            bytes,
        )
        .await
        .ok();
}

#[async_trait]
impl Interceptor for CacheInterceptor {
    async fn intercept<'a>(&'a self, chain: Chain<'a>) -> Result<Response, CallError> {
        let request = chain.request().clone();
        let Some(cache) = chain.context.cache.clone() else {
            return chain.proceed(request).await;
        };
        if !request.is_cacheable_method() {
            let response = chain.proceed(request.clone()).await?;
            store_if_cacheable(&cache, &request, &response).await;
            return Ok(response);
        }

        let cached = cache.get(&request).await;
        let now = SystemTime::now();
        let decision = match &cached {
            Some((meta, _)) => {
                let status = meta.status();
                let headers = meta.headers();
                let cached_ref = CachedResponseMeta { status: &status, headers: &headers, received_at: meta.received_at() };
                policy::decide(&request, Some(&cached_ref), now)
            }
            None => policy::decide(&request, None, now),
        };

        match decision {
            Decision::GatewayTimeout => Ok(Response::builder(request, Status::new(504, "Gateway Timeout"), crate::response::ProtocolLabel::Http11).build()),
            Decision::UseCache => {
                let (meta, body) = cached.expect("UseCache implies a cached entry");
                cache.stats.hit_count.fetch_add(1, Ordering::SeqCst);
                Ok(response_from_cache(&request, &meta, body))
            }
            Decision::Network => {
                let response = chain.proceed(request.clone()).await?;
                cache.stats.network_count.fetch_add(1, Ordering::SeqCst);
                store_if_cacheable(&cache, &request, &response).await;
                Ok(response)
            }
            Decision::Validate => {
                let (meta, cached_body) = cached.expect("Validate implies a cached entry");
                let mut conditional = request.clone();
                for (name, value) in policy::conditional_headers(&meta.headers()).iter() {
                    conditional.headers.add(name, value);
                }
                let network_response = chain.proceed(conditional).await?;
                cache.stats.network_count.fetch_add(1, Ordering::SeqCst);

                if network_response.status.code == 304 {
                    cache.stats.hit_count.fetch_add(1, Ordering::SeqCst);
                    let merged_headers = meta.merged_with_304(&network_response.headers);
                    cache
                        .put(
                            request.effective_cache_url(),
                            merged_headers.get("vary"),
                            &request.headers,
                            &meta.status(),
                            meta.protocol(),
                            &merged_headers,
                            cached_body.clone(),
                        )
                        .await
                        .ok();
                    Ok(Response::builder(request, meta.status(), meta.protocol())
                        .headers(merged_headers)
                        .body(ResponseBody::new(cached_body, None))
                        .cache_response(Some(std::sync::Arc::new(network_response.to_shell())))
                        .build())
                } else {
                    store_if_cacheable(&cache, &request, &network_response).await;
                    Ok(network_response)
                }
            }
        }
    }
}
