//! Given a request and (optionally) a cached response, decides whether to
//! serve from cache, revalidate, or go to the network outright.

use std::time::{Duration, SystemTime};

use crate::headers::Headers;
use crate::request::{CacheControl, Request};
use crate::response::Status;

pub struct CachedResponseMeta<'a> {
    pub status: &'a Status,
    pub headers: &'a Headers,
    /// When the cached response was originally received, used as the
    /// fallback for a missing `Date` header.
    pub received_at: SystemTime,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Decision {
    /// Serve the cached entry as-is; do not contact the network.
    UseCache,
    /// Issue a conditional request (`If-None-Match`/`If-Modified-Since`
    /// added) and let a 304 fall back to the cached body.
    Validate,
    /// Issue a plain network request; no usable cached entry.
    Network,
    /// `only-if-cached` forbade the network and nothing fresh was cached.
    GatewayTimeout,
}

fn parse_http_date(value: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(value).ok()
}

fn response_date(headers: &Headers, fallback: SystemTime) -> SystemTime {
    headers.get("date").and_then(parse_http_date).unwrap_or(fallback)
}

/// Age of the cached response right now (RFC 7234 §4.2.3, simplified to the
/// common case: no proxy-introduced `Age` delays beyond what's recorded).
fn compute_age(meta: &CachedResponseMeta<'_>, now: SystemTime) -> Duration {
    let date = response_date(meta.headers, meta.received_at);
    let apparent_age = now.duration_since(date).unwrap_or_default();
    let header_age = meta
        .headers
        .get("age")
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_default();
    apparent_age.max(header_age)
}

/// Freshness lifetime from `max-age`/`Expires`, or a heuristic 10% of the
/// `Last-Modified` delta when the response carries no explicit freshness
/// information but is heuristically cacheable (has `Last-Modified`).
fn freshness_lifetime(meta: &CachedResponseMeta<'_>) -> Duration {
    let cc = CacheControl::from_headers(meta.headers);
    if let Some(max_age) = cc.max_age {
        return Duration::from_secs(max_age);
    }
    if let Some(expires) = meta.headers.get("expires").and_then(parse_http_date) {
        let date = response_date(meta.headers, meta.received_at);
        return expires.duration_since(date).unwrap_or_default();
    }
    if let Some(last_modified) = meta.headers.get("last-modified").and_then(parse_http_date) {
        let date = response_date(meta.headers, meta.received_at);
        if let Ok(delta) = date.duration_since(last_modified) {
            return delta / 10;
        }
    }
    Duration::ZERO
}

fn is_fresh(meta: &CachedResponseMeta<'_>, now: SystemTime) -> bool {
    let cc_response = CacheControl::from_headers(meta.headers);
    if cc_response.immutable {
        return true;
    }
    let age = compute_age(meta, now);
    age < freshness_lifetime(meta)
}

fn has_validator(headers: &Headers) -> bool {
    headers.contains("etag") || headers.contains("last-modified")
}

/// Builds the conditional-request headers to add when revalidating.
pub fn conditional_headers(cached_headers: &Headers) -> Headers {
    let mut headers = Headers::new();
    if let Some(etag) = cached_headers.get("etag") {
        headers.add("if-none-match", etag);
    }
    if let Some(last_modified) = cached_headers.get("last-modified") {
        headers.add("if-modified-since", last_modified);
    }
    headers
}

/// `Vary: *` and `Cache-Control: no-store` responses are never cached
/// regardless of freshness.
pub fn is_storable_response(headers: &Headers) -> bool {
    let vary_star = headers.get("vary").map(|v| v.trim() == "*").unwrap_or(false);
    let no_store = CacheControl::from_headers(headers).no_store;
    !vary_star && !no_store
}

pub fn decide(request: &Request, cached: Option<&CachedResponseMeta<'_>>, now: SystemTime) -> Decision {
    let request_cc = request.cache_control();

    let Some(cached) = cached else {
        return if request_cc.only_if_cached { Decision::GatewayTimeout } else { Decision::Network };
    };

    if !is_storable_response(cached.headers) {
        return if request_cc.only_if_cached { Decision::GatewayTimeout } else { Decision::Network };
    }

    let age = compute_age(cached, now);
    let max_stale = request_cc.max_stale.map(Duration::from_secs).unwrap_or_default();
    let min_fresh = request_cc.min_fresh.map(Duration::from_secs).unwrap_or_default();
    let fresh = is_fresh(cached, now) && age + min_fresh < freshness_lifetime(cached) + max_stale;

    if request_cc.no_cache {
        return if has_validator(cached.headers) { Decision::Validate } else { Decision::Network };
    }

    if fresh {
        return Decision::UseCache;
    }

    if request_cc.only_if_cached {
        return Decision::GatewayTimeout;
    }

    if has_validator(cached.headers) {
        Decision::Validate
    } else {
        Decision::Network
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;

    fn request(cache_control: Option<&str>) -> Request {
        let mut req = Request::new(Method::Get, url::Url::parse("https://example.com/a").unwrap());
        if let Some(cc) = cache_control {
            req.headers.add("cache-control", cc);
        }
        req
    }

    #[test]
    fn fresh_response_is_used_without_network() {
        let mut headers = Headers::new();
        headers.add("cache-control", "max-age=3600");
        let meta = CachedResponseMeta { status: &Status::new(200, "OK"), headers: &headers, received_at: SystemTime::now() };
        assert_eq!(decide(&request(None), Some(&meta), SystemTime::now()), Decision::UseCache);
    }

    #[test]
    fn stale_with_etag_validates() {
        let mut headers = Headers::new();
        headers.add("cache-control", "max-age=0");
        headers.add("etag", "\"v1\"");
        let meta = CachedResponseMeta { status: &Status::new(200, "OK"), headers: &headers, received_at: SystemTime::now() };
        assert_eq!(decide(&request(None), Some(&meta), SystemTime::now()), Decision::Validate);
    }

    #[test]
    fn only_if_cached_with_no_entry_is_gateway_timeout() {
        assert_eq!(decide(&request(Some("only-if-cached")), None, SystemTime::now()), Decision::GatewayTimeout);
    }

    #[test]
    fn vary_star_response_is_never_storable() {
        let mut headers = Headers::new();
        headers.add("vary", "*");
        assert!(!is_storable_response(&headers));
    }

    #[test]
    fn immutable_short_circuits_staleness() {
        let mut headers = Headers::new();
        headers.add("cache-control", "immutable, max-age=0");
        let meta = CachedResponseMeta { status: &Status::new(200, "OK"), headers: &headers, received_at: SystemTime::now() };
        assert_eq!(decide(&request(None), Some(&meta), SystemTime::now()), Decision::UseCache);
    }
}
