//! `Request`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use crate::body::RequestBody;
use crate::headers::Headers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Method {
    #[display(fmt = "GET")]
    Get,
    #[display(fmt = "HEAD")]
    Head,
    #[display(fmt = "POST")]
    Post,
    #[display(fmt = "PUT")]
    Put,
    #[display(fmt = "DELETE")]
    Delete,
    #[display(fmt = "PATCH")]
    Patch,
    #[display(fmt = "OPTIONS")]
    Options,
    /// QUERY: uncacheable unless `cache_url_override` is set.
    #[display(fmt = "QUERY")]
    Query,
}

impl Method {
    /// Whether a body is permitted/expected for this method at all.
    pub fn permits_request_body(&self) -> bool {
        !matches!(self, Method::Get | Method::Head)
    }

    pub fn redirects_to_get(&self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }
}

/// Parsed `Cache-Control` request directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_cache: bool,
    pub no_store: bool,
    pub only_if_cached: bool,
    pub max_age: Option<u64>,
    pub max_stale: Option<u64>,
    pub min_fresh: Option<u64>,
    pub immutable: bool,
}

impl CacheControl {
    pub fn parse(value: &str) -> Self {
        let mut cc = CacheControl::default();
        for directive in value.split(',') {
            let directive = directive.trim();
            let (key, val) = match directive.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim().trim_matches('"'))),
                None => (directive, None),
            };
            match key.to_ascii_lowercase().as_str() {
                "no-cache" => cc.no_cache = true,
                "no-store" => cc.no_store = true,
                "only-if-cached" => cc.only_if_cached = true,
                "immutable" => cc.immutable = true,
                "max-age" => cc.max_age = val.and_then(|v| v.parse().ok()),
                "max-stale" => cc.max_stale = Some(val.and_then(|v| v.parse().ok()).unwrap_or(u64::MAX)),
                "min-fresh" => cc.min_fresh = val.and_then(|v| v.parse().ok()),
                _ => {}
            }
        }
        cc
    }

    pub fn from_headers(headers: &Headers) -> Self {
        headers.get("cache-control").map(Self::parse).unwrap_or_default()
    }
}

/// Type-keyed tag map, for attaching caller context to a call (e.g. a trace
/// id) without threading it through every layer.
#[derive(Default)]
pub struct Tags(HashMap<TypeId, Arc<dyn Any + Send + Sync>>);

impl Tags {
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.0.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.0
            .get(&TypeId::of::<T>())
            .and_then(|v| v.clone().downcast::<T>().ok())
    }
}

impl Clone for Tags {
    fn clone(&self) -> Self {
        Tags(self.0.clone())
    }
}

impl std::fmt::Debug for Tags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tags({} entries)", self.0.len())
    }
}

#[derive(Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Headers,
    pub body: Option<Arc<dyn RequestBody>>,
    /// Overrides the URL used as the cache fingerprint, for `QUERY`
    /// requests.
    pub cache_url_override: Option<Url>,
    pub tags: Tags,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Headers::new(),
            body: None,
            cache_url_override: None,
            tags: Tags::default(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_body(mut self, method: Method, url: Url, body: Arc<dyn RequestBody>) -> Self {
        self.method = method;
        self.url = url;
        self.body = Some(body);
        self
    }

    pub fn cache_control(&self) -> CacheControl {
        CacheControl::from_headers(&self.headers)
    }

    /// The URL a cache entry is keyed on: the effective cache URL.
    pub fn effective_cache_url(&self) -> &Url {
        self.cache_url_override.as_ref().unwrap_or(&self.url)
    }

    /// Only GET (and QUERY with an override set) responses are ever
    /// stored.
    pub fn is_cacheable_method(&self) -> bool {
        match self.method {
            Method::Get => true,
            Method::Query => self.cache_url_override.is_some(),
            _ => false,
        }
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_max_age_and_no_store() {
        let mut h = Headers::new();
        h.add("Cache-Control", "max-age=0, must-revalidate, no-store");
        let cc = CacheControl::from_headers(&h);
        assert_eq!(cc.max_age, Some(0));
        assert!(cc.no_store);
    }

    #[test]
    fn query_is_cacheable_only_with_override() {
        let url = Url::parse("https://example.com/q").unwrap();
        let mut req = Request::new(Method::Query, url.clone());
        assert!(!req.is_cacheable_method());
        req.cache_url_override = Some(url);
        assert!(req.is_cacheable_method());
    }
}
