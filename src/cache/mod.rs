//! A journaled, content-addressed LRU response cache on the
//! filesystem. Each entry occupies a `.meta` file (JSON-encoded headers and
//! status) and a `.body` file; the journal records which keys currently
//! have a complete, committed pair of files.

pub mod policy;

mod journal;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use dashmap::DashMap;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use url::Url;

use crate::headers::Headers;
use crate::request::Request;
use crate::response::{ProtocolLabel, Status};
use journal::{Journal, JournalOp};

#[derive(Debug, Serialize, Deserialize, Clone)]
struct StoredStatus {
    code: u16,
    message: String,
}

/// Persisted metadata for one cache entry: the effective URL, the request
/// headers named by the response's `Vary` (used to revalidate Vary-match on
/// lookup), and the response status/headers.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheEntryMeta {
    pub url: String,
    vary_request_headers: Vec<(String, String)>,
    status: StoredStatus,
    headers: Vec<(String, String)>,
    pub received_at_unix_secs: u64,
    protocol: String,
}

impl CacheEntryMeta {
    pub fn status(&self) -> Status {
        Status::new(self.status.code, self.status.message.clone())
    }

    pub fn protocol(&self) -> ProtocolLabel {
        match self.protocol.as_str() {
            "h2" => ProtocolLabel::Http2,
            _ => ProtocolLabel::Http11,
        }
    }

    pub fn headers(&self) -> Headers {
        self.headers.iter().cloned().collect()
    }

    pub fn vary_request_headers(&self) -> Headers {
        self.vary_request_headers.iter().cloned().collect()
    }

    pub fn received_at(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(self.received_at_unix_secs)
    }

    /// Combines this entry's headers with a 304 response's headers: the 304
    /// wins for overlapping names except hop-by-hop fields, matching the
    /// revalidation-merge rule.
    pub fn merged_with_304(&self, fresh_headers: &Headers) -> Headers {
        const HOP_BY_HOP: &[&str] = &["connection", "keep-alive", "transfer-encoding", "upgrade"];
        let mut merged = Headers::new();
        for (name, value) in &self.headers {
            if fresh_headers.contains(name) || HOP_BY_HOP.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            merged.add(name, value);
        }
        for (name, value) in fresh_headers.iter() {
            if HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name)) {
                continue;
            }
            merged.add(name, value);
        }
        merged
    }
}

#[derive(Default)]
pub struct CacheStats {
    pub request_count: AtomicU64,
    pub network_count: AtomicU64,
    pub hit_count: AtomicU64,
    pub write_success_count: AtomicU64,
    pub write_abort_count: AtomicU64,
}

struct IndexedEntry {
    meta: CacheEntryMeta,
    body_len: u64,
}

pub struct Cache {
    dir: PathBuf,
    max_bytes: u64,
    journal: Journal,
    index: DashMap<String, IndexedEntry>,
    lru: Mutex<VecDeque<String>>,
    current_bytes: AtomicU64,
    in_flight_writers: DashMap<String, ()>,
    pub stats: CacheStats,
}

fn key_for(url: &Url) -> String {
    format!("{:x}", Md5::digest(url.as_str().as_bytes()))
}

fn meta_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.meta"))
}

fn body_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.body"))
}

impl Cache {
    pub async fn open(dir: impl Into<PathBuf>, max_bytes: u64) -> std::io::Result<Arc<Cache>> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let (journal, clean_keys) = Journal::open(dir.join("journal.log")).await?;

        let index = DashMap::new();
        let mut current_bytes = 0u64;
        let mut lru = VecDeque::new();
        for key in clean_keys {
            let meta_path = meta_path(&dir, &key);
            let body_path = body_path(&dir, &key);
            let (Ok(meta_bytes), Ok(body_meta)) =
                (tokio::fs::read(&meta_path).await, tokio::fs::metadata(&body_path).await)
            else {
                continue;
            };
            let Ok(meta) = serde_json::from_slice::<CacheEntryMeta>(&meta_bytes) else { continue };
            let body_len = body_meta.len();
            current_bytes += body_len;
            lru.push_back(key.clone());
            index.insert(key, IndexedEntry { meta, body_len });
        }

        Ok(Arc::new(Cache {
            dir,
            max_bytes,
            journal,
            index,
            lru: Mutex::new(lru),
            current_bytes: AtomicU64::new(current_bytes),
            in_flight_writers: DashMap::new(),
            stats: CacheStats::default(),
        }))
    }

    /// Looks up an entry for `request`, requiring every header named by the
    /// stored `Vary` to match the request's current value. Returns the
    /// metadata plus the body bytes on a hit.
    pub async fn get(&self, request: &Request) -> Option<(CacheEntryMeta, Bytes)> {
        self.stats.request_count.fetch_add(1, Ordering::SeqCst);
        let key = key_for(request.effective_cache_url());
        let entry = self.index.get(&key)?;
        let vary_request_headers = entry.meta.vary_request_headers();
        if !Headers::vary_matches(&entry.meta.headers(), &vary_request_headers, &request.headers) {
            return None;
        }
        let meta = entry.meta.clone();
        drop(entry);

        self.touch(&key).await;
        self.journal.append(JournalOp::Read, &key).await.ok();

        let body = tokio::fs::read(body_path(&self.dir, &key)).await.ok()?;
        Some((meta, Bytes::from(body)))
    }

    async fn touch(&self, key: &str) {
        let mut lru = self.lru.lock().await;
        lru.retain(|k| k != key);
        lru.push_back(key.to_owned());
    }

    /// Stores a response. Only one writer per key proceeds at a time; a
    /// second concurrent writer for the same key is a silent no-op (the
    /// first writer's result stands).
    pub async fn put(
        &self,
        url: &Url,
        vary_value: Option<&str>,
        request_headers: &Headers,
        status: &Status,
        protocol: ProtocolLabel,
        headers: &Headers,
        body: Bytes,
    ) -> std::io::Result<bool> {
        let key = key_for(url);
        if self.in_flight_writers.insert(key.clone(), ()).is_some() {
            self.stats.write_abort_count.fetch_add(1, Ordering::SeqCst);
            return Ok(false);
        }
        let result = self.put_locked(&key, url, vary_value, request_headers, status, protocol, headers, body).await;
        self.in_flight_writers.remove(&key);
        match &result {
            Ok(true) => {
                self.stats.write_success_count.fetch_add(1, Ordering::SeqCst);
            }
            _ => {
                self.stats.write_abort_count.fetch_add(1, Ordering::SeqCst);
            }
        }
        result
    }

    async fn put_locked(
        &self,
        key: &str,
        url: &Url,
        vary_value: Option<&str>,
        request_headers: &Headers,
        status: &Status,
        protocol: ProtocolLabel,
        headers: &Headers,
        body: Bytes,
    ) -> std::io::Result<bool> {
        if !policy::is_storable_response(headers) {
            return Ok(false);
        }

        self.journal.append(JournalOp::Dirty, key).await?;

        let vary_request_headers = match vary_value {
            Some(v) => Headers::subset_named_by_vary(v, request_headers),
            None => Headers::new(),
        };
        let meta = CacheEntryMeta {
            url: url.to_string(),
            vary_request_headers: vary_request_headers.iter().map(|(n, v)| (n.to_owned(), v.to_owned())).collect(),
            status: StoredStatus { code: status.code, message: status.message.clone() },
            headers: headers.iter().map(|(n, v)| (n.to_owned(), v.to_owned())).collect(),
            received_at_unix_secs: SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_secs(),
            protocol: protocol.as_str().to_owned(),
        };

        let body_len = body.len() as u64;
        let body_tmp = body_path(&self.dir, key).with_extension("body.tmp");
        let mut body_file = tokio::fs::File::create(&body_tmp).await?;
        body_file.write_all(&body).await?;
        body_file.sync_all().await?;
        drop(body_file);
        tokio::fs::rename(&body_tmp, body_path(&self.dir, key)).await?;

        let meta_json =
            serde_json::to_vec(&meta).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let meta_tmp = meta_path(&self.dir, key).with_extension("meta.tmp");
        let mut meta_file = tokio::fs::File::create(&meta_tmp).await?;
        meta_file.write_all(&meta_json).await?;
        meta_file.sync_all().await?;
        drop(meta_file);
        tokio::fs::rename(&meta_tmp, meta_path(&self.dir, key)).await?;

        self.journal.append(JournalOp::Clean, key).await?;

        if let Some(previous) = self.index.insert(key.to_owned(), IndexedEntry { meta, body_len }) {
            self.current_bytes.fetch_sub(previous.body_len, Ordering::SeqCst);
        }
        self.current_bytes.fetch_add(body_len, Ordering::SeqCst);
        self.touch(key).await;

        self.evict_over_budget().await?;
        self.maybe_rewrite_journal().await;
        Ok(true)
    }

    async fn evict_over_budget(&self) -> std::io::Result<()> {
        while self.current_bytes.load(Ordering::SeqCst) > self.max_bytes {
            let oldest = {
                let mut lru = self.lru.lock().await;
                lru.pop_front()
            };
            let Some(oldest) = oldest else { break };
            self.remove_key(&oldest).await?;
        }
        Ok(())
    }

    async fn remove_key(&self, key: &str) -> std::io::Result<()> {
        if let Some((_, entry)) = self.index.remove(key) {
            self.current_bytes.fetch_sub(entry.body_len, Ordering::SeqCst);
        }
        self.journal.append(JournalOp::Remove, key).await?;
        tokio::fs::remove_file(meta_path(&self.dir, key)).await.ok();
        tokio::fs::remove_file(body_path(&self.dir, key)).await.ok();
        Ok(())
    }

    pub async fn remove(&self, url: &Url) -> std::io::Result<()> {
        let key = key_for(url);
        {
            let mut lru = self.lru.lock().await;
            lru.retain(|k| k != &key);
        }
        self.remove_key(&key).await
    }

    async fn maybe_rewrite_journal(&self) {
        if self.journal.is_redundant(self.index.len()) {
            let keys: Vec<String> = self.index.iter().map(|e| e.key().clone()).collect();
            self.journal.rewrite(&keys).await.ok();
        }
    }

    /// Removes every entry and every file in the cache directory.
    pub async fn evict_all(&self) -> std::io::Result<()> {
        let keys: Vec<String> = self.index.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.remove_key(&key).await?;
        }
        Ok(())
    }

    /// Weakly-consistent snapshot of stored URLs. Unlike a live iterator
    /// this can't race a concurrent `remove` mid-traversal, trading a
    /// little staleness for simplicity.
    pub fn urls(&self) -> Vec<Url> {
        self.index.iter().filter_map(|e| Url::parse(&e.meta.url).ok()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;

    fn tempdir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vellum-cache-test-{label}-{:?}", std::thread::current().id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn stores_and_retrieves_matching_entry() {
        let cache = Cache::open(tempdir("roundtrip"), 1024 * 1024).await.unwrap();
        let url = Url::parse("https://example.com/a").unwrap();
        let mut headers = Headers::new();
        headers.add("etag", "\"v1\"");
        cache
            .put(&url, None, &Headers::new(), &Status::new(200, "OK"), ProtocolLabel::Http2, &headers, Bytes::from_static(b"hi"))
            .await
            .unwrap();

        let request = Request::new(Method::Get, url);
        let (meta, body) = cache.get(&request).await.expect("entry should be present");
        assert_eq!(meta.status().code, 200);
        assert_eq!(body, Bytes::from_static(b"hi"));
        assert_eq!(cache.stats.request_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn vary_mismatch_misses() {
        let cache = Cache::open(tempdir("vary"), 1024 * 1024).await.unwrap();
        let url = Url::parse("https://example.com/a").unwrap();
        let mut headers = Headers::new();
        headers.add("vary", "accept-encoding");
        let mut stored_request_headers = Headers::new();
        stored_request_headers.add("accept-encoding", "gzip");
        cache
            .put(
                &url,
                Some("accept-encoding"),
                &stored_request_headers,
                &Status::new(200, "OK"),
                ProtocolLabel::Http2,
                &headers,
                Bytes::from_static(b"hi"),
            )
            .await
            .unwrap();

        let mut request = Request::new(Method::Get, url);
        request.headers.add("accept-encoding", "identity");
        assert!(cache.get(&request).await.is_none());
    }

    #[tokio::test]
    async fn no_store_response_is_never_written() {
        let cache = Cache::open(tempdir("no-store"), 1024 * 1024).await.unwrap();
        let url = Url::parse("https://example.com/a").unwrap();
        let mut headers = Headers::new();
        headers.add("cache-control", "no-store");
        let stored = cache
            .put(&url, None, &Headers::new(), &Status::new(200, "OK"), ProtocolLabel::Http2, &headers, Bytes::from_static(b"hi"))
            .await
            .unwrap();
        assert!(!stored);
    }
}
