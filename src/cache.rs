//! RFC 9111 response caching.
//!
//! [`Cache`] is the storage the cache stage consults; [`HttpCache`] is an
//! in-memory implementation honoring `max-age`, `no-store` and
//! ETag / Last-Modified validators.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use http::Method;

use crate::request::Request;
use crate::response::Response;

/// Lookup result.
#[derive(Debug)]
pub enum CacheStatus {
    /// Response is fresh and can be used directly.
    Fresh(Response),
    /// Response is stale but can be validated using conditional headers.
    /// (Response, ETag, Last-Modified)
    Revalidate(Response, Option<String>, Option<String>),
    /// Cache miss.
    Miss,
}

/// Response storage used by the cache stage.
pub trait Cache: Send + Sync + fmt::Debug {
    fn lookup(&self, request: &Request) -> CacheStatus;

    /// Store `response` if it is cacheable; otherwise leave the cache alone.
    fn store(&self, response: &Response);

    /// Drop any entry for `request`'s URL.
    fn remove(&self, request: &Request);
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: Response,
    expires: SystemTime,
    etag: Option<String>,
    last_modified: Option<String>,
}

/// In-memory HTTP cache keyed by URL.
#[derive(Debug, Default)]
pub struct HttpCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

/// Statuses cacheable by default (RFC 9110 Section 15.1), minus 206.
const CACHEABLE_STATUSES: &[u16] = &[200, 203, 204, 300, 301, 308, 404, 405, 410, 414, 501];

impl HttpCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Cache for HttpCache {
    fn lookup(&self, request: &Request) -> CacheStatus {
        if request.method() != Method::GET {
            return CacheStatus::Miss;
        }
        let no_cache = directive(request.header("Cache-Control"), "no-cache")
            || request.header("Pragma").is_some_and(|p| p.eq_ignore_ascii_case("no-cache"));

        let entries = self.lock();
        let Some(entry) = entries.get(request.url().as_str()) else {
            return CacheStatus::Miss;
        };

        if !no_cache && entry.expires > SystemTime::now() {
            return CacheStatus::Fresh(entry.response.clone());
        }
        // Stale, check if revalidation is possible
        if entry.etag.is_some() || entry.last_modified.is_some() {
            return CacheStatus::Revalidate(
                entry.response.clone(),
                entry.etag.clone(),
                entry.last_modified.clone(),
            );
        }
        CacheStatus::Miss
    }

    fn store(&self, response: &Response) {
        let request = response.request();
        if request.method() != Method::GET || !CACHEABLE_STATUSES.contains(&response.status()) {
            return;
        }

        let cache_control = response.header("Cache-Control");
        if directive(cache_control, "no-store") || directive(request.header("Cache-Control"), "no-store") {
            return;
        }

        let etag = response.header("ETag").map(str::to_string);
        let last_modified = response.header("Last-Modified").map(str::to_string);
        let ttl = max_age(cache_control).unwrap_or(0);

        // No heuristic freshness: without max-age an entry is only worth
        // keeping when it can be revalidated.
        if ttl == 0 && etag.is_none() && last_modified.is_none() {
            return;
        }

        let entry = CacheEntry {
            response: response.clone(),
            expires: SystemTime::now() + Duration::from_secs(ttl),
            etag,
            last_modified,
        };
        tracing::debug!("Cache: storing {} (ttl {}s)", request.redacted_url(), ttl);
        self.lock().insert(request.url().to_string(), entry);
    }

    fn remove(&self, request: &Request) {
        self.lock().remove(request.url().as_str());
    }
}

/// Whether a comma-separated Cache-Control value contains `name`.
pub(crate) fn directive(value: Option<&str>, name: &str) -> bool {
    value
        .map(|v| {
            v.split(',')
                .any(|d| d.trim().split('=').next().unwrap_or("").trim().eq_ignore_ascii_case(name))
        })
        .unwrap_or(false)
}

fn max_age(value: Option<&str>) -> Option<u64> {
    value?.split(',').find_map(|d| {
        let (key, val) = d.trim().split_once('=')?;
        if key.trim().eq_ignore_ascii_case("max-age") {
            val.trim().trim_matches('"').parse().ok()
        } else {
            None
        }
    })
}

/// Combine a cached response's headers with a 304's, per RFC 9111 Section
/// 4.3.4: fields from the 304 replace stored ones; content framing stays.
pub(crate) fn combine(cached: &Response, network: &Response) -> http::HeaderMap {
    let mut merged = cached.headers().clone();
    for name in network.headers().keys() {
        if *name == http::header::CONTENT_LENGTH
            || *name == http::header::CONTENT_ENCODING
            || *name == http::header::CONTENT_TYPE
        {
            continue;
        }
        merged.remove(name);
        for value in network.headers().get_all(name) {
            merged.append(name.clone(), value.clone());
        }
    }
    merged
}
