//! RFC 6265 cookies and the jar the bridge stage consults.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use url::Url;

use crate::error::{Error, Result};

/// Cookie storage consulted by the bridge stage.
///
/// `save_from_response` receives the cookies of every `Set-Cookie` header
/// of a response; `load_for_request` returns the cookies to send with a
/// request to `url`.
pub trait CookieJar: Send + Sync + fmt::Debug {
    fn save_from_response(&self, url: &Url, cookies: Vec<Cookie>);
    fn load_for_request(&self, url: &Url) -> Vec<Cookie>;
}

/// A jar that never stores or sends anything. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCookies;

impl CookieJar for NoCookies {
    fn save_from_response(&self, _url: &Url, _cookies: Vec<Cookie>) {}

    fn load_for_request(&self, _url: &Url) -> Vec<Cookie> {
        Vec::new()
    }
}

/// RFC 6265 compliant cookie representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Whether the cookie came without a Domain attribute and only matches
    /// its origin host exactly.
    pub host_only: bool,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<String>,
    pub expires: Option<DateTime<Utc>>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: normalize_domain(&domain.into()),
            path: "/".to_string(),
            host_only: false,
            secure: false,
            http_only: false,
            same_site: None,
            expires: None,
        }
    }

    /// Parse one `Set-Cookie` header value received from `url`.
    ///
    /// Max-Age wins over Expires. A Domain attribute that does not
    /// domain-match the request host is rejected.
    pub fn parse(header: &str, url: &Url) -> Result<Self> {
        let request_domain = url
            .host_str()
            .ok_or_else(|| Error::CookieParse("No host in URL".to_string()))?
            .to_lowercase();

        let mut parts = header.split(';').map(str::trim);
        let (name, value) = match parts.next().and_then(|p| p.split_once('=')) {
            Some((n, v)) => (n.trim().to_string(), v.trim().to_string()),
            None => return Err(Error::CookieParse("No = in cookie".to_string())),
        };
        if name.is_empty() {
            return Err(Error::CookieParse("Empty cookie name".to_string()));
        }

        let mut cookie = Cookie::new(name, value, request_domain.clone());
        cookie.host_only = true;
        cookie.path = default_path(url);
        let mut max_age: Option<i64> = None;

        for attr in parts {
            let attr_lower = attr.to_lowercase();
            if attr_lower == "secure" {
                cookie.secure = true;
            } else if attr_lower == "httponly" {
                cookie.http_only = true;
            } else if let Some((key, val)) = attr.split_once('=') {
                let val = val.trim();
                match key.trim().to_lowercase().as_str() {
                    "domain" if !val.is_empty() => {
                        let domain = normalize_domain(val);
                        if !domain_match(&request_domain, &domain) {
                            return Err(Error::CookieParse(format!(
                                "Domain {} does not match {}",
                                domain, request_domain
                            )));
                        }
                        cookie.domain = domain;
                        cookie.host_only = false;
                    }
                    "path" if val.starts_with('/') => cookie.path = val.to_string(),
                    "expires" => cookie.expires = parse_cookie_date(val),
                    "max-age" => max_age = val.parse().ok(),
                    "samesite" => cookie.same_site = Some(val.to_string()),
                    _ => {}
                }
            }
        }

        if let Some(seconds) = max_age {
            cookie.expires = Some(if seconds <= 0 {
                DateTime::<Utc>::MIN_UTC
            } else {
                Utc::now() + ChronoDuration::seconds(seconds)
            });
        }
        Ok(cookie)
    }

    pub fn is_expired(&self) -> bool {
        self.expires.map(|e| e <= Utc::now()).unwrap_or(false)
    }

    /// Whether this cookie should be sent with a request to `url`.
    pub fn matches(&self, url: &Url) -> bool {
        let request_domain = match url.host_str() {
            Some(h) => h.to_lowercase(),
            None => return false,
        };

        if self.secure && url.scheme() != "https" {
            return false;
        }
        if self.is_expired() {
            return false;
        }

        let domain_ok = if self.host_only {
            request_domain == self.domain
        } else {
            domain_match(&request_domain, &self.domain)
        };
        if !domain_ok {
            return false;
        }

        let request_path = url.path();
        request_path == self.path
            || request_path.starts_with(&format!("{}/", self.path.trim_end_matches('/')))
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// In-memory jar keyed by domain, then by (path, name).
#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    cookies: Mutex<HashMap<String, HashMap<(String, String), Cookie>>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, HashMap<(String, String), Cookie>>> {
        self.cookies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `cookie`, replacing one with the same domain, path and name.
    /// An already-expired cookie deletes its stored counterpart instead.
    pub fn store(&self, cookie: Cookie) {
        let mut cookies = self.lock();
        let key = (cookie.path.clone(), cookie.name.clone());
        if cookie.is_expired() {
            if let Some(domain) = cookies.get_mut(&cookie.domain) {
                domain.remove(&key);
            }
            return;
        }
        cookies.entry(cookie.domain.clone()).or_default().insert(key, cookie);
    }

    /// All unexpired cookies.
    pub fn cookies(&self) -> Vec<Cookie> {
        self.lock()
            .values()
            .flat_map(|m| m.values())
            .filter(|c| !c.is_expired())
            .cloned()
            .collect()
    }

    pub fn get(&self, domain: &str, name: &str) -> Option<Cookie> {
        self.lock()
            .get(&normalize_domain(domain))?
            .values()
            .find(|c| c.name == name)
            .cloned()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CookieJar for MemoryCookieJar {
    fn save_from_response(&self, _url: &Url, cookies: Vec<Cookie>) {
        for cookie in cookies {
            self.store(cookie);
        }
    }

    /// Longer paths first, as RFC 6265 Section 5.4 recommends.
    fn load_for_request(&self, url: &Url) -> Vec<Cookie> {
        let mut matching: Vec<Cookie> = self
            .lock()
            .values()
            .flat_map(|m| m.values())
            .filter(|c| c.matches(url))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        matching
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.strip_prefix('.').unwrap_or(domain).to_lowercase()
}

/// RFC 6265 Section 5.1.3 domain matching.
fn domain_match(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{}", domain))
}

/// RFC 6265 Section 5.1.4 default path: the request path up to, not
/// including, its right-most `/`.
fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => path[..i].to_string(),
    }
}

fn parse_cookie_date(date_str: &str) -> Option<DateTime<Utc>> {
    const FORMATS: [&str; 4] = [
        "%a, %d %b %Y %H:%M:%S GMT",
        // RFC 850 spells the weekday out.
        "%A, %d-%b-%y %H:%M:%S GMT",
        "%a, %d-%b-%y %H:%M:%S GMT",
        "%a, %d-%b-%Y %H:%M:%S GMT",
    ];
    for fmt in FORMATS {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(date_str, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }
    None
}
