//! Immutable HTTP request values.

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use url::Url;

use crate::error::{Error, Result};
use crate::headers;

/// Request payload.
///
/// A body either declares its length up front or is streamed with
/// chunked transfer coding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    content: Bytes,
    content_type: Option<String>,
    chunked: bool,
}

impl RequestBody {
    /// Body with a declared length.
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            content_type: None,
            chunked: false,
        }
    }

    /// Body sent with `Transfer-Encoding: chunked` and no declared length.
    pub fn chunked(content: impl Into<Bytes>) -> Self {
        Self {
            chunked: true,
            ..Self::new(content)
        }
    }

    /// JSON body with `application/json` content type.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::new(bytes).with_content_type("application/json; charset=utf-8"))
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Declared length, or `None` for a chunked body.
    pub fn content_length(&self) -> Option<u64> {
        if self.chunked {
            None
        } else {
            Some(self.content.len() as u64)
        }
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }
}

/// An immutable HTTP request.
///
/// Use [`Request::new_builder`] to derive a modified copy.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<RequestBody>,
}

impl Request {
    pub fn builder(url: &str) -> Result<RequestBuilder> {
        Ok(RequestBuilder::new(Url::parse(url)?))
    }

    /// Shorthand for a bodiless GET.
    pub fn get(url: &str) -> Result<Request> {
        Self::builder(url)?.build()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Host the request targets; used as the dispatcher's per-host key.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or("")
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of `name`, if any.
    pub fn header(&self, name: &str) -> Option<&str> {
        headers::header_str(&self.headers, name)
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn is_https(&self) -> bool {
        self.url.scheme() == "https"
    }

    /// A builder seeded with a copy of this request.
    pub fn new_builder(&self) -> RequestBuilder {
        RequestBuilder {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            error: None,
        }
    }

    /// URL with path and query replaced by `/...`, safe for logs.
    pub fn redacted_url(&self) -> String {
        match self.url.port() {
            Some(port) => format!("{}://{}:{}/...", self.url.scheme(), self.host(), port),
            None => format!("{}://{}/...", self.url.scheme(), self.host()),
        }
    }
}

/// Builder for [`Request`].
///
/// Header errors are deferred until [`RequestBuilder::build`].
#[derive(Debug)]
pub struct RequestBuilder {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<RequestBody>,
    error: Option<Error>,
}

impl RequestBuilder {
    pub fn new(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
            error: None,
        }
    }

    pub fn url(mut self, url: Url) -> Self {
        self.url = url;
        self
    }

    pub fn method(mut self, method: Method, body: Option<RequestBody>) -> Self {
        self.method = method;
        self.body = body;
        self
    }

    pub fn post(self, body: RequestBody) -> Self {
        self.method(Method::POST, Some(body))
    }

    /// Replace all values of `name` with `value`.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match Self::pair(name, value) {
            Ok((name, value)) => {
                self.headers.insert(name, value);
            }
            Err(e) => self.error = self.error.or(Some(e)),
        }
        self
    }

    /// Add a value for `name`, keeping existing ones.
    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        match Self::pair(name, value) {
            Ok((name, value)) => {
                self.headers.append(name, value);
            }
            Err(e) => self.error = self.error.or(Some(e)),
        }
        self
    }

    pub fn remove_header(mut self, name: &str) -> Self {
        self.headers.remove(name);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn build(self) -> Result<Request> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if self.body.is_some() && (self.method == Method::GET || self.method == Method::HEAD) {
            return Err(Error::invalid_argument(format!(
                "method {} must not have a request body",
                self.method
            )));
        }
        Ok(Request {
            method: self.method,
            url: self.url,
            headers: self.headers,
            body: self.body,
        })
    }

    fn pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
        Ok((headers::parse_name(name)?, headers::parse_value(value.as_bytes())?))
    }
}
