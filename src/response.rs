//! HTTP response values with explicit decompression.

use std::io::Read;
use std::time::SystemTime;

use bytes::Bytes;
use http::header::HeaderMap;

use crate::error::{Error, Result};
use crate::headers;
use crate::protocol::Protocol;
use crate::request::Request;

/// Response payload as read from the transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseBody {
    content: Bytes,
    content_type: Option<String>,
}

impl ResponseBody {
    pub fn new(content: impl Into<Bytes>, content_type: Option<String>) -> Self {
        Self {
            content: content.into(),
            content_type,
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.content
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_length(&self) -> u64 {
        self.content.len() as u64
    }
}

/// An immutable HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    protocol: Protocol,
    status: u16,
    message: String,
    headers: HeaderMap,
    body: Option<ResponseBody>,
    request: Request,
    network_response: Option<Box<Response>>,
    cache_response: Option<Box<Response>>,
    sent_at: SystemTime,
    received_at: SystemTime,
}

impl Response {
    pub fn builder(request: Request) -> ResponseBuilder {
        ResponseBuilder::new(request)
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&ResponseBody> {
        self.body.as_ref()
    }

    pub fn into_body(self) -> Option<ResponseBody> {
        self.body
    }

    /// The request that produced this response, as seen by the outermost
    /// interceptor that reattached it.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Raw response received from the network, if one was used.
    pub fn network_response(&self) -> Option<&Response> {
        self.network_response.as_deref()
    }

    /// Response served from the cache, if one was used.
    pub fn cache_response(&self) -> Option<&Response> {
        self.cache_response.as_deref()
    }

    pub fn sent_at(&self) -> SystemTime {
        self.sent_at
    }

    pub fn received_at(&self) -> SystemTime {
        self.received_at
    }

    pub fn is_successful(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 300 | 301 | 302 | 303 | 307 | 308)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        headers::header_str(&self.headers, name)
    }

    pub fn headers_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.header("Content-Encoding")
    }

    /// A builder seeded with a copy of this response.
    pub fn new_builder(&self) -> ResponseBuilder {
        ResponseBuilder {
            request: self.request.clone(),
            protocol: self.protocol,
            status: Some(self.status),
            message: self.message.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            network_response: self.network_response.clone(),
            cache_response: self.cache_response.clone(),
            sent_at: self.sent_at,
            received_at: self.received_at,
        }
    }

    /// Copy without a body, for attaching as network/cache response.
    pub fn strip_body(&self) -> Response {
        let mut copy = self.clone();
        copy.body = None;
        copy
    }

    /// Body bytes, or empty when there is no body.
    pub fn raw_bytes(&self) -> Bytes {
        self.body
            .as_ref()
            .map(|b| b.bytes().clone())
            .unwrap_or_default()
    }

    /// Decode body based on Content-Encoding (gzip, deflate, br, zstd).
    pub fn decoded_body(&self) -> Result<Bytes> {
        let raw = self.raw_bytes();
        match self.content_encoding().map(|s| s.to_lowercase()).as_deref() {
            Some("gzip") | Some("x-gzip") => decode_gzip(&raw),
            Some("deflate") => decode_deflate(&raw),
            Some("br") => decode_brotli(&raw),
            Some("zstd") => decode_zstd(&raw),
            _ => Ok(raw),
        }
    }

    pub fn text(&self) -> Result<String> {
        let decoded = self.decoded_body()?;
        String::from_utf8(decoded.to_vec())
            .map_err(|e| Error::Decompression(format!("UTF-8 decode error: {}", e)))
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let text = self.text()?;
        serde_json::from_str(&text).map_err(Error::from)
    }
}

/// Incremental builder used by the terminal interceptor and by
/// interceptors that reattach context on the way out.
#[derive(Debug)]
pub struct ResponseBuilder {
    request: Request,
    protocol: Protocol,
    status: Option<u16>,
    message: String,
    headers: HeaderMap,
    body: Option<ResponseBody>,
    network_response: Option<Box<Response>>,
    cache_response: Option<Box<Response>>,
    sent_at: SystemTime,
    received_at: SystemTime,
}

impl ResponseBuilder {
    pub fn new(request: Request) -> Self {
        let now = SystemTime::now();
        Self {
            request,
            protocol: Protocol::default(),
            status: None,
            message: String::new(),
            headers: HeaderMap::new(),
            body: None,
            network_response: None,
            cache_response: None,
            sent_at: now,
            received_at: now,
        }
    }

    pub fn request(mut self, request: Request) -> Self {
        self.request = request;
        self
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        self.headers.insert(
            headers::parse_name(name)?,
            headers::parse_value(value.as_bytes())?,
        );
        Ok(self)
    }

    pub fn remove_header(mut self, name: &str) -> Self {
        self.headers.remove(name);
        self
    }

    pub fn body(mut self, body: Option<ResponseBody>) -> Self {
        self.body = body;
        self
    }

    pub fn network_response(mut self, response: Option<Response>) -> Self {
        self.network_response = response.map(|r| Box::new(r.strip_body()));
        self
    }

    pub fn cache_response(mut self, response: Option<Response>) -> Self {
        self.cache_response = response.map(|r| Box::new(r.strip_body()));
        self
    }

    pub fn sent_at(mut self, at: SystemTime) -> Self {
        self.sent_at = at;
        self
    }

    pub fn received_at(mut self, at: SystemTime) -> Self {
        self.received_at = at;
        self
    }

    pub fn build(self) -> Result<Response> {
        let status = self
            .status
            .ok_or_else(|| Error::http_protocol("response built without a status code"))?;
        Ok(Response {
            protocol: self.protocol,
            status,
            message: self.message,
            headers: self.headers,
            body: self.body,
            request: self.request,
            network_response: self.network_response,
            cache_response: self.cache_response,
            sent_at: self.sent_at,
            received_at: self.received_at,
        })
    }
}

pub(crate) fn decode_gzip(data: &[u8]) -> Result<Bytes> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(format!("gzip: {}", e)))?;
    Ok(Bytes::from(decoded))
}

fn decode_deflate(data: &[u8]) -> Result<Bytes> {
    let mut decoded = Vec::new();
    if flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut decoded)
        .is_ok()
    {
        return Ok(Bytes::from(decoded));
    }
    decoded.clear();
    flate2::read::DeflateDecoder::new(data)
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(format!("deflate: {}", e)))?;
    Ok(Bytes::from(decoded))
}

fn decode_brotli(data: &[u8]) -> Result<Bytes> {
    let mut decoder = brotli::Decompressor::new(data, 4096);
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(format!("brotli: {}", e)))?;
    Ok(Bytes::from(decoded))
}

fn decode_zstd(data: &[u8]) -> Result<Bytes> {
    zstd::stream::decode_all(data)
        .map(Bytes::from)
        .map_err(|e| Error::Decompression(format!("zstd: {}", e)))
}
