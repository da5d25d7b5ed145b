//! Transport boundary consumed by the terminal interceptor.
//!
//! A [`Transport`] opens [`Connection`]s; a connection performs one
//! exchange at a time in discrete steps so the terminal stage can skip
//! interim responses, pick the body source by status and decide whether
//! the connection may be reused. The crate bundles a plaintext HTTP/1.1
//! implementation ([`TcpTransport`]); embedders plug in others.

pub mod h1;
pub mod tcp;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::HeaderMap;
use http::Method;
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::Protocol;
use crate::request::Request;

pub use h1::H1Connection;
pub use tcp::TcpTransport;

/// Destination a connection is bound to. Also the connection pool key.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct Address {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
        }
    }

    pub fn from_url(url: &Url) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::connection(format!("URL has no host: {}", url)))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::connection(format!("URL has no port: {}", url)))?;
        Ok(Self::new(url.scheme(), host, port))
    }

    pub fn is_https(&self) -> bool {
        self.scheme == "https"
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Status line plus raw header fields of one response head, as read off
/// the wire. Interim (1xx) heads are returned like any other.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub protocol: Protocol,
    pub status: u16,
    pub message: String,
    pub fields: Vec<(String, Vec<u8>)>,
}

impl ResponseHead {
    pub fn is_interim(&self) -> bool {
        (100..200).contains(&self.status)
    }
}

/// Which stream a response body is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySource {
    /// Normal input stream, for statuses below 400.
    Input,
    /// Error stream, for statuses of 400 and above. Reading it never
    /// fails the exchange: an unreadable error body becomes an empty one.
    Error,
}

impl BodySource {
    pub fn for_status(status: u16) -> Self {
        if status >= 400 {
            Self::Error
        } else {
            Self::Input
        }
    }
}

/// One established connection.
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    fn address(&self) -> &Address;

    /// Write the request line, headers and body.
    async fn write_request(&mut self, request: &Request) -> Result<()>;

    /// Read the next response head.
    async fn read_head(&mut self) -> Result<ResponseHead>;

    /// Read the body belonging to the last head.
    async fn read_body(
        &mut self,
        source: BodySource,
        method: &Method,
        status: u16,
        headers: &HeaderMap,
    ) -> Result<Bytes>;

    /// Abandon the connection; it must not be used again.
    fn abort(&mut self);

    /// Whether another exchange may follow on this connection.
    fn is_reusable(&self) -> bool;
}

/// Opens connections. Chosen once, when the client is built.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn connect(&self, address: &Address) -> Result<Box<dyn Connection>>;
}
