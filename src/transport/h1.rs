//! RFC 9112 HTTP/1.1 connection.
//!
//! Uses httparse for response heads and raw I/O for request framing.
//! Bytes read past the end of one message stay buffered for the next
//! read, so interim responses and pipelined data are never lost.

use async_trait::async_trait;
use bytes::Bytes;
use http::header::HeaderMap;
use http::Method;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::headers;
use crate::protocol::Protocol;
use crate::request::Request;
use crate::timeouts::{within, Timeouts};
use crate::transport::{Address, BodySource, Connection, ResponseHead};

/// Maximum response header size (64KB).
const MAX_HEADERS_SIZE: usize = 64 * 1024;

/// Maximum number of headers to parse.
const MAX_HEADERS_COUNT: usize = 100;

/// Maximum buffered response body size (64MB).
const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

const READ_CHUNK: usize = 8192;

/// HTTP/1.1 connection over any byte stream.
#[derive(Debug)]
pub struct H1Connection<S = TcpStream> {
    stream: S,
    address: Address,
    timeouts: Timeouts,
    /// Bytes received but not yet consumed.
    buffer: Vec<u8>,
    /// Whether the connection must be closed after the current response.
    should_close: bool,
}

impl<S> H1Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync + std::fmt::Debug,
{
    pub fn new(stream: S, address: Address, timeouts: Timeouts) -> Self {
        Self {
            stream,
            address,
            timeouts,
            buffer: Vec::with_capacity(READ_CHUNK),
            should_close: false,
        }
    }

    /// Extract the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Serialize the request line and header section.
    ///
    /// CONNECT uses authority-form; everything else uses origin-form.
    fn build_head(&self, request: &Request) -> Result<Vec<u8>> {
        let mut head = Vec::with_capacity(1024);
        let method = request.method();
        let url = request.url();

        head.extend_from_slice(method.as_str().as_bytes());
        head.push(b' ');
        if method == Method::CONNECT {
            head.extend_from_slice(self.address.host.as_bytes());
            head.push(b':');
            head.extend_from_slice(self.address.port.to_string().as_bytes());
        } else {
            head.extend_from_slice(url.path().as_bytes());
            if let Some(query) = url.query() {
                head.push(b'?');
                head.extend_from_slice(query.as_bytes());
            }
        }
        head.extend_from_slice(b" HTTP/1.1\r\n");

        let request_headers = request.headers();
        if !request_headers.contains_key(http::header::HOST) {
            head.extend_from_slice(b"Host: ");
            head.extend_from_slice(host_header(url).as_bytes());
            head.extend_from_slice(b"\r\n");
        }

        for (name, value) in request_headers {
            head.extend_from_slice(name.as_str().as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }

        // Per RFC 9112: MUST NOT send Content-Length when Transfer-Encoding is present
        if let Some(body) = request.body() {
            let has_te = request_headers.contains_key(http::header::TRANSFER_ENCODING);
            let has_cl = request_headers.contains_key(http::header::CONTENT_LENGTH);
            match body.content_length() {
                Some(len) if !has_te && !has_cl => {
                    head.extend_from_slice(b"Content-Length: ");
                    head.extend_from_slice(len.to_string().as_bytes());
                    head.extend_from_slice(b"\r\n");
                }
                None if !has_te => head.extend_from_slice(b"Transfer-Encoding: chunked\r\n"),
                _ => {}
            }
        }

        head.extend_from_slice(b"\r\n");
        Ok(head)
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = &mut self.stream;
        within(
            self.timeouts.write,
            async { stream.write_all(bytes).await.map_err(Error::from) },
            Error::WriteTimeout,
        )
        .await
    }

    /// Read more bytes into the buffer, returning how many arrived.
    async fn fill(&mut self) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let stream = &mut self.stream;
        let n = within(
            self.timeouts.read,
            async { stream.read(&mut chunk).await.map_err(Error::from) },
            Error::ReadTimeout,
        )
        .await?;
        self.buffer.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    async fn read_message_body(
        &mut self,
        method: &Method,
        status: u16,
        headers: &HeaderMap,
    ) -> Result<Bytes> {
        // Per RFC 9112 Section 6.3: HEAD responses and 1xx, 204 and 304
        // statuses never carry a body. 205 has none per RFC 9110 15.3.6.
        let has_body = !matches!(status, 100..=199 | 204 | 205 | 304) && *method != Method::HEAD;
        if !has_body {
            return Ok(Bytes::new());
        }

        let transfer_encoding = headers::header_str(headers, "transfer-encoding");
        let is_chunked = transfer_encoding
            .and_then(|v| v.split(',').next_back())
            .map(|s| s.trim().eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);

        if is_chunked {
            self.read_chunked_body().await
        } else if transfer_encoding.is_some() {
            // Non-chunked Transfer-Encoding: read until close
            self.read_until_close().await
        } else if let Some(len) = headers::content_length(headers)? {
            if len > MAX_BODY_SIZE as u64 {
                self.should_close = true;
                return Err(Error::http_protocol(format!(
                    "Content-Length {} exceeds the {} byte body limit",
                    len, MAX_BODY_SIZE
                )));
            }
            self.read_fixed_body(len as usize).await
        } else {
            self.read_until_close().await
        }
    }

    /// Read a fixed-length body.
    ///
    /// A connection closing before `len` bytes arrive is an incomplete
    /// message.
    async fn read_fixed_body(&mut self, len: usize) -> Result<Bytes> {
        while self.buffer.len() < len {
            if self.fill().await? == 0 {
                return Err(Error::UnexpectedEof(format!(
                    "{} (got {} of {} body bytes)",
                    self.address,
                    self.buffer.len(),
                    len
                )));
            }
        }
        let body: Vec<u8> = self.buffer.drain(..len).collect();
        Ok(Bytes::from(body))
    }

    /// Read body until connection close (EOF).
    async fn read_until_close(&mut self) -> Result<Bytes> {
        self.should_close = true;
        while self.fill().await? > 0 {
            if self.buffer.len() > MAX_BODY_SIZE {
                return Err(body_too_large());
            }
        }
        Ok(Bytes::from(std::mem::take(&mut self.buffer)))
    }

    /// Read a chunked transfer-encoded body.
    ///
    /// chunked-body = *chunk last-chunk trailer-section CRLF
    async fn read_chunked_body(&mut self) -> Result<Bytes> {
        let mut body = Vec::new();

        loop {
            let (chunk_size, line_end) = loop {
                if let Some(found) = find_chunk_size(&self.buffer) {
                    break found;
                }
                if self.fill().await? == 0 {
                    return Err(Error::UnexpectedEof(format!(
                        "{} (while reading chunk size)",
                        self.address
                    )));
                }
            };
            self.buffer.drain(..line_end);

            if chunk_size == 0 {
                self.consume_trailers().await?;
                break;
            }

            if chunk_size > MAX_BODY_SIZE - body.len() {
                self.should_close = true;
                return Err(body_too_large());
            }

            // data + CRLF
            let chunk_end = chunk_size + 2;
            while self.buffer.len() < chunk_end {
                if self.fill().await? == 0 {
                    return Err(Error::UnexpectedEof(format!(
                        "{} (while reading chunk data)",
                        self.address
                    )));
                }
            }
            body.extend_from_slice(&self.buffer[..chunk_size]);
            self.buffer.drain(..chunk_end);
        }

        Ok(Bytes::from(body))
    }

    /// Consume trailer fields up to and including the terminating empty line.
    async fn consume_trailers(&mut self) -> Result<()> {
        loop {
            if let Some(pos) = find_crlf(&self.buffer) {
                self.buffer.drain(..pos + 2);
                if pos == 0 {
                    return Ok(());
                }
                continue;
            }
            if self.fill().await? == 0 {
                // Trailers may be absent entirely.
                self.should_close = true;
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl<S> Connection for H1Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync + std::fmt::Debug,
{
    fn address(&self) -> &Address {
        &self.address
    }

    async fn write_request(&mut self, request: &Request) -> Result<()> {
        let head = self.build_head(request)?;
        self.write_all(&head).await?;

        if let Some(body) = request.body() {
            let content = body.content().clone();
            if body.is_chunked() {
                if !content.is_empty() {
                    self.write_all(format!("{:x}\r\n", content.len()).as_bytes())
                        .await?;
                    self.write_all(&content).await?;
                    self.write_all(b"\r\n").await?;
                }
                self.write_all(b"0\r\n\r\n").await?;
            } else {
                self.write_all(&content).await?;
            }
        }

        if headers::has_token(request.headers(), "connection", "close") {
            self.should_close = true;
        }

        let stream = &mut self.stream;
        within(
            self.timeouts.write,
            async { stream.flush().await.map_err(Error::from) },
            Error::WriteTimeout,
        )
        .await
    }

    async fn read_head(&mut self) -> Result<ResponseHead> {
        let header_end = loop {
            if let Some(end) = find_header_end(&self.buffer) {
                break end;
            }
            if self.buffer.len() >= MAX_HEADERS_SIZE {
                return Err(Error::http_protocol("Response headers too large"));
            }
            if self.fill().await? == 0 {
                self.should_close = true;
                return Err(Error::UnexpectedEof(self.address.to_string()));
            }
        };

        let mut fields = [httparse::EMPTY_HEADER; MAX_HEADERS_COUNT];
        let mut parsed = httparse::Response::new(&mut fields);
        match parsed.parse(&self.buffer[..header_end]) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) => {
                return Err(Error::http_protocol("Incomplete response headers"));
            }
            Err(e) => {
                self.should_close = true;
                return Err(Error::http_protocol(format!(
                    "Malformed status line or headers: {}",
                    e
                )));
            }
        }

        let status = parsed
            .code
            .ok_or_else(|| Error::http_protocol("Missing status code"))?;
        let protocol = Protocol::from_minor_version(parsed.version.unwrap_or(1));
        let head = ResponseHead {
            protocol,
            status,
            message: parsed.reason.unwrap_or("").to_string(),
            fields: parsed
                .headers
                .iter()
                .filter(|h| !h.name.is_empty())
                .map(|h| (h.name.to_string(), h.value.to_vec()))
                .collect(),
        };
        self.buffer.drain(..header_end);

        let connection_close = head.fields.iter().any(|(name, value)| {
            name.eq_ignore_ascii_case("connection")
                && String::from_utf8_lossy(value)
                    .split(',')
                    .any(|t| t.trim().eq_ignore_ascii_case("close"))
        });
        let keep_alive = head.fields.iter().any(|(name, value)| {
            name.eq_ignore_ascii_case("connection")
                && String::from_utf8_lossy(value)
                    .to_ascii_lowercase()
                    .contains("keep-alive")
        });
        if connection_close || (!protocol.keeps_alive_by_default() && !keep_alive) {
            self.should_close = true;
        }

        Ok(head)
    }

    async fn read_body(
        &mut self,
        source: BodySource,
        method: &Method,
        status: u16,
        headers: &HeaderMap,
    ) -> Result<Bytes> {
        let result = self.read_message_body(method, status, headers).await;
        match (source, result) {
            (_, Ok(body)) => Ok(body),
            (BodySource::Error, Err(e)) => {
                tracing::warn!("H1: error stream for {} unreadable: {}", self.address, e);
                self.should_close = true;
                Ok(Bytes::new())
            }
            (BodySource::Input, Err(e)) => {
                self.should_close = true;
                Err(e)
            }
        }
    }

    fn abort(&mut self) {
        self.should_close = true;
        self.buffer.clear();
    }

    fn is_reusable(&self) -> bool {
        !self.should_close
    }
}

/// `host[:port]`, omitting the port when it is the scheme default.
pub(crate) fn host_header(url: &url::Url) -> String {
    let host = url.host_str().unwrap_or("");
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Find the end of HTTP headers (\r\n\r\n).
fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
}

/// Parse a chunk size from the buffer, returning (size, end_of_line_position).
fn find_chunk_size(buffer: &[u8]) -> Option<(usize, usize)> {
    let i = find_crlf(buffer)?;
    let line = String::from_utf8_lossy(&buffer[..i]);
    // Chunk extensions after ';' are ignored.
    let size_part = line.split(';').next()?;
    let size = usize::from_str_radix(size_part.trim(), 16).ok()?;
    Some((size, i + 2))
}

fn body_too_large() -> Error {
    Error::http_protocol(format!(
        "response body exceeds the {} byte limit",
        MAX_BODY_SIZE
    ))
}

/// Find the first CRLF in a buffer, returning its position.
fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}
