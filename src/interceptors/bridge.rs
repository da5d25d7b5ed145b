//! Turns user requests into network requests and network responses back
//! into user responses: default headers, cookies, transparent gzip.

use std::sync::Arc;

use async_trait::async_trait;

use crate::chain::{Chain, Interceptor};
use crate::cookie::{Cookie, CookieJar};
use crate::error::Result;
use crate::headers;
use crate::response::{decode_gzip, Response, ResponseBody};
use crate::transport::h1::host_header;

/// Turns the user's request into a network request and the network
/// response back into a user response.
///
/// Fills in framing and default headers, applies cookies in both
/// directions and transparently decompresses gzip when it was the one
/// asking for it.
#[derive(Debug)]
pub struct BridgeInterceptor {
    cookie_jar: Arc<dyn CookieJar>,
    user_agent: String,
}

impl BridgeInterceptor {
    pub fn new(cookie_jar: Arc<dyn CookieJar>, user_agent: impl Into<String>) -> Self {
        Self {
            cookie_jar,
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl Interceptor for BridgeInterceptor {
    async fn intercept(&self, chain: &mut Chain) -> Result<Option<Response>> {
        let user_request = chain.request().clone();
        let mut builder = user_request.new_builder();

        if let Some(body) = user_request.body() {
            if let Some(content_type) = body.content_type() {
                builder = builder.header("Content-Type", content_type);
            }
            builder = match body.content_length() {
                Some(len) => builder
                    .header("Content-Length", &len.to_string())
                    .remove_header("Transfer-Encoding"),
                None => builder
                    .header("Transfer-Encoding", "chunked")
                    .remove_header("Content-Length"),
            };
        }

        if user_request.header("Host").is_none() {
            builder = builder.header("Host", &host_header(user_request.url()));
        }
        if user_request.header("Connection").is_none() {
            builder = builder.header("Connection", "Keep-Alive");
        }

        // Only decompress what we asked for; a caller's own Accept-Encoding
        // or Range means the raw bytes are wanted.
        let transparent_gzip =
            user_request.header("Accept-Encoding").is_none() && user_request.header("Range").is_none();
        if transparent_gzip {
            builder = builder.header("Accept-Encoding", "gzip");
        }

        let cookies = self.cookie_jar.load_for_request(user_request.url());
        if !cookies.is_empty() {
            builder = builder.header("Cookie", &cookie_header(&cookies));
        }

        if user_request.header("User-Agent").is_none() {
            builder = builder.header("User-Agent", &self.user_agent);
        }

        let network_response = chain.proceed(builder.build()?).await?;

        let received: Vec<Cookie> = network_response
            .headers_all("Set-Cookie")
            .into_iter()
            .filter_map(|value| match Cookie::parse(value, user_request.url()) {
                Ok(cookie) => Some(cookie),
                Err(e) => {
                    tracing::debug!("Bridge: ignoring Set-Cookie: {}", e);
                    None
                }
            })
            .collect();
        if !received.is_empty() {
            self.cookie_jar
                .save_from_response(user_request.url(), received);
        }

        let mut response = network_response.new_builder().request(user_request);

        let gzipped = network_response
            .content_encoding()
            .map(|e| e.eq_ignore_ascii_case("gzip"))
            .unwrap_or(false);
        let raw = network_response.raw_bytes();
        if transparent_gzip && gzipped && !raw.is_empty() {
            let content_type =
                headers::header_str(network_response.headers(), "content-type").map(str::to_string);
            response = response
                .remove_header("Content-Encoding")
                .remove_header("Content-Length")
                .body(Some(ResponseBody::new(decode_gzip(&raw)?, content_type)));
        }

        response.build().map(Some)
    }
}

/// `name=value; name2=value2`
fn cookie_header(cookies: &[Cookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}
