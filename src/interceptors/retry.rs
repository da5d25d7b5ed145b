//! Connection-failure retries, redirects, auth challenges and other
//! follow-up requests.

use std::sync::Arc;

use async_trait::async_trait;
use http::Method;

use crate::auth::Authenticator;
use crate::cancel::CancelToken;
use crate::chain::{Chain, Interceptor};
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::transport::Address;

/// Maximum number of redirects and auth follow-ups per call.
pub const MAX_FOLLOW_UPS: u32 = 20;

/// Maximum number of retries after connection failures per call.
pub const MAX_RETRIES: u32 = 3;

/// How a call recovers from failures and follows up on responses.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retry_on_connection_failure: bool,
    pub follow_redirects: bool,
    pub authenticator: Option<Arc<dyn Authenticator>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_on_connection_failure: true,
            follow_redirects: true,
            authenticator: None,
        }
    }
}

/// Recovers from connection failures and follows redirects and auth
/// challenges. One instance per call; it owns the call's cancel token.
#[derive(Debug)]
pub struct RetryAndFollowUpInterceptor {
    policy: RetryPolicy,
    token: CancelToken,
}

impl RetryAndFollowUpInterceptor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            token: CancelToken::new(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_canceled()
    }

    pub(crate) fn token(&self) -> CancelToken {
        self.token.clone()
    }

    fn recover(&self, error: &Error, retries: u32) -> bool {
        self.policy.retry_on_connection_failure
            && error.is_retryable()
            && retries < MAX_RETRIES
            && !self.token.is_canceled()
    }

    /// The request to send next for `response`, if any.
    fn follow_up_request(&self, response: &Response, prior: Option<u16>) -> Result<Option<Request>> {
        match response.status() {
            401 | 407 => match &self.policy.authenticator {
                Some(authenticator) => authenticator.authenticate(response),
                None => Ok(None),
            },

            300 | 301 | 302 | 303 | 307 | 308 => self.build_redirect_request(response),

            408 => {
                if !self.policy.retry_on_connection_failure || prior == Some(408) {
                    return Ok(None);
                }
                if retry_after(response).unwrap_or(0) > 0 {
                    return Ok(None);
                }
                Ok(Some(response.request().clone()))
            }

            503 => {
                if prior == Some(503) {
                    return Ok(None);
                }
                // Only an explicit immediate Retry-After is honored.
                if retry_after(response) == Some(0) {
                    return Ok(Some(response.request().clone()));
                }
                Ok(None)
            }

            _ => Ok(None),
        }
    }

    fn build_redirect_request(&self, response: &Response) -> Result<Option<Request>> {
        if !self.policy.follow_redirects {
            return Ok(None);
        }
        let Some(location) = response.header("Location") else {
            return Ok(None);
        };
        let request = response.request();
        let Ok(url) = request.url().join(location) else {
            tracing::debug!("Retry: ignoring unparseable Location {:?}", location);
            return Ok(None);
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            return Ok(None);
        }

        let status = response.status();
        let method = request.method().clone();
        let mut builder = request.new_builder().url(url.clone());

        if method != Method::GET && method != Method::HEAD {
            let keeps_method = status == 307 || status == 308;
            if keeps_method {
                builder = builder.method(method, request.body().cloned());
            } else {
                builder = builder
                    .method(Method::GET, None)
                    .remove_header("Transfer-Encoding")
                    .remove_header("Content-Length")
                    .remove_header("Content-Type");
            }
        }

        // Credentials stay with the origin they were meant for.
        let same_origin = match (Address::from_url(request.url()), Address::from_url(&url)) {
            (Ok(from), Ok(to)) => from == to,
            _ => false,
        };
        if !same_origin {
            builder = builder.remove_header("Authorization");
        }

        tracing::debug!(
            "Retry: following {} redirect to {}://{}/...",
            status,
            url.scheme(),
            url.host_str().unwrap_or("")
        );
        builder.build().map(Some)
    }
}

#[async_trait]
impl Interceptor for RetryAndFollowUpInterceptor {
    async fn intercept(&self, chain: &mut Chain) -> Result<Option<Response>> {
        let mut request = chain.request().clone();
        let mut follow_ups = 0u32;
        let mut retries = 0u32;
        let mut prior: Option<u16> = None;

        loop {
            self.token.check()?;

            let response = match chain.proceed(request.clone()).await {
                Ok(response) => response,
                Err(e) => {
                    if !self.recover(&e, retries) {
                        return Err(e);
                    }
                    retries += 1;
                    tracing::warn!(
                        "Retry: {} failed ({}), retrying ({}/{})",
                        request.redacted_url(),
                        e,
                        retries,
                        MAX_RETRIES
                    );
                    continue;
                }
            };

            let Some(follow_up) = self.follow_up_request(&response, prior)? else {
                return Ok(Some(response));
            };

            follow_ups += 1;
            if follow_ups > MAX_FOLLOW_UPS {
                return Err(Error::RedirectLimit { count: follow_ups });
            }

            prior = Some(response.status());
            request = follow_up;
        }
    }
}

/// Seconds from a `Retry-After` header; HTTP dates are not supported.
fn retry_after(response: &Response) -> Option<u64> {
    response.header("Retry-After")?.trim().parse().ok()
}
