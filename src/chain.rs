//! Interceptor pipeline.
//!
//! A [`Chain`] is a cursor over a fixed, shared interceptor list. Each
//! [`Chain::proceed`] invokes the interceptor under the cursor with a chain
//! positioned one step further, so every stage sees only the suffix of the
//! pipeline that follows it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::transport::{Address, Connection};

/// One pipeline stage.
///
/// Implementations either call [`Chain::proceed`] and return (a possibly
/// rewritten version of) its response, or short-circuit by producing a
/// response of their own. Returning `Ok(None)` is a contract violation and
/// fails the call with [`Error::NullResponse`].
///
/// Interceptors installed as network interceptors must call `proceed`
/// exactly once and must not change the request's host or port.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(&self, chain: &mut Chain) -> Result<Option<Response>>;

    /// Name used in diagnostics. Defaults to the implementing type's name.
    fn name(&self) -> &str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }
}

/// Position-tracked view over the interceptors that remain for a call.
pub struct Chain {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
    /// Index of the first stage that runs with a connection attached.
    network_start: usize,
    index: usize,
    request: Request,
    token: CancelToken,
    connection: Option<Box<dyn Connection>>,
    calls: usize,
}

impl Chain {
    /// A chain positioned at the first interceptor.
    pub fn new(
        interceptors: Arc<[Arc<dyn Interceptor>]>,
        request: Request,
        token: CancelToken,
    ) -> Self {
        let network_start = interceptors.len();
        Self {
            interceptors,
            network_start,
            index: 0,
            request,
            token,
            connection: None,
            calls: 0,
        }
    }

    /// Mark the stages from `index` onward as network stages, subject to
    /// the call-exactly-once and same-address rules.
    pub fn with_network_stage(mut self, index: usize) -> Self {
        self.network_start = index;
        self
    }

    /// The request as it reached this stage.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Position of the interceptor the next `proceed` will invoke.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.token
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_canceled()
    }

    /// Connection prepared for the exchange, if a connect stage has run.
    pub fn connection(&self) -> Option<&dyn Connection> {
        self.connection.as_deref()
    }

    /// Hand a connection to the stages that follow.
    pub fn attach_connection(&mut self, connection: Box<dyn Connection>) {
        self.connection = Some(connection);
    }

    /// Claim the attached connection; used by the terminal stage.
    pub fn take_connection(&mut self) -> Option<Box<dyn Connection>> {
        self.connection.take()
    }

    /// Invoke the next interceptor with `request` and return its response.
    ///
    /// # Panics
    ///
    /// Panics if called from the terminal interceptor, which has no next
    /// stage.
    pub async fn proceed(&mut self, request: Request) -> Result<Response> {
        assert!(
            self.index < self.interceptors.len(),
            "proceed() called past the end of the interceptor chain"
        );

        self.calls += 1;
        let network = self.index >= self.network_start;

        if network && self.index > 0 {
            let caller = self.index - 1;
            if !same_address(&self.request, &request) {
                return Err(Error::contract(format!(
                    "network interceptor #{} ({}) must retain the same host and port",
                    caller,
                    self.interceptors[caller].name()
                )));
            }
            if self.calls > 1 {
                return Err(Error::contract(format!(
                    "network interceptor #{} ({}) must call proceed() exactly once",
                    caller,
                    self.interceptors[caller].name()
                )));
            }
        }

        let mut next = Chain {
            interceptors: Arc::clone(&self.interceptors),
            network_start: self.network_start,
            index: self.index + 1,
            request,
            token: self.token.clone(),
            connection: self.connection.take(),
            calls: 0,
        };
        let interceptor = Arc::clone(&self.interceptors[self.index]);
        let response = interceptor.intercept(&mut next).await?;

        if network && self.index + 1 < self.interceptors.len() && next.calls != 1 {
            return Err(Error::contract(format!(
                "network interceptor #{} ({}) must call proceed() exactly once",
                self.index,
                interceptor.name()
            )));
        }

        match response {
            Some(response) => Ok(response),
            None => {
                tracing::error!(
                    "Chain: interceptor #{} ({}) returned no response",
                    self.index,
                    interceptor.name()
                );
                Err(Error::NullResponse {
                    index: self.index,
                    name: interceptor.name().to_string(),
                })
            }
        }
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("index", &self.index)
            .field("len", &self.interceptors.len())
            .field("network_start", &self.network_start)
            .field("request", &self.request.redacted_url())
            .finish()
    }
}

fn same_address(a: &Request, b: &Request) -> bool {
    match (Address::from_url(a.url()), Address::from_url(b.url())) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
