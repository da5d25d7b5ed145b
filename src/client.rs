//! Call factory and configuration.
//!
//! ```rust,ignore
//! use courier::{Client, Request};
//!
//! let client = Client::builder()
//!     .user_agent("my-app/1.0")
//!     .build();
//! let response = client
//!     .new_call(Request::get("http://example.com/")?)
//!     .execute()
//!     .await?;
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::auth::Authenticator;
use crate::cache::Cache;
use crate::call::Call;
use crate::chain::Interceptor;
use crate::cookie::{CookieJar, NoCookies};
use crate::dispatcher::Dispatcher;
use crate::interceptors::{
    BridgeInterceptor, CacheInterceptor, CallServerInterceptor, ConnectInterceptor, RetryPolicy,
};
use crate::pool::ConnectionPool;
use crate::request::Request;
use crate::timeouts::Timeouts;
use crate::transport::{TcpTransport, Transport};

/// Default `User-Agent` sent when a request does not set one.
pub const DEFAULT_USER_AGENT: &str = concat!("courier/", env!("CARGO_PKG_VERSION"));

/// Shared configuration for calls.
///
/// Cheap to clone; clones share the dispatcher, pool, cookie jar and cache.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    dispatcher: Dispatcher,
    interceptors: Vec<Arc<dyn Interceptor>>,
    network_interceptors: Vec<Arc<dyn Interceptor>>,
    bridge: Arc<dyn Interceptor>,
    cache: Arc<dyn Interceptor>,
    connect: Arc<dyn Interceptor>,
    call_server: Arc<dyn Interceptor>,
    retry_policy: RetryPolicy,
    connection_pool: ConnectionPool,
    cookie_jar: Arc<dyn CookieJar>,
    response_cache: Option<Arc<dyn Cache>>,
    transport: Arc<dyn Transport>,
    user_agent: String,
}

impl Client {
    /// A client with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Prepare `request` for execution.
    pub fn new_call(&self, request: Request) -> Call {
        Call::new(self.clone(), request)
    }

    /// A builder seeded with this client's configuration. Clients built
    /// from it share this client's dispatcher and connection pool.
    pub fn new_builder(&self) -> ClientBuilder {
        let inner = &self.inner;
        ClientBuilder {
            dispatcher: Some(inner.dispatcher.clone()),
            interceptors: inner.interceptors.clone(),
            network_interceptors: inner.network_interceptors.clone(),
            cookie_jar: Some(inner.cookie_jar.clone()),
            cache: inner.response_cache.clone(),
            connection_pool: Some(inner.connection_pool.clone()),
            transport: Some(inner.transport.clone()),
            timeouts: Timeouts::defaults(),
            retry_on_connection_failure: inner.retry_policy.retry_on_connection_failure,
            follow_redirects: inner.retry_policy.follow_redirects,
            authenticator: inner.retry_policy.authenticator.clone(),
            user_agent: inner.user_agent.clone(),
            runtime: None,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn connection_pool(&self) -> &ConnectionPool {
        &self.inner.connection_pool
    }

    pub fn cookie_jar(&self) -> &Arc<dyn CookieJar> {
        &self.inner.cookie_jar
    }

    pub fn cache(&self) -> Option<&Arc<dyn Cache>> {
        self.inner.response_cache.as_ref()
    }

    pub fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.inner.interceptors
    }

    pub fn network_interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.inner.network_interceptors
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry_policy.clone()
    }

    /// The full pipeline for one call around its `retry` stage, plus the
    /// index of the first network stage.
    pub(crate) fn interceptors_with(
        &self,
        retry: Arc<dyn Interceptor>,
    ) -> (Arc<[Arc<dyn Interceptor>]>, usize) {
        let inner = &self.inner;
        let mut stages: Vec<Arc<dyn Interceptor>> = Vec::with_capacity(
            inner.interceptors.len() + inner.network_interceptors.len() + 5,
        );
        stages.extend(inner.interceptors.iter().cloned());
        stages.push(retry);
        stages.push(inner.bridge.clone());
        stages.push(inner.cache.clone());
        stages.push(inner.connect.clone());
        let network_start = stages.len();
        stages.extend(inner.network_interceptors.iter().cloned());
        stages.push(inner.call_server.clone());
        (stages.into(), network_start)
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("dispatcher", &self.inner.dispatcher)
            .field("interceptors", &self.inner.interceptors.len())
            .field("network_interceptors", &self.inner.network_interceptors.len())
            .field("transport", &self.inner.transport)
            .field("user_agent", &self.inner.user_agent)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    dispatcher: Option<Dispatcher>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    network_interceptors: Vec<Arc<dyn Interceptor>>,
    cookie_jar: Option<Arc<dyn CookieJar>>,
    cache: Option<Arc<dyn Cache>>,
    connection_pool: Option<ConnectionPool>,
    transport: Option<Arc<dyn Transport>>,
    timeouts: Timeouts,
    retry_on_connection_failure: bool,
    follow_redirects: bool,
    authenticator: Option<Arc<dyn Authenticator>>,
    user_agent: String,
    runtime: Option<Handle>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            dispatcher: None,
            interceptors: Vec::new(),
            network_interceptors: Vec::new(),
            cookie_jar: None,
            cache: None,
            connection_pool: None,
            transport: None,
            timeouts: Timeouts::defaults(),
            retry_on_connection_failure: true,
            follow_redirects: true,
            authenticator: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            runtime: None,
        }
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share `dispatcher` (and its limits) with other clients.
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Add an application interceptor. These run first, once per call,
    /// and see the request before redirects and retries.
    pub fn add_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Add a network interceptor. These run once per network exchange,
    /// after a connection is attached, and must call `proceed` exactly once.
    pub fn add_network_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.network_interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn cookie_jar(mut self, jar: impl CookieJar + 'static) -> Self {
        self.cookie_jar = Some(Arc::new(jar));
        self
    }

    pub fn cache(mut self, cache: impl Cache + 'static) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    pub fn connection_pool(mut self, pool: ConnectionPool) -> Self {
        self.connection_pool = Some(pool);
        self
    }

    /// Use `transport` instead of the plaintext [`TcpTransport`].
    ///
    /// When set, [`ClientBuilder::timeouts`] is not applied; the transport
    /// carries its own.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Retry connection failures and 408s (default true).
    pub fn retry_on_connection_failure(mut self, enabled: bool) -> Self {
        self.retry_on_connection_failure = enabled;
        self
    }

    pub fn follow_redirects(mut self, enabled: bool) -> Self {
        self.follow_redirects = enabled;
        self
    }

    /// Answer 401/407 challenges with `authenticator`.
    pub fn authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Runtime for asynchronous calls and `execute_blocking`. Defaults to
    /// the runtime current when the first call is enqueued. Ignored when a
    /// dispatcher is supplied.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Client {
        let dispatcher = match (self.dispatcher, self.runtime) {
            (Some(dispatcher), _) => dispatcher,
            (None, Some(handle)) => Dispatcher::with_runtime(handle),
            (None, None) => Dispatcher::new(),
        };
        let cookie_jar = self.cookie_jar.unwrap_or_else(|| Arc::new(NoCookies));
        let connection_pool = self.connection_pool.unwrap_or_default();
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(TcpTransport::new(self.timeouts)));

        let bridge = Arc::new(BridgeInterceptor::new(
            cookie_jar.clone(),
            self.user_agent.clone(),
        ));
        let cache = Arc::new(CacheInterceptor::new(self.cache.clone()));
        let connect = Arc::new(ConnectInterceptor::new(
            connection_pool.clone(),
            transport.clone(),
        ));
        let call_server = Arc::new(CallServerInterceptor::new(
            connection_pool.clone(),
            transport.clone(),
        ));

        Client {
            inner: Arc::new(ClientInner {
                dispatcher,
                interceptors: self.interceptors,
                network_interceptors: self.network_interceptors,
                bridge,
                cache,
                connect,
                call_server,
                retry_policy: RetryPolicy {
                    retry_on_connection_failure: self.retry_on_connection_failure,
                    follow_redirects: self.follow_redirects,
                    authenticator: self.authenticator,
                },
                connection_pool,
                cookie_jar,
                response_cache: self.cache,
                transport,
                user_agent: self.user_agent,
            }),
        }
    }
}
