//! # Courier
//!
//! HTTP client call-execution engine.
//!
//! Courier admits and runs calls under global and per-host concurrency
//! limits, executes each call exactly once (awaited, blocking or with a
//! callback) and routes it through an ordered interceptor pipeline whose
//! last stage talks to a pluggable transport.

pub mod auth;
pub mod cache;
pub mod call;
pub mod cancel;
pub mod chain;
pub mod client;
pub mod cookie;
pub mod dispatcher;
pub mod error;
pub mod headers;
pub mod interceptors;
pub mod pool;
pub mod protocol;
pub mod request;
pub mod response;
pub mod timeouts;
pub mod transport;

// Re-exports
pub use auth::{Authenticator, BasicAuthenticator};
pub use cache::{Cache, CacheStatus, HttpCache};
pub use call::{callback_fn, Call, CallId, Callback};
pub use cancel::CancelToken;
pub use chain::{Chain, Interceptor};
pub use client::{Client, ClientBuilder};
pub use cookie::{Cookie, CookieJar, MemoryCookieJar, NoCookies};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use pool::ConnectionPool;
pub use protocol::Protocol;
pub use request::{Request, RequestBody, RequestBuilder};
pub use response::{Response, ResponseBody, ResponseBuilder};
pub use timeouts::Timeouts;
pub use transport::{Address, BodySource, Connection, ResponseHead, TcpTransport, Transport};
