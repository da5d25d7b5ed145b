//! Built-in pipeline stages.
//!
//! Order per call: application interceptors, [`RetryAndFollowUpInterceptor`],
//! [`BridgeInterceptor`], [`CacheInterceptor`], [`ConnectInterceptor`],
//! network interceptors, [`CallServerInterceptor`].

mod bridge;
mod cache;
mod call_server;
mod connect;
mod retry;

pub use bridge::BridgeInterceptor;
pub use cache::CacheInterceptor;
pub use call_server::CallServerInterceptor;
pub use connect::ConnectInterceptor;
pub use retry::{RetryAndFollowUpInterceptor, RetryPolicy};
