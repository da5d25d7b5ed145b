//! Timeout configuration for the bundled TCP transport.
//!
//! - **connect**: TCP connection establishment. Does NOT reset.
//! - **read**: maximum time between received bytes. RESETS on each read.
//! - **write**: maximum time between sent bytes. RESETS on each write.
//!
//! ```rust,ignore
//! use courier::{Client, Timeouts};
//! use std::time::Duration;
//!
//! let client = Client::builder()
//!     .timeouts(Timeouts::defaults().read(Duration::from_secs(5)))
//!     .build()?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Per-phase timeouts. `None` disables a phase's timeout.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Timeouts {
    /// Deadline for establishing the transport connection.
    ///
    /// Default: 10s
    pub connect: Option<Duration>,

    /// Read idle timeout: maximum time waiting for the next bytes of the
    /// response head or body.
    ///
    /// Default: 30s
    pub read: Option<Duration>,

    /// Write idle timeout: maximum time waiting to send the next bytes of
    /// the request.
    ///
    /// Default: 30s
    pub write: Option<Duration>,
}

impl Timeouts {
    /// No timeouts at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// connect 10s, read 30s, write 30s.
    pub fn defaults() -> Self {
        Self {
            connect: Some(Duration::from_secs(10)),
            read: Some(Duration::from_secs(30)),
            write: Some(Duration::from_secs(30)),
        }
    }

    pub fn connect(mut self, timeout: Duration) -> Self {
        self.connect = Some(timeout);
        self
    }

    pub fn read(mut self, timeout: Duration) -> Self {
        self.read = Some(timeout);
        self
    }

    pub fn write(mut self, timeout: Duration) -> Self {
        self.write = Some(timeout);
        self
    }

    pub fn no_connect_timeout(mut self) -> Self {
        self.connect = None;
        self
    }

    pub fn no_read_timeout(mut self) -> Self {
        self.read = None;
        self
    }

    pub fn no_write_timeout(mut self) -> Self {
        self.write = None;
        self
    }
}

/// Await `fut`, failing with `on_elapsed(limit)` if `limit` passes first.
pub(crate) async fn within<T, F>(
    limit: Option<Duration>,
    fut: F,
    on_elapsed: fn(Duration) -> Error,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| on_elapsed(limit))?,
        None => fut.await,
    }
}
