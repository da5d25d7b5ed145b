//! Error types for the courier crate.

use std::io;
use std::time::Duration;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while executing a call.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `execute()` or `enqueue()` invoked on a call that already ran.
    #[error("Already executed")]
    AlreadyExecuted,

    /// A configuration value was out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The call was canceled before a response could be delivered.
    #[error("Canceled")]
    Canceled,

    /// An interceptor produced no response.
    #[error("interceptor #{index} ({name}) returned no response")]
    NullResponse { index: usize, name: String },

    /// An interceptor broke the chain protocol (e.g. called proceed twice).
    #[error("Interceptor contract violated: {0}")]
    Contract(String),

    /// A panic escaped the interceptor chain.
    #[error("Unexpected failure: {0}")]
    Unexpected(String),

    /// No tokio runtime was available to run asynchronous calls.
    #[error("No tokio runtime available to run asynchronous calls")]
    NoRuntime,

    /// HTTP protocol error.
    #[error("HTTP protocol error: {0}")]
    HttpProtocol(String),

    /// Redirect limit exceeded.
    #[error("Too many follow-up requests: {count}")]
    RedirectLimit { count: u32 },

    /// Cookie parsing error.
    #[error("Cookie parse error: {0}")]
    CookieParse(String),

    /// Decompression error.
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server closed the stream before a complete response arrived.
    #[error("unexpected end of stream on {0}")]
    UnexpectedEof(String),

    /// Connect timeout.
    #[error("Connect timeout after {0:?}")]
    ConnectTimeout(Duration),

    /// No data received within the read timeout.
    #[error("Read timeout after {0:?}")]
    ReadTimeout(Duration),

    /// Could not send data within the write timeout.
    #[error("Write timeout after {0:?}")]
    WriteTimeout(Duration),
}

impl Error {
    /// Create an HTTP protocol error.
    pub fn http_protocol(message: impl Into<String>) -> Self {
        Self::HttpProtocol(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create an interceptor contract error.
    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract(message.into())
    }

    /// Create an IO error with custom message.
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(io::Error::other(message.into()))
    }

    /// Whether this is the cancellation outcome rather than a failure.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Defects in a collaborator or in dispatcher bookkeeping.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::NullResponse { .. } | Self::Contract(_) | Self::Unexpected(_)
        )
    }

    /// Connection-level failures a retry policy may recover from by
    /// trying again on a fresh connection.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(e) => !matches!(
                e.kind(),
                io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData
            ),
            Self::Connection(_) | Self::UnexpectedEof(_) | Self::ConnectTimeout(_) => true,
            _ => false,
        }
    }
}
