//! HTTP protocol identifiers.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Protocol a response was received over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// HTTP/1.0.
    Http1_0,
    /// HTTP/1.1.
    #[default]
    Http1_1,
    /// HTTP/2.
    Http2,
}

impl Protocol {
    /// Get the protocol string as it appears in a status line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http1_0 => "HTTP/1.0",
            Self::Http1_1 => "HTTP/1.1",
            Self::Http2 => "HTTP/2",
        }
    }

    /// Minor version reported by an HTTP/1.x parser.
    pub fn from_minor_version(minor: u8) -> Self {
        match minor {
            0 => Self::Http1_0,
            _ => Self::Http1_1,
        }
    }

    /// Whether connections default to persistent for this protocol.
    pub fn keeps_alive_by_default(&self) -> bool {
        !matches!(self, Self::Http1_0)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "HTTP/1.0" => Ok(Self::Http1_0),
            "HTTP/1.1" => Ok(Self::Http1_1),
            "HTTP/2" | "HTTP/2.0" | "h2" => Ok(Self::Http2),
            other => Err(Error::http_protocol(format!("Unexpected protocol: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("HTTP/1.1".parse::<Protocol>().unwrap(), Protocol::Http1_1);
        assert_eq!("HTTP/1.0".parse::<Protocol>().unwrap(), Protocol::Http1_0);
        assert_eq!("h2".parse::<Protocol>().unwrap(), Protocol::Http2);
        assert!("SPDY/3".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_keep_alive_default() {
        assert!(!Protocol::Http1_0.keeps_alive_by_default());
        assert!(Protocol::from_minor_version(1).keeps_alive_by_default());
    }
}
