//! Plaintext TCP transport.

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::timeouts::{within, Timeouts};
use crate::transport::h1::H1Connection;
use crate::transport::{Address, Connection, Transport};

/// Opens plaintext HTTP/1.1 connections over TCP.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    timeouts: Timeouts,
    nodelay: bool,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(Timeouts::defaults())
    }
}

impl TcpTransport {
    pub fn new(timeouts: Timeouts) -> Self {
        Self {
            timeouts,
            nodelay: true,
        }
    }

    /// Toggle `TCP_NODELAY` on new sockets (enabled by default).
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, address: &Address) -> Result<Box<dyn Connection>> {
        if address.is_https() {
            return Err(Error::connection(format!(
                "TLS is not supported by TcpTransport: {}",
                address
            )));
        }

        let stream = within(
            self.timeouts.connect,
            async {
                TcpStream::connect((address.host.as_str(), address.port))
                    .await
                    .map_err(Error::from)
            },
            Error::ConnectTimeout,
        )
        .await?;
        stream.set_nodelay(self.nodelay)?;

        tracing::debug!("TCP: connected to {}", address);
        Ok(Box::new(H1Connection::new(
            stream,
            address.clone(),
            self.timeouts.clone(),
        )))
    }
}
