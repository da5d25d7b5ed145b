//! Attaches a pooled or freshly opened connection to the chain.

use std::sync::Arc;

use async_trait::async_trait;

use crate::chain::{Chain, Interceptor};
use crate::error::Result;
use crate::pool::ConnectionPool;
use crate::response::Response;
use crate::transport::{Address, Transport};

/// Attaches a connection to the chain: an idle pooled one when available,
/// otherwise a fresh one from the transport.
#[derive(Debug)]
pub struct ConnectInterceptor {
    pool: ConnectionPool,
    transport: Arc<dyn Transport>,
}

impl ConnectInterceptor {
    pub fn new(pool: ConnectionPool, transport: Arc<dyn Transport>) -> Self {
        Self { pool, transport }
    }
}

#[async_trait]
impl Interceptor for ConnectInterceptor {
    async fn intercept(&self, chain: &mut Chain) -> Result<Option<Response>> {
        chain.cancel_token().check()?;
        let address = Address::from_url(chain.request().url())?;

        let connection = match self.pool.get(&address).await {
            Some(connection) => connection,
            None => {
                tracing::debug!("Connect: opening new connection to {}", address);
                self.transport.connect(&address).await?
            }
        };
        chain.attach_connection(connection);

        let request = chain.request().clone();
        chain.proceed(request).await.map(Some)
    }
}
