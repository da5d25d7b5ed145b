//! Terminal stage: writes the request and reads the response on one
//! connection.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;

use crate::cancel::CancelToken;
use crate::chain::{Chain, Interceptor};
use crate::error::{Error, Result};
use crate::headers;
use crate::pool::ConnectionPool;
use crate::request::Request;
use crate::response::{Response, ResponseBody, ResponseBuilder};
use crate::transport::{Address, BodySource, Connection, Transport};

/// Terminal stage: performs the exchange on the attached connection.
///
/// When no connection was attached (a pipeline without a connect stage)
/// it opens one through the transport itself. After the exchange the
/// connection is returned to the pool unless either side asked to close
/// it.
#[derive(Debug)]
pub struct CallServerInterceptor {
    pool: ConnectionPool,
    transport: Arc<dyn Transport>,
}

impl CallServerInterceptor {
    pub fn new(pool: ConnectionPool, transport: Arc<dyn Transport>) -> Self {
        Self { pool, transport }
    }

    async fn exchange(
        connection: &mut dyn Connection,
        request: &Request,
        token: &CancelToken,
    ) -> Result<Response> {
        token.check()?;
        let sent_at = SystemTime::now();
        connection.write_request(request).await?;

        // 100 Continue and other informational heads are skipped; 101 is final.
        let head = loop {
            token.check()?;
            let head = connection.read_head().await?;
            if head.status == 100 || (102..200).contains(&head.status) {
                tracing::debug!("CallServer: skipping interim {} response", head.status);
                continue;
            }
            break head;
        };
        token.check()?;

        let status = head.status;
        let fields = headers::merge_fields(head.fields)?;
        let reset = status == 204 || status == 205;
        if reset {
            let declared = headers::content_length(&fields)?.unwrap_or(0);
            if declared > 0 {
                return Err(Error::http_protocol(format!(
                    "HTTP {} had non-zero Content-Length: {}",
                    status, declared
                )));
            }
        }
        let content = connection
            .read_body(
                BodySource::for_status(status),
                request.method(),
                status,
                &fields,
            )
            .await?;
        if reset && !content.is_empty() {
            return Err(Error::http_protocol(format!(
                "HTTP {} had non-zero Content-Length: {}",
                status,
                content.len()
            )));
        }

        let content_type = headers::header_str(&fields, "content-type").map(str::to_string);
        ResponseBuilder::new(request.clone())
            .protocol(head.protocol)
            .status(status)
            .message(head.message)
            .headers(fields)
            .body(Some(ResponseBody::new(content, content_type)))
            .sent_at(sent_at)
            .received_at(SystemTime::now())
            .build()
    }
}

#[async_trait]
impl Interceptor for CallServerInterceptor {
    async fn intercept(&self, chain: &mut Chain) -> Result<Option<Response>> {
        let request = chain.request().clone();
        let token = chain.cancel_token().clone();

        let mut connection = match chain.take_connection() {
            Some(connection) => connection,
            None => {
                let address = Address::from_url(request.url())?;
                self.transport.connect(&address).await?
            }
        };

        match Self::exchange(connection.as_mut(), &request, &token).await {
            Ok(response) => {
                let close = headers::has_token(request.headers(), "connection", "close")
                    || headers::has_token(response.headers(), "connection", "close");
                if close || !connection.is_reusable() {
                    tracing::debug!(
                        "CallServer: closing connection to {}",
                        connection.address()
                    );
                    connection.abort();
                } else {
                    self.pool.put(connection).await;
                }
                Ok(Some(response))
            }
            Err(e) => {
                tracing::debug!(
                    "CallServer: exchange with {} failed: {}",
                    connection.address(),
                    e
                );
                connection.abort();
                Err(e)
            }
        }
    }
}
