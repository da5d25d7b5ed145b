//! RFC 9111 response cache stage.

use std::sync::Arc;

use async_trait::async_trait;
use http::Method;

use crate::cache::{combine, directive, Cache, CacheStatus};
use crate::chain::{Chain, Interceptor};
use crate::error::Result;
use crate::request::Request;
use crate::response::{Response, ResponseBody, ResponseBuilder};

/// Serves requests from the [`Cache`] and writes responses to it.
///
/// Without a cache it forwards every request unchanged.
#[derive(Debug, Default)]
pub struct CacheInterceptor {
    cache: Option<Arc<dyn Cache>>,
}

impl CacheInterceptor {
    pub fn new(cache: Option<Arc<dyn Cache>>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Interceptor for CacheInterceptor {
    async fn intercept(&self, chain: &mut Chain) -> Result<Option<Response>> {
        let request = chain.request().clone();
        let Some(cache) = &self.cache else {
            return chain.proceed(request).await.map(Some);
        };

        let only_if_cached = directive(request.header("Cache-Control"), "only-if-cached");
        let status = cache.lookup(&request);

        let (network_request, cached) = match status {
            CacheStatus::Fresh(cached) => {
                tracing::debug!("Cache: hit for {}", request.redacted_url());
                return cached
                    .new_builder()
                    .request(request)
                    .cache_response(Some(cached.strip_body()))
                    .build()
                    .map(Some);
            }
            CacheStatus::Revalidate(..) | CacheStatus::Miss if only_if_cached => {
                return unsatisfiable(request).map(Some);
            }
            CacheStatus::Revalidate(cached, etag, last_modified) => {
                let mut builder = request.new_builder();
                if let Some(etag) = &etag {
                    builder = builder.header("If-None-Match", etag);
                }
                if let Some(last_modified) = &last_modified {
                    builder = builder.header("If-Modified-Since", last_modified);
                }
                (builder.build()?, Some(cached))
            }
            CacheStatus::Miss => (request.clone(), None),
        };

        let network = chain.proceed(network_request).await?;

        if let Some(cached) = cached {
            if network.status() == 304 {
                tracing::debug!("Cache: conditional hit for {}", request.redacted_url());
                let merged = cached
                    .new_builder()
                    .headers(combine(&cached, &network))
                    .sent_at(network.sent_at())
                    .received_at(network.received_at())
                    .build()?;
                cache.store(&merged);
                return merged
                    .new_builder()
                    .request(request)
                    .cache_response(Some(cached.strip_body()))
                    .network_response(Some(network.strip_body()))
                    .build()
                    .map(Some);
            }
        }

        if invalidates_cache(request.method()) {
            cache.remove(&request);
        } else {
            cache.store(&network);
        }
        Ok(Some(network))
    }
}

fn invalidates_cache(method: &Method) -> bool {
    *method == Method::POST
        || *method == Method::PUT
        || *method == Method::PATCH
        || *method == Method::DELETE
        || method.as_str() == "MOVE"
}

/// RFC 9111 Section 5.2.1.7: only-if-cached with nothing usable stored.
fn unsatisfiable(request: Request) -> Result<Response> {
    ResponseBuilder::new(request)
        .status(504)
        .message("Unsatisfiable Request (only-if-cached)")
        .body(Some(ResponseBody::default()))
        .build()
}
