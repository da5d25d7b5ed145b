//! Application interceptors that stand in for the network so dispatcher
//! behavior can be observed without I/O.

use async_trait::async_trait;
use courier::{Chain, Error, Interceptor, Response, ResponseBuilder, Result};
use tokio::sync::{mpsc, oneshot};

/// A call that reached the `Hold` interceptor and is waiting to be let go.
#[derive(Debug)]
pub struct Held {
    pub host: String,
    release: oneshot::Sender<()>,
}

#[allow(dead_code)]
impl Held {
    pub fn release(self) {
        let _ = self.release.send(());
    }
}

/// Parks every call until the test releases it, then answers 200.
pub struct Hold {
    started: mpsc::UnboundedSender<Held>,
}

#[allow(dead_code)]
impl Hold {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Held>) {
        let (started, rx) = mpsc::unbounded_channel();
        (Self { started }, rx)
    }
}

#[async_trait]
impl Interceptor for Hold {
    async fn intercept(&self, chain: &mut Chain) -> Result<Option<Response>> {
        if chain.is_canceled() {
            return Err(Error::Canceled);
        }
        let (release, released) = oneshot::channel();
        let host = chain.request().host().to_string();
        let _ = self.started.send(Held { host, release });
        let _ = released.await;
        ok(chain).map(Some)
    }
}

/// Answers 200 at once without touching the network.
pub struct Respond;

#[async_trait]
impl Interceptor for Respond {
    async fn intercept(&self, chain: &mut Chain) -> Result<Option<Response>> {
        if chain.is_canceled() {
            return Err(Error::Canceled);
        }
        ok(chain).map(Some)
    }
}

fn ok(chain: &Chain) -> Result<Response> {
    ResponseBuilder::new(chain.request().clone())
        .status(200)
        .message("OK")
        .build()
}
