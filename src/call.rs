//! Single-use call execution.
//!
//! A [`Call`] runs its request through the client's interceptor pipeline
//! exactly once, either synchronously ([`Call::execute`],
//! [`Call::execute_blocking`]) or on the dispatcher ([`Call::enqueue`]).

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use tokio::sync::oneshot;

use crate::chain::{Chain, Interceptor};
use crate::client::Client;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::interceptors::RetryAndFollowUpInterceptor;
use crate::request::Request;
use crate::response::Response;

/// Process-unique call identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl CallId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call#{}", self.0)
    }
}

/// Receives the outcome of an enqueued call.
///
/// Exactly one of the two methods is invoked, exactly once.
pub trait Callback: Send {
    fn on_response(self: Box<Self>, call: &Call, response: Response);

    /// Invoked on failure, including cancellation ([`Error::Canceled`]).
    fn on_failure(self: Box<Self>, call: &Call, error: Error);
}

struct FnCallback<F>(F);

impl<F> Callback for FnCallback<F>
where
    F: FnOnce(&Call, Result<Response>) + Send,
{
    fn on_response(self: Box<Self>, call: &Call, response: Response) {
        (self.0)(call, Ok(response))
    }

    fn on_failure(self: Box<Self>, call: &Call, error: Error) {
        (self.0)(call, Err(error))
    }
}

/// Adapt a closure receiving the call's result into a [`Callback`].
pub fn callback_fn<F>(f: F) -> impl Callback
where
    F: FnOnce(&Call, Result<Response>) + Send + 'static,
{
    FnCallback(f)
}

/// One request/response exchange.
///
/// Clones share the same call: cancel from one, observe from another.
#[derive(Clone)]
pub struct Call {
    inner: Arc<CallInner>,
}

struct CallInner {
    id: CallId,
    client: Client,
    original_request: Request,
    executed: Mutex<bool>,
    retry: Arc<RetryAndFollowUpInterceptor>,
}

impl Call {
    pub(crate) fn new(client: Client, request: Request) -> Self {
        let retry = Arc::new(RetryAndFollowUpInterceptor::new(client.retry_policy()));
        Self {
            inner: Arc::new(CallInner {
                id: CallId::next(),
                client,
                original_request: request,
                executed: Mutex::new(false),
                retry,
            }),
        }
    }

    pub fn id(&self) -> CallId {
        self.inner.id
    }

    /// The request this call was created with.
    pub fn request(&self) -> &Request {
        &self.inner.original_request
    }

    /// Cancel the call. Safe from any thread, any number of times.
    ///
    /// In-flight I/O is not interrupted; the call stops at its next
    /// cancellation checkpoint. A call that already completed keeps its
    /// result.
    pub fn cancel(&self) {
        self.inner.retry.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.retry.is_canceled()
    }

    pub fn is_executed(&self) -> bool {
        *self
            .inner
            .executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_executed(&self) -> Result<()> {
        let mut executed = self
            .inner
            .executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *executed {
            return Err(Error::AlreadyExecuted);
        }
        *executed = true;
        Ok(())
    }

    fn dispatcher(&self) -> &Dispatcher {
        self.inner.client.dispatcher()
    }

    /// Run the call on the current task and return its response.
    pub async fn execute(&self) -> Result<Response> {
        self.mark_executed()?;
        tracing::debug!("Call: executing {} {}", self.id(), self.to_loggable_string());

        let dispatcher = self.dispatcher().clone();
        dispatcher.executed(self.clone());
        let _finished = SyncGuard {
            dispatcher,
            id: self.id(),
        };

        self.response_with_interceptor_chain().await
    }

    /// Run the call to completion from a thread outside the async runtime.
    ///
    /// The chain runs on the dispatcher's runtime; this thread waits for
    /// the single result it sends back.
    ///
    /// Fails with [`Error::InvalidArgument`] when invoked on a runtime
    /// thread, where blocking would stall the executor.
    pub fn execute_blocking(&self) -> Result<Response> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(Error::invalid_argument(
                "execute_blocking() called from within an async runtime; use execute().await",
            ));
        }
        let runtime = self.dispatcher().runtime()?;

        let (tx, rx) = oneshot::channel();
        let call = self.clone();
        runtime.spawn(async move {
            let result = AssertUnwindSafe(call.execute())
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(Error::Unexpected(panic_message(&*panic))));
            let _ = tx.send(result);
        });

        rx.blocking_recv()
            .unwrap_or_else(|_| Err(Error::Unexpected("call task ended without a result".into())))
    }

    /// Schedule the call on the dispatcher; `callback` receives the outcome.
    ///
    /// Returns an error without invoking `callback` if the call was already
    /// executed or no runtime is available.
    pub fn enqueue(&self, callback: impl Callback + 'static) -> Result<()> {
        self.mark_executed()?;
        tracing::debug!("Call: enqueueing {} {}", self.id(), self.to_loggable_string());
        self.dispatcher().enqueue(AsyncCall {
            call: self.clone(),
            callback: Box::new(callback),
        })
    }

    /// A fresh, unexecuted call for the same request.
    pub fn clone_call(&self) -> Call {
        self.inner
            .client
            .new_call(self.inner.original_request.clone())
    }

    fn interceptors(&self) -> (Arc<[Arc<dyn Interceptor>]>, usize) {
        let retry: Arc<dyn Interceptor> = self.inner.retry.clone();
        self.inner.client.interceptors_with(retry)
    }

    async fn response_with_interceptor_chain(&self) -> Result<Response> {
        let (interceptors, network_start) = self.interceptors();
        let request = self.inner.original_request.clone();
        let mut chain = Chain::new(interceptors, request.clone(), self.inner.retry.token())
            .with_network_stage(network_start);

        let result = chain.proceed(request).await;
        self.settle(result)
    }

    /// Resolve the race between completion and cancellation.
    fn settle(&self, result: Result<Response>) -> Result<Response> {
        if !self.is_canceled() {
            return result;
        }
        match result {
            Err(e) if e.is_programming_error() => Err(e),
            Ok(_) | Err(_) => {
                tracing::debug!("Call: {} canceled", self.id());
                Err(Error::Canceled)
            }
        }
    }

    /// `canceled call` / `call`, plus the redacted URL, for logs.
    pub fn to_loggable_string(&self) -> String {
        format!(
            "{}call to {}",
            if self.is_canceled() { "canceled " } else { "" },
            self.inner.original_request.redacted_url()
        )
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.inner.id)
            .field("request", &self.inner.original_request.redacted_url())
            .field("executed", &self.is_executed())
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

/// Deregisters a synchronous call on every exit path.
struct SyncGuard {
    dispatcher: Dispatcher,
    id: CallId,
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.dispatcher.finished(self.id);
    }
}

/// Deregisters an asynchronous call once its callback has run.
struct AsyncGuard {
    dispatcher: Dispatcher,
    id: CallId,
}

impl Drop for AsyncGuard {
    fn drop(&mut self) {
        self.dispatcher.finished_async(self.id);
    }
}

/// An enqueued call together with its callback.
pub(crate) struct AsyncCall {
    call: Call,
    callback: Box<dyn Callback>,
}

impl AsyncCall {
    pub(crate) fn id(&self) -> CallId {
        self.call.id()
    }

    pub(crate) fn host(&self) -> &str {
        self.call.request().host()
    }

    pub(crate) fn call(&self) -> &Call {
        &self.call
    }

    /// Task body: run the chain, deliver one outcome, then deregister.
    pub(crate) async fn run(self, dispatcher: Dispatcher) {
        let AsyncCall { call, callback } = self;
        let _finished = AsyncGuard {
            dispatcher,
            id: call.id(),
        };

        let outcome = AssertUnwindSafe(call.response_with_interceptor_chain())
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic_message(&*panic);
                tracing::error!("Call: {} panicked: {}", call.id(), message);
                call.cancel();
                Err(Error::Unexpected(message))
            });

        let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| match outcome {
            Ok(response) => callback.on_response(&call, response),
            Err(error) => {
                tracing::debug!("Call: {} failed: {}", call.id(), error);
                callback.on_failure(&call, error)
            }
        }));
        if let Err(panic) = delivered {
            tracing::error!(
                "Call: callback for {} panicked: {}",
                call.id(),
                panic_message(&*panic)
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
