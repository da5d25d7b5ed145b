//! Admission control for asynchronous calls.
//!
//! The dispatcher bounds how many enqueued calls run at once, globally and
//! per host, parks the rest in a FIFO ready queue and promotes them as
//! capacity frees up. Synchronous calls are tracked for bookkeeping only.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;

use crate::call::{AsyncCall, Call, CallId};
use crate::error::{Error, Result};

type IdleCallback = Arc<dyn Fn() + Send + Sync>;

/// Schedules asynchronous calls under concurrency limits.
///
/// Cloning a dispatcher yields a handle to the same state.
#[derive(Clone)]
pub struct Dispatcher {
    state: Arc<Mutex<State>>,
}

struct RunningAsync {
    id: CallId,
    host: String,
    call: Call,
}

struct State {
    max_requests: usize,
    max_requests_per_host: usize,
    idle_callback: Option<IdleCallback>,
    runtime: Option<Handle>,
    ready: VecDeque<AsyncCall>,
    running_async: Vec<RunningAsync>,
    running_sync: Vec<Call>,
}

impl Dispatcher {
    /// Default global limit on concurrently running asynchronous calls.
    pub const DEFAULT_MAX_REQUESTS: usize = 64;

    /// Default limit on concurrently running asynchronous calls per host.
    pub const DEFAULT_MAX_REQUESTS_PER_HOST: usize = 5;

    /// A dispatcher that spawns onto the runtime current at first use.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                max_requests: Self::DEFAULT_MAX_REQUESTS,
                max_requests_per_host: Self::DEFAULT_MAX_REQUESTS_PER_HOST,
                idle_callback: None,
                runtime: None,
                ready: VecDeque::new(),
                running_async: Vec::new(),
                running_sync: Vec::new(),
            })),
        }
    }

    /// A dispatcher that spawns calls onto `handle`.
    pub fn with_runtime(handle: Handle) -> Self {
        let dispatcher = Self::new();
        dispatcher.lock().runtime = Some(handle);
        dispatcher
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runtime used for asynchronous calls and blocking execution.
    pub(crate) fn runtime(&self) -> Result<Handle> {
        self.lock().runtime()
    }

    /// Set the maximum number of asynchronous calls running at once.
    ///
    /// Lowering the limit never evicts running calls; it only holds back
    /// promotion until the running count drops below it.
    pub fn set_max_requests(&self, max_requests: usize) -> Result<()> {
        if max_requests < 1 {
            return Err(Error::invalid_argument(format!(
                "max < 1: {}",
                max_requests
            )));
        }
        let (promoted, runtime) = {
            let mut state = self.lock();
            state.max_requests = max_requests;
            (state.promote(), state.runtime.clone())
        };
        self.start(runtime, promoted);
        Ok(())
    }

    pub fn max_requests(&self) -> usize {
        self.lock().max_requests
    }

    /// Set the maximum number of asynchronous calls running at once for
    /// any one host.
    pub fn set_max_requests_per_host(&self, max_requests_per_host: usize) -> Result<()> {
        if max_requests_per_host < 1 {
            return Err(Error::invalid_argument(format!(
                "max < 1: {}",
                max_requests_per_host
            )));
        }
        let (promoted, runtime) = {
            let mut state = self.lock();
            state.max_requests_per_host = max_requests_per_host;
            (state.promote(), state.runtime.clone())
        };
        self.start(runtime, promoted);
        Ok(())
    }

    pub fn max_requests_per_host(&self) -> usize {
        self.lock().max_requests_per_host
    }

    /// Callback invoked each time the dispatcher becomes idle (the number
    /// of running calls drops to zero).
    ///
    /// It runs outside the dispatcher lock, so it may enqueue new calls.
    pub fn set_idle_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.lock().idle_callback = Some(Arc::new(callback));
    }

    pub fn clear_idle_callback(&self) {
        self.lock().idle_callback = None;
    }

    /// Admit `call` immediately when both limits allow, otherwise queue it.
    pub(crate) fn enqueue(&self, call: AsyncCall) -> Result<()> {
        let (admitted, runtime) = {
            let mut state = self.lock();
            let runtime = state.runtime()?;
            let host = call.host().to_string();
            if state.running_async.len() < state.max_requests
                && state.running_for_host(&host) < state.max_requests_per_host
            {
                tracing::debug!("Dispatcher: admitting {} ({})", call.id(), host);
                state.admit(&call);
                (vec![call], Some(runtime))
            } else {
                tracing::debug!(
                    "Dispatcher: queueing {} ({}) (running: {}, queued: {})",
                    call.id(),
                    host,
                    state.running_async.len(),
                    state.ready.len() + 1
                );
                state.ready.push_back(call);
                (Vec::new(), Some(runtime))
            }
        };
        self.start(runtime, admitted);
        Ok(())
    }

    /// Register a synchronous call.
    pub(crate) fn executed(&self, call: Call) {
        self.lock().running_sync.push(call);
    }

    /// Deregister a synchronous call.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a running synchronous call.
    pub(crate) fn finished(&self, id: CallId) {
        self.finish(|state| {
            let position = state.running_sync.iter().position(|c| c.id() == id)?;
            state.running_sync.remove(position);
            Some(())
        });
    }

    /// Deregister an asynchronous call and promote queued work.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a running asynchronous call.
    pub(crate) fn finished_async(&self, id: CallId) {
        self.finish(|state| {
            let position = state.running_async.iter().position(|r| r.id == id)?;
            state.running_async.remove(position);
            Some(())
        });
    }

    fn finish(&self, remove: impl FnOnce(&mut State) -> Option<()>) {
        let (promoted, runtime, idle) = {
            let mut state = self.lock();
            if remove(&mut *state).is_none() {
                drop(state);
                panic!("Call wasn't in-flight!");
            }
            let promoted = state.promote();
            let running = state.running_async.len() + state.running_sync.len();
            let idle = if running == 0 {
                state.idle_callback.clone()
            } else {
                None
            };
            (promoted, state.runtime.clone(), idle)
        };

        self.start(runtime, promoted);

        if let Some(idle) = idle {
            tracing::debug!("Dispatcher: idle");
            idle();
        }
    }

    fn start(&self, runtime: Option<Handle>, calls: Vec<AsyncCall>) {
        if calls.is_empty() {
            return;
        }
        let Some(runtime) = runtime else {
            // Calls are only ever queued after a runtime was resolved.
            panic!("Dispatcher has queued calls but no runtime");
        };
        for call in calls {
            runtime.spawn(call.run(self.clone()));
        }
    }

    /// Cancel all queued and running calls, synchronous or not.
    ///
    /// Does not wait for them to stop; each observes cancellation at its
    /// next checkpoint.
    pub fn cancel_all(&self) {
        let state = self.lock();
        for call in &state.ready {
            call.call().cancel();
        }
        for running in &state.running_async {
            running.call.cancel();
        }
        for call in &state.running_sync {
            call.cancel();
        }
        tracing::debug!(
            "Dispatcher: canceled {} queued, {} running calls",
            state.ready.len(),
            state.running_async.len() + state.running_sync.len()
        );
    }

    /// Calls waiting to be admitted, in queue order.
    pub fn queued_calls(&self) -> Vec<Call> {
        self.lock().ready.iter().map(|c| c.call().clone()).collect()
    }

    /// Calls currently running, asynchronous first.
    pub fn running_calls(&self) -> Vec<Call> {
        let state = self.lock();
        state
            .running_async
            .iter()
            .map(|r| r.call.clone())
            .chain(state.running_sync.iter().cloned())
            .collect()
    }

    pub fn queued_calls_count(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn running_calls_count(&self) -> usize {
        let state = self.lock();
        state.running_async.len() + state.running_sync.len()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Dispatcher")
            .field("max_requests", &state.max_requests)
            .field("max_requests_per_host", &state.max_requests_per_host)
            .field("queued", &state.ready.len())
            .field("running_async", &state.running_async.len())
            .field("running_sync", &state.running_sync.len())
            .finish()
    }
}

impl State {
    fn runtime(&mut self) -> Result<Handle> {
        if let Some(handle) = &self.runtime {
            return Ok(handle.clone());
        }
        let handle = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        self.runtime = Some(handle.clone());
        Ok(handle)
    }

    fn running_for_host(&self, host: &str) -> usize {
        self.running_async.iter().filter(|r| r.host == host).count()
    }

    fn admit(&mut self, call: &AsyncCall) {
        self.running_async.push(RunningAsync {
            id: call.id(),
            host: call.host().to_string(),
            call: call.call().clone(),
        });
    }

    /// Move eligible calls from the ready queue to the running set.
    ///
    /// One FIFO pass: calls whose host is at its limit stay where they are
    /// so calls to other hosts queued behind them can still go.
    fn promote(&mut self) -> Vec<AsyncCall> {
        let mut promoted = Vec::new();
        let mut i = 0;
        while i < self.ready.len() {
            if self.running_async.len() >= self.max_requests {
                break;
            }
            if self.running_for_host(self.ready[i].host()) >= self.max_requests_per_host {
                i += 1;
                continue;
            }
            if let Some(call) = self.ready.remove(i) {
                tracing::debug!("Dispatcher: promoting {} ({})", call.id(), call.host());
                self.admit(&call);
                promoted.push(call);
            }
        }
        promoted
    }
}
