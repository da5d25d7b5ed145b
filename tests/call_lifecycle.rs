//! Single-use calls: execution modes, cancellation and callback delivery.

mod helpers;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use courier::{
    callback_fn, Call, CallId, Callback, Chain, Client, Error, Interceptor, Request, Response,
    Result,
};
use helpers::hold::{Hold, Respond};
use helpers::init_tracing;
use tokio::sync::mpsc;

fn get(url: &str) -> Request {
    Request::get(url).unwrap()
}

#[tokio::test]
async fn test_execute_twice_fails() {
    init_tracing();
    let client = Client::builder().add_interceptor(Respond).build();
    let call = client.new_call(get("http://example.com/"));

    let response = call.execute().await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(call.is_executed());

    assert!(matches!(call.execute().await, Err(Error::AlreadyExecuted)));
    assert_eq!(client.dispatcher().running_calls_count(), 0);
}

#[tokio::test]
async fn test_enqueue_after_execute_fails_without_callback() {
    init_tracing();
    let client = Client::builder().add_interceptor(Respond).build();
    let call = client.new_call(get("http://example.com/"));
    call.execute().await.unwrap();

    let invoked = Arc::new(AtomicUsize::new(0));
    let counter = invoked.clone();
    let result = call.enqueue(callback_fn(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    assert!(matches!(result, Err(Error::AlreadyExecuted)));

    tokio::task::yield_now().await;
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert_eq!(client.dispatcher().queued_calls_count(), 0);
}

#[tokio::test]
async fn test_execute_after_enqueue_fails() {
    init_tracing();
    let client = Client::builder().add_interceptor(Respond).build();
    let call = client.new_call(get("http://example.com/"));
    let (tx, mut rx) = mpsc::unbounded_channel();
    call.enqueue(callback_fn(move |_, result| {
        let _ = tx.send(result.map(|r| r.status()));
    }))
    .unwrap();

    assert!(matches!(call.execute().await, Err(Error::AlreadyExecuted)));
    assert_eq!(rx.recv().await.unwrap().unwrap(), 200);

    // A clone of the call is a fresh, runnable call.
    let again = call.clone_call();
    assert_eq!(again.execute().await.unwrap().status(), 200);
}

#[tokio::test]
async fn test_canceled_before_execute() {
    init_tracing();
    let client = Client::builder().add_interceptor(Respond).build();
    let call = client.new_call(get("http://example.com/"));
    call.cancel();
    call.cancel();

    let err = call.execute().await.unwrap_err();
    assert!(err.is_canceled());
    assert_eq!(client.dispatcher().running_calls_count(), 0);
}

#[tokio::test]
async fn test_cancellation_wins_over_late_response() {
    init_tracing();
    let (hold, mut held) = Hold::new();
    let client = Client::builder().add_interceptor(hold).build();
    let call = client.new_call(get("http://example.com/"));

    let task = {
        let call = call.clone();
        tokio::spawn(async move { call.execute().await })
    };
    let started = held.recv().await.unwrap();
    call.cancel();
    started.release();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(Error::Canceled)));
    assert_eq!(client.dispatcher().running_calls_count(), 0);
    assert!(call.to_loggable_string().starts_with("canceled call to"));
}

/// Counts deliveries per call and reports each one on a channel.
struct Counting {
    counts: Arc<Mutex<HashMap<CallId, usize>>>,
    done: mpsc::UnboundedSender<(CallId, bool)>,
}

impl Counting {
    fn record(self: Box<Self>, call: &Call, ok: bool) {
        *self.counts.lock().unwrap().entry(call.id()).or_insert(0) += 1;
        let _ = self.done.send((call.id(), ok));
    }
}

impl Callback for Counting {
    fn on_response(self: Box<Self>, call: &Call, _response: Response) {
        self.record(call, true);
    }

    fn on_failure(self: Box<Self>, call: &Call, error: Error) {
        assert!(error.is_canceled(), "unexpected failure: {}", error);
        self.record(call, false);
    }
}

/// Yields a few times before answering so cancellation can land mid-call.
struct Slow;

#[async_trait]
impl Interceptor for Slow {
    async fn intercept(&self, chain: &mut Chain) -> Result<Option<Response>> {
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        let request = chain.request().clone();
        chain.proceed(request).await.map(Some)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_one_callback_under_cancellation() {
    init_tracing();
    let client = Client::builder()
        .add_interceptor(Slow)
        .add_interceptor(Respond)
        .build();
    client.dispatcher().set_max_requests(4).unwrap();
    client.dispatcher().set_max_requests_per_host(2).unwrap();

    let counts = Arc::new(Mutex::new(HashMap::new()));
    let (done_tx, mut done) = mpsc::unbounded_channel();
    let mut calls = Vec::new();
    let mut canceled_early = Vec::new();

    for i in 0..60u64 {
        let call = client.new_call(get(&format!("http://host{}.example/{}", i % 5, i)));
        if i % 7 == 0 {
            call.cancel();
            canceled_early.push(call.id());
        }
        call.enqueue(Counting {
            counts: counts.clone(),
            done: done_tx.clone(),
        })
        .unwrap();
        if i % 3 == 0 {
            call.cancel();
        }
        calls.push(call);
    }

    let mut outcomes = HashMap::new();
    for _ in 0..calls.len() {
        let (id, ok) = tokio::time::timeout(Duration::from_secs(10), done.recv())
            .await
            .expect("timed out waiting for callbacks")
            .unwrap();
        outcomes.insert(id, ok);
    }

    let counts = counts.lock().unwrap();
    assert_eq!(counts.len(), calls.len());
    assert!(counts.values().all(|&n| n == 1));
    for id in canceled_early {
        assert!(!outcomes[&id], "{} was canceled before it ran", id);
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while client.dispatcher().running_calls_count() > 0 {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(client.dispatcher().queued_calls_count(), 0);
}

struct Explode;

#[async_trait]
impl Interceptor for Explode {
    async fn intercept(&self, _chain: &mut Chain) -> Result<Option<Response>> {
        panic!("boom");
    }
}

#[tokio::test]
async fn test_panic_in_async_call_reported_once() {
    init_tracing();
    let client = Client::builder().add_interceptor(Explode).build();
    let call = client.new_call(get("http://example.com/"));
    let (tx, mut rx) = mpsc::unbounded_channel();
    call.enqueue(callback_fn(move |_, result| {
        let _ = tx.send(result.map(|r| r.status()));
    }))
    .unwrap();

    let result = rx.recv().await.unwrap();
    assert!(matches!(result, Err(Error::Unexpected(ref m)) if m == "boom"));
    assert!(rx.recv().await.is_none());
    assert!(call.is_canceled());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while client.dispatcher().running_calls_count() > 0 {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_panicking_callback_does_not_leak_slot() {
    init_tracing();
    let client = Client::builder().add_interceptor(Respond).build();
    client.dispatcher().set_max_requests(1).unwrap();

    let call = client.new_call(get("http://a.example/"));
    call.enqueue(callback_fn(|_, _| panic!("callback failed")))
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let next = client.new_call(get("http://b.example/"));
    next.enqueue(callback_fn(move |_, result| {
        let _ = tx.send(result.map(|r| r.status()));
    }))
    .unwrap();

    let status = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("queued call never ran")
        .unwrap();
    assert_eq!(status.unwrap(), 200);
}

#[test]
fn test_execute_blocking_from_plain_thread() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let client = Client::builder()
        .add_interceptor(Respond)
        .runtime(runtime.handle().clone())
        .build();

    let call = client.new_call(get("http://example.com/"));
    let response = call.execute_blocking().unwrap();
    assert_eq!(response.status(), 200);
    assert!(matches!(call.execute_blocking(), Err(Error::AlreadyExecuted)));
    assert_eq!(client.dispatcher().running_calls_count(), 0);
}

#[tokio::test]
async fn test_execute_blocking_rejected_inside_runtime() {
    let client = Client::builder().add_interceptor(Respond).build();
    let call = client.new_call(get("http://example.com/"));

    let err = call.execute_blocking().unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(!call.is_executed());
}

#[test]
fn test_enqueue_without_runtime_fails() {
    let client = Client::builder().add_interceptor(Respond).build();
    let call = client.new_call(get("http://example.com/"));

    let result = call.enqueue(callback_fn(|_, _| {}));
    assert!(matches!(result, Err(Error::NoRuntime)));
}
