//! Integration tests for the dispatch engine.
//!
//! These tests run real executors on real threads and verify the status
//! codes, timing windows and exactly-once delivery guarantees of both the
//! synchronous and the asynchronous call paths.

use rrd_functions::error::status;
use rrd_functions::{
    CallHandle, CollectorRegistry, CollectorSession, Dispatcher, FunctionDescriptor,
    FunctionExecutor, HostFunctions, Result,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

const CHART: &str = "apps.cpu";

/// Completes inline with a fixed status, like a synchronous collector.
struct Immediate {
    body: &'static str,
    status: u32,
}

impl FunctionExecutor for Immediate {
    fn execute(&self, call: CallHandle) -> Result<()> {
        call.write(self.body);
        call.complete(self.status);
        Ok(())
    }
}

/// Accepts the call and never completes it; only the guard can resolve it.
struct Never;

impl FunctionExecutor for Never {
    fn execute(&self, _call: CallHandle) -> Result<()> {
        Ok(())
    }
}

/// Hands the call off to its own thread and completes after a delay.
struct Background {
    delay: Duration,
    body: &'static str,
}

impl FunctionExecutor for Background {
    fn execute(&self, call: CallHandle) -> Result<()> {
        let delay = self.delay;
        let body = self.body;
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            call.write(body);
            call.complete(status::OK);
        });
        Ok(())
    }
}

/// Rejects the call outright, like a collector given malformed arguments.
struct Rejecting;

impl FunctionExecutor for Rejecting {
    fn execute(&self, _call: CallHandle) -> Result<()> {
        Err(rrd_functions::FunctionsError::Executor {
            status: status::BAD_REQUEST,
            message: String::from("malformed arguments"),
        })
    }
}

fn sync_fn(name: &str, timeout: Duration, executor: Arc<dyn FunctionExecutor>) -> FunctionDescriptor {
    FunctionDescriptor::new(name, "test function", "table", timeout, true, executor)
}

fn async_fn(name: &str, timeout: Duration, executor: Arc<dyn FunctionExecutor>) -> FunctionDescriptor {
    FunctionDescriptor::new(name, "test function", "table", timeout, false, executor)
}

struct Setup {
    collectors: Arc<CollectorRegistry>,
    dispatcher: Dispatcher,
    host: HostFunctions,
    session: CollectorSession,
}

fn setup() -> Setup {
    let collectors = CollectorRegistry::new();
    let dispatcher = Dispatcher::new(Arc::clone(&collectors));
    let session = collectors.collector_started();

    Setup {
        collectors,
        dispatcher,
        host: HostFunctions::new(),
        session,
    }
}

#[test]
fn test_sync_call_returns_output_and_200() {
    let s = setup();
    s.host.register_chart_function(
        &s.session,
        CHART,
        sync_fn(
            "ps",
            Duration::from_millis(2000),
            Arc::new(Immediate {
                body: "ok",
                status: status::OK,
            }),
        ),
    );

    let mut sink = String::new();
    let code = s.dispatcher.call_and_wait(
        &s.host,
        None,
        &mut sink,
        Some(Duration::from_millis(5000)),
        "ps",
    );

    assert_eq!(code, status::OK);
    assert_eq!(sink, "ok");
    assert_eq!(s.dispatcher.in_flight_calls(), 0);
    assert_eq!(s.host.chart_scope(CHART).unwrap().in_flight(), 0);
}

#[test]
fn test_not_ready_fails_fast_with_503() {
    let collectors = CollectorRegistry::new();
    let dispatcher = Dispatcher::new(Arc::clone(&collectors));
    let host = HostFunctions::new();

    let started = Instant::now();
    let mut sink = String::new();
    let code = dispatcher.call_and_wait(
        &host,
        None,
        &mut sink,
        Some(Duration::from_secs(10)),
        "anything",
    );

    assert_eq!(code, status::NOT_READY);
    assert!(sink.is_empty());
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[test]
fn test_unknown_name_fails_fast_with_404() {
    let s = setup();

    let started = Instant::now();
    let mut sink = String::new();
    let code = s.dispatcher.call_and_wait(
        &s.host,
        None,
        &mut sink,
        Some(Duration::from_secs(10)),
        "doesnotexist",
    );

    assert_eq!(code, status::NOT_FOUND);
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[test]
fn test_unanswered_call_times_out_near_deadline() {
    let s = setup();
    s.host.register_chart_function(
        &s.session,
        CHART,
        async_fn("hang", Duration::from_secs(60), Arc::new(Never)),
    );

    let started = Instant::now();
    let mut sink = String::new();
    let code = s.dispatcher.call_and_wait(
        &s.host,
        Some(CHART),
        &mut sink,
        Some(Duration::from_millis(100)),
        "hang",
    );
    let elapsed = started.elapsed();

    assert_eq!(code, status::TIMEOUT);
    assert!(sink.is_empty());
    assert!(elapsed >= Duration::from_millis(90), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "returned late: {elapsed:?}");
    assert_eq!(s.dispatcher.in_flight_calls(), 0);
}

#[test]
fn test_descriptor_timeout_is_the_default() {
    let s = setup();
    s.host.register_chart_function(
        &s.session,
        CHART,
        async_fn("hang", Duration::from_millis(100), Arc::new(Never)),
    );

    let started = Instant::now();
    let mut sink = String::new();
    let code = s
        .dispatcher
        .call_and_wait(&s.host, Some(CHART), &mut sink, None, "hang");

    assert_eq!(code, status::TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_background_executor_completes_before_deadline() {
    let s = setup();
    s.host.register_chart_function(
        &s.session,
        CHART,
        async_fn(
            "slow",
            Duration::from_secs(10),
            Arc::new(Background {
                delay: Duration::from_millis(50),
                body: "done",
            }),
        ),
    );

    let mut sink = String::new();
    let code = s.dispatcher.call_and_wait(
        &s.host,
        Some(CHART),
        &mut sink,
        Some(Duration::from_secs(5)),
        "slow",
    );

    assert_eq!(code, status::OK);
    assert_eq!(sink, "done");
}

#[test]
fn test_late_output_after_timeout_is_dropped() {
    let s = setup();
    s.host.register_chart_function(
        &s.session,
        CHART,
        async_fn(
            "slow",
            Duration::from_secs(10),
            Arc::new(Background {
                delay: Duration::from_millis(200),
                body: "late",
            }),
        ),
    );

    let mut sink = String::new();
    let code = s.dispatcher.call_and_wait(
        &s.host,
        Some(CHART),
        &mut sink,
        Some(Duration::from_millis(50)),
        "slow",
    );

    assert_eq!(code, status::TIMEOUT);
    assert!(sink.is_empty());

    // The executor is still running in the background; its late write and
    // completion must be silently ignored.
    std::thread::sleep(Duration::from_millis(300));
    assert!(sink.is_empty());
}

#[test]
fn test_executor_failure_travels_the_result_channel() {
    let s = setup();
    s.host.register_chart_function(
        &s.session,
        CHART,
        sync_fn("bad", Duration::from_secs(5), Arc::new(Rejecting)),
    );
    s.host.register_chart_function(
        &s.session,
        CHART,
        sync_fn(
            "boom",
            Duration::from_secs(5),
            Arc::new(Immediate {
                body: "boom",
                status: status::INTERNAL_ERROR,
            }),
        ),
    );

    let mut sink = String::new();
    let code = s
        .dispatcher
        .call_and_wait(&s.host, Some(CHART), &mut sink, None, "bad");
    assert_eq!(code, status::BAD_REQUEST);

    // An executor may also report failure through its completion handle,
    // together with whatever it wrote.
    sink.clear();
    let code = s
        .dispatcher
        .call_and_wait(&s.host, Some(CHART), &mut sink, None, "boom");
    assert_eq!(code, status::INTERNAL_ERROR);
    assert_eq!(sink, "boom");
}

#[test]
fn test_session_end_makes_functions_unreachable() {
    let s = setup();

    // A second collector keeps the broker ready after the first finishes.
    let keeper = s.collectors.collector_started();

    s.host.register_chart_function(
        &s.session,
        CHART,
        sync_fn(
            "ps",
            Duration::from_secs(5),
            Arc::new(Immediate {
                body: "ok",
                status: status::OK,
            }),
        ),
    );

    s.session.finished();

    let mut sink = String::new();
    let code = s
        .dispatcher
        .call_and_wait(&s.host, Some(CHART), &mut sink, None, "ps");
    assert_eq!(code, status::NOT_FOUND);

    drop(keeper);
}

#[test]
fn test_async_call_delivers_result_exactly_once() {
    let s = setup();
    s.host.register_chart_function(
        &s.session,
        CHART,
        sync_fn(
            "ps",
            Duration::from_secs(5),
            Arc::new(Immediate {
                body: "ok",
                status: status::OK,
            }),
        ),
    );

    let (tx, rx) = mpsc::channel();
    let code = s.dispatcher.call_async(
        &s.host,
        Some(CHART),
        Some(Duration::from_secs(5)),
        "ps",
        move |code, output| {
            tx.send((code, output)).unwrap();
        },
    );

    assert_eq!(code, status::OK);
    let (code, output) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(code, status::OK);
    assert_eq!(output, "ok");
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_async_pre_dispatch_failure_skips_the_callback() {
    let s = setup();

    let (tx, rx) = mpsc::channel::<(u32, String)>();
    let code = s.dispatcher.call_async(
        &s.host,
        None,
        Some(Duration::from_secs(5)),
        "doesnotexist",
        move |code, output| {
            tx.send((code, output)).unwrap();
        },
    );

    assert_eq!(code, status::NOT_FOUND);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_async_timeout_reaches_the_callback() {
    let s = setup();
    s.host.register_chart_function(
        &s.session,
        CHART,
        async_fn("hang", Duration::from_secs(60), Arc::new(Never)),
    );

    let (tx, rx) = mpsc::channel();
    let started = Instant::now();
    let code = s.dispatcher.call_async(
        &s.host,
        Some(CHART),
        Some(Duration::from_millis(100)),
        "hang",
        move |code, output| {
            tx.send((code, output)).unwrap();
        },
    );
    assert_eq!(code, status::OK);

    let (code, output) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(code, status::TIMEOUT);
    assert!(output.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(90));
    assert_eq!(s.dispatcher.in_flight_calls(), 0);
}

#[test]
fn test_racing_completion_and_timeout_resolve_exactly_once() {
    let s = setup();

    // The executor completes at the same nominal instant as the deadline,
    // so either party can win; the caller must observe exactly one
    // resolution either way.
    const RACE_WINDOW: Duration = Duration::from_millis(25);

    s.host.register_chart_function(
        &s.session,
        CHART,
        async_fn(
            "race",
            Duration::from_secs(60),
            Arc::new(Background {
                delay: RACE_WINDOW,
                body: "won",
            }),
        ),
    );

    for _ in 0..25 {
        let deliveries = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&deliveries);

        let code = s.dispatcher.call_async(
            &s.host,
            Some(CHART),
            Some(RACE_WINDOW),
            "race",
            move |code, _output| {
                assert!(code == status::OK || code == status::TIMEOUT);
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert_eq!(code, status::OK);

        std::thread::sleep(RACE_WINDOW * 8);
        assert_eq!(deliveries.load(Ordering::SeqCst), 1);
    }

    assert_eq!(s.dispatcher.in_flight_calls(), 0);
}
