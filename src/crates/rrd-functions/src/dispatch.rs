//! Call dispatch: the synchronous wait path and the asynchronous
//! callback path.
//!
//! Both paths share the same shape: resolve the name, create a ledger
//! entry with a deadline, hand the executor a [`CallHandle`], and let the
//! executor and the timeout guard race for the single resolution. The sync
//! path then blocks on the entry; the async path returns and delivers the
//! result through the caller's callback exactly once.

use crate::error::status;
use crate::ledger::{CallHandle, CallLedger, CallState, Completion};
use crate::registry::HostFunctions;
use crate::session::CollectorRegistry;
use crate::timeout::TimeoutGuard;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// The call-dispatch engine.
///
/// Holds the process-wide collector state (injected, so "not ready" is
/// testable), the in-flight call ledger and the timeout guard. Shared
/// across caller threads behind an `Arc` by the embedding daemon.
pub struct Dispatcher {
    collectors: Arc<CollectorRegistry>,
    ledger: Arc<CallLedger>,
    guard: TimeoutGuard,
}

impl Dispatcher {
    pub fn new(collectors: Arc<CollectorRegistry>) -> Self {
        Self {
            collectors,
            ledger: Arc::new(CallLedger::new()),
            guard: TimeoutGuard::new(),
        }
    }

    /// Call a function and block until it resolves.
    ///
    /// Returns an HTTP-style status code and appends whatever the executor
    /// produced to `sink`. A `None` timeout uses the descriptor's own.
    /// 404 and 503 are detected before any ledger entry exists; 408, 500
    /// and executor-reported codes arrive through the wait. The block is
    /// a condvar wait bounded by the timeout guard, never a busy-wait.
    pub fn call_and_wait(
        &self,
        host: &HostFunctions,
        chart: Option<&str>,
        sink: &mut String,
        timeout: Option<Duration>,
        name: &str,
    ) -> u32 {
        if !self.collectors.is_ready() {
            debug!("rejecting '{}': no collector is running", name);
            return status::NOT_READY;
        }

        let Some((descriptor, scope)) = host.resolve(chart, name) else {
            debug!("function '{}' not found", name);
            return status::NOT_FOUND;
        };

        let timeout = timeout.unwrap_or(descriptor.timeout);
        let deadline = Instant::now() + timeout;

        let id = self.ledger.next_id();
        let entry = self.ledger.begin(id, deadline, Completion::Wait);
        scope.begin_call();
        self.guard.watch(&entry);

        trace!(
            "{} dispatching '{}' (sync={}, timeout={:?})",
            id, name, descriptor.synchronous, timeout
        );

        // A synchronous executor completes the handle before returning, so
        // the wait below falls through immediately. Others hand off to
        // their own context and the wait blocks until they (or the guard)
        // resolve the entry.
        if let Err(e) = descriptor.executor.execute(CallHandle::new(Arc::clone(&entry))) {
            error!("{} executor for '{}' failed: {}", id, name, e);
            entry.resolve(e.status(), CallState::Failed);
        }

        let code = entry.wait();
        sink.push_str(&entry.take_output());

        self.ledger.finish(id);
        scope.end_call();

        trace!("{} resolved with status {}", id, code);
        code
    }

    /// Call a function and return immediately.
    ///
    /// Pre-dispatch failures (404, 503) are returned directly and the
    /// callback is never invoked. Otherwise the call is started, 200 is
    /// returned, and `callback(status, output)` fires exactly once when
    /// the call resolves, on whichever thread causes the resolution.
    pub fn call_async<F>(
        &self,
        host: &HostFunctions,
        chart: Option<&str>,
        timeout: Option<Duration>,
        name: &str,
        callback: F,
    ) -> u32
    where
        F: FnOnce(u32, String) + Send + 'static,
    {
        if !self.collectors.is_ready() {
            debug!("rejecting '{}': no collector is running", name);
            return status::NOT_READY;
        }

        let Some((descriptor, scope)) = host.resolve(chart, name) else {
            debug!("function '{}' not found", name);
            return status::NOT_FOUND;
        };

        let timeout = timeout.unwrap_or(descriptor.timeout);
        let deadline = Instant::now() + timeout;

        let id = self.ledger.next_id();

        // Wrap the caller's callback with the broker's own bookkeeping so
        // the ledger entry and the scope counter are released no matter
        // which party resolves the call.
        let ledger = Arc::clone(&self.ledger);
        let cb_scope = Arc::clone(&scope);
        let completion = Completion::Notify(Some(Box::new(move |code, output| {
            ledger.finish(id);
            cb_scope.end_call();
            callback(code, output);
        })));

        let entry = self.ledger.begin(id, deadline, completion);
        scope.begin_call();
        self.guard.watch(&entry);

        trace!(
            "{} dispatching '{}' asynchronously (timeout={:?})",
            id, name, timeout
        );

        if let Err(e) = descriptor.executor.execute(CallHandle::new(Arc::clone(&entry))) {
            error!("{} executor for '{}' failed: {}", id, name, e);
            entry.resolve(e.status(), CallState::Failed);
        }

        status::OK
    }

    /// Calls currently tracked by the ledger.
    pub fn in_flight_calls(&self) -> usize {
        self.ledger.len()
    }
}
