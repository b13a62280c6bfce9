//! Deadline enforcement for in-flight calls.
//!
//! A single background thread sleeps until the earliest tracked deadline
//! and fires a timeout resolution for every entry still pending at that
//! point. The resolution uses the same single-fire transition as normal
//! completion, so racing an executor that finishes at the same instant is
//! safe: exactly one of the two wins.

use crate::error::status;
use crate::ledger::{CallEntry, CallState};
use parking_lot::{Condvar, Mutex};
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, trace};

/// One tracked deadline. Holds the entry weakly so the guard never keeps
/// a finished call alive.
struct Expiry {
    at: Instant,
    entry: Weak<CallEntry>,
}

impl PartialEq for Expiry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at
    }
}

impl Eq for Expiry {}

impl PartialOrd for Expiry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Expiry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.at.cmp(&other.at)
    }
}

struct GuardInner {
    /// Min-heap of pending deadlines (via `Reverse`)
    queue: Mutex<BinaryHeap<Reverse<Expiry>>>,
    wake: Condvar,
    shutdown: AtomicBool,
}

/// The deadline guard. Owns the background thread; dropping the guard
/// stops it.
pub struct TimeoutGuard {
    inner: Arc<GuardInner>,
    thread: Option<JoinHandle<()>>,
}

impl TimeoutGuard {
    pub fn new() -> Self {
        let inner = Arc::new(GuardInner {
            queue: Mutex::new(BinaryHeap::new()),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let worker = Arc::clone(&inner);
        let thread = std::thread::Builder::new()
            .name(String::from("fn-timeout-guard"))
            .spawn(move || run(worker))
            .expect("spawning the timeout guard thread");

        Self {
            inner,
            thread: Some(thread),
        }
    }

    /// Track an entry until its deadline. If the entry is still pending at
    /// that point it is resolved as timed out (408).
    pub(crate) fn watch(&self, entry: &Arc<CallEntry>) {
        let expiry = Expiry {
            at: entry.deadline(),
            entry: Arc::downgrade(entry),
        };

        let mut queue = self.inner.queue.lock();
        queue.push(Reverse(expiry));
        drop(queue);

        self.inner.wake.notify_one();
    }
}

impl Default for TimeoutGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.wake.notify_one();

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run(inner: Arc<GuardInner>) {
    let mut queue = inner.queue.lock();

    loop {
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        let now = Instant::now();
        let earliest = queue.peek().map(|Reverse(head)| head.at);

        match earliest {
            Some(at) if at <= now => {
                let Some(Reverse(expiry)) = queue.pop() else {
                    continue;
                };
                // Resolving may invoke an asynchronous caller's callback,
                // which must never run under the queue lock.
                drop(queue);
                fire(expiry);
                queue = inner.queue.lock();
            }
            Some(at) => {
                let _ = inner.wake.wait_until(&mut queue, at);
            }
            None => inner.wake.wait(&mut queue),
        }
    }
}

fn fire(expiry: Expiry) {
    let Some(entry) = expiry.entry.upgrade() else {
        // The call finished and was dropped before its deadline.
        return;
    };

    if entry.resolve(status::TIMEOUT, CallState::TimedOut) {
        debug!("{} abandoned at deadline", entry.id());
    } else {
        trace!("{} resolved before its deadline", entry.id());
    }
}
