//! Per-call tracking with exactly-once resolution.
//!
//! Every dispatched call gets a [`CallEntry`] keyed by a unique id. Exactly
//! two parties may resolve an entry: the executor (through its
//! [`CallHandle`]) and the timeout guard. Whichever attempts the transition
//! out of `Pending` first wins; the loser observes the already-resolved
//! state and does nothing.

use crate::collections::HashMap;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

/// Unique identifier of one outstanding call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(pub(crate) u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call#{}", self.0)
    }
}

/// Resolution state of a call. Transitions out of `Pending` are one-way
/// and happen exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CallState {
    Pending = 0,
    /// The executor completed with a 2xx status
    Ok = 1,
    /// The deadline elapsed before the executor completed
    TimedOut = 2,
    /// The executor reported a failure status
    Failed = 3,
}

impl CallState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CallState::Pending,
            1 => CallState::Ok,
            2 => CallState::TimedOut,
            _ => CallState::Failed,
        }
    }
}

/// Callback invoked with `(status, output)` when an asynchronous call
/// resolves. Runs on whichever thread causes the resolution.
pub(crate) type CompletionFn = Box<dyn FnOnce(u32, String) + Send>;

/// How the resolution is delivered to the caller.
pub(crate) enum Completion {
    /// A synchronous caller blocks on the entry's condvar
    Wait,
    /// An asynchronous caller left a callback; taken (at most once) by the
    /// winning resolver
    Notify(Option<CompletionFn>),
}

/// State and status packed into one word: the status code in the high
/// 32 bits, the [`CallState`] discriminant in the low byte. Resolving is
/// a single compare-and-set on the packed word, so any thread that
/// observes the state change also observes the matching status code.
const fn pack(status: u32, state: CallState) -> u64 {
    ((status as u64) << 32) | state as u64
}

/// The per-call tracking record.
pub(crate) struct CallEntry {
    id: CallId,
    deadline: Instant,
    /// Packed state + status, see [`pack`]. Starts at `Pending` with a
    /// zero status and changes exactly once.
    resolution: AtomicU64,
    /// Output buffered by the executor, transferred to the caller at
    /// resolution. Writes that arrive after resolution are dropped.
    output: Mutex<String>,
    completion: Mutex<Completion>,
    resolved: Condvar,
}

impl CallEntry {
    fn new(id: CallId, deadline: Instant, completion: Completion) -> Self {
        Self {
            id,
            deadline,
            resolution: AtomicU64::new(pack(0, CallState::Pending)),
            output: Mutex::new(String::new()),
            completion: Mutex::new(completion),
            resolved: Condvar::new(),
        }
    }

    pub(crate) fn id(&self) -> CallId {
        self.id
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.deadline
    }

    pub(crate) fn state(&self) -> CallState {
        CallState::from_u8((self.resolution.load(Ordering::Acquire) & 0xff) as u8)
    }

    pub(crate) fn status(&self) -> u32 {
        (self.resolution.load(Ordering::Acquire) >> 32) as u32
    }

    /// Attempt the single-fire transition out of `Pending`.
    ///
    /// Returns true if this caller won and the resolution was delivered
    /// (condvar notified or callback invoked). Returns false if the entry
    /// was already resolved by the other party; the caller must then do
    /// nothing further.
    pub(crate) fn resolve(&self, status: u32, outcome: CallState) -> bool {
        debug_assert!(outcome != CallState::Pending);

        if self
            .resolution
            .compare_exchange(
                pack(0, CallState::Pending),
                pack(status, outcome),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            trace!("{} already resolved, ignoring {:?}", self.id, outcome);
            return false;
        }

        // Deliver under the completion lock so a blocked caller cannot miss
        // the wakeup, then run the callback (if any) outside of it.
        let callback = {
            let mut completion = self.completion.lock();
            match &mut *completion {
                Completion::Wait => {
                    self.resolved.notify_all();
                    None
                }
                Completion::Notify(callback) => callback.take(),
            }
        };

        if let Some(callback) = callback {
            let output = self.take_output();
            callback(status, output);
        }

        true
    }

    /// Block until the entry resolves and return the status code.
    ///
    /// The timeout guard bounds this wait; there is no deadline here.
    pub(crate) fn wait(&self) -> u32 {
        let mut completion = self.completion.lock();
        while self.state() == CallState::Pending {
            self.resolved.wait(&mut completion);
        }
        drop(completion);

        self.status()
    }

    /// Take whatever the executor wrote before resolution.
    pub(crate) fn take_output(&self) -> String {
        std::mem::take(&mut *self.output.lock())
    }
}

/// The handle a dispatched executor uses to produce its result.
///
/// Cloneable and sendable; an executor that is not synchronous moves it to
/// its own worker and completes it from there.
#[derive(Clone)]
pub struct CallHandle {
    entry: Arc<CallEntry>,
}

impl CallHandle {
    pub(crate) fn new(entry: Arc<CallEntry>) -> Self {
        Self { entry }
    }

    pub fn id(&self) -> CallId {
        self.entry.id()
    }

    /// The absolute instant at which the broker abandons this call.
    pub fn deadline(&self) -> Instant {
        self.entry.deadline()
    }

    /// True once the call resolved (completed, failed or timed out).
    /// A long-running executor should check this and stop early.
    pub fn is_resolved(&self) -> bool {
        self.entry.state() != CallState::Pending
    }

    /// Append text to the call's output. Writes after the call resolved
    /// are dropped.
    pub fn write(&self, text: &str) {
        if self.is_resolved() {
            trace!("{} dropping {} bytes written after resolution", self.id(), text.len());
            return;
        }
        self.entry.output.lock().push_str(text);
    }

    /// Resolve the call with the given status code. A 2xx status marks the
    /// call ok, anything else marks it failed.
    ///
    /// Returns false if the call was already resolved (e.g. by the timeout
    /// guard), in which case the buffered output is discarded.
    pub fn complete(&self, status: u32) -> bool {
        let outcome = if (200..300).contains(&status) {
            CallState::Ok
        } else {
            CallState::Failed
        };
        self.entry.resolve(status, outcome)
    }
}

impl fmt::Write for CallHandle {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s);
        Ok(())
    }
}

impl fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHandle")
            .field("id", &self.entry.id())
            .field("state", &self.entry.state())
            .finish()
    }
}

/// Tracks in-flight calls keyed by call id.
pub(crate) struct CallLedger {
    next_id: AtomicU64,
    in_flight: Mutex<HashMap<u64, Arc<CallEntry>>>,
}

impl CallLedger {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            in_flight: Mutex::new(HashMap::default()),
        }
    }

    pub(crate) fn next_id(&self) -> CallId {
        CallId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Create and track a new entry for a dispatched call.
    pub(crate) fn begin(
        &self,
        id: CallId,
        deadline: Instant,
        completion: Completion,
    ) -> Arc<CallEntry> {
        let entry = Arc::new(CallEntry::new(id, deadline, completion));
        self.in_flight.lock().insert(id.0, Arc::clone(&entry));
        entry
    }

    /// Stop tracking a resolved call.
    pub(crate) fn finish(&self, id: CallId) {
        self.in_flight.lock().remove(&id.0);
    }

    pub(crate) fn len(&self) -> usize {
        self.in_flight.lock().len()
    }
}
