//! Function descriptors and the executor seam.

use crate::ledger::CallHandle;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Collector-supplied code that produces a function's result.
///
/// The broker invokes [`execute`](FunctionExecutor::execute) on the
/// dispatching thread. A synchronous executor writes its output through the
/// handle and completes it before returning. An executor that is not
/// synchronous hands the handle off to its own worker context and returns
/// immediately; the handle may be written to and completed from any thread.
///
/// Returning an error resolves the call as failed with the error's status
/// code, unless the executor already completed the handle (the first
/// resolution always wins).
///
/// Any state the collector needs during execution lives on the trait
/// implementation itself; there is no separate opaque context pointer.
pub trait FunctionExecutor: Send + Sync + 'static {
    fn execute(&self, call: CallHandle) -> Result<()>;
}

impl<F> FunctionExecutor for F
where
    F: Fn(CallHandle) -> Result<()> + Send + Sync + 'static,
{
    fn execute(&self, call: CallHandle) -> Result<()> {
        self(call)
    }
}

/// The registered metadata and executor reference for one callable function.
///
/// Descriptors are cheap to clone: the executor sits behind an `Arc`, and a
/// dispatched call holds its own clone, so removing or replacing the
/// registration never invalidates a call already in flight.
#[derive(Clone)]
pub struct FunctionDescriptor {
    /// Unique name within its owning scope (chart or host)
    pub name: String,
    /// Human-readable description, used only for exposition
    pub help: String,
    /// Declared response content type (e.g. "table"), opaque to the broker
    pub format: String,
    /// Default duration after which an unanswered call is abandoned
    pub timeout: Duration,
    /// True if the executor runs to completion before returning from
    /// `execute`, making it safe to call from a context that cannot suspend
    pub synchronous: bool,
    /// The collector-supplied executor
    pub executor: Arc<dyn FunctionExecutor>,
}

impl FunctionDescriptor {
    pub fn new(
        name: impl Into<String>,
        help: impl Into<String>,
        format: impl Into<String>,
        timeout: Duration,
        synchronous: bool,
        executor: Arc<dyn FunctionExecutor>,
    ) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            format: format.into(),
            timeout,
            synchronous,
            executor,
        }
    }
}

impl fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDescriptor")
            .field("name", &self.name)
            .field("help", &self.help)
            .field("format", &self.format)
            .field("timeout", &self.timeout)
            .field("synchronous", &self.synchronous)
            .finish_non_exhaustive()
    }
}
