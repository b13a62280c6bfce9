//! Registry and dispatch broker for collector-supplied callable functions.
//!
//! Collectors register named functions against a chart or a host; remote
//! callers invoke them by name, synchronously or asynchronously, under an
//! enforced deadline. The broker coordinates the collector's execution
//! context with arbitrary caller threads and guarantees that every call is
//! resolved exactly once, by either the executor or the timeout guard,
//! whichever fires first.
//!
//! # Example
//!
//! ```ignore
//! let collectors = CollectorRegistry::new();
//! let dispatcher = Dispatcher::new(Arc::clone(&collectors));
//! let host = HostFunctions::new();
//!
//! let session = collectors.collector_started();
//! host.register_chart_function(
//!     &session,
//!     "apps.cpu",
//!     FunctionDescriptor::new(
//!         "top",
//!         "Top processes by CPU",
//!         "table",
//!         Duration::from_secs(10),
//!         true,
//!         Arc::new(|call: CallHandle| {
//!             call.write("...");
//!             call.complete(200);
//!             Ok(())
//!         }),
//!     ),
//! );
//!
//! let mut sink = String::new();
//! let code = dispatcher.call_and_wait(&host, Some("apps.cpu"), &mut sink, None, "top");
//! ```
//!
//! # Concurrency
//!
//! Locking is fine-grained: one lock per descriptor store, one state
//! machine per call entry. The only blocking wait in the crate is the
//! synchronous caller's condvar wait, which the timeout guard bounds.
//! Registrations live as long as their [`CollectorSession`]; calls in
//! flight keep their own descriptor clone and are unaffected by removal.

mod collections;
mod descriptor;
mod dispatch;
pub mod error;
pub mod exposition;
mod ledger;
mod registry;
mod session;
mod store;
mod timeout;

pub use descriptor::{FunctionDescriptor, FunctionExecutor};
pub use dispatch::Dispatcher;
pub use error::{FunctionsError, Result};
pub use ledger::{CallHandle, CallId, CallState};
pub use registry::HostFunctions;
pub use session::{CollectorRegistry, CollectorSession, SessionId};
pub use store::DescriptorStore;
pub use timeout::TimeoutGuard;
