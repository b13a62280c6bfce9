//! Collector lifecycle bookkeeping.
//!
//! The [`CollectorRegistry`] is process-scoped state that the daemon
//! creates once and injects into the [`Dispatcher`](crate::Dispatcher);
//! it is never read as an ambient global, so tests can simulate "no
//! collector running" without process-wide side effects.
//!
//! A [`CollectorSession`] bounds one collector's registrations: every
//! descriptor registered through the session is removed when the session
//! finishes, even if the owning chart or host lives on.

use crate::store::DescriptorStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Identifies one collector session for descriptor ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub(crate) u64);

/// Process-wide collector state.
///
/// While no session is active, dispatch fails fast with 503 instead of
/// waiting out a timeout that nothing can ever answer.
pub struct CollectorRegistry {
    active: AtomicUsize,
    next_session: AtomicU64,
}

impl CollectorRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            active: AtomicUsize::new(0),
            next_session: AtomicU64::new(1),
        })
    }

    /// Signal that a collection cycle started. The returned session owns
    /// the collector's registrations; dropping it is the finished signal.
    pub fn collector_started(self: &Arc<Self>) -> CollectorSession {
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        self.active.fetch_add(1, Ordering::AcqRel);
        debug!("collector {:?} started", id);

        CollectorSession {
            id,
            registry: Arc::clone(self),
            stores: Mutex::new(Vec::new()),
        }
    }

    /// True while at least one collector session is active.
    pub fn is_ready(&self) -> bool {
        self.active.load(Ordering::Acquire) > 0
    }

    pub fn active_collectors(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// One collector's registration session.
///
/// Holds weak references to every scope the session registered into, so a
/// destroyed chart is never kept alive just to be cleaned up.
pub struct CollectorSession {
    id: SessionId,
    registry: Arc<CollectorRegistry>,
    stores: Mutex<Vec<Weak<DescriptorStore>>>,
}

impl CollectorSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Remember a scope this session registered into.
    pub(crate) fn track(&self, store: &Arc<DescriptorStore>) {
        let mut stores = self.stores.lock();
        let weak = Arc::downgrade(store);
        if !stores.iter().any(|known| Weak::ptr_eq(known, &weak)) {
            stores.push(weak);
        }
    }

    /// Signal that the collector finished. Equivalent to dropping the
    /// session; provided so call sites can make the lifecycle explicit.
    pub fn finished(self) {}
}

impl Drop for CollectorSession {
    fn drop(&mut self) {
        let mut removed = 0;
        for store in self.stores.lock().drain(..) {
            if let Some(store) = store.upgrade() {
                removed += store.remove_session(self.id);
            }
        }

        self.registry.active.fetch_sub(1, Ordering::AcqRel);
        debug!("collector {:?} finished, removed {} functions", self.id, removed);
    }
}
