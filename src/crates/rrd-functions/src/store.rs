//! Per-scope descriptor storage.
//!
//! Each scope (one chart, or the host itself) owns one `DescriptorStore`.
//! Stores are locked individually, so collectors registering against
//! different scopes never contend with each other.

use crate::collections::HashMap;
use crate::descriptor::FunctionDescriptor;
use crate::session::SessionId;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

struct StoredDescriptor {
    descriptor: FunctionDescriptor,
    session: SessionId,
}

/// Name → descriptor map for one scope, tagged with the registering
/// collector session and counting calls currently in flight against it.
pub struct DescriptorStore {
    functions: RwLock<HashMap<String, StoredDescriptor>>,
    in_flight: AtomicUsize,
}

impl DescriptorStore {
    pub(crate) fn new() -> Self {
        Self {
            functions: RwLock::new(HashMap::default()),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Insert or replace the descriptor for its name. Last writer wins;
    /// calls already dispatched against a replaced descriptor keep running
    /// on their own captured clone.
    pub(crate) fn register(&self, session: SessionId, descriptor: FunctionDescriptor) {
        let name = descriptor.name.clone();
        let stored = StoredDescriptor {
            descriptor,
            session,
        };

        if self.functions.write().insert(name.clone(), stored).is_some() {
            debug!("function '{}' replaced by {:?}", name, session);
        } else {
            debug!("function '{}' registered by {:?}", name, session);
        }
    }

    /// Remove every descriptor registered by the given session. Returns the
    /// number of descriptors removed.
    pub(crate) fn remove_session(&self, session: SessionId) -> usize {
        let mut functions = self.functions.write();
        let before = functions.len();
        functions.retain(|_, stored| stored.session != session);
        before - functions.len()
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<FunctionDescriptor> {
        self.functions
            .read()
            .get(name)
            .map(|stored| stored.descriptor.clone())
    }

    /// A point-in-time, name-sorted copy of the registered descriptors.
    /// Registrations that race the snapshot may or may not be reflected.
    pub fn snapshot(&self) -> Vec<FunctionDescriptor> {
        let mut descriptors: Vec<FunctionDescriptor> = self
            .functions
            .read()
            .values()
            .map(|stored| stored.descriptor.clone())
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.functions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.read().is_empty()
    }

    /// Calls dispatched against this scope that have not resolved yet.
    /// Owners can poll this to observe drain before tearing the scope down.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn begin_call(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn end_call(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
