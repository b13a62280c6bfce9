//! The per-host function registry.
//!
//! A host owns one host-scoped descriptor store plus one store per chart.
//! Lookup precedence lives here and nowhere else: a chart-scoped
//! descriptor shadows a host-scoped one of the same name.

use crate::collections::HashMap;
use crate::descriptor::FunctionDescriptor;
use crate::session::CollectorSession;
use crate::store::DescriptorStore;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

/// All functions registered against one host, in both scopes.
pub struct HostFunctions {
    host: Arc<DescriptorStore>,
    charts: RwLock<HashMap<String, Arc<DescriptorStore>>>,
}

impl HostFunctions {
    pub fn new() -> Self {
        Self {
            host: Arc::new(DescriptorStore::new()),
            charts: RwLock::new(HashMap::default()),
        }
    }

    /// Register a host-scoped function for the given collector session.
    pub fn register_host_function(
        &self,
        session: &CollectorSession,
        descriptor: FunctionDescriptor,
    ) {
        session.track(&self.host);
        self.host.register(session.id(), descriptor);
    }

    /// Register a chart-scoped function for the given collector session,
    /// creating the chart's store on first use.
    pub fn register_chart_function(
        &self,
        session: &CollectorSession,
        chart: &str,
        descriptor: FunctionDescriptor,
    ) {
        let store = {
            let mut charts = self.charts.write();
            Arc::clone(
                charts
                    .entry(String::from(chart))
                    .or_insert_with(|| Arc::new(DescriptorStore::new())),
            )
        };

        session.track(&store);
        store.register(session.id(), descriptor);
    }

    /// Resolve a name to a descriptor.
    ///
    /// With a chart context, the chart's scope is searched first and the
    /// host scope is the fallback. Without one, the host scope is searched
    /// first and then every chart in lexicographic order, so host-level
    /// callers can still reach chart functions deterministically.
    pub fn lookup(&self, chart: Option<&str>, name: &str) -> Option<FunctionDescriptor> {
        self.resolve(chart, name).map(|(descriptor, _)| descriptor)
    }

    /// Like [`lookup`](Self::lookup), but also returns the owning scope so
    /// the dispatcher can account the call against it.
    pub(crate) fn resolve(
        &self,
        chart: Option<&str>,
        name: &str,
    ) -> Option<(FunctionDescriptor, Arc<DescriptorStore>)> {
        if let Some(chart) = chart {
            let store = self.chart_scope(chart);
            if let Some(store) = store {
                if let Some(descriptor) = store.lookup(name) {
                    return Some((descriptor, store));
                }
            }
            return self.host.lookup(name).map(|d| (d, Arc::clone(&self.host)));
        }

        if let Some(descriptor) = self.host.lookup(name) {
            return Some((descriptor, Arc::clone(&self.host)));
        }

        for (_, store) in self.chart_scopes() {
            if let Some(descriptor) = store.lookup(name) {
                return Some((descriptor, store));
            }
        }

        None
    }

    /// The host-scoped store.
    pub fn host_scope(&self) -> Arc<DescriptorStore> {
        Arc::clone(&self.host)
    }

    /// A chart's store, if any function was ever registered against it.
    pub fn chart_scope(&self, chart: &str) -> Option<Arc<DescriptorStore>> {
        self.charts.read().get(chart).map(Arc::clone)
    }

    /// Every chart store, sorted by chart id.
    pub(crate) fn chart_scopes(&self) -> Vec<(String, Arc<DescriptorStore>)> {
        let mut scopes: Vec<(String, Arc<DescriptorStore>)> = self
            .charts
            .read()
            .iter()
            .map(|(chart, store)| (chart.clone(), Arc::clone(store)))
            .collect();
        scopes.sort_by(|a, b| a.0.cmp(&b.0));
        scopes
    }

    /// Tear down a chart's scope. New dispatch can no longer resolve its
    /// functions; calls already in flight complete or time out on their own
    /// captured descriptors.
    pub fn remove_chart(&self, chart: &str) {
        let Some(store) = self.charts.write().remove(chart) else {
            return;
        };

        let in_flight = store.in_flight();
        if in_flight > 0 {
            warn!(
                "chart '{}' removed with {} function calls in flight",
                chart, in_flight
            );
        } else {
            debug!("chart '{}' removed ({} functions)", chart, store.len());
        }
    }
}

impl Default for HostFunctions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::ledger::CallHandle;
    use crate::session::CollectorRegistry;
    use std::time::Duration;

    fn descriptor(name: &str, help: &str) -> FunctionDescriptor {
        FunctionDescriptor::new(
            name,
            help,
            "table",
            Duration::from_secs(10),
            true,
            Arc::new(|_call: CallHandle| -> Result<()> { Ok(()) }),
        )
    }

    #[test]
    fn test_chart_scope_shadows_host_scope() {
        let registry = CollectorRegistry::new();
        let session = registry.collector_started();
        let host = HostFunctions::new();

        host.register_host_function(&session, descriptor("ps", "host processes"));
        host.register_chart_function(&session, "apps.cpu", descriptor("ps", "chart processes"));

        let shadowed = host.lookup(Some("apps.cpu"), "ps").unwrap();
        assert_eq!(shadowed.help, "chart processes");

        // A chart without its own match falls back to the host scope.
        host.register_chart_function(&session, "apps.mem", descriptor("top", "Top N"));
        let fallback = host.lookup(Some("apps.mem"), "ps").unwrap();
        assert_eq!(fallback.help, "host processes");
    }

    #[test]
    fn test_host_level_lookup_reaches_chart_functions() {
        let registry = CollectorRegistry::new();
        let session = registry.collector_started();
        let host = HostFunctions::new();

        host.register_chart_function(&session, "apps.cpu", descriptor("top", "Top N"));

        let found = host.lookup(None, "top").unwrap();
        assert_eq!(found.help, "Top N");
        assert!(host.lookup(None, "doesnotexist").is_none());
    }

    #[test]
    fn test_session_end_removes_registrations_everywhere() {
        let registry = CollectorRegistry::new();
        let host = HostFunctions::new();

        let session = registry.collector_started();
        host.register_host_function(&session, descriptor("ps", "processes"));
        host.register_chart_function(&session, "apps.cpu", descriptor("top", "Top N"));

        let keeper = registry.collector_started();
        host.register_host_function(&keeper, descriptor("streams", "streams"));

        session.finished();

        assert!(host.lookup(None, "ps").is_none());
        assert!(host.lookup(Some("apps.cpu"), "top").is_none());
        assert!(host.lookup(None, "streams").is_some());
    }

    #[test]
    fn test_remove_chart_makes_functions_unreachable() {
        let registry = CollectorRegistry::new();
        let session = registry.collector_started();
        let host = HostFunctions::new();

        host.register_chart_function(&session, "apps.cpu", descriptor("top", "Top N"));
        host.remove_chart("apps.cpu");

        assert!(host.lookup(Some("apps.cpu"), "top").is_none());
        assert!(host.lookup(None, "top").is_none());
    }
}
