//! The registry's private copy of the declared topology.

use std::collections::{BTreeMap, HashMap};

use tessera_types::{Edge, NamespaceTopology, Route};

#[derive(Debug, Default)]
struct NamespaceEntry {
    edges: BTreeMap<String, Edge>,
    routes: BTreeMap<String, Route>,
}

impl NamespaceEntry {
    fn is_empty(&self) -> bool {
        self.edges.is_empty() && self.routes.is_empty()
    }
}

/// Namespace -> edges and routes, fed by the change stream.
///
/// This is what new sessions are replayed from; it is never re-read from the
/// store per event. Namespaces with nothing left in them are pruned.
#[derive(Debug, Default)]
pub struct TopologyCache {
    namespaces: HashMap<String, NamespaceEntry>,
}

impl TopologyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the previous value, if any.
    pub fn upsert_edge(&mut self, edge: Edge) -> Option<Edge> {
        self.namespaces
            .entry(edge.namespace.clone())
            .or_default()
            .edges
            .insert(edge.name.clone(), edge)
    }

    pub fn remove_edge(&mut self, namespace: &str, name: &str) -> Option<Edge> {
        let entry = self.namespaces.get_mut(namespace)?;
        let removed = entry.edges.remove(name);
        self.prune(namespace);
        removed
    }

    pub fn upsert_route(&mut self, route: Route) -> Option<Route> {
        self.namespaces
            .entry(route.namespace.clone())
            .or_default()
            .routes
            .insert(route.name.clone(), route)
    }

    pub fn remove_route(&mut self, namespace: &str, name: &str) -> Option<Route> {
        let entry = self.namespaces.get_mut(namespace)?;
        let removed = entry.routes.remove(name);
        self.prune(namespace);
        removed
    }

    pub fn has_edge(&self, namespace: &str, name: &str) -> bool {
        self.namespaces.get(namespace).is_some_and(|entry| entry.edges.contains_key(name))
    }

    /// Everything visible to a session in `namespace`, ordered by name.
    pub fn snapshot(&self, namespace: &str) -> NamespaceTopology {
        match self.namespaces.get(namespace) {
            Some(entry) => NamespaceTopology {
                namespace: namespace.to_string(),
                edges: entry.edges.values().cloned().collect(),
                routes: entry.routes.values().cloned().collect(),
            },
            None => NamespaceTopology::empty(namespace),
        }
    }

    pub fn namespace_count(&self) -> usize {
        self.namespaces.len()
    }

    fn prune(&mut self, namespace: &str) {
        if self.namespaces.get(namespace).is_some_and(NamespaceEntry::is_empty) {
            self.namespaces.remove(namespace);
        }
    }
}
