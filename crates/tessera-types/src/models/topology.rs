use serde::{Deserialize, Serialize};

use super::{Edge, Route};

/// Point-in-time view of everything declared in one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceTopology {
    pub namespace: String,
    /// Ordered by name
    pub edges: Vec<Edge>,
    /// Ordered by name
    pub routes: Vec<Route>,
}

impl NamespaceTopology {
    pub fn empty(namespace: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), edges: Vec::new(), routes: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty() && self.routes.is_empty()
    }

    pub fn edge(&self, name: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.name == name)
    }
}
