//! Route entity.

use serde::{Deserialize, Serialize};

use super::Entity;

/// A destination subnet reachable through a named listener edge.
///
/// The listener may not exist yet; the route is stored and propagated anyway and
/// becomes deliverable once that edge connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub namespace: String,
    pub name: String,
    /// Edge name traffic for `cidr` is forwarded through
    pub listener: String,
    /// Destination subnet, canonical network form
    pub cidr: String,
}

impl Route {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        listener: impl Into<String>,
        cidr: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            listener: listener.into(),
            cidr: cidr.into(),
        }
    }
}

impl Entity for Route {
    const KIND: &'static str = "routes";

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn name(&self) -> &str {
        &self.name
    }
}
