//! Edge gateway entity.

use serde::{Deserialize, Serialize};

use super::Entity;

/// A gateway node owning a private subnet, reachable at a host address.
///
/// Edges are never mutated in place: a change is a delete followed by an add of
/// the same name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Partition the edge belongs to
    pub namespace: String,
    /// Unique per namespace
    pub name: String,
    /// Hosting platform tag (e.g. `aws`, `aliyun`, `vm`)
    #[serde(default)]
    pub platform: String,
    /// Dial endpoint the gateway is reachable at, e.g. `1.2.3.4:58423`
    pub host_addr: String,
    /// Private subnet owned by this gateway, canonical network form
    pub cidr: String,
}

impl Edge {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        host_addr: impl Into<String>,
        cidr: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            platform: String::new(),
            host_addr: host_addr.into(),
            cidr: cidr.into(),
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }
}

impl Entity for Edge {
    const KIND: &'static str = "edges";

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn name(&self) -> &str {
        &self.name
    }
}
