//! Edge Manager: validated edge writes and the edge change feed.
//!
//! The no-overlap invariant is enforced by an optimistic transaction: the
//! namespace's edges are read, the candidate is checked against them, and the
//! write commits only if nothing under the namespace prefix changed since the
//! read. A lost race re-reads and re-validates.

use ipnet::IpNet;
use std::sync::Arc;

use crate::cidr::{find_conflict, parse_cidr};
use crate::error::{TopologyError, TopologyResult};
use crate::namespaces;
use crate::store::keys::{entity_key, kind_prefix, namespace_prefix};
use crate::store::{Compare, KvStore, StoreError, Txn};
use crate::watch::{decode_all, ChangeSubscription};
use tessera_types::{validate_name, Edge, ValidationError};

/// Optimistic admission rounds before giving up with [`TopologyError::Contended`].
pub const MAX_ADMISSION_ATTEMPTS: u32 = 8;

/// Owns the canonical edge set of every namespace.
#[derive(Clone)]
pub struct EdgeManager {
    store: Arc<dyn KvStore>,
}

impl EdgeManager {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Validate and admit a new edge. Returns the edge as stored (canonical CIDR).
    pub async fn add_edge(&self, edge: Edge) -> TopologyResult<Edge> {
        let (edge, net) = validate_edge(edge)?;
        let prefix = namespace_prefix::<Edge>(&edge.namespace);
        let key = entity_key::<Edge>(&edge.namespace, &edge.name);
        let value = serde_json::to_string(&edge).map_err(StoreError::from)?;

        for attempt in 1..=MAX_ADMISSION_ATTEMPTS {
            let snapshot = self.store.get_prefix(&prefix).await?;
            let existing: Vec<Edge> = decode_all(&snapshot.kvs);

            if existing.iter().any(|e| e.name == edge.name) {
                return Err(TopologyError::AlreadyExists {
                    kind: "edge",
                    namespace: edge.namespace,
                    name: edge.name,
                });
            }
            if let Some(owner) = find_conflict(&net, &edge.name, &existing) {
                return Err(ValidationError::CidrConflict {
                    cidr: edge.cidr.clone(),
                    existing_edge: owner.name.clone(),
                    existing_cidr: owner.cidr.clone(),
                }
                .into());
            }

            let txn = Txn::new()
                .when(Compare::PrefixUnchanged { prefix: prefix.clone(), revision: snapshot.revision })
                .put(key.clone(), value.clone());
            if self.store.txn(txn).await? {
                tracing::info!(
                    namespace = %edge.namespace,
                    edge = %edge.name,
                    cidr = %edge.cidr,
                    host_addr = %edge.host_addr,
                    "Edge added"
                );
                return Ok(edge);
            }
            tracing::debug!(
                namespace = %edge.namespace,
                edge = %edge.name,
                attempt,
                "Namespace changed during admission, retrying"
            );
        }

        Err(TopologyError::Contended { namespace: edge.namespace, attempts: MAX_ADMISSION_ATTEMPTS })
    }

    /// Remove an edge. Returns whether it existed; absence is not an error.
    pub async fn delete_edge(&self, namespace: &str, name: &str) -> TopologyResult<bool> {
        validate_name("namespace", namespace)?;
        validate_name("name", name)?;
        let removed = self.store.delete(&entity_key::<Edge>(namespace, name)).await?;
        if removed {
            tracing::info!(namespace = %namespace, edge = %name, "Edge deleted");
        }
        Ok(removed)
    }

    pub async fn get_edge(&self, namespace: &str, name: &str) -> TopologyResult<Option<Edge>> {
        validate_name("namespace", namespace)?;
        validate_name("name", name)?;
        let Some(kv) = self.store.get(&entity_key::<Edge>(namespace, name)).await? else {
            return Ok(None);
        };
        Ok(decode_all::<Edge>(std::slice::from_ref(&kv)).pop())
    }

    /// Point-in-time read of a namespace's edges, ordered by name.
    pub async fn list_edges(&self, namespace: &str) -> TopologyResult<Vec<Edge>> {
        validate_name("namespace", namespace)?;
        let snapshot = self.store.get_prefix(&namespace_prefix::<Edge>(namespace)).await?;
        Ok(decode_all(&snapshot.kvs))
    }

    /// Namespaces that currently own at least one edge or route.
    pub async fn list_namespaces(&self) -> TopologyResult<Vec<String>> {
        namespaces::list_namespaces(self.store.as_ref()).await
    }

    /// Typed change feed over every namespace's edges.
    pub async fn subscribe(&self) -> TopologyResult<ChangeSubscription<Edge>> {
        let stream = self.store.watch(&kind_prefix::<Edge>()).await?;
        Ok(ChangeSubscription::new(stream))
    }
}

/// Check every field and return the edge with its CIDR in canonical form.
pub fn validate_edge(mut edge: Edge) -> Result<(Edge, IpNet), ValidationError> {
    validate_name("namespace", &edge.namespace)?;
    validate_name("name", &edge.name)?;
    let host_addr = edge.host_addr.trim();
    if host_addr.is_empty() || host_addr.contains(char::is_whitespace) {
        return Err(ValidationError::InvalidHostAddr { value: edge.host_addr });
    }
    edge.host_addr = host_addr.to_string();
    let net = parse_cidr(&edge.cidr)?;
    edge.cidr = net.to_string();
    Ok((edge, net))
}

#[cfg(test)]
#[path = "edges_tests.rs"]
mod edges_tests;
