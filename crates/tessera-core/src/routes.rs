//! Route Manager: validated route writes and the route change feed.
//!
//! Routes have no cross-entity invariant. Distinct routes may share a
//! destination or a listener, and a listener that does not name an existing
//! edge is accepted.

use std::sync::Arc;

use crate::cidr::parse_cidr;
use crate::error::{TopologyError, TopologyResult};
use crate::store::keys::{entity_key, kind_prefix, namespace_prefix};
use crate::store::{Compare, KvStore, StoreError, Txn};
use crate::watch::{decode_all, ChangeSubscription};
use tessera_types::{validate_name, Edge, Route, ValidationError};

#[derive(Clone)]
pub struct RouteManager {
    store: Arc<dyn KvStore>,
}

impl RouteManager {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Validate and store a new route. Returns the route as stored (canonical CIDR).
    pub async fn add_route(&self, route: Route) -> TopologyResult<Route> {
        let route = validate_route(route)?;
        let key = entity_key::<Route>(&route.namespace, &route.name);
        let value = serde_json::to_string(&route).map_err(StoreError::from)?;

        let txn = Txn::new().when(Compare::KeyAbsent { key: key.clone() }).put(key, value);
        if !self.store.txn(txn).await? {
            return Err(TopologyError::AlreadyExists {
                kind: "route",
                namespace: route.namespace,
                name: route.name,
            });
        }

        let listener_key = entity_key::<Edge>(&route.namespace, &route.listener);
        if self.store.get(&listener_key).await?.is_none() {
            tracing::debug!(
                namespace = %route.namespace,
                route = %route.name,
                listener = %route.listener,
                "Route listener is not a known edge yet"
            );
        }
        tracing::info!(
            namespace = %route.namespace,
            route = %route.name,
            listener = %route.listener,
            cidr = %route.cidr,
            "Route added"
        );
        Ok(route)
    }

    /// Remove a route. Returns whether it existed; absence is not an error.
    pub async fn delete_route(&self, namespace: &str, name: &str) -> TopologyResult<bool> {
        validate_name("namespace", namespace)?;
        validate_name("name", name)?;
        let removed = self.store.delete(&entity_key::<Route>(namespace, name)).await?;
        if removed {
            tracing::info!(namespace = %namespace, route = %name, "Route deleted");
        }
        Ok(removed)
    }

    pub async fn get_route(&self, namespace: &str, name: &str) -> TopologyResult<Option<Route>> {
        validate_name("namespace", namespace)?;
        validate_name("name", name)?;
        let Some(kv) = self.store.get(&entity_key::<Route>(namespace, name)).await? else {
            return Ok(None);
        };
        Ok(decode_all::<Route>(std::slice::from_ref(&kv)).pop())
    }

    /// Point-in-time read of a namespace's routes, ordered by name.
    pub async fn list_routes(&self, namespace: &str) -> TopologyResult<Vec<Route>> {
        validate_name("namespace", namespace)?;
        let snapshot = self.store.get_prefix(&namespace_prefix::<Route>(namespace)).await?;
        Ok(decode_all(&snapshot.kvs))
    }

    /// Typed change feed over every namespace's routes.
    pub async fn subscribe(&self) -> TopologyResult<ChangeSubscription<Route>> {
        let stream = self.store.watch(&kind_prefix::<Route>()).await?;
        Ok(ChangeSubscription::new(stream))
    }
}

pub fn validate_route(mut route: Route) -> Result<Route, ValidationError> {
    validate_name("namespace", &route.namespace)?;
    validate_name("name", &route.name)?;
    validate_name("listener", &route.listener)?;
    route.cidr = parse_cidr(&route.cidr)?.to_string();
    Ok(route)
}
