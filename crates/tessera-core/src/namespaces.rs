//! Namespaces carry no state of their own; they are derived from entity keys.

use std::collections::BTreeSet;

use crate::error::TopologyResult;
use crate::store::keys::{kind_prefix, namespace_prefix, parse_entity_key};
use crate::store::KvStore;
use crate::watch::decode_all;
use tessera_types::{validate_name, Edge, Entity, NamespaceTopology, Route};

async fn collect_namespaces<T: Entity>(
    store: &dyn KvStore,
    into: &mut BTreeSet<String>,
) -> TopologyResult<()> {
    let snapshot = store.get_prefix(&kind_prefix::<T>()).await?;
    for kv in &snapshot.kvs {
        if let Some((namespace, _)) = parse_entity_key::<T>(&kv.key) {
            into.insert(namespace.to_string());
        }
    }
    Ok(())
}

/// Sorted namespaces that own at least one edge or route.
pub async fn list_namespaces(store: &dyn KvStore) -> TopologyResult<Vec<String>> {
    let mut namespaces = BTreeSet::new();
    collect_namespaces::<Edge>(store, &mut namespaces).await?;
    collect_namespaces::<Route>(store, &mut namespaces).await?;
    Ok(namespaces.into_iter().collect())
}

/// Point-in-time read of a namespace's edges and routes from the store.
pub async fn read_topology(store: &dyn KvStore, namespace: &str) -> TopologyResult<NamespaceTopology> {
    validate_name("namespace", namespace)?;
    let edges = store.get_prefix(&namespace_prefix::<Edge>(namespace)).await?;
    let routes = store.get_prefix(&namespace_prefix::<Route>(namespace)).await?;
    Ok(NamespaceTopology {
        namespace: namespace.to_string(),
        edges: decode_all(&edges.kvs),
        routes: decode_all(&routes.kvs),
    })
}
