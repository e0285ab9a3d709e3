//! Store key layout.
//!
//! `/tessera/{kind}/{namespace}/{name}`, e.g. `/tessera/edges/default/e1`.
//! Names are validated to never contain `/`, so the layout parses unambiguously.

use tessera_types::Entity;

pub const ROOT: &str = "/tessera";

/// `/tessera/{kind}/`
pub fn kind_prefix<T: Entity>() -> String {
    format!("{}/{}/", ROOT, T::KIND)
}

/// `/tessera/{kind}/{namespace}/`
pub fn namespace_prefix<T: Entity>(namespace: &str) -> String {
    format!("{}{}/", kind_prefix::<T>(), namespace)
}

pub fn entity_key<T: Entity>(namespace: &str, name: &str) -> String {
    format!("{}{}", namespace_prefix::<T>(namespace), name)
}

/// Split a key into `(namespace, name)` if it belongs to `T`'s key space.
pub fn parse_entity_key<T: Entity>(key: &str) -> Option<(&str, &str)> {
    let rest = key.strip_prefix(ROOT)?.strip_prefix('/')?;
    let rest = rest.strip_prefix(T::KIND)?.strip_prefix('/')?;
    let (namespace, name) = rest.split_once('/')?;
    if namespace.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some((namespace, name))
}
