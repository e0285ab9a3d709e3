//! Typed change feed over the store's raw watch stream.
//!
//! Raw messages are classified only as put-vs-delete. There is no separate
//! "create" signal: a put is always an [`ChangeKind::Upsert`], whether or not the
//! name existed before. Consumers that need first-occurrence detection track it
//! themselves.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

use crate::store::keys::parse_entity_key;
use crate::store::{EventKind, KeyValue, Snapshot, WatchEvent, WatchMessage, WatchStream};
use tessera_types::{Edge, Entity, Route};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Upsert,
    Delete,
}

/// One committed change to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change<T> {
    pub namespace: String,
    /// New value for upserts, last-known value for deletes
    pub entity: T,
    pub kind: ChangeKind,
}

pub type EdgeChanged = Change<Edge>;
pub type RouteChanged = Change<Route>;

impl<T: Entity> Change<T> {
    pub fn upsert(entity: T) -> Self {
        Self { namespace: entity.namespace().to_string(), entity, kind: ChangeKind::Upsert }
    }

    pub fn delete(entity: T) -> Self {
        Self { namespace: entity.namespace().to_string(), entity, kind: ChangeKind::Delete }
    }

    pub fn name(&self) -> &str {
        self.entity.name()
    }
}

/// Last-known entity per key; turns raw watch messages into typed changes.
#[derive(Debug)]
pub struct ChangeTracker<T> {
    known: BTreeMap<String, T>,
}

impl<T: Entity> Default for ChangeTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> ChangeTracker<T> {
    pub fn new() -> Self {
        Self { known: BTreeMap::new() }
    }

    /// Number of entities currently known.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn apply(&mut self, message: WatchMessage) -> Vec<Change<T>> {
        match message {
            WatchMessage::Event(event) => self.apply_event(event).into_iter().collect(),
            WatchMessage::Resync(snapshot) => self.apply_resync(snapshot),
        }
    }

    fn apply_event(&mut self, event: WatchEvent) -> Option<Change<T>> {
        match event.kind {
            EventKind::Put => {
                match event.value.as_deref().and_then(|value| decode::<T>(&event.key, value)) {
                    Some(entity) => {
                        self.known.insert(event.key, entity.clone());
                        Some(Change::upsert(entity))
                    },
                    // The key no longer holds a valid entity.
                    None => self.known.remove(&event.key).map(Change::delete),
                }
            },
            EventKind::Delete => match self.known.remove(&event.key) {
                Some(entity) => Some(Change::delete(entity)),
                None => {
                    tracing::trace!(key = %event.key, "Delete of untracked key dropped");
                    None
                },
            },
        }
    }

    /// Diff the tracked state against a full snapshot: deletes first, then upserts.
    fn apply_resync(&mut self, snapshot: Snapshot) -> Vec<Change<T>> {
        let mut fresh: BTreeMap<String, T> = BTreeMap::new();
        for KeyValue { key, value, .. } in snapshot.kvs {
            if let Some(entity) = decode::<T>(&key, &value) {
                fresh.insert(key, entity);
            }
        }

        let mut changes = Vec::new();
        for (key, entity) in &self.known {
            if !fresh.contains_key(key) {
                changes.push(Change::delete(entity.clone()));
            }
        }
        for (key, entity) in &fresh {
            if self.known.get(key) != Some(entity) {
                changes.push(Change::upsert(entity.clone()));
            }
        }

        tracing::debug!(
            kind = T::KIND,
            entities = fresh.len(),
            changes = changes.len(),
            "Watch resynced"
        );
        self.known = fresh;
        changes
    }
}

/// Decode stored entities, skipping (and logging) anything malformed.
pub(crate) fn decode_all<T: Entity>(kvs: &[KeyValue]) -> Vec<T> {
    kvs.iter().filter_map(|kv| decode::<T>(&kv.key, &kv.value)).collect()
}

fn decode<T: Entity>(key: &str, value: &str) -> Option<T> {
    let Some((namespace, name)) = parse_entity_key::<T>(key) else {
        tracing::warn!(key = %key, kind = T::KIND, "Ignoring key outside layout");
        return None;
    };
    match serde_json::from_str::<T>(value) {
        Ok(entity) if entity.namespace() == namespace && entity.name() == name => Some(entity),
        Ok(entity) => {
            tracing::warn!(
                key = %key,
                namespace = %entity.namespace(),
                name = %entity.name(),
                "Ignoring entity whose identity does not match its key"
            );
            None
        },
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Ignoring undecodable entity");
            None
        },
    }
}

/// Cancellable subscription producing typed changes for one entity kind.
pub struct ChangeSubscription<T> {
    stream: WatchStream,
    tracker: ChangeTracker<T>,
    pending: VecDeque<Change<T>>,
}

impl<T: Entity> ChangeSubscription<T> {
    pub fn new(stream: WatchStream) -> Self {
        Self { stream, tracker: ChangeTracker::new(), pending: VecDeque::new() }
    }

    /// Next change in commit order; `None` once cancelled.
    pub async fn next(&mut self) -> Option<Change<T>> {
        loop {
            if let Some(change) = self.pending.pop_front() {
                return Some(change);
            }
            let message = self.stream.next().await?;
            self.pending.extend(self.tracker.apply(message));
        }
    }

    pub fn cancel(&self) {
        self.stream.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::keys::entity_key;

    fn edge(name: &str, cidr: &str) -> Edge {
        Edge::new("ns", name, "1.2.3.4:58423", cidr)
    }

    fn put(e: &Edge, revision: i64) -> WatchMessage {
        WatchMessage::Event(WatchEvent {
            kind: EventKind::Put,
            key: entity_key::<Edge>(&e.namespace, &e.name),
            value: Some(serde_json::to_string(e).unwrap()),
            revision,
        })
    }

    fn del(name: &str, revision: i64) -> WatchMessage {
        WatchMessage::Event(WatchEvent {
            kind: EventKind::Delete,
            key: entity_key::<Edge>("ns", name),
            value: None,
            revision,
        })
    }

    fn resync(edges: &[Edge]) -> WatchMessage {
        WatchMessage::Resync(Snapshot {
            revision: 100,
            kvs: edges
                .iter()
                .map(|e| KeyValue {
                    key: entity_key::<Edge>(&e.namespace, &e.name),
                    value: serde_json::to_string(e).unwrap(),
                    mod_revision: 1,
                })
                .collect(),
        })
    }

    #[test]
    fn test_put_is_always_upsert() {
        let mut tracker = ChangeTracker::<Edge>::new();
        let e1 = edge("e1", "10.0.0.0/24");

        let first = tracker.apply(put(&e1, 1));
        let again = tracker.apply(put(&e1, 2));
        assert_eq!(first, vec![Change::upsert(e1.clone())]);
        assert_eq!(again, vec![Change::upsert(e1)]);
    }

    #[test]
    fn test_delete_carries_last_known_entity() {
        let mut tracker = ChangeTracker::<Edge>::new();
        let e1 = edge("e1", "10.0.0.0/24");
        tracker.apply(put(&e1, 1));

        let changes = tracker.apply(del("e1", 2));
        assert_eq!(changes, vec![Change::delete(e1)]);
        assert!(tracker.apply(del("e1", 3)).is_empty());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_resync_diffs_against_known_state() {
        let mut tracker = ChangeTracker::<Edge>::new();
        let e1 = edge("e1", "10.0.0.0/24");
        let e2 = edge("e2", "10.0.1.0/24");
        let e2_moved = edge("e2", "10.0.2.0/24");
        let e3 = edge("e3", "10.0.3.0/24");
        tracker.apply(put(&e1, 1));
        tracker.apply(put(&e2, 2));

        // e1 vanished, e2 changed, e3 appeared while the feed was down.
        let changes = tracker.apply(resync(&[e2_moved.clone(), e3.clone()]));
        assert_eq!(
            changes,
            vec![Change::delete(e1), Change::upsert(e2_moved.clone()), Change::upsert(e3.clone())]
        );

        // Resync with unchanged state is silent.
        assert!(tracker.apply(resync(&[e2_moved, e3])).is_empty());
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_undecodable_and_foreign_keys_are_skipped() {
        let mut tracker = ChangeTracker::<Edge>::new();
        let garbage = WatchMessage::Event(WatchEvent {
            kind: EventKind::Put,
            key: entity_key::<Edge>("ns", "e1"),
            value: Some("{not json".to_string()),
            revision: 1,
        });
        let mismatched = WatchMessage::Event(WatchEvent {
            kind: EventKind::Put,
            key: entity_key::<Edge>("ns", "other"),
            value: Some(serde_json::to_string(&edge("e1", "10.0.0.0/24")).unwrap()),
            revision: 2,
        });
        let route_key = WatchMessage::Event(WatchEvent {
            kind: EventKind::Put,
            key: entity_key::<Route>("ns", "e1"),
            value: Some(serde_json::to_string(&edge("e1", "10.0.0.0/24")).unwrap()),
            revision: 3,
        });

        assert!(tracker.apply(garbage).is_empty());
        assert!(tracker.apply(mismatched).is_empty());
        assert!(tracker.apply(route_key).is_empty());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_undecodable_overwrite_withdraws_tracked_entity() {
        let mut tracker = ChangeTracker::<Edge>::new();
        let e1 = edge("e1", "10.0.0.0/24");
        tracker.apply(put(&e1, 1));

        let garbage = WatchMessage::Event(WatchEvent {
            kind: EventKind::Put,
            key: entity_key::<Edge>("ns", "e1"),
            value: Some("{not json".to_string()),
            revision: 2,
        });
        assert_eq!(tracker.apply(garbage), vec![Change::delete(e1)]);
        assert!(tracker.is_empty());

        // Later deletes of the key are no longer news.
        assert!(tracker.apply(del("e1", 3)).is_empty());
    }
}
