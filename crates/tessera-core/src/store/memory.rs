//! In-process store with the same revision and watch semantics as PostgreSQL.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use super::{
    Compare, EventKind, KeyValue, KvStore, Op, Snapshot, StoreResult, Txn, WatchEvent,
    WatchMessage, WatchStream, WATCH_BUFFER,
};

/// Events buffered per watcher before it is considered lagging and resynced.
const FEED_CAPACITY: usize = 4096;

#[derive(Debug)]
struct Entry {
    /// `None` is a tombstone
    value: Option<String>,
    mod_revision: i64,
}

#[derive(Debug, Default)]
struct MemoryState {
    revision: i64,
    entries: BTreeMap<String, Entry>,
}

impl MemoryState {
    fn snapshot(&self, prefix: &str) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for (key, entry) in self.entries.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            snapshot.revision = snapshot.revision.max(entry.mod_revision);
            if let Some(value) = &entry.value {
                snapshot.kvs.push(KeyValue {
                    key: key.clone(),
                    value: value.clone(),
                    mod_revision: entry.mod_revision,
                });
            }
        }
        snapshot
    }

    fn holds(&self, compare: &Compare) -> bool {
        match compare {
            Compare::PrefixUnchanged { prefix, revision } => {
                self.snapshot(prefix).revision <= *revision
            },
            Compare::KeyAbsent { key } => {
                self.entries.get(key).map_or(true, |entry| entry.value.is_none())
            },
        }
    }

    fn apply_put(&mut self, key: &str, value: String) -> WatchEvent {
        self.revision += 1;
        self.entries.insert(
            key.to_string(),
            Entry { value: Some(value.clone()), mod_revision: self.revision },
        );
        WatchEvent {
            kind: EventKind::Put,
            key: key.to_string(),
            value: Some(value),
            revision: self.revision,
        }
    }

    fn apply_delete(&mut self, key: &str) -> Option<WatchEvent> {
        let entry = self.entries.get_mut(key)?;
        entry.value.as_ref()?;
        self.revision += 1;
        entry.value = None;
        entry.mod_revision = self.revision;
        Some(WatchEvent {
            kind: EventKind::Delete,
            key: key.to_string(),
            value: None,
            revision: self.revision,
        })
    }
}

struct Shared {
    state: Mutex<MemoryState>,
    feed: broadcast::Sender<WatchEvent>,
}

impl Shared {
    /// Subscribe and snapshot atomically so no event falls between the two.
    fn subscribe(&self, prefix: &str) -> (broadcast::Receiver<WatchEvent>, Snapshot) {
        let state = self.state.lock();
        (self.feed.subscribe(), state.snapshot(prefix))
    }

    fn publish(&self, events: Vec<WatchEvent>) {
        for event in events {
            // No receivers is fine: nobody is watching.
            let _ = self.feed.send(event);
        }
    }
}

/// Store kept entirely in process memory. Cloning shares the same data.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self { shared: Arc::new(Shared { state: Mutex::new(MemoryState::default()), feed }) }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<KeyValue>> {
        let state = self.shared.state.lock();
        Ok(state.entries.get(key).and_then(|entry| {
            entry.value.as_ref().map(|value| KeyValue {
                key: key.to_string(),
                value: value.clone(),
                mod_revision: entry.mod_revision,
            })
        }))
    }

    async fn get_prefix(&self, prefix: &str) -> StoreResult<Snapshot> {
        Ok(self.shared.state.lock().snapshot(prefix))
    }

    async fn put(&self, key: &str, value: String) -> StoreResult<i64> {
        let mut state = self.shared.state.lock();
        let event = state.apply_put(key, value);
        let revision = event.revision;
        self.shared.publish(vec![event]);
        Ok(revision)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut state = self.shared.state.lock();
        match state.apply_delete(key) {
            Some(event) => {
                self.shared.publish(vec![event]);
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn txn(&self, txn: Txn) -> StoreResult<bool> {
        let mut state = self.shared.state.lock();
        if !txn.compares.iter().all(|compare| state.holds(compare)) {
            return Ok(false);
        }
        let mut events = Vec::with_capacity(txn.ops.len());
        for op in txn.ops {
            match op {
                Op::Put { key, value } => events.push(state.apply_put(&key, value)),
                Op::Delete { key } => events.extend(state.apply_delete(&key)),
            }
        }
        self.shared.publish(events);
        Ok(true)
    }

    async fn watch(&self, prefix: &str) -> StoreResult<WatchStream> {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let cancel = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let prefix = prefix.to_string();
        let (feed, snapshot) = shared.subscribe(&prefix);

        tokio::spawn(run_feed(shared, prefix, feed, snapshot, tx, cancel.clone()));
        Ok(WatchStream::new(rx, cancel))
    }
}

async fn run_feed(
    shared: Arc<Shared>,
    prefix: String,
    mut feed: broadcast::Receiver<WatchEvent>,
    snapshot: Snapshot,
    tx: mpsc::Sender<WatchMessage>,
    cancel: CancellationToken,
) {
    if tx.send(WatchMessage::Resync(snapshot)).await.is_err() {
        return;
    }

    loop {
        let received = tokio::select! {
            () = cancel.cancelled() => return,
            received = feed.recv() => received,
        };

        let message = match received {
            Ok(event) if event.key.starts_with(&prefix) => WatchMessage::Event(event),
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(prefix = %prefix, missed, "Watch lagged behind, resyncing");
                let (resubscribed, snapshot) = shared.subscribe(&prefix);
                feed = resubscribed;
                WatchMessage::Resync(snapshot)
            },
            Err(broadcast::error::RecvError::Closed) => return,
        };

        if tx.send(message).await.is_err() {
            return;
        }
    }
}
