//! Consistent store client.
//!
//! A thin abstraction over a linearizable key-value store with prefix watch.
//! Two implementations share the same semantics:
//!
//! - [`PostgresStore`] - production backend, shared by every controller and admin process
//! - [`MemoryStore`] - in-process backend for tests and single-process runs
//!
//! Watch streams start with a [`WatchMessage::Resync`] carrying the current state of
//! the prefix, then deliver [`WatchMessage::Event`]s in commit order. Whenever the
//! underlying change feed is lost the stream re-subscribes on its own and emits a
//! fresh `Resync`; consumers must reconcile against it rather than assume they saw
//! every intermediate event.

mod backoff;
pub mod keys;
mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Buffered watch messages per subscription before the feed task waits on the consumer.
pub(crate) const WATCH_BUFFER: usize = 1024;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Change feed lost: {0}")]
    FeedLost(String),
}

/// Map sqlx error to store error.
pub(crate) fn map_sqlx_err(err: sqlx::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    pub mod_revision: i64,
}

/// Live keys under a prefix, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Highest modification revision under the prefix, deletions included.
    /// Doubles as the compare token for [`Compare::PrefixUnchanged`].
    pub revision: i64,
    pub kvs: Vec<KeyValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Put,
    Delete,
}

/// One committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub key: String,
    /// Present for puts. May be absent on the wire when the value did not fit in
    /// a notification; the watcher then re-reads the key.
    #[serde(default)]
    pub value: Option<String>,
    pub revision: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchMessage {
    /// Complete current state of the watched prefix
    Resync(Snapshot),
    Event(WatchEvent),
}

/// Guard evaluated atomically with a [`Txn`]'s writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compare {
    /// Nothing under `prefix` was put or deleted after `revision`.
    PrefixUnchanged { prefix: String, revision: i64 },
    /// `key` has no live value.
    KeyAbsent { key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Put { key: String, value: String },
    Delete { key: String },
}

/// Compare-and-write transaction: `ops` commit only if every `compare` holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Txn {
    pub compares: Vec<Compare>,
    pub ops: Vec<Op>,
}

impl Txn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(mut self, compare: Compare) -> Self {
        self.compares.push(compare);
        self
    }

    pub fn put(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(Op::Put { key: key.into(), value: value.into() });
        self
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.push(Op::Delete { key: key.into() });
        self
    }
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<KeyValue>>;

    async fn get_prefix(&self, prefix: &str) -> StoreResult<Snapshot>;

    /// Returns the revision the write committed at.
    async fn put(&self, key: &str, value: String) -> StoreResult<i64>;

    /// Returns whether a live key was removed. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Returns whether the transaction's guards held and its ops committed.
    async fn txn(&self, txn: Txn) -> StoreResult<bool>;

    async fn watch(&self, prefix: &str) -> StoreResult<WatchStream>;
}

/// Owned subscription to a prefix. Dropping it stops the feed task.
pub struct WatchStream {
    rx: mpsc::Receiver<WatchMessage>,
    cancel: CancellationToken,
}

impl WatchStream {
    pub(crate) fn new(rx: mpsc::Receiver<WatchMessage>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Next message; `None` only after cancellation.
    pub async fn next(&mut self) -> Option<WatchMessage> {
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for WatchStream {
    type Item = WatchMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for WatchStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
