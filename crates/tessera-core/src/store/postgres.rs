//! PostgreSQL implementation of the consistent store.
//!
//! Linearizability comes from a single advisory transaction lock taken by every
//! write: revisions are drawn after the lock is held, so revision order equals
//! commit order. Change notifications are emitted with `pg_notify` inside the
//! writing transaction and therefore delivered on commit, in revision order.

use async_trait::async_trait;
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::backoff::Backoff;
use super::{
    map_sqlx_err, Compare, EventKind, KeyValue, KvStore, Op, Snapshot, StoreError, StoreResult,
    Txn, WatchEvent, WatchMessage, WatchStream, WATCH_BUFFER,
};
use tessera_types::models::StoreConfig;

/// Advisory lock serializing all writes ("TESSERA" in ASCII).
const WRITE_LOCK_ID: i64 = 0x0054_4553_5345_5241;

/// NOTIFY payloads are capped at 8000 bytes; larger values are re-read by watchers.
const NOTIFY_PAYLOAD_LIMIT: usize = 7900;

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    /// Database connection pool.
    pool: PgPool,
    /// LISTEN/NOTIFY channel for change events.
    channel: String,
}

impl PostgresStore {
    /// Create store with existing pool.
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self { pool, channel: channel.into() }
    }

    /// Connect to database and create store.
    pub async fn connect(config: &StoreConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(300))
            .connect(&config.database_url)
            .await?;
        Ok(Self::new(pool, config.notify_channel.clone()))
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| StoreError::Database(err.to_string()))
    }

    async fn begin_write(&self) -> StoreResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(WRITE_LOCK_ID)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        Ok(tx)
    }

    async fn notify(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        event: &WatchEvent,
    ) -> StoreResult<()> {
        let mut payload = serde_json::to_string(event)?;
        if payload.len() > NOTIFY_PAYLOAD_LIMIT {
            let trimmed = WatchEvent { value: None, ..event.clone() };
            payload = serde_json::to_string(&trimmed)?;
        }
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(payload)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn apply_put(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        key: &str,
        value: String,
    ) -> StoreResult<i64> {
        let revision: i64 = sqlx::query_scalar("SELECT nextval('kv_revision')")
            .fetch_one(&mut **tx)
            .await
            .map_err(map_sqlx_err)?;
        sqlx::query(
            r#"INSERT INTO kv (key, value, mod_revision, deleted, updated_at)
               VALUES ($1, $2, $3, FALSE, NOW())
               ON CONFLICT (key) DO UPDATE
               SET value = EXCLUDED.value, mod_revision = EXCLUDED.mod_revision,
                   deleted = FALSE, updated_at = NOW()"#,
        )
        .bind(key)
        .bind(&value)
        .bind(revision)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;

        let event =
            WatchEvent { kind: EventKind::Put, key: key.to_string(), value: Some(value), revision };
        self.notify(tx, &event).await?;
        Ok(revision)
    }

    async fn apply_delete(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        key: &str,
    ) -> StoreResult<bool> {
        let live = sqlx::query("SELECT 1 FROM kv WHERE key = $1 AND NOT deleted")
            .bind(key)
            .fetch_optional(&mut **tx)
            .await
            .map_err(map_sqlx_err)?;
        if live.is_none() {
            return Ok(false);
        }

        let revision: i64 = sqlx::query_scalar("SELECT nextval('kv_revision')")
            .fetch_one(&mut **tx)
            .await
            .map_err(map_sqlx_err)?;
        sqlx::query(
            r#"UPDATE kv SET value = NULL, deleted = TRUE, mod_revision = $2, updated_at = NOW()
               WHERE key = $1"#,
        )
        .bind(key)
        .bind(revision)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;

        let event = WatchEvent { kind: EventKind::Delete, key: key.to_string(), value: None, revision };
        self.notify(tx, &event).await?;
        Ok(true)
    }

    async fn holds(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        compare: &Compare,
    ) -> StoreResult<bool> {
        match compare {
            Compare::PrefixUnchanged { prefix, revision } => {
                let current: i64 = sqlx::query_scalar(
                    "SELECT COALESCE(MAX(mod_revision), 0) FROM kv WHERE starts_with(key, $1)",
                )
                .bind(prefix)
                .fetch_one(&mut **tx)
                .await
                .map_err(map_sqlx_err)?;
                Ok(current <= *revision)
            },
            Compare::KeyAbsent { key } => {
                let live = sqlx::query("SELECT 1 FROM kv WHERE key = $1 AND NOT deleted")
                    .bind(key)
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(map_sqlx_err)?;
                Ok(live.is_none())
            },
        }
    }

    /// One LISTEN connection's lifetime: resync, then stream until the feed is lost.
    ///
    /// Returns `Ok(())` when the watch was cancelled or its consumer went away.
    async fn watch_once(
        &self,
        prefix: &str,
        tx: &mpsc::Sender<WatchMessage>,
        cancel: &CancellationToken,
        backoff: &mut Backoff,
    ) -> StoreResult<()> {
        let mut listener = PgListener::connect_with(&self.pool).await.map_err(map_sqlx_err)?;
        listener.listen(&self.channel).await.map_err(map_sqlx_err)?;

        // LISTEN precedes the read, so nothing committed after it can be missed.
        let snapshot = self.get_prefix(prefix).await?;
        let mut floor = snapshot.revision;
        if tx.send(WatchMessage::Resync(snapshot)).await.is_err() {
            return Ok(());
        }
        backoff.reset();

        loop {
            let notification = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                received = listener.try_recv() => received.map_err(map_sqlx_err)?,
            };
            let Some(notification) = notification else {
                return Err(StoreError::FeedLost("listener connection closed".to_string()));
            };

            let mut event: WatchEvent = match serde_json::from_str(notification.payload()) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring undecodable change notification");
                    continue;
                },
            };
            if !event.key.starts_with(prefix) || event.revision <= floor {
                continue;
            }
            floor = event.revision;

            if event.kind == EventKind::Put && event.value.is_none() {
                match self.get(&event.key).await? {
                    Some(kv) if kv.mod_revision == event.revision => event.value = Some(kv.value),
                    // Superseded; the newer change has its own notification.
                    _ => continue,
                }
            }

            if tx.send(WatchMessage::Event(event)).await.is_err() {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl KvStore for PostgresStore {
    async fn get(&self, key: &str) -> StoreResult<Option<KeyValue>> {
        let row = sqlx::query("SELECT key, value, mod_revision FROM kv WHERE key = $1 AND NOT deleted")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(row.map(|row| KeyValue {
            key: row.get("key"),
            value: row.get("value"),
            mod_revision: row.get("mod_revision"),
        }))
    }

    async fn get_prefix(&self, prefix: &str) -> StoreResult<Snapshot> {
        let rows = sqlx::query(
            r#"SELECT key, value, mod_revision, deleted FROM kv
               WHERE starts_with(key, $1) ORDER BY key COLLATE "C""#,
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut snapshot = Snapshot::default();
        for row in rows {
            let mod_revision: i64 = row.get("mod_revision");
            snapshot.revision = snapshot.revision.max(mod_revision);
            if row.get::<bool, _>("deleted") {
                continue;
            }
            let value: Option<String> = row.get("value");
            snapshot.kvs.push(KeyValue {
                key: row.get("key"),
                value: value.unwrap_or_default(),
                mod_revision,
            });
        }
        Ok(snapshot)
    }

    async fn put(&self, key: &str, value: String) -> StoreResult<i64> {
        let mut tx = self.begin_write().await?;
        let revision = self.apply_put(&mut tx, key, value).await?;
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(revision)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut tx = self.begin_write().await?;
        let removed = self.apply_delete(&mut tx, key).await?;
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(removed)
    }

    async fn txn(&self, txn: Txn) -> StoreResult<bool> {
        let mut tx = self.begin_write().await?;
        for compare in &txn.compares {
            if !self.holds(&mut tx, compare).await? {
                tx.rollback().await.map_err(map_sqlx_err)?;
                return Ok(false);
            }
        }
        for op in txn.ops {
            match op {
                Op::Put { key, value } => {
                    self.apply_put(&mut tx, &key, value).await?;
                },
                Op::Delete { key } => {
                    self.apply_delete(&mut tx, &key).await?;
                },
            }
        }
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(true)
    }

    async fn watch(&self, prefix: &str) -> StoreResult<WatchStream> {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let cancel = CancellationToken::new();
        let store = self.clone();
        let prefix = prefix.to_string();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let mut backoff = Backoff::default();
            while !task_cancel.is_cancelled() && !tx.is_closed() {
                let Err(e) = store.watch_once(&prefix, &tx, &task_cancel, &mut backoff).await
                else {
                    break;
                };
                let delay = backoff.next_delay();
                tracing::warn!(
                    prefix = %prefix,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Store watch interrupted, resubscribing"
                );
                tokio::select! {
                    () = task_cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {},
                }
            }
            tracing::debug!(prefix = %prefix, "Store watch stopped");
        });

        Ok(WatchStream::new(rx, cancel))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const WAIT: Duration = Duration::from_secs(10);

    /// Store on a private notify channel, plus a key prefix no other test touches.
    async fn test_store() -> (PostgresStore, String) {
        let url = std::env::var("TESSERA_DATABASE_URL").expect("TESSERA_DATABASE_URL must be set");
        let pool = PgPoolOptions::new().max_connections(4).connect(&url).await.unwrap();
        let id = Uuid::new_v4().simple().to_string();
        let store = PostgresStore::new(pool, format!("tessera_test_{id}"));
        store.run_migrations().await.unwrap();
        (store, format!("/test/{id}/"))
    }

    async fn next(watch: &mut WatchStream) -> WatchMessage {
        tokio::time::timeout(WAIT, watch.next()).await.expect("watch stalled").unwrap()
    }

    #[tokio::test]
    #[ignore = "requires TESSERA_DATABASE_URL"]
    async fn test_watch_skips_changes_covered_by_resync() {
        let (store, prefix) = test_store().await;
        store.put(&format!("{prefix}a"), "v1".to_string()).await.unwrap();

        let mut watch = store.watch(&prefix).await.unwrap();
        let WatchMessage::Resync(snapshot) = next(&mut watch).await else {
            panic!("expected resync")
        };
        assert_eq!(snapshot.kvs.len(), 1);

        store.put(&format!("{prefix}a"), "v2".to_string()).await.unwrap();
        store.put("/elsewhere/x", "ignored".to_string()).await.unwrap();
        store.delete(&format!("{prefix}a")).await.unwrap();

        let WatchMessage::Event(put) = next(&mut watch).await else { panic!("expected put") };
        assert!(put.revision > snapshot.revision);
        assert_eq!(put.value.as_deref(), Some("v2"));
        let WatchMessage::Event(del) = next(&mut watch).await else { panic!("expected delete") };
        assert_eq!(del.kind, EventKind::Delete);
        assert_eq!(del.key, format!("{prefix}a"));
    }

    #[tokio::test]
    #[ignore = "requires TESSERA_DATABASE_URL"]
    async fn test_oversized_value_is_reread() {
        let (store, prefix) = test_store().await;
        let mut watch = store.watch(&prefix).await.unwrap();
        assert!(matches!(next(&mut watch).await, WatchMessage::Resync(_)));

        let big = "x".repeat(NOTIFY_PAYLOAD_LIMIT * 2);
        store.put(&format!("{prefix}big"), big.clone()).await.unwrap();

        let WatchMessage::Event(event) = next(&mut watch).await else { panic!("expected put") };
        assert_eq!(event.value.as_deref(), Some(big.as_str()));
    }

    #[tokio::test]
    #[ignore = "requires TESSERA_DATABASE_URL"]
    async fn test_lost_listener_resubscribes_with_resync() {
        let (store, prefix) = test_store().await;
        let mut watch = store.watch(&prefix).await.unwrap();
        assert!(matches!(next(&mut watch).await, WatchMessage::Resync(_)));

        let terminated: Vec<bool> = sqlx::query_scalar(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity
             WHERE query LIKE $1 AND pid <> pg_backend_pid()",
        )
        .bind(format!("%LISTEN%{}%", store.channel))
        .fetch_all(&store.pool)
        .await
        .unwrap();
        assert!(!terminated.is_empty(), "listener connection not found");

        store.put(&format!("{prefix}while-down"), "v".to_string()).await.unwrap();

        // The write lands either in the fresh snapshot or right after it.
        let snapshot = loop {
            if let WatchMessage::Resync(snapshot) = next(&mut watch).await {
                break snapshot;
            }
        };
        if snapshot.kvs.iter().all(|kv| !kv.key.ends_with("while-down")) {
            let WatchMessage::Event(event) = next(&mut watch).await else { panic!("expected put") };
            assert!(event.key.ends_with("while-down"));
        }

        store.put(&format!("{prefix}after"), "v".to_string()).await.unwrap();
        let event = loop {
            if let WatchMessage::Event(event) = next(&mut watch).await {
                if event.key.ends_with("after") {
                    break event;
                }
            }
        };
        assert!(event.revision > snapshot.revision);
    }
}
