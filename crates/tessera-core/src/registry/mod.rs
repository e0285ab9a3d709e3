//! Registry Server: edge gateway sessions, snapshot replay and incremental push.
//!
//! # Locking
//!
//! One mutex guards both the [`TopologyCache`] and the session table. Every
//! change callback updates the cache and enqueues to the affected sessions while
//! holding it, and a new session is registered and handed its snapshot under the
//! same lock. A snapshot therefore never contains half of an update, and no
//! incremental message can reach a session ahead of its snapshot.
//!
//! # Delivery
//!
//! Each session has a bounded FIFO queue. Enqueueing never blocks: a session
//! whose queue is full is evicted and its agent resyncs on reconnect. Messages
//! for one entity reach a session in the order the changes were committed.

mod connection;
mod session;
pub mod topology;

pub use session::SessionInfo;
pub use topology::TopologyCache;

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::watch::{Change, ChangeKind, ChangeSubscription};
use session::{PushError, SessionHandle};
use tessera_types::models::RegistryConfig;
use tessera_types::{Edge, NamespaceTopology, ProtocolError, Route, ServerMessage};

/// namespace -> edge name -> session
type SessionTable = HashMap<String, HashMap<String, SessionHandle>>;

#[derive(Default)]
struct RegistryState {
    topology: TopologyCache,
    sessions: SessionTable,
}

impl RegistryState {
    /// Enqueue to every session in `namespace`, evicting those that cannot keep up.
    fn broadcast(&mut self, namespace: &str, message: &ServerMessage) {
        let Some(sessions) = self.sessions.get_mut(namespace) else {
            return;
        };
        sessions.retain(|edge, session| match session.push(message.clone()) {
            Ok(()) => true,
            Err(PushError::Full) => {
                tracing::warn!(
                    namespace = %namespace,
                    edge = %edge,
                    session_id = %session.id(),
                    "Session queue full, evicting"
                );
                session.cancel();
                false
            },
            Err(PushError::Closed) => {
                tracing::debug!(namespace = %namespace, edge = %edge, "Dropping closed session");
                false
            },
        });
        if sessions.is_empty() {
            self.sessions.remove(namespace);
        }
        tracing::trace!(namespace = %namespace, kind = message.kind(), "Change pushed");
    }

    fn remove_session(&mut self, namespace: &str, edge: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.get_mut(namespace)?;
        let removed = sessions.remove(edge);
        if sessions.is_empty() {
            self.sessions.remove(namespace);
        }
        removed
    }
}

struct RegistryInner {
    config: RegistryConfig,
    state: Mutex<RegistryState>,
    /// Parent of every session's token
    shutdown: CancellationToken,
}

/// Shared registry handle; cloning is cheap.
#[derive(Clone)]
pub struct RegistryServer {
    inner: Arc<RegistryInner>,
}

impl RegistryServer {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                state: Mutex::new(RegistryState::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    // ===== Change callbacks =====

    /// Remove an edge and withdraw it from every session in its namespace.
    ///
    /// The edge's own session, if connected, receives the withdraw and is then closed.
    pub fn del_edge(&self, namespace: &str, edge: &Edge) {
        let mut state = self.inner.state.lock();
        state.topology.remove_edge(namespace, &edge.name);
        state.broadcast(namespace, &ServerMessage::edge_withdraw(edge));

        // Dropping the handle lets the connection flush the withdraw, then end.
        if let Some(own) = state.remove_session(namespace, &edge.name) {
            tracing::info!(
                namespace = %namespace,
                edge = %edge.name,
                session_id = %own.id(),
                "Edge deleted, closing its session"
            );
        }
    }

    /// Upsert an edge and announce it to every session in its namespace.
    pub fn modify_edge(&self, namespace: &str, edge: &Edge) {
        let mut state = self.inner.state.lock();
        state.topology.upsert_edge(edge.clone());
        state.broadcast(namespace, &ServerMessage::EdgeAnnounce { edge: edge.clone() });
    }

    pub fn add_route(&self, namespace: &str, route: &Route) {
        let mut state = self.inner.state.lock();
        state.topology.upsert_route(route.clone());
        state.broadcast(namespace, &ServerMessage::RouteAnnounce { route: route.clone() });
    }

    pub fn del_route(&self, namespace: &str, route: &Route) {
        let mut state = self.inner.state.lock();
        state.topology.remove_route(namespace, &route.name);
        state.broadcast(namespace, &ServerMessage::route_withdraw(route));
    }

    pub fn apply_edge_change(&self, change: &Change<Edge>) {
        match change.kind {
            ChangeKind::Upsert => self.modify_edge(&change.namespace, &change.entity),
            ChangeKind::Delete => self.del_edge(&change.namespace, &change.entity),
        }
    }

    pub fn apply_route_change(&self, change: &Change<Route>) {
        match change.kind {
            ChangeKind::Upsert => self.add_route(&change.namespace, &change.entity),
            ChangeKind::Delete => self.del_route(&change.namespace, &change.entity),
        }
    }

    /// Apply edge changes until the subscription or the registry shuts down.
    pub async fn follow_edges(&self, mut changes: ChangeSubscription<Edge>) {
        loop {
            let change = tokio::select! {
                () = self.inner.shutdown.cancelled() => break,
                change = changes.next() => change,
            };
            let Some(change) = change else { break };
            self.apply_edge_change(&change);
        }
        changes.cancel();
        tracing::debug!("Edge change follower stopped");
    }

    /// Apply route changes until the subscription or the registry shuts down.
    pub async fn follow_routes(&self, mut changes: ChangeSubscription<Route>) {
        loop {
            let change = tokio::select! {
                () = self.inner.shutdown.cancelled() => break,
                change = changes.next() => change,
            };
            let Some(change) = change else { break };
            self.apply_route_change(&change);
        }
        changes.cancel();
        tracing::debug!("Route change follower stopped");
    }

    // ===== Sessions =====

    /// Register a session and queue its snapshot, atomically with respect to callbacks.
    fn register(
        &self,
        namespace: &str,
        edge: &str,
        peer: Option<SocketAddr>,
    ) -> Result<Registration, ProtocolError> {
        let (tx, rx) = mpsc::channel(self.inner.config.queue_capacity.max(1));
        let cancel = self.inner.shutdown.child_token();
        let info = SessionInfo {
            id: Uuid::new_v4(),
            namespace: namespace.to_string(),
            edge: edge.to_string(),
            peer: peer.map(|p| p.to_string()),
            connected_at: Utc::now(),
            last_heartbeat: None,
        };

        let mut state = self.inner.state.lock();
        if !state.topology.has_edge(namespace, edge) {
            return Err(ProtocolError::UnknownEdge {
                namespace: namespace.to_string(),
                edge: edge.to_string(),
            });
        }
        let snapshot = ServerMessage::Snapshot(state.topology.snapshot(namespace));
        tx.try_send(snapshot).map_err(|e| ProtocolError::Transport { message: e.to_string() })?;

        let handle = SessionHandle::new(info.clone(), tx, cancel.clone());
        let previous = state
            .sessions
            .entry(namespace.to_string())
            .or_default()
            .insert(edge.to_string(), handle);
        if let Some(previous) = previous {
            tracing::info!(
                namespace = %namespace,
                edge = %edge,
                replaced = %previous.id(),
                "Replacing existing session"
            );
            previous.cancel();
        }

        Ok(Registration { info, rx, cancel })
    }

    /// Remove a session if it is still the registered one for its edge.
    fn unregister(&self, info: &SessionInfo) {
        let mut state = self.inner.state.lock();
        let current = state
            .sessions
            .get(&info.namespace)
            .and_then(|sessions| sessions.get(&info.edge))
            .map(SessionHandle::id);
        if current == Some(info.id) {
            state.remove_session(&info.namespace, &info.edge);
        }
    }

    /// Stamp a heartbeat on the session, if it is still the registered one.
    fn touch(&self, info: &SessionInfo) {
        let mut state = self.inner.state.lock();
        let current = state
            .sessions
            .get_mut(&info.namespace)
            .and_then(|sessions| sessions.get_mut(&info.edge))
            .filter(|session| session.id() == info.id);
        if let Some(session) = current {
            session.info.last_heartbeat = Some(Utc::now());
        }
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        let state = self.inner.state.lock();
        let mut sessions: Vec<SessionInfo> = state
            .sessions
            .values()
            .flat_map(|by_edge| by_edge.values().map(|s| s.info.clone()))
            .collect();
        sessions.sort_by(|a, b| (&a.namespace, &a.edge).cmp(&(&b.namespace, &b.edge)));
        sessions
    }

    pub fn session_count(&self) -> usize {
        self.inner.state.lock().sessions.values().map(HashMap::len).sum()
    }

    /// Names of edges in `namespace` with a live session, sorted.
    pub fn online_edges(&self, namespace: &str) -> Vec<String> {
        let state = self.inner.state.lock();
        let mut edges: Vec<String> = state
            .sessions
            .get(namespace)
            .map(|by_edge| by_edge.keys().cloned().collect())
            .unwrap_or_default();
        edges.sort();
        edges
    }

    /// What a session connecting to `namespace` right now would be replayed.
    pub fn cached_topology(&self, namespace: &str) -> NamespaceTopology {
        self.inner.state.lock().topology.snapshot(namespace)
    }

    // ===== Transport =====

    /// Accept agent connections until `shutdown` fires, then close every session.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "Registry listening for edge agents");
        }
        loop {
            let accepted = tokio::select! {
                () = shutdown.cancelled() => break,
                () = self.inner.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }
                    let server = self.clone();
                    tokio::spawn(async move {
                        // Outcome is logged inside.
                        let _ = server.serve_connection(stream, Some(peer)).await;
                    });
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept agent connection");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                },
            }
        }
        self.shutdown();
        tracing::info!("Registry stopped accepting agents");
    }

    /// Run one agent connection from handshake to disconnect.
    pub async fn serve_connection<S>(&self, io: S, peer: Option<SocketAddr>) -> Result<(), ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        connection::run(self, io, peer).await
    }

    /// Close every session and stop accepting.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

struct Registration {
    info: SessionInfo,
    rx: mpsc::Receiver<ServerMessage>,
    cancel: CancellationToken,
}

#[cfg(test)]
mod registry_tests;
