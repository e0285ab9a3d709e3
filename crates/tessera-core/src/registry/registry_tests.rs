#![allow(clippy::unwrap_used)]

use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};

use super::RegistryServer;
use crate::watch::Change;
use tessera_types::models::RegistryConfig;
use tessera_types::{AgentMessage, Edge, ProtocolError, Route, ServerMessage};

const WAIT: Duration = Duration::from_secs(5);

fn config() -> RegistryConfig {
    RegistryConfig {
        queue_capacity: 64,
        heartbeat_timeout_secs: 30,
        handshake_timeout_secs: 5,
        max_frame_bytes: 64 * 1024,
    }
}

fn edge(name: &str, cidr: &str) -> Edge {
    Edge::new("ns", name, format!("{name}.example:58423"), cidr)
}

struct Agent {
    framed: Framed<DuplexStream, LinesCodec>,
    session: JoinHandle<Result<(), ProtocolError>>,
}

impl Agent {
    fn connect_with_buffer(server: &RegistryServer, buffer: usize) -> Self {
        let (client, remote) = tokio::io::duplex(buffer);
        let server = server.clone();
        let session = tokio::spawn(async move { server.serve_connection(remote, None).await });
        Self { framed: Framed::new(client, LinesCodec::new()), session }
    }

    fn connect(server: &RegistryServer) -> Self {
        Self::connect_with_buffer(server, 64 * 1024)
    }

    /// Connect, say hello and consume the snapshot.
    async fn join(server: &RegistryServer, namespace: &str, edge: &str) -> (Self, ServerMessage) {
        let mut agent = Self::connect(server);
        agent.hello(namespace, edge).await;
        let snapshot = agent.recv().await;
        assert_eq!(snapshot.kind(), "snapshot");
        (agent, snapshot)
    }

    /// Like `join`, over a transport that only buffers `buffer` bytes each way.
    async fn join_with_buffer(
        server: &RegistryServer,
        namespace: &str,
        edge: &str,
        buffer: usize,
    ) -> Self {
        let mut agent = Self::connect_with_buffer(server, buffer);
        agent.hello(namespace, edge).await;
        assert_eq!(agent.recv().await.kind(), "snapshot");
        agent
    }

    /// Send heartbeats without reading the acks, giving up on a write once
    /// the transport backs up.
    async fn heartbeats_unread(&mut self, count: usize) {
        for _ in 0..count {
            let _ = tokio::time::timeout(
                Duration::from_millis(100),
                self.send(&AgentMessage::Heartbeat),
            )
            .await;
        }
    }

    /// Wait for the server to end the session while nothing is read.
    async fn stalled_outcome(self) -> Result<(), ProtocolError> {
        let Self { framed, session } = self;
        let outcome =
            tokio::time::timeout(WAIT, session).await.expect("session stayed open").unwrap();
        drop(framed);
        outcome
    }

    async fn send(&mut self, message: &AgentMessage) {
        self.framed.send(serde_json::to_string(message).unwrap()).await.unwrap();
    }

    async fn hello(&mut self, namespace: &str, edge: &str) {
        self.send(&AgentMessage::Hello { namespace: namespace.to_string(), edge: edge.to_string() })
            .await;
    }

    async fn recv(&mut self) -> ServerMessage {
        let line = tokio::time::timeout(WAIT, self.framed.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    /// Drain remaining frames and wait for the server to close the connection.
    async fn closed(mut self) -> Result<(), ProtocolError> {
        tokio::time::timeout(WAIT, async { while self.framed.next().await.is_some() {} })
            .await
            .expect("connection stayed open");
        tokio::time::timeout(WAIT, self.session).await.unwrap().unwrap()
    }
}

async fn wait_for_sessions(server: &RegistryServer, count: usize) {
    tokio::time::timeout(WAIT, async {
        while server.session_count() != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session count never settled");
}

#[tokio::test]
async fn test_snapshot_holds_exactly_existing_topology() {
    let server = RegistryServer::new(config());
    let e1 = edge("e1", "10.0.0.0/24");
    let e2 = edge("e2", "10.0.1.0/24");
    let r1 = Route::new("ns", "r1", "e2", "192.168.0.0/16");
    server.modify_edge("ns", &e1);
    server.modify_edge("ns", &e2);
    server.add_route("ns", &r1);
    server.modify_edge("elsewhere", &Edge::new("elsewhere", "x", "h:1", "10.0.0.0/24"));

    let (_agent, snapshot) = Agent::join(&server, "ns", "e1").await;
    let ServerMessage::Snapshot(topology) = snapshot else { unreachable!() };
    assert_eq!(topology.namespace, "ns");
    assert_eq!(topology.edges, vec![e1, e2]);
    assert_eq!(topology.routes, vec![r1]);
}

#[tokio::test]
async fn test_unknown_edge_is_rejected() {
    let server = RegistryServer::new(config());
    let mut agent = Agent::connect(&server);
    agent.hello("ns", "ghost").await;

    assert!(matches!(agent.recv().await, ServerMessage::Rejected { .. }));
    let result = agent.closed().await;
    assert!(matches!(result, Err(ProtocolError::UnknownEdge { .. })));
    assert_eq!(server.session_count(), 0);
}

#[tokio::test]
async fn test_first_frame_must_be_hello() {
    let server = RegistryServer::new(config());
    let mut agent = Agent::connect(&server);
    agent.send(&AgentMessage::Heartbeat).await;

    match agent.recv().await {
        ServerMessage::Rejected { reason } => assert!(reason.contains("heartbeat")),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(
        agent.closed().await,
        Err(ProtocolError::HandshakeExpected { got: "heartbeat".to_string() })
    );
}

#[tokio::test]
async fn test_malformed_hello_is_rejected() {
    let server = RegistryServer::new(config());
    let mut agent = Agent::connect(&server);
    agent.framed.send("{\"kind\":\"hello\"".to_string()).await.unwrap();

    assert!(matches!(agent.recv().await, ServerMessage::Rejected { .. }));
    assert!(matches!(agent.closed().await, Err(ProtocolError::MalformedFrame { .. })));
}

#[tokio::test]
async fn test_handshake_timeout() {
    let server = RegistryServer::new(RegistryConfig { handshake_timeout_secs: 1, ..config() });
    let mut agent = Agent::connect(&server);

    assert!(matches!(agent.recv().await, ServerMessage::Rejected { .. }));
    assert_eq!(agent.closed().await, Err(ProtocolError::HandshakeTimeout { secs: 1 }));
}

#[tokio::test]
async fn test_edge_updates_arrive_in_commit_order() {
    let server = RegistryServer::new(config());
    server.modify_edge("ns", &edge("e1", "10.0.0.0/24"));
    server.modify_edge("ns", &edge("e2", "10.0.1.0/24"));
    let (mut agent, _) = Agent::join(&server, "ns", "e1").await;

    let v1 = Edge::new("ns", "e2", "198.51.100.1:58423", "10.0.1.0/24");
    let v2 = Edge::new("ns", "e2", "198.51.100.2:58423", "10.0.1.0/24");
    server.modify_edge("ns", &v1);
    server.modify_edge("ns", &v2);

    assert_eq!(agent.recv().await, ServerMessage::EdgeAnnounce { edge: v1 });
    assert_eq!(agent.recv().await, ServerMessage::EdgeAnnounce { edge: v2.clone() });
    assert_eq!(server.cached_topology("ns").edge("e2"), Some(&v2));
}

#[tokio::test]
async fn test_route_add_and_delete_reach_every_session_in_namespace() {
    let server = RegistryServer::new(config());
    server.modify_edge("ns", &edge("e1", "10.0.0.0/24"));
    server.modify_edge("ns", &edge("e2", "10.0.1.0/24"));
    let (mut a, _) = Agent::join(&server, "ns", "e1").await;
    let (mut b, _) = Agent::join(&server, "ns", "e2").await;

    let route = Route::new("ns", "r1", "e2", "192.168.0.0/16");
    server.apply_route_change(&Change::upsert(route.clone()));
    server.apply_route_change(&Change::delete(route.clone()));

    for agent in [&mut a, &mut b] {
        assert_eq!(agent.recv().await, ServerMessage::RouteAnnounce { route: route.clone() });
        assert_eq!(agent.recv().await, ServerMessage::route_withdraw(&route));
    }
    assert!(server.cached_topology("ns").routes.is_empty());
}

#[tokio::test]
async fn test_namespaces_are_isolated() {
    let server = RegistryServer::new(config());
    server.modify_edge("ns", &edge("e1", "10.0.0.0/24"));
    let (mut agent, _) = Agent::join(&server, "ns", "e1").await;

    let foreign = Edge::new("tenant-b", "e1", "h:1", "10.0.0.0/24");
    server.modify_edge("tenant-b", &foreign);
    server.del_edge("tenant-b", &foreign);
    let local = edge("e5", "10.0.5.0/24");
    server.modify_edge("ns", &local);

    assert_eq!(agent.recv().await, ServerMessage::EdgeAnnounce { edge: local });
}

#[tokio::test]
async fn test_heartbeat_is_acknowledged() {
    let server = RegistryServer::new(config());
    server.modify_edge("ns", &edge("e1", "10.0.0.0/24"));
    let (mut agent, _) = Agent::join(&server, "ns", "e1").await;

    agent.send(&AgentMessage::Heartbeat).await;
    assert_eq!(agent.recv().await, ServerMessage::HeartbeatAck);
}

#[tokio::test]
async fn test_missed_heartbeat_disconnects() {
    let server = RegistryServer::new(RegistryConfig { heartbeat_timeout_secs: 1, ..config() });
    server.modify_edge("ns", &edge("e1", "10.0.0.0/24"));
    let (agent, _) = Agent::join(&server, "ns", "e1").await;

    assert_eq!(agent.closed().await, Err(ProtocolError::HeartbeatTimeout { secs: 1 }));
    assert_eq!(server.session_count(), 0);
}

#[tokio::test]
async fn test_unread_acks_still_hit_heartbeat_deadline() {
    let server = RegistryServer::new(RegistryConfig { heartbeat_timeout_secs: 1, ..config() });
    server.modify_edge("ns", &edge("e1", "10.0.0.0/24"));
    let mut agent = Agent::join_with_buffer(&server, "ns", "e1", 64).await;

    agent.heartbeats_unread(8).await;

    assert_eq!(agent.stalled_outcome().await, Err(ProtocolError::HeartbeatTimeout { secs: 1 }));
    assert_eq!(server.session_count(), 0);
}

#[tokio::test]
async fn test_shutdown_ends_session_blocked_on_ack() {
    let server = RegistryServer::new(config());
    server.modify_edge("ns", &edge("e1", "10.0.0.0/24"));
    let mut agent = Agent::join_with_buffer(&server, "ns", "e1", 64).await;

    agent.heartbeats_unread(8).await;
    server.shutdown();

    assert_eq!(agent.stalled_outcome().await, Ok(()));
    assert_eq!(server.session_count(), 0);
}

#[tokio::test]
async fn test_unread_pushes_still_hit_heartbeat_deadline() {
    let server = RegistryServer::new(RegistryConfig { heartbeat_timeout_secs: 1, ..config() });
    server.modify_edge("ns", &edge("e1", "10.0.0.0/24"));
    let agent = Agent::join_with_buffer(&server, "ns", "e1", 64).await;

    // Well under the queue capacity, so nothing gets evicted.
    for i in 0..16u8 {
        let update = Edge::new("ns", "e2", format!("198.51.100.{i}:58423"), "10.0.1.0/24");
        server.modify_edge("ns", &update);
    }

    assert_eq!(agent.stalled_outcome().await, Err(ProtocolError::HeartbeatTimeout { secs: 1 }));
    assert_eq!(server.session_count(), 0);
}

#[tokio::test]
async fn test_heartbeat_is_stamped_on_session() {
    let server = RegistryServer::new(config());
    server.modify_edge("ns", &edge("e1", "10.0.0.0/24"));
    let (mut agent, _) = Agent::join(&server, "ns", "e1").await;
    assert_eq!(server.sessions()[0].last_heartbeat, None);

    agent.send(&AgentMessage::Heartbeat).await;
    assert_eq!(agent.recv().await, ServerMessage::HeartbeatAck);

    let stamped = server.sessions()[0].last_heartbeat.expect("heartbeat not recorded");
    assert!(stamped >= server.sessions()[0].connected_at);
}

#[tokio::test]
async fn test_reconnect_gets_fresh_snapshot_without_replay() {
    let server = RegistryServer::new(config());
    let e1 = edge("e1", "10.0.0.0/24");
    let e2 = edge("e2", "10.0.1.0/24");
    server.modify_edge("ns", &e1);
    server.modify_edge("ns", &e2);
    let (agent, _) = Agent::join(&server, "ns", "e1").await;
    drop(agent);
    wait_for_sessions(&server, 0).await;

    // Missed while disconnected.
    server.del_edge("ns", &e2);
    let e3 = edge("e3", "10.0.3.0/24");
    server.modify_edge("ns", &e3);

    let (mut agent, snapshot) = Agent::join(&server, "ns", "e1").await;
    let ServerMessage::Snapshot(topology) = snapshot else { unreachable!() };
    assert_eq!(topology.edges, vec![e1, e3]);

    // The next frame is live traffic, not a replay of what was missed.
    agent.send(&AgentMessage::Heartbeat).await;
    assert_eq!(agent.recv().await, ServerMessage::HeartbeatAck);
}

#[tokio::test]
async fn test_deleting_own_edge_withdraws_then_closes() {
    let server = RegistryServer::new(config());
    let e1 = edge("e1", "10.0.0.0/24");
    server.modify_edge("ns", &e1);
    server.modify_edge("ns", &edge("e2", "10.0.1.0/24"));
    let (mut own, _) = Agent::join(&server, "ns", "e1").await;
    let (mut peer, _) = Agent::join(&server, "ns", "e2").await;

    server.apply_edge_change(&Change::delete(e1.clone()));

    assert_eq!(own.recv().await, ServerMessage::edge_withdraw(&e1));
    assert_eq!(own.closed().await, Ok(()));
    assert_eq!(peer.recv().await, ServerMessage::edge_withdraw(&e1));
    assert_eq!(server.online_edges("ns"), vec!["e2"]);
}

#[tokio::test]
async fn test_second_session_replaces_first() {
    let server = RegistryServer::new(config());
    server.modify_edge("ns", &edge("e1", "10.0.0.0/24"));
    let (first, _) = Agent::join(&server, "ns", "e1").await;
    let (mut second, _) = Agent::join(&server, "ns", "e1").await;

    assert_eq!(first.closed().await, Ok(()));
    assert_eq!(server.session_count(), 1);

    let e2 = edge("e2", "10.0.1.0/24");
    server.modify_edge("ns", &e2);
    assert_eq!(second.recv().await, ServerMessage::EdgeAnnounce { edge: e2 });
}

#[tokio::test]
async fn test_slow_session_is_evicted_without_blocking_others() {
    let server = RegistryServer::new(RegistryConfig { queue_capacity: 4, ..config() });
    server.modify_edge("ns", &edge("fast", "10.0.0.0/24"));
    server.modify_edge("ns", &edge("slow", "10.0.1.0/24"));
    let (mut fast, _) = Agent::join(&server, "ns", "fast").await;

    // Tiny transport buffer and no reads: the slow session's queue backs up.
    let mut slow = Agent::connect_with_buffer(&server, 256);
    slow.hello("ns", "slow").await;
    assert_eq!(slow.recv().await.kind(), "snapshot");

    for i in 0..32u8 {
        let update = Edge::new("ns", "fast", format!("198.51.100.{i}:58423"), "10.0.0.0/24");
        server.modify_edge("ns", &update);
        assert_eq!(fast.recv().await, ServerMessage::EdgeAnnounce { edge: update });
    }

    assert_eq!(slow.closed().await, Ok(()));
    assert_eq!(server.online_edges("ns"), vec!["fast"]);
}

#[tokio::test]
async fn test_dangling_route_is_delivered_once_listener_connects() {
    let server = RegistryServer::new(config());
    let route = Route::new("ns", "r1", "late", "192.168.0.0/16");
    server.add_route("ns", &route);

    let late = edge("late", "10.0.9.0/24");
    server.modify_edge("ns", &late);
    let (_agent, snapshot) = Agent::join(&server, "ns", "late").await;
    let ServerMessage::Snapshot(topology) = snapshot else { unreachable!() };
    assert_eq!(topology.routes, vec![route]);
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let server = RegistryServer::new(config());
    server.modify_edge("ns", &edge("e1", "10.0.0.0/24"));
    let (agent, _) = Agent::join(&server, "ns", "e1").await;

    let sessions = server.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!((sessions[0].namespace.as_str(), sessions[0].edge.as_str()), ("ns", "e1"));

    server.shutdown();
    assert_eq!(agent.closed().await, Ok(()));
    assert_eq!(server.session_count(), 0);
}
