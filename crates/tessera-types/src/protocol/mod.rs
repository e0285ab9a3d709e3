//! Registry wire protocol between the controller and edge gateway agents.
//!
//! Each frame is one JSON object on its own line, tagged by `kind`. An agent
//! opens the connection with [`AgentMessage::Hello`], receives exactly one
//! [`ServerMessage::Snapshot`], then an ordered stream of announce/withdraw
//! messages. Agents send [`AgentMessage::Heartbeat`] periodically.
//!
//! ```text
//! agent                          controller
//!   │ ── hello{ns, edge} ─────────▶ │
//!   │ ◀──────────── snapshot ────── │
//!   │ ◀──── edge_announce/... ───── │
//!   │ ── heartbeat ───────────────▶ │
//!   │ ◀──────── heartbeat_ack ───── │
//! ```

use serde::{Deserialize, Serialize};

use crate::models::{Edge, NamespaceTopology, Route};

/// Frames sent by an edge gateway agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentMessage {
    /// Identity handshake; must be the first frame
    Hello { namespace: String, edge: String },
    /// Liveness signal
    Heartbeat,
}

impl AgentMessage {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Heartbeat => "heartbeat",
        }
    }
}

/// Frames pushed by the controller to a connected agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full namespace state; always the first message of a session
    Snapshot(NamespaceTopology),
    /// An edge appeared or changed
    EdgeAnnounce { edge: Edge },
    /// An edge was removed
    EdgeWithdraw { name: String, cidr: String },
    /// A route appeared or changed
    RouteAnnounce { route: Route },
    /// A route was removed
    RouteWithdraw { name: String, cidr: String },
    /// Reply to a heartbeat
    HeartbeatAck,
    /// Handshake refused; the connection is closed after this frame
    Rejected { reason: String },
}

impl ServerMessage {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "snapshot",
            Self::EdgeAnnounce { .. } => "edge_announce",
            Self::EdgeWithdraw { .. } => "edge_withdraw",
            Self::RouteAnnounce { .. } => "route_announce",
            Self::RouteWithdraw { .. } => "route_withdraw",
            Self::HeartbeatAck => "heartbeat_ack",
            Self::Rejected { .. } => "rejected",
        }
    }

    pub fn edge_withdraw(edge: &Edge) -> Self {
        Self::EdgeWithdraw { name: edge.name.clone(), cidr: edge.cidr.clone() }
    }

    pub fn route_withdraw(route: &Route) -> Self {
        Self::RouteWithdraw { name: route.name.clone(), cidr: route.cidr.clone() }
    }
}
