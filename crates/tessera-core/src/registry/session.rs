//! Runtime record of one connected edge gateway.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tessera_types::ServerMessage;

/// Public view of a live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub namespace: String,
    pub edge: String,
    /// Remote address, when the transport has one
    pub peer: Option<String>,
    pub connected_at: DateTime<Utc>,
    /// Most recent heartbeat from the agent, if any yet
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// Registry-side half of a session: the producer end of its outbound queue.
///
/// Dropping the handle closes the queue; the connection task drains what is
/// already queued and then ends. Cancelling ends it immediately.
#[derive(Debug)]
pub(crate) struct SessionHandle {
    pub(crate) info: SessionInfo,
    tx: mpsc::Sender<ServerMessage>,
    cancel: CancellationToken,
}

pub(crate) enum PushError {
    Full,
    Closed,
}

impl SessionHandle {
    pub(crate) fn new(
        info: SessionInfo,
        tx: mpsc::Sender<ServerMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self { info, tx, cancel }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.info.id
    }

    /// Non-blocking enqueue.
    pub(crate) fn push(&self, message: ServerMessage) -> Result<(), PushError> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }
}
