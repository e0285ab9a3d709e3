//! Per-connection protocol loop.
//!
//! `Connected` (hello accepted) -> `Synced` (snapshot written) -> steady state
//! -> disconnected. There is no resume: a reconnect starts over with a fresh
//! snapshot.

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{sleep, timeout, Instant, Sleep};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use super::{Registration, RegistryServer};
use tessera_types::{validate_name, AgentMessage, ProtocolError, ServerMessage};

type AgentFramed<S> = Framed<S, LinesCodec>;

fn frame_error(e: LinesCodecError) -> ProtocolError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            ProtocolError::MalformedFrame { message: "frame too long".to_string() }
        },
        LinesCodecError::Io(e) => ProtocolError::Transport { message: e.to_string() },
    }
}

fn decode(line: &str) -> Result<AgentMessage, ProtocolError> {
    serde_json::from_str(line).map_err(|e| ProtocolError::MalformedFrame { message: e.to_string() })
}

async fn send<S>(framed: &mut AgentFramed<S>, message: &ServerMessage) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = serde_json::to_string(message)
        .map_err(|e| ProtocolError::Transport { message: e.to_string() })?;
    framed.send(line).await.map_err(frame_error)
}

/// Write one frame unless the session is cancelled or its heartbeat deadline
/// passes first. `Ok(false)` means cancelled.
async fn deliver<S>(
    framed: &mut AgentFramed<S>,
    message: &ServerMessage,
    cancel: &CancellationToken,
    deadline: Pin<&mut Sleep>,
    heartbeat_timeout: Duration,
) -> Result<bool, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Ok(false),
        () = deadline => {
            Err(ProtocolError::HeartbeatTimeout { secs: heartbeat_timeout.as_secs() })
        },
        sent = send(framed, message) => sent.map(|()| true),
    }
}

/// Best-effort refusal before closing.
async fn reject<S>(framed: &mut AgentFramed<S>, error: &ProtocolError)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let message = ServerMessage::Rejected { reason: error.to_string() };
    if let Err(e) = send(framed, &message).await {
        tracing::debug!(error = %e, "Could not deliver rejection");
    }
}

/// Wait for the identity handshake.
async fn handshake<S>(
    framed: &mut AgentFramed<S>,
    server: &RegistryServer,
) -> Result<(String, String), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let limit = server.config().handshake_timeout();
    let frame = match timeout(limit, framed.next()).await {
        Ok(frame) => frame,
        Err(_) => return Err(ProtocolError::HandshakeTimeout { secs: limit.as_secs() }),
    };
    let line = match frame {
        Some(line) => line.map_err(frame_error)?,
        None => {
            return Err(ProtocolError::Transport {
                message: "closed before handshake".to_string(),
            })
        },
    };
    match decode(&line)? {
        AgentMessage::Hello { namespace, edge } => {
            validate_name("namespace", &namespace)
                .and_then(|()| validate_name("edge", &edge))
                .map_err(|e| ProtocolError::MalformedFrame { message: e.to_string() })?;
            Ok((namespace, edge))
        },
        other => Err(ProtocolError::HandshakeExpected { got: other.kind().to_string() }),
    }
}

pub(super) async fn run<S>(
    server: &RegistryServer,
    io: S,
    peer: Option<SocketAddr>,
) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(io, LinesCodec::new_with_max_length(server.config().max_frame_bytes));

    let registration = match handshake(&mut framed, server).await {
        Ok((namespace, edge)) => server.register(&namespace, &edge, peer),
        Err(e) => Err(e),
    };
    let registration = match registration {
        Ok(registration) => registration,
        Err(e) => {
            tracing::warn!(peer = ?peer, error = %e, "Agent handshake failed");
            if !matches!(e, ProtocolError::Transport { .. }) {
                reject(&mut framed, &e).await;
            }
            return Err(e);
        },
    };

    let info = registration.info.clone();
    tracing::info!(
        namespace = %info.namespace,
        edge = %info.edge,
        session_id = %info.id,
        peer = ?peer,
        "Agent session established"
    );

    let result = steady_state(server, &mut framed, registration).await;
    server.unregister(&info);

    match &result {
        Ok(()) => tracing::info!(
            namespace = %info.namespace,
            edge = %info.edge,
            session_id = %info.id,
            "Agent session closed"
        ),
        // The agent is expected to reconnect.
        Err(e) if e.is_retryable() => tracing::info!(
            namespace = %info.namespace,
            edge = %info.edge,
            session_id = %info.id,
            error = %e,
            "Agent session dropped"
        ),
        Err(e) => tracing::warn!(
            namespace = %info.namespace,
            edge = %info.edge,
            session_id = %info.id,
            error = %e,
            "Agent session dropped"
        ),
    }
    result
}

async fn steady_state<S>(
    server: &RegistryServer,
    framed: &mut AgentFramed<S>,
    registration: Registration,
) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Registration { info, mut rx, cancel } = registration;
    let heartbeat_timeout = server.config().heartbeat_timeout();
    let deadline = sleep(heartbeat_timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                tracing::debug!(session_id = %info.id, "Session cancelled");
                return Ok(());
            }

            outbound = rx.recv() => match outbound {
                Some(message) => {
                    // A stalled peer must not pin an evicted session.
                    let delivered =
                        deliver(framed, &message, &cancel, deadline.as_mut(), heartbeat_timeout)
                            .await?;
                    if !delivered {
                        return Ok(());
                    }
                    tracing::debug!(session_id = %info.id, kind = message.kind(), "Pushed to agent");
                },
                // Removed from the session table and fully drained.
                None => return Ok(()),
            },

            inbound = framed.next() => match inbound {
                Some(line) => match decode(&line.map_err(frame_error)?)? {
                    AgentMessage::Heartbeat => {
                        deadline.as_mut().reset(Instant::now() + heartbeat_timeout);
                        server.touch(&info);
                        let ack = ServerMessage::HeartbeatAck;
                        let delivered =
                            deliver(framed, &ack, &cancel, deadline.as_mut(), heartbeat_timeout)
                                .await?;
                        if !delivered {
                            return Ok(());
                        }
                    },
                    AgentMessage::Hello { .. } => {
                        tracing::debug!(session_id = %info.id, "Ignoring repeated hello");
                    },
                },
                None => return Ok(()),
            },

            () = &mut deadline => {
                return Err(ProtocolError::HeartbeatTimeout { secs: heartbeat_timeout.as_secs() });
            }
        }
    }
}
