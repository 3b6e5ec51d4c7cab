//! Client connection to a session gateway.
//!
//! [`connect`] performs the handshake and returns a [`Session`] whose
//! [`SessionHandle`] is the explicit handle the workspace sends through.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use atelier_protocol::wire::{decode_server_event, encode_client_event};
use atelier_protocol::{
    ChatMessage, ClientEvent, FileTree, HandshakeRejection, ProjectView, ServerEvent, UserId,
    WireError,
};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::sync::{TreeSink, Workspace};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("handshake rejected: {0:?}")]
    Rejected(HandshakeRejection),
    #[error("connection closed during handshake")]
    ClosedDuringHandshake,
    #[error("unexpected event during handshake: {0}")]
    UnexpectedEvent(String),
    #[error("session closed")]
    Closed,
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Cloneable sender bound to one room connection.
#[derive(Clone)]
pub struct SessionHandle {
    outbound: mpsc::UnboundedSender<ClientEvent>,
}

impl SessionHandle {
    pub fn send(&self, event: ClientEvent) -> Result<(), SessionError> {
        self.outbound.send(event).map_err(|_| SessionError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

#[async_trait]
impl TreeSink for SessionHandle {
    async fn save_tree(&self, tree: FileTree) -> Result<()> {
        self.send(ClientEvent::SaveFileTree { tree })?;
        Ok(())
    }
}

/// A joined room.
pub struct Session {
    pub handle: SessionHandle,
    pub user: UserId,
    pub project: ProjectView,
    pub messages: Vec<ChatMessage>,
    /// Everything the gateway sends after `joined`
    pub inbound: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Session {
    /// Build a workspace persisting through this session.
    pub fn into_workspace(
        self,
        save_debounce: Duration,
    ) -> (Workspace, SessionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let workspace = Workspace::new(
            self.user,
            self.project,
            self.messages,
            Arc::new(self.handle.clone()),
            save_debounce,
        );
        (workspace, self.handle, self.inbound)
    }
}

/// Connect to `url`, hand over the credentials and wait for the verdict.
pub async fn connect(
    url: &str,
    auth_token: Option<&str>,
    project_id: &str,
) -> Result<Session, SessionError> {
    let (stream, _response) = tokio_tungstenite::connect_async(url).await?;
    let (mut writer, mut reader) = stream.split();

    let handshake = encode_client_event(&ClientEvent::Handshake {
        auth_token: auth_token.map(str::to_owned),
        project_id: project_id.to_string(),
    })?;
    writer.send(Message::Text(handshake.into())).await?;

    let (user, project, messages) = loop {
        let frame = reader
            .next()
            .await
            .ok_or(SessionError::ClosedDuringHandshake)??;
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => return Err(SessionError::ClosedDuringHandshake),
            _ => continue,
        };
        match decode_server_event(text.as_str())? {
            ServerEvent::Joined {
                user,
                project,
                messages,
            } => break (user, project, messages),
            ServerEvent::Rejected { reason } => return Err(SessionError::Rejected(reason)),
            other => {
                return Err(SessionError::UnexpectedEvent(
                    serde_json::to_string(&other).unwrap_or_default(),
                ))
            }
        }
    };
    tracing::info!(project_id = %project.id, user = %user, "Joined project room");

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientEvent>();
    tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let text = match encode_client_event(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, event = event.kind(), "Failed to encode event");
                    continue;
                }
            };
            if writer.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = writer.close().await;
    });

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(frame) = reader.next().await {
            match frame {
                Ok(Message::Text(text)) => match decode_server_event(text.as_str()) {
                    Ok(event) => {
                        if inbound_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Dropped undecodable frame"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Connection error");
                    break;
                }
            }
        }
        tracing::debug!("Room connection closed");
    });

    Ok(Session {
        handle: SessionHandle {
            outbound: outbound_tx,
        },
        user,
        project,
        messages,
        inbound: inbound_rx,
    })
}
