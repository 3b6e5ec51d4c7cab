//! Session gateway: admits connections and routes room events.

use std::sync::Arc;
use std::time::{Duration, Instant};

use atelier_core::ai::{extract_prompt, AiMergeService};
use atelier_core::{Project, StoreError, WorkspaceStore};
use atelier_protocol::{
    ChatMessage, ClientEvent, ClientKey, FileTree, HandshakeRejection, IdError, MessageBody,
    MessageId, ProjectId, ReplyTo, ServerEvent, UserId,
};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::auth::{AuthError, JwtAuthority};
use crate::config::GatewayConfig;
use crate::connection::{ConnectionContext, RateWindow};
use crate::room::{Outbox, RoomRegistry};

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("first frame was not a handshake")]
    NotAHandshake,
    #[error("no handshake within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    ProjectId(#[from] IdError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HandshakeError {
    pub fn rejection(&self) -> HandshakeRejection {
        match self {
            Self::NotAHandshake | Self::Timeout(_) => HandshakeRejection::Unauthenticated,
            Self::Auth(e) => e.rejection(),
            Self::ProjectId(_) | Self::Store(_) => HandshakeRejection::InvalidProject,
        }
    }
}

/// A verified handshake, ready to join its room.
#[derive(Debug)]
pub struct Admission {
    pub user: UserId,
    pub project: Project,
}

/// Shared gateway state. Cheap to clone; one clone per connection.
#[derive(Clone)]
pub struct Gateway {
    store: Arc<dyn WorkspaceStore>,
    auth: Arc<JwtAuthority>,
    rooms: Arc<RoomRegistry>,
    ai: Option<AiMergeService>,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(store: Arc<dyn WorkspaceStore>, auth: JwtAuthority, config: GatewayConfig) -> Self {
        Self {
            store,
            auth: Arc::new(auth),
            rooms: Arc::new(RoomRegistry::new()),
            ai: None,
            config,
        }
    }

    /// Route `@ai` mentions to this service.
    pub fn with_ai(mut self, ai: AiMergeService) -> Self {
        self.ai = Some(ai);
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.config.handshake_timeout()
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    /// Check a handshake.
    ///
    /// The token is checked before the project so unauthenticated callers
    /// learn nothing about which projects exist.
    pub async fn admit(&self, event: ClientEvent) -> Result<Admission, HandshakeError> {
        let ClientEvent::Handshake {
            auth_token,
            project_id,
        } = event
        else {
            return Err(HandshakeError::NotAHandshake);
        };

        let user = self.auth.verify(auth_token.as_deref())?;
        let id = ProjectId::parse(&project_id)?;
        let project = self.store.get_project(&id, &user).await?;
        Ok(Admission { user, project })
    }

    /// Bind an admitted connection to its room and send the join snapshot.
    pub async fn join(&self, admission: Admission, outbox: Outbox) -> ConnectionContext {
        let Admission { user, project } = admission;
        let rate = RateWindow::new(
            self.config.rate_limit.max_events,
            self.config.rate_limit.window(),
        );
        let ctx = ConnectionContext::new(user, project.id.clone(), outbox, rate);

        // Snapshot goes out before any broadcast can reach this connection
        ctx.reply(ServerEvent::Joined {
            user: ctx.user.clone(),
            project: project.view(),
            messages: project.messages,
        });
        self.rooms.join(&ctx.project, ctx.id, ctx.outbox.clone()).await;
        tracing::info!(
            connection = %ctx.id,
            project_id = %ctx.project,
            user = %ctx.user,
            "Joined room"
        );
        ctx
    }

    /// Unbind a connection. No other side effects.
    pub async fn leave(&self, ctx: &ConnectionContext) {
        self.rooms.leave(&ctx.project, ctx.id).await;
        tracing::info!(
            connection = %ctx.id,
            project_id = %ctx.project,
            user = %ctx.user,
            connected_secs = ctx.connected_at.elapsed().as_secs(),
            "Left room"
        );
    }

    /// Handle one event from an admitted connection.
    pub async fn handle_event(&self, ctx: &mut ConnectionContext, event: ClientEvent) {
        if !ctx.rate.allow(Instant::now()) {
            tracing::warn!(connection = %ctx.id, event = event.kind(), "Rate limited; event dropped");
            return;
        }

        match event {
            ClientEvent::Handshake { .. } => ctx.reply(ServerEvent::Error {
                message: "already joined".into(),
            }),
            ClientEvent::ProjectMessage {
                client_key,
                content,
                timestamp,
                reply_to,
            } => {
                self.on_message(ctx, client_key, content, timestamp, reply_to)
                    .await
            }
            ClientEvent::Typing => {
                let event = ServerEvent::Typing {
                    sender: ctx.user.clone(),
                };
                self.rooms.broadcast(&ctx.project, &event, Some(ctx.id)).await;
            }
            ClientEvent::StopTyping => {
                let event = ServerEvent::StopTyping {
                    sender: ctx.user.clone(),
                };
                self.rooms.broadcast(&ctx.project, &event, Some(ctx.id)).await;
            }
            ClientEvent::MessageDeleted { message_id } => self.on_delete(ctx, message_id).await,
            ClientEvent::SaveFileTree { tree } => self.on_save(ctx, tree).await,
        }
    }

    async fn on_message(
        &self,
        ctx: &ConnectionContext,
        client_key: ClientKey,
        content: String,
        timestamp: DateTime<Utc>,
        reply_to: Option<ReplyTo>,
    ) {
        let message = ChatMessage {
            id: MessageId::generate(),
            client_key: Some(client_key),
            timestamp,
            reply_to,
            body: MessageBody::Human {
                sender: ctx.user.clone(),
                content,
            },
        };

        if let Err(e) = self.store.append_message(&ctx.project, message.clone()).await {
            tracing::warn!(project_id = %ctx.project, error = %e, "Failed to persist message");
        }

        ctx.reply(ServerEvent::MessageAccepted {
            message: message.clone(),
        });
        let prompt = extract_prompt(message.content());
        let reached = self
            .rooms
            .broadcast(
                &ctx.project,
                &ServerEvent::ProjectMessage {
                    message: message.clone(),
                },
                Some(ctx.id),
            )
            .await;
        tracing::debug!(project_id = %ctx.project, reached, "Broadcast message");

        if let (Some(prompt), Some(ai)) = (prompt, &self.ai) {
            self.spawn_ai_reply(ai.clone(), ctx.project.clone(), prompt, &message);
        }
    }

    fn spawn_ai_reply(
        &self,
        ai: AiMergeService,
        project: ProjectId,
        prompt: String,
        trigger: &ChatMessage,
    ) {
        let store = self.store.clone();
        let rooms = self.rooms.clone();
        let reply_to = ReplyTo {
            original_sender: trigger.sender(),
            original_message: trigger.content().to_string(),
        };
        tokio::spawn(async move {
            tracing::info!(project_id = %project, "AI collaborator invoked");
            let mut message = ai.respond(&project, &prompt).await;
            message.reply_to = Some(reply_to);

            if let Err(e) = store.append_message(&project, message.clone()).await {
                tracing::warn!(project_id = %project, error = %e, "Failed to persist AI message");
            }
            // The AI is nobody's connection: everyone receives it
            rooms
                .broadcast(&project, &ServerEvent::ProjectMessage { message }, None)
                .await;
        });
    }

    async fn on_delete(&self, ctx: &ConnectionContext, message_id: MessageId) {
        match self.store.delete_message(&ctx.project, message_id).await {
            Ok(removed) => {
                tracing::debug!(project_id = %ctx.project, %message_id, removed, "Deleted message")
            }
            Err(e) => {
                tracing::warn!(project_id = %ctx.project, error = %e, "Failed to delete message")
            }
        }
        self.rooms
            .broadcast(
                &ctx.project,
                &ServerEvent::MessageDeleted { message_id },
                Some(ctx.id),
            )
            .await;
    }

    async fn on_save(&self, ctx: &ConnectionContext, tree: FileTree) {
        match self.store.save_file_tree(&ctx.project, tree).await {
            Ok(saved) => ctx.reply(ServerEvent::TreeSaved {
                entries: saved.len(),
            }),
            Err(e) => {
                tracing::warn!(project_id = %ctx.project, error = %e, "Failed to persist file tree");
                ctx.reply(ServerEvent::Error {
                    message: format!("save failed: {e}"),
                });
            }
        }
    }
}
