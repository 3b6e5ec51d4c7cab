//! Room events exchanged between clients and the session gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ClientKey, MessageId, ProjectId, UserId};
use crate::message::{ChatMessage, ReplyTo};
use crate::tree::FileTree;

/// Client-to-gateway events
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// First frame on every connection.
    ///
    /// The project id stays raw so a malformed id is reported as a rejected
    /// project rather than an undecodable frame.
    #[serde(rename_all = "camelCase")]
    Handshake {
        #[serde(default)]
        auth_token: Option<String>,
        project_id: String,
    },
    /// Chat message; sender identity comes from the connection context
    #[serde(rename_all = "camelCase")]
    ProjectMessage {
        client_key: ClientKey,
        content: String,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<ReplyTo>,
    },
    Typing,
    StopTyping,
    #[serde(rename_all = "camelCase")]
    MessageDeleted { message_id: MessageId },
    /// Full-tree replacement of the canonical tree
    SaveFileTree { tree: FileTree },
}

impl ClientEvent {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Handshake { .. } => "handshake",
            Self::ProjectMessage { .. } => "project-message",
            Self::Typing => "typing",
            Self::StopTyping => "stop-typing",
            Self::MessageDeleted { .. } => "message-deleted",
            Self::SaveFileTree { .. } => "save-file-tree",
        }
    }
}

/// Reasons a handshake is refused. The connection is closed afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeRejection {
    Unauthenticated,
    InvalidToken,
    InvalidProject,
}

/// Project snapshot sent on join.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectView {
    pub id: ProjectId,
    pub name: String,
    pub owner: UserId,
    pub members: Vec<UserId>,
    pub file_tree: FileTree,
}

/// Gateway-to-client events
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Handshake accepted
    Joined {
        user: UserId,
        project: ProjectView,
        messages: Vec<ChatMessage>,
    },
    /// Handshake refused
    Rejected { reason: HandshakeRejection },
    /// Message from another participant (or the AI)
    ProjectMessage { message: ChatMessage },
    /// Confirmation of the receiver's own message
    MessageAccepted { message: ChatMessage },
    Typing { sender: UserId },
    StopTyping { sender: UserId },
    #[serde(rename_all = "camelCase")]
    MessageDeleted { message_id: MessageId },
    /// Canonical tree replaced
    TreeSaved { entries: usize },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn handshake_wire_names() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "handshake",
            "authToken": "abc",
            "projectId": "whatever"
        }))
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::Handshake {
                auth_token: Some("abc".into()),
                project_id: "whatever".into(),
            }
        );

        let missing: ClientEvent =
            serde_json::from_value(json!({ "event": "handshake", "projectId": "p" })).unwrap();
        assert!(matches!(
            missing,
            ClientEvent::Handshake {
                auth_token: None,
                ..
            }
        ));
    }

    #[test]
    fn signaling_events_have_no_payload() {
        assert_eq!(
            serde_json::to_value(ClientEvent::StopTyping).unwrap(),
            json!({ "event": "stop-typing" })
        );
        assert_eq!(
            serde_json::to_value(ServerEvent::Typing {
                sender: UserId::new("u2")
            })
            .unwrap(),
            json!({ "event": "typing", "sender": "u2" })
        );
    }

    #[test]
    fn deletion_event_name_is_shared() {
        let id = MessageId::generate();
        let client = serde_json::to_value(ClientEvent::MessageDeleted { message_id: id }).unwrap();
        let server = serde_json::to_value(ServerEvent::MessageDeleted { message_id: id }).unwrap();
        assert_eq!(client, server);
        assert_eq!(client["event"], "message-deleted");
    }
}
