//! Chat messages exchanged inside a project room.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ids::{ClientKey, MessageId, UserId};
use crate::tree::FileTree;

/// Wire value used for the AI participant.
const AI_SENDER: &str = "ai";

/// Who authored a message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Sender {
    User(UserId),
    Ai,
}

impl Sender {
    pub fn is_ai(&self) -> bool {
        matches!(self, Self::Ai)
    }

    pub fn user(&self) -> Option<&UserId> {
        match self {
            Self::User(id) => Some(id),
            Self::Ai => None,
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => id.fmt(f),
            Self::Ai => f.write_str(AI_SENDER),
        }
    }
}

impl Serialize for Sender {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::User(id) => serializer.serialize_str(id.as_str()),
            Self::Ai => serializer.serialize_str(AI_SENDER),
        }
    }
}

impl<'de> Deserialize<'de> for Sender {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if raw == AI_SENDER {
            Ok(Self::Ai)
        } else {
            Ok(Self::User(UserId(raw)))
        }
    }
}

/// Quoted message a reply points at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyTo {
    pub original_sender: Sender,
    pub original_message: String,
}

/// Build hint returned by the AI alongside a file tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildCommand {
    pub main_item: String,
    #[serde(default)]
    pub commands: Vec<String>,
}

/// Message payload, tagged by author kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MessageBody {
    Human {
        sender: UserId,
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    AiGenerated {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filetree_fragment: Option<FileTree>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        build_command: Option<BuildCommand>,
    },
}

/// A confirmed chat message as stored in the project log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    /// Idempotency key of the optimistic record this message confirms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<ClientKey>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyTo>,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl ChatMessage {
    pub fn human(sender: UserId, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::generate(),
            client_key: None,
            timestamp,
            reply_to: None,
            body: MessageBody::Human {
                sender,
                content: content.into(),
            },
        }
    }

    pub fn ai(
        content: impl Into<String>,
        filetree_fragment: Option<FileTree>,
        build_command: Option<BuildCommand>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            client_key: None,
            timestamp,
            reply_to: None,
            body: MessageBody::AiGenerated {
                content: content.into(),
                filetree_fragment,
                build_command,
            },
        }
    }

    pub fn sender(&self) -> Sender {
        match &self.body {
            MessageBody::Human { sender, .. } => Sender::User(sender.clone()),
            MessageBody::AiGenerated { .. } => Sender::Ai,
        }
    }

    pub fn content(&self) -> &str {
        match &self.body {
            MessageBody::Human { content, .. } | MessageBody::AiGenerated { content, .. } => {
                content
            }
        }
    }

    pub fn is_ai(&self) -> bool {
        matches!(self.body, MessageBody::AiGenerated { .. })
    }

    pub fn filetree_fragment(&self) -> Option<&FileTree> {
        match &self.body {
            MessageBody::AiGenerated {
                filetree_fragment, ..
            } => filetree_fragment.as_ref(),
            MessageBody::Human { .. } => None,
        }
    }
}
