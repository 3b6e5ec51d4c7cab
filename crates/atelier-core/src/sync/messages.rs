//! Chat log with optimistic records.

use atelier_protocol::{
    ChatMessage, ClientEvent, ClientKey, MessageId, ReplyTo, Sender, UserId,
};
use chrono::{DateTime, Utc};

/// A message shown locally before the gateway confirmed it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub key: ClientKey,
    pub sender: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub reply_to: Option<ReplyTo>,
}

impl PendingMessage {
    /// The outbound event announcing this message to the room.
    pub fn to_event(&self) -> ClientEvent {
        ClientEvent::ProjectMessage {
            client_key: self.key,
            content: self.content.clone(),
            timestamp: self.timestamp,
            reply_to: self.reply_to.clone(),
        }
    }
}

/// One row of the rendered log.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Pending(PendingMessage),
    Confirmed(ChatMessage),
}

impl LogEntry {
    pub fn sender(&self) -> Sender {
        match self {
            Self::Pending(p) => Sender::User(p.sender.clone()),
            Self::Confirmed(m) => m.sender(),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Pending(p) => &p.content,
            Self::Confirmed(m) => m.content(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Pending(p) => p.timestamp,
            Self::Confirmed(m) => m.timestamp,
        }
    }

    pub fn id(&self) -> Option<MessageId> {
        match self {
            Self::Pending(_) => None,
            Self::Confirmed(m) => Some(m.id),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

/// Outcome of merging an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// An optimistic record at this index was replaced in place
    Confirmed { index: usize },
    Appended,
    /// Already present; dropped
    Duplicate,
}

/// Messages in local arrival order.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the persisted log on join.
    pub fn from_confirmed(messages: Vec<ChatMessage>) -> Self {
        Self {
            entries: messages.into_iter().map(LogEntry::Confirmed).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_pending()).count()
    }

    /// Record an optimistic message and return it for sending.
    pub fn push_optimistic(
        &mut self,
        sender: UserId,
        content: impl Into<String>,
        reply_to: Option<ReplyTo>,
    ) -> PendingMessage {
        let pending = PendingMessage {
            key: ClientKey::generate(),
            sender,
            content: content.into(),
            timestamp: Utc::now(),
            reply_to,
        };
        self.entries.push(LogEntry::Pending(pending.clone()));
        pending
    }

    /// Merge a message delivered by the gateway.
    ///
    /// Echoes of our own messages replace the matching optimistic record in
    /// place. The match uses the echoed key; echoes without a key fall back
    /// to the oldest pending record with identical content. Everything else
    /// is appended unless a message with the same timestamp or id exists.
    pub fn apply_incoming(&mut self, message: ChatMessage, local: &UserId) -> Applied {
        if message.sender().user() == Some(local) {
            if let Some(index) = self.find_pending(&message) {
                self.entries[index] = LogEntry::Confirmed(message);
                return Applied::Confirmed { index };
            }
        }

        let duplicate = self
            .entries
            .iter()
            .any(|e| e.timestamp() == message.timestamp || e.id() == Some(message.id));
        if duplicate {
            return Applied::Duplicate;
        }

        self.entries.push(LogEntry::Confirmed(message));
        Applied::Appended
    }

    fn find_pending(&self, message: &ChatMessage) -> Option<usize> {
        match message.client_key {
            Some(key) => self
                .entries
                .iter()
                .position(|e| matches!(e, LogEntry::Pending(p) if p.key == key)),
            None => self.entries.iter().position(
                |e| matches!(e, LogEntry::Pending(p) if p.content == message.content()),
            ),
        }
    }

    /// Remove a confirmed message by id. No-op when absent.
    pub fn remove(&mut self, id: MessageId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id() != Some(id));
        self.entries.len() != before
    }

    /// Drop an optimistic record that could not be sent.
    pub fn discard_pending(&mut self, key: ClientKey) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| !matches!(e, LogEntry::Pending(p) if p.key == key));
        self.entries.len() != before
    }
}
