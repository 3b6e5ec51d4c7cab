use std::sync::Arc;
use std::time::Duration;

use atelier_protocol::{
    ChatMessage, ClientEvent, FileNode, FileTree, HandshakeRejection, MessageId, ProjectId,
    ProjectView, ReplyTo, ServerEvent, TreeError, UserId,
};

use super::{Applied, DebouncedSaver, MessageLog, NewPathSet, PendingMessage, TreeSink};
use crate::ai::MergeEngine;

/// What a room event changed, for the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkspaceUpdate {
    Rejoined,
    Rejected(HandshakeRejection),
    Message(Applied),
    /// An AI fragment was merged into the local tree
    TreeMerged { paths: Vec<String> },
    MessageRemoved { removed: bool },
    Typing(UserId),
    StopTyping(UserId),
    TreeSaved { entries: usize },
    Error(String),
}

/// One client's optimistic view of a project.
///
/// Owns the session's [`TreeSink`] through a [`DebouncedSaver`]; there is
/// no shared global connection.
pub struct Workspace {
    identity: UserId,
    project: ProjectView,
    local_tree: FileTree,
    open_paths: Vec<String>,
    messages: MessageLog,
    new_paths: NewPathSet,
    saver: DebouncedSaver,
}

impl Workspace {
    /// Seed from the `joined` snapshot.
    pub fn new(
        identity: UserId,
        project: ProjectView,
        messages: Vec<ChatMessage>,
        sink: Arc<dyn TreeSink>,
        save_debounce: Duration,
    ) -> Self {
        let local_tree = project.file_tree.clone();
        Self {
            identity,
            project,
            local_tree,
            open_paths: Vec::new(),
            messages: MessageLog::from_confirmed(messages),
            new_paths: NewPathSet::new(),
            saver: DebouncedSaver::spawn(sink, save_debounce),
        }
    }

    pub fn identity(&self) -> &UserId {
        &self.identity
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project.id
    }

    pub fn project_name(&self) -> &str {
        &self.project.name
    }

    pub fn tree(&self) -> &FileTree {
        &self.local_tree
    }

    pub fn messages(&self) -> &MessageLog {
        &self.messages
    }

    pub fn open_paths(&self) -> &[String] {
        &self.open_paths
    }

    pub fn new_paths(&self) -> &NewPathSet {
        &self.new_paths
    }

    /// Deep copy of the local tree, for the sandbox.
    pub fn snapshot_tree(&self) -> FileTree {
        self.local_tree.clone()
    }

    /// Write a file locally and schedule a debounced save.
    pub fn edit_file(
        &mut self,
        path: impl Into<String>,
        contents: impl Into<String>,
    ) -> Result<(), TreeError> {
        self.local_tree.write_file(path, contents)?;
        self.saver.schedule(self.local_tree.clone());
        Ok(())
    }

    pub fn create_directory(&mut self, path: impl Into<String>) -> Result<(), TreeError> {
        self.local_tree.insert(path, FileNode::directory())?;
        self.saver.schedule(self.local_tree.clone());
        Ok(())
    }

    /// Remove `path` and its descendants, then persist right away.
    ///
    /// Open editors on removed paths are closed. Returns the removed paths.
    pub async fn delete_path(&mut self, path: &str) -> Vec<String> {
        let removed = self.local_tree.remove_cascade(path);
        if removed.is_empty() {
            return removed;
        }
        self.open_paths.retain(|open| !removed.contains(open));
        self.new_paths.forget(&removed);

        self.saver.schedule(self.local_tree.clone());
        self.saver.flush().await;
        tracing::debug!(path, removed = removed.len(), "Deleted path");
        removed
    }

    /// Open an editor tab; `false` for directories and missing paths.
    pub fn open(&mut self, path: &str) -> bool {
        if self.local_tree.file_contents(path).is_none() {
            return false;
        }
        if !self.open_paths.iter().any(|open| open == path) {
            self.open_paths.push(path.to_string());
        }
        true
    }

    pub fn close(&mut self, path: &str) {
        self.open_paths.retain(|open| open != path);
    }

    /// Show a message immediately and return the event to send.
    pub fn send_message(
        &mut self,
        content: impl Into<String>,
        reply_to: Option<ReplyTo>,
    ) -> PendingMessage {
        self.messages
            .push_optimistic(self.identity.clone(), content, reply_to)
    }

    /// Remove a message locally and return the event announcing it.
    pub fn delete_message(&mut self, id: MessageId) -> ClientEvent {
        self.messages.remove(id);
        ClientEvent::MessageDeleted { message_id: id }
    }

    /// Merge one room event into local state.
    pub fn apply_server_event(&mut self, event: ServerEvent) -> WorkspaceUpdate {
        match event {
            ServerEvent::Joined {
                user,
                project,
                messages,
            } => {
                // Reconnect: the server copy is the source of truth again,
                // so a save queued before the drop must not overwrite it
                self.saver.cancel();
                self.identity = user;
                self.local_tree = project.file_tree.clone();
                self.project = project;
                self.messages = MessageLog::from_confirmed(messages);
                self.new_paths.clear();
                self.open_paths
                    .retain(|open| self.local_tree.file_contents(open).is_some());
                WorkspaceUpdate::Rejoined
            }
            ServerEvent::Rejected { reason } => WorkspaceUpdate::Rejected(reason),
            ServerEvent::ProjectMessage { message } | ServerEvent::MessageAccepted { message } => {
                self.apply_message(message)
            }
            ServerEvent::MessageDeleted { message_id } => WorkspaceUpdate::MessageRemoved {
                removed: self.messages.remove(message_id),
            },
            ServerEvent::Typing { sender } => WorkspaceUpdate::Typing(sender),
            ServerEvent::StopTyping { sender } => WorkspaceUpdate::StopTyping(sender),
            ServerEvent::TreeSaved { entries } => WorkspaceUpdate::TreeSaved { entries },
            ServerEvent::Error { message } => {
                tracing::warn!(%message, "Gateway reported an error");
                WorkspaceUpdate::Error(message)
            }
        }
    }

    fn apply_message(&mut self, message: ChatMessage) -> WorkspaceUpdate {
        let fragment = message.filetree_fragment().cloned();
        let applied = self.messages.apply_incoming(message, &self.identity);
        if applied == Applied::Duplicate {
            tracing::debug!("Dropped duplicate message");
            return WorkspaceUpdate::Message(applied);
        }

        // The server already persisted the merged canonical tree
        let paths = MergeEngine::apply(&mut self.local_tree, &mut self.new_paths, fragment.as_ref());
        if paths.is_empty() {
            return WorkspaceUpdate::Message(applied);
        }
        // A save still waiting from a local edit must carry the merge too
        self.saver.refresh(self.local_tree.clone());
        WorkspaceUpdate::TreeMerged { paths }
    }

    /// Write any pending debounced save now.
    pub async fn flush(&self) {
        self.saver.flush().await;
    }

    /// Flush and stop the background saver.
    pub async fn close_session(self) {
        self.saver.shutdown().await;
    }
}
