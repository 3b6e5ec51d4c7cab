//! Workspace State Store - canonical project documents.
//!
//! Every tree save is a full replacement. There is no per-path patch and no
//! cross-client ordering: the last save to complete wins.

mod json_file;
mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;
use atelier_protocol::{ChatMessage, FileTree, MessageId, ProjectId, ProjectView, UserId};
use serde::{Deserialize, Serialize};

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

/// A project document as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub owner: UserId,
    #[serde(default)]
    pub members: BTreeSet<UserId>,
    #[serde(default)]
    pub pending_invites: BTreeSet<UserId>,
    #[serde(default)]
    pub file_tree: FileTree,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl Project {
    pub fn new(name: impl Into<String>, owner: UserId) -> Self {
        let mut members = BTreeSet::new();
        members.insert(owner.clone());
        Self {
            id: ProjectId::generate(),
            name: name.into(),
            owner,
            members,
            pending_invites: BTreeSet::new(),
            file_tree: FileTree::new(),
            messages: Vec::new(),
        }
    }

    /// Owner and members may open the project.
    pub fn can_access(&self, user: &UserId) -> bool {
        &self.owner == user || self.members.contains(user)
    }

    /// Snapshot sent to a joining client.
    pub fn view(&self) -> ProjectView {
        ProjectView {
            id: self.id.clone(),
            name: self.name.clone(),
            owner: self.owner.clone(),
            members: self.members.iter().cloned().collect(),
            file_tree: self.file_tree.clone(),
        }
    }
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("project {0} not found")]
    NotFound(ProjectId),
    #[error("user {user} may not access project {project}")]
    Forbidden { project: ProjectId, user: UserId },
    #[error("malformed project document {path}: {reason}")]
    Malformed { path: String, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Opaque document store holding projects.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// Create and persist a new project owned by `owner`.
    async fn create_project(&self, name: &str, owner: &UserId) -> Result<Project, StoreError>;

    /// Fetch a project on behalf of `requester`.
    async fn get_project(&self, id: &ProjectId, requester: &UserId) -> Result<Project, StoreError>;

    /// Replace the project's whole file tree; returns the saved tree.
    async fn save_file_tree(&self, id: &ProjectId, tree: FileTree) -> Result<FileTree, StoreError>;

    /// Current persisted tree, possibly empty.
    async fn load_file_tree(&self, id: &ProjectId) -> Result<FileTree, StoreError>;

    async fn append_message(&self, id: &ProjectId, message: ChatMessage) -> Result<(), StoreError>;

    /// Remove a message; `false` when it was already gone.
    async fn delete_message(&self, id: &ProjectId, message_id: MessageId)
        -> Result<bool, StoreError>;

    /// Seed membership. Invitations are handled elsewhere.
    async fn add_member(&self, id: &ProjectId, user: &UserId) -> Result<(), StoreError>;
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every store must share.

    use super::*;
    use chrono::Utc;

    pub async fn round_trip(store: &dyn WorkspaceStore) {
        let owner = UserId::new("owner");
        let project = store.create_project("demo", &owner).await.unwrap();
        assert!(store.load_file_tree(&project.id).await.unwrap().is_empty());

        let mut tree = FileTree::new();
        tree.write_file("src/main.js", "console.log(1)").unwrap();
        tree.insert("assets", atelier_protocol::FileNode::directory()).unwrap();

        let saved = store.save_file_tree(&project.id, tree.clone()).await.unwrap();
        assert_eq!(saved, tree);
        assert_eq!(store.load_file_tree(&project.id).await.unwrap(), tree);
    }

    pub async fn last_write_wins(store: &dyn WorkspaceStore) {
        let owner = UserId::new("owner");
        let project = store.create_project("demo", &owner).await.unwrap();

        let mut t1 = FileTree::new();
        t1.write_file("a.js", "one").unwrap();
        t1.write_file("b.js", "kept only in t1").unwrap();
        let mut t2 = FileTree::new();
        t2.write_file("a.js", "two").unwrap();

        store.save_file_tree(&project.id, t1).await.unwrap();
        store.save_file_tree(&project.id, t2.clone()).await.unwrap();
        assert_eq!(store.load_file_tree(&project.id).await.unwrap(), t2);
    }

    pub async fn access_and_messages(store: &dyn WorkspaceStore) {
        let owner = UserId::new("owner");
        let guest = UserId::new("guest");
        let project = store.create_project("demo", &owner).await.unwrap();

        assert!(matches!(
            store.get_project(&project.id, &guest).await,
            Err(StoreError::Forbidden { .. })
        ));
        store.add_member(&project.id, &guest).await.unwrap();
        assert!(store.get_project(&project.id, &guest).await.is_ok());

        let missing = ProjectId::generate();
        assert!(matches!(
            store.get_project(&missing, &owner).await,
            Err(StoreError::NotFound(_))
        ));

        let msg = ChatMessage::human(owner.clone(), "hi", Utc::now());
        store.append_message(&project.id, msg.clone()).await.unwrap();
        let loaded = store.get_project(&project.id, &owner).await.unwrap();
        assert_eq!(loaded.messages, vec![msg.clone()]);

        assert!(store.delete_message(&project.id, msg.id).await.unwrap());
        assert!(!store.delete_message(&project.id, msg.id).await.unwrap());
    }
}
