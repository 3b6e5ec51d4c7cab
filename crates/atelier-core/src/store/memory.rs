use std::collections::HashMap;

use async_trait::async_trait;
use atelier_protocol::{ChatMessage, FileTree, MessageId, ProjectId, UserId};
use tokio::sync::RwLock;

use super::{Project, StoreError, WorkspaceStore};

/// In-process store for tests and throwaway servers.
#[derive(Default)]
pub struct MemoryStore {
    projects: RwLock<HashMap<ProjectId, Project>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully built project, replacing any with the same id.
    pub async fn insert(&self, project: Project) {
        self.projects
            .write()
            .await
            .insert(project.id.clone(), project);
    }
}

#[async_trait]
impl WorkspaceStore for MemoryStore {
    async fn create_project(&self, name: &str, owner: &UserId) -> Result<Project, StoreError> {
        let project = Project::new(name, owner.clone());
        self.insert(project.clone()).await;
        Ok(project)
    }

    async fn get_project(&self, id: &ProjectId, requester: &UserId) -> Result<Project, StoreError> {
        let projects = self.projects.read().await;
        let project = projects
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if !project.can_access(requester) {
            return Err(StoreError::Forbidden {
                project: id.clone(),
                user: requester.clone(),
            });
        }
        Ok(project.clone())
    }

    async fn save_file_tree(&self, id: &ProjectId, tree: FileTree) -> Result<FileTree, StoreError> {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        project.file_tree = tree.clone();
        Ok(tree)
    }

    async fn load_file_tree(&self, id: &ProjectId) -> Result<FileTree, StoreError> {
        let projects = self.projects.read().await;
        projects
            .get(id)
            .map(|p| p.file_tree.clone())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn append_message(&self, id: &ProjectId, message: ChatMessage) -> Result<(), StoreError> {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        project.messages.push(message);
        Ok(())
    }

    async fn delete_message(
        &self,
        id: &ProjectId,
        message_id: MessageId,
    ) -> Result<bool, StoreError> {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let before = project.messages.len();
        project.messages.retain(|m| m.id != message_id);
        Ok(project.messages.len() != before)
    }

    async fn add_member(&self, id: &ProjectId, user: &UserId) -> Result<(), StoreError> {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        project.pending_invites.remove(user);
        project.members.insert(user.clone());
        Ok(())
    }
}
