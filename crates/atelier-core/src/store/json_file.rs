use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use atelier_protocol::{ChatMessage, FileTree, MessageId, ProjectId, UserId};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Project, StoreError, WorkspaceStore};

/// One pretty-printed JSON document per project.
///
/// Read-modify-write cycles on the same document are serialized so message
/// appends are not lost; tree saves still replace the whole tree.
pub struct JsonFileStore {
    root: PathBuf,
    locks: Mutex<HashMap<ProjectId, Arc<Mutex<()>>>>,
}

impl JsonFileStore {
    /// Open a store rooted at `root`, creating the directory.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root)?;
        tracing::info!(root = %root.display(), "Opened project store");
        Ok(Self {
            root: root.to_path_buf(),
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, id: &ProjectId) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    async fn lock_for(&self, id: &ProjectId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(id.clone()).or_default().clone()
    }

    async fn read(&self, id: &ProjectId) -> Result<Project, StoreError> {
        let path = self.document_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let project: Project =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Malformed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        if &project.id != id {
            return Err(StoreError::Malformed {
                path: path.display().to_string(),
                reason: format!("document holds project {}", project.id),
            });
        }
        Ok(project)
    }

    /// Write via a temp file and rename so readers never see a torn document.
    async fn write(&self, project: &Project) -> Result<(), StoreError> {
        let path = self.document_path(&project.id);
        let tmp = self
            .root
            .join(format!(".{}.{}.tmp", project.id, Uuid::new_v4().simple()));
        let json = serde_json::to_vec_pretty(project)?;
        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn update<T>(
        &self,
        id: &ProjectId,
        apply: impl FnOnce(&mut Project) -> T + Send,
    ) -> Result<T, StoreError> {
        let lock = self.lock_for(id).await;
        let result = async {
            let _guard = lock.lock().await;
            let mut project = self.read(id).await?;
            let out = apply(&mut project);
            self.write(&project).await?;
            Ok::<_, StoreError>(out)
        }
        .await;
        self.release(id, lock).await;
        result
    }

    /// Forget the lock once nobody else holds or awaits it.
    async fn release(&self, id: &ProjectId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // One reference in the map, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(id);
        }
    }
}

#[async_trait]
impl WorkspaceStore for JsonFileStore {
    async fn create_project(&self, name: &str, owner: &UserId) -> Result<Project, StoreError> {
        let project = Project::new(name, owner.clone());
        self.write(&project).await?;
        tracing::info!(project_id = %project.id, owner = %owner, "Created project");
        Ok(project)
    }

    async fn get_project(&self, id: &ProjectId, requester: &UserId) -> Result<Project, StoreError> {
        let project = self.read(id).await?;
        if !project.can_access(requester) {
            return Err(StoreError::Forbidden {
                project: id.clone(),
                user: requester.clone(),
            });
        }
        Ok(project)
    }

    async fn save_file_tree(&self, id: &ProjectId, tree: FileTree) -> Result<FileTree, StoreError> {
        let saved = tree.clone();
        self.update(id, move |project| project.file_tree = tree).await?;
        tracing::debug!(project_id = %id, entries = saved.len(), "Saved file tree");
        Ok(saved)
    }

    async fn load_file_tree(&self, id: &ProjectId) -> Result<FileTree, StoreError> {
        Ok(self.read(id).await?.file_tree)
    }

    async fn append_message(&self, id: &ProjectId, message: ChatMessage) -> Result<(), StoreError> {
        self.update(id, move |project| project.messages.push(message)).await
    }

    async fn delete_message(
        &self,
        id: &ProjectId,
        message_id: MessageId,
    ) -> Result<bool, StoreError> {
        self.update(id, move |project| {
            let before = project.messages.len();
            project.messages.retain(|m| m.id != message_id);
            project.messages.len() != before
        })
        .await
    }

    async fn add_member(&self, id: &ProjectId, user: &UserId) -> Result<(), StoreError> {
        let user = user.clone();
        self.update(id, move |project| {
            project.pending_invites.remove(&user);
            project.members.insert(user);
        })
        .await
    }
}
