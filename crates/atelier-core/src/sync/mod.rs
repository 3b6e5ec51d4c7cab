//! Reconciliation layer - the client's optimistic view of a project.
//!
//! Holds the local file tree and chat log, merges room events into them
//! without duplication and pushes tree changes to a [`TreeSink`].

mod debounce;
mod messages;
mod workspace;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use atelier_protocol::{FileTree, ProjectId};

use crate::store::WorkspaceStore;

pub use crate::ai::NewPathSet;
pub use debounce::DebouncedSaver;
pub use messages::{Applied, LogEntry, MessageLog, PendingMessage};
pub use workspace::{Workspace, WorkspaceUpdate};

/// Destination for full-tree saves.
#[async_trait]
pub trait TreeSink: Send + Sync {
    async fn save_tree(&self, tree: FileTree) -> Result<()>;
}

/// Saves straight into a store, for in-process workspaces.
pub struct StoreSink {
    store: Arc<dyn WorkspaceStore>,
    project: ProjectId,
}

impl StoreSink {
    pub fn new(store: Arc<dyn WorkspaceStore>, project: ProjectId) -> Self {
        Self { store, project }
    }
}

#[async_trait]
impl TreeSink for StoreSink {
    async fn save_tree(&self, tree: FileTree) -> Result<()> {
        self.store.save_file_tree(&self.project, tree).await?;
        Ok(())
    }
}
