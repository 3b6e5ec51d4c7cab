//! Materializing a tree snapshot on disk.

use std::path::{Component, Path, PathBuf};

use atelier_protocol::{FileNode, FileTree};
use tempfile::TempDir;

use super::SandboxError;

/// A snapshot written into a private temporary directory.
///
/// The directory is removed when the mount is dropped.
#[derive(Debug)]
pub struct Mount {
    dir: TempDir,
}

impl Mount {
    pub async fn create(tree: &FileTree) -> Result<Self, SandboxError> {
        check_conflicts(tree)?;
        let dir = tempfile::Builder::new().prefix("atelier-run-").tempdir()?;
        for (path, node) in tree.iter() {
            let target = resolve(dir.path(), path)?;
            match node {
                FileNode::Directory {} => tokio::fs::create_dir_all(&target).await?,
                FileNode::File { contents } => {
                    if let Some(parent) = target.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(&target, contents).await?;
                }
            }
        }
        tracing::debug!(root = %dir.path().display(), entries = tree.len(), "Mounted workspace");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// A file cannot also be a directory on disk.
fn check_conflicts(tree: &FileTree) -> Result<(), SandboxError> {
    for path in tree.paths() {
        let ancestors = path.match_indices('/').map(|(at, _)| &path[..at]);
        for ancestor in ancestors {
            if let Some(FileNode::File { .. }) = tree.get(ancestor) {
                return Err(SandboxError::PathConflict {
                    path: path.to_string(),
                    file: ancestor.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Join `path` onto `root`, refusing anything that could land outside it.
pub(crate) fn resolve(root: &Path, path: &str) -> Result<PathBuf, SandboxError> {
    FileTree::validate_path(path).map_err(|_| SandboxError::PathEscape(path.to_string()))?;
    let relative = Path::new(path);
    if !relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
    {
        return Err(SandboxError::PathEscape(path.to_string()));
    }
    Ok(root.join(relative))
}
