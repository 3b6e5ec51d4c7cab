//! Project file tree.
//!
//! A flat map from slash-delimited paths to nodes. Ancestor directories are
//! implied by their descendants and never need to be stored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single entry in the tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileNode {
    File { contents: String },
    Directory {},
}

impl FileNode {
    pub fn file(contents: impl Into<String>) -> Self {
        Self::File {
            contents: contents.into(),
        }
    }

    pub fn directory() -> Self {
        Self::Directory {}
    }

    pub fn contents(&self) -> Option<&str> {
        match self {
            Self::File { contents } => Some(contents),
            Self::Directory {} => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("malformed file tree: {0}")]
    Malformed(String),
}

/// The whole file tree of a project.
///
/// Always well-formed: every key passes [`FileTree::validate_path`]. Trees
/// coming off the wire are validated during deserialization.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, FileNode>",
    into = "BTreeMap<String, FileNode>"
)]
pub struct FileTree {
    entries: BTreeMap<String, FileNode>,
}

impl FileTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that a path is relative, slash-delimited and free of `.`/`..`.
    pub fn validate_path(path: &str) -> Result<(), TreeError> {
        let invalid = |reason| TreeError::InvalidPath {
            path: path.to_string(),
            reason,
        };

        if path.is_empty() {
            return Err(invalid("empty path"));
        }
        if path.starts_with('/') {
            return Err(invalid("absolute path"));
        }
        if path.ends_with('/') {
            return Err(invalid("trailing slash"));
        }
        if path.contains('\\') || path.contains('\0') {
            return Err(invalid("forbidden character"));
        }
        for segment in path.split('/') {
            match segment {
                "" => return Err(invalid("empty segment")),
                "." | ".." => return Err(invalid("relative segment")),
                _ => {}
            }
        }
        Ok(())
    }

    /// Parse a tree from an arbitrary JSON value.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, TreeError> {
        if !value.is_object() {
            return Err(TreeError::Malformed("expected an object of paths".into()));
        }
        serde_json::from_value(value.clone()).map_err(|e| TreeError::Malformed(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&FileNode> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Contents of a file entry, `None` for directories and missing paths.
    pub fn file_contents(&self, path: &str) -> Option<&str> {
        self.entries.get(path).and_then(FileNode::contents)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileNode)> {
        self.entries.iter().map(|(path, node)| (path.as_str(), node))
    }

    /// Iterate over file entries only.
    pub fn files(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .filter_map(|(path, node)| node.contents().map(|c| (path.as_str(), c)))
    }

    pub fn insert(&mut self, path: impl Into<String>, node: FileNode) -> Result<(), TreeError> {
        let path = path.into();
        Self::validate_path(&path)?;
        self.entries.insert(path, node);
        Ok(())
    }

    /// Create or overwrite a file.
    pub fn write_file(
        &mut self,
        path: impl Into<String>,
        contents: impl Into<String>,
    ) -> Result<(), TreeError> {
        self.insert(path, FileNode::file(contents))
    }

    /// Remove `path` and everything stored beneath it.
    ///
    /// Returns the removed paths in sorted order.
    pub fn remove_cascade(&mut self, path: &str) -> Vec<String> {
        let path = path.trim_end_matches('/');
        if path.is_empty() {
            return Vec::new();
        }
        let prefix = format!("{path}/");
        let removed: Vec<String> = self
            .entries
            .keys()
            .filter(|key| key.as_str() == path || key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in &removed {
            self.entries.remove(key);
        }
        removed
    }

    /// Key-wise union with `fragment`; fragment entries win on conflict.
    ///
    /// Returns every path present in the fragment.
    pub fn merge(&mut self, fragment: &FileTree) -> Vec<String> {
        let mut touched = Vec::with_capacity(fragment.len());
        for (path, node) in &fragment.entries {
            self.entries.insert(path.clone(), node.clone());
            touched.push(path.clone());
        }
        touched
    }

    /// First of `candidates` that exists as a file.
    pub fn find_first_file<'a>(&self, candidates: &[&'a str]) -> Option<&'a str> {
        candidates
            .iter()
            .copied()
            .find(|name| self.file_contents(name).is_some())
    }
}

impl TryFrom<BTreeMap<String, FileNode>> for FileTree {
    type Error = TreeError;

    fn try_from(entries: BTreeMap<String, FileNode>) -> Result<Self, Self::Error> {
        for path in entries.keys() {
            Self::validate_path(path)?;
        }
        Ok(Self { entries })
    }
}

impl From<FileTree> for BTreeMap<String, FileNode> {
    fn from(tree: FileTree) -> Self {
        tree.entries
    }
}

impl FromIterator<(String, FileNode)> for FileTree {
    /// Collects entries, silently skipping invalid paths.
    fn from_iter<I: IntoIterator<Item = (String, FileNode)>>(iter: I) -> Self {
        let entries = iter
            .into_iter()
            .filter(|(path, _)| Self::validate_path(path).is_ok())
            .collect();
        Self { entries }
    }
}
