//! Additive merge of AI tree fragments.

use std::collections::BTreeSet;

use atelier_protocol::FileTree;

/// Paths introduced by the most recent AI merge in this session.
///
/// Drives the "new" badge in the file explorer. Not persisted; a fresh
/// session starts empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPathSet {
    paths: BTreeSet<String>,
}

impl NewPathSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    /// Replace the set with the paths of a new merge.
    pub fn replace<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths = paths.into_iter().map(Into::into).collect();
    }

    /// Forget paths removed from the tree.
    pub fn forget(&mut self, removed: &[String]) {
        for path in removed {
            self.paths.remove(path);
        }
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }
}

/// Applies AI fragments to a tree.
///
/// The merge only ever adds or overwrites: paths absent from the fragment
/// are left untouched, so an AI reply can never delete a file.
pub struct MergeEngine;

impl MergeEngine {
    /// Merge `fragment` into `tree`. Returns the touched paths in order.
    pub fn merge(tree: &mut FileTree, fragment: Option<&FileTree>) -> Vec<String> {
        match fragment {
            Some(fragment) => tree.merge(fragment),
            None => Vec::new(),
        }
    }

    /// Merge and record the touched paths as new for this session.
    ///
    /// A reply without a fragment leaves both the tree and the set alone.
    pub fn apply(
        tree: &mut FileTree,
        new_paths: &mut NewPathSet,
        fragment: Option<&FileTree>,
    ) -> Vec<String> {
        let touched = Self::merge(tree, fragment);
        if !touched.is_empty() {
            new_paths.replace(touched.iter().cloned());
        }
        touched
    }
}
