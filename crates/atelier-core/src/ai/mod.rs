//! AI collaborator - responders and the merge engine.
//!
//! A responder turns a prompt into a raw payload. [`AiResponse::parse`]
//! makes that payload safe to use and [`MergeEngine`] unions its fragment
//! into a tree. [`AiMergeService`] runs the server-side flow: generate,
//! merge into the canonical tree, persist, and build the room message.

mod command;
mod http;
mod merge;
mod response;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use atelier_protocol::{ChatMessage, ProjectId};
use chrono::Utc;

use crate::config::{AiConfig, AiProvider};
use crate::store::WorkspaceStore;

pub use command::CommandResponder;
pub use http::HttpResponder;
pub use merge::{MergeEngine, NewPathSet};
pub use response::{AiResponse, MalformedAiPayload, ParsedResponse};

/// Mention that routes a chat message to the AI collaborator.
pub const AI_MENTION: &str = "@ai";

/// Instruction sent ahead of every prompt.
pub const SYSTEM_INSTRUCTION: &str = r#"You are a coding collaborator inside a shared project workspace.
Reply with a single JSON object and nothing else:
{
  "text": "<message shown in the chat>",
  "fileTree": { "<relative/path>": { "file": { "contents": "<full file contents>" } } },
  "buildCommand": { "mainItem": "<program>", "commands": ["<arg>", "..."] }
}
"fileTree" and "buildCommand" are optional. Only include files you create or change,
always with their complete contents. Paths are relative and use forward slashes."#;

/// Produces a raw AI payload for a prompt.
#[async_trait]
pub trait AiResponder: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Responder used when the collaborator is turned off.
pub struct DisabledResponder;

#[async_trait]
impl AiResponder for DisabledResponder {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        bail!("the AI collaborator is disabled on this server")
    }
}

/// Build the responder selected in config.
pub fn responder_from_config(config: &AiConfig) -> Result<Arc<dyn AiResponder>> {
    let responder: Arc<dyn AiResponder> = match config.provider {
        AiProvider::Http => Arc::new(HttpResponder::from_config(config)?),
        AiProvider::Command => Arc::new(CommandResponder::new(
            &config.command,
            Duration::from_secs(config.timeout_secs),
        )?),
        AiProvider::Disabled => Arc::new(DisabledResponder),
    };
    Ok(responder)
}

/// The prompt carried by a message that mentions the AI, mention removed.
pub fn extract_prompt(content: &str) -> Option<String> {
    if !content.contains(AI_MENTION) {
        return None;
    }
    let prompt = content
        .split(AI_MENTION)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    Some(prompt)
}

/// Server-side AI flow for one project room.
#[derive(Clone)]
pub struct AiMergeService {
    responder: Arc<dyn AiResponder>,
    store: Arc<dyn WorkspaceStore>,
}

impl AiMergeService {
    pub fn new(responder: Arc<dyn AiResponder>, store: Arc<dyn WorkspaceStore>) -> Self {
        Self { responder, store }
    }

    /// Ask the AI, merge its fragment into the canonical tree and return the
    /// message to broadcast.
    ///
    /// Never fails: responder errors become a text reply describing the
    /// failure, persistence errors are logged and the message still goes out.
    pub async fn respond(&self, project: &ProjectId, prompt: &str) -> ChatMessage {
        let raw = match self.responder.generate(prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(project_id = %project, error = %e, "AI collaborator failed");
                return AiResponse::text(format!("AI request failed: {e:#}"))
                    .into_message(Utc::now());
            }
        };

        let ParsedResponse { response, issues } = AiResponse::parse(&raw);
        for issue in &issues {
            tracing::warn!(project_id = %project, issue = %issue, "Malformed AI payload");
        }

        if let Some(fragment) = &response.filetree_fragment {
            self.persist_merge(project, fragment).await;
        }
        response.into_message(Utc::now())
    }

    async fn persist_merge(&self, project: &ProjectId, fragment: &atelier_protocol::FileTree) {
        let mut tree = match self.store.load_file_tree(project).await {
            Ok(tree) => tree,
            Err(e) => {
                tracing::warn!(project_id = %project, error = %e, "Failed to load tree for AI merge");
                return;
            }
        };
        let touched = MergeEngine::merge(&mut tree, Some(fragment));
        match self.store.save_file_tree(project, tree).await {
            Ok(saved) => tracing::info!(
                project_id = %project,
                touched = touched.len(),
                entries = saved.len(),
                "Merged AI fragment"
            ),
            Err(e) => tracing::warn!(project_id = %project, error = %e, "Failed to persist AI merge"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use atelier_protocol::{FileTree, UserId};

    struct Canned(&'static str);

    #[async_trait]
    impl AiResponder for Canned {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    async fn seeded_store() -> (Arc<MemoryStore>, ProjectId) {
        let store = Arc::new(MemoryStore::new());
        let project = store
            .create_project("demo", &UserId::new("owner"))
            .await
            .unwrap();
        let mut tree = FileTree::new();
        tree.write_file("a.js", "1").unwrap();
        tree.write_file("b.js", "2").unwrap();
        store.save_file_tree(&project.id, tree).await.unwrap();
        (store, project.id)
    }

    #[tokio::test]
    async fn fragment_is_merged_and_persisted() {
        let (store, id) = seeded_store().await;
        let service = AiMergeService::new(
            Arc::new(Canned(
                r#"{"text":"done","fileTree":{"a.js":{"file":{"contents":"X"}}}}"#,
            )),
            store.clone(),
        );

        let message = service.respond(&id, "change a").await;
        assert!(message.is_ai());
        assert_eq!(message.content(), "done");
        assert!(message.filetree_fragment().unwrap().contains("a.js"));

        let tree = store.load_file_tree(&id).await.unwrap();
        assert_eq!(tree.file_contents("a.js"), Some("X"));
        assert_eq!(tree.file_contents("b.js"), Some("2"));
    }

    #[tokio::test]
    async fn plain_text_leaves_tree_alone() {
        let (store, id) = seeded_store().await;
        let before = store.load_file_tree(&id).await.unwrap();
        let service = AiMergeService::new(Arc::new(Canned("just words")), store.clone());

        let message = service.respond(&id, "hi").await;
        assert_eq!(message.content(), "just words");
        assert!(message.filetree_fragment().is_none());
        assert_eq!(store.load_file_tree(&id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn responder_failure_becomes_text() {
        let (store, id) = seeded_store().await;
        let service = AiMergeService::new(Arc::new(DisabledResponder), store);

        let message = service.respond(&id, "hi").await;
        assert!(message.is_ai());
        assert!(message.content().contains("disabled"));
    }

    #[test]
    fn mention_extraction() {
        assert_eq!(extract_prompt("hello"), None);
        assert_eq!(
            extract_prompt("@ai build me a server").as_deref(),
            Some("build me a server")
        );
        assert_eq!(
            extract_prompt("please @ai add tests").as_deref(),
            Some("please add tests")
        );
    }
}
