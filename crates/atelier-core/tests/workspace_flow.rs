//! A workspace persisting into a file store, then running its tree.

use std::sync::Arc;
use std::time::Duration;

use atelier_core::sync::StoreSink;
use atelier_core::{JsonFileStore, Workspace, WorkspaceStore};
use atelier_protocol::{ChatMessage, FileTree, ServerEvent, UserId};
use chrono::Utc;

async fn open_workspace(store: Arc<JsonFileStore>) -> Workspace {
    let owner = UserId::new("alice");
    let project = store.create_project("flow", &owner).await.unwrap();
    let sink = Arc::new(StoreSink::new(store.clone(), project.id.clone()));
    Workspace::new(
        owner,
        project.view(),
        Vec::new(),
        sink,
        Duration::from_millis(20),
    )
}

#[tokio::test]
async fn edits_reach_the_store_and_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::open(dir.path()).unwrap());
    let mut workspace = open_workspace(store.clone()).await;
    let id = workspace.project_id().clone();

    workspace.edit_file("src/index.js", "console.log(1)").unwrap();
    workspace.edit_file("src/index.js", "console.log(2)").unwrap();
    workspace.edit_file("README.md", "notes").unwrap();
    workspace.flush().await;

    let reopened = JsonFileStore::open(dir.path()).unwrap();
    let tree = reopened.load_file_tree(&id).await.unwrap();
    assert_eq!(tree.file_contents("src/index.js"), Some("console.log(2)"));
    assert_eq!(tree.len(), 2);

    workspace.delete_path("src").await;
    let tree = reopened.load_file_tree(&id).await.unwrap();
    assert_eq!(tree.paths().collect::<Vec<_>>(), vec!["README.md"]);

    workspace.close_session().await;
}

#[tokio::test]
async fn ai_fragment_from_the_room_is_merged_locally() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::open(dir.path()).unwrap());
    let mut workspace = open_workspace(store).await;
    workspace.edit_file("index.js", "old").unwrap();

    let mut fragment = FileTree::new();
    fragment.write_file("index.js", "new").unwrap();
    fragment.write_file("lib/util.js", "export {}").unwrap();
    workspace.apply_server_event(ServerEvent::ProjectMessage {
        message: ChatMessage::ai("refactored", Some(fragment), None, Utc::now()),
    });

    assert_eq!(workspace.tree().file_contents("index.js"), Some("new"));
    assert!(workspace.new_paths().contains("lib/util.js"));
    assert_eq!(workspace.messages().len(), 1);

    workspace.close_session().await;
}

#[tokio::test]
async fn pending_edit_does_not_undo_a_persisted_ai_merge() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::open(dir.path()).unwrap());
    let mut workspace = open_workspace(store.clone()).await;
    let id = workspace.project_id().clone();
    workspace.edit_file("index.js", "local").unwrap();

    // Server side: the merged tree is persisted before the message goes out
    let mut fragment = FileTree::new();
    fragment.write_file("server.js", "listen(3000)").unwrap();
    let mut canonical = store.load_file_tree(&id).await.unwrap();
    canonical.merge(&fragment);
    store.save_file_tree(&id, canonical).await.unwrap();

    workspace.apply_server_event(ServerEvent::ProjectMessage {
        message: ChatMessage::ai("added a server", Some(fragment), None, Utc::now()),
    });
    workspace.flush().await;

    let stored = store.load_file_tree(&id).await.unwrap();
    assert_eq!(&stored, workspace.tree());
    assert_eq!(stored.file_contents("server.js"), Some("listen(3000)"));
    assert_eq!(stored.file_contents("index.js"), Some("local"));

    workspace.close_session().await;
}

#[cfg(unix)]
#[tokio::test]
async fn workspace_snapshot_runs_in_the_sandbox() {
    use atelier_core::config::SandboxConfig;
    use atelier_core::{RunStatus, SandboxController};

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::open(dir.path()).unwrap());
    let mut workspace = open_workspace(store).await;
    workspace.edit_file("run.sh", "echo hello-sandbox").unwrap();

    let mut sandbox = SandboxController::new(SandboxConfig::default());
    let mut run = sandbox.run_workspace(&workspace).await;
    assert_eq!(run.wait().await, RunStatus::Stopped);
    assert!(run.output().contains("hello-sandbox"));
    assert_eq!(sandbox.status(), RunStatus::Stopped);

    workspace.close_session().await;
}
