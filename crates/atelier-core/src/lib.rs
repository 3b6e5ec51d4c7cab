//! Atelier Core - collaborative workspace engine
//!
//! This crate provides the canonical project store, the client-side
//! reconciliation layer that keeps an optimistic copy of the file tree and
//! chat log, the merge of AI-proposed file trees, and the sandbox that
//! mounts a tree and runs it while streaming output.

pub mod ai;
pub mod config;
pub mod sandbox;
pub mod session;
pub mod store;
pub mod sync;

pub use config::AtelierConfig;
pub use ai::{AiResponder, AiResponse, MergeEngine};
pub use sandbox::{RunStatus, SandboxController};
pub use store::{JsonFileStore, MemoryStore, Project, StoreError, WorkspaceStore};
pub use sync::Workspace;
