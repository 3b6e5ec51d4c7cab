//! Atelier protocol types.
//!
//! Shared between the session gateway and clients: identifiers, the project
//! file tree, chat messages and the room event vocabulary.

mod event;
mod ids;
mod message;
mod tree;
pub mod wire;

pub use event::{ClientEvent, HandshakeRejection, ProjectView, ServerEvent};
pub use ids::{ClientKey, IdError, MessageId, ProjectId, UserId};
pub use message::{BuildCommand, ChatMessage, MessageBody, ReplyTo, Sender};
pub use tree::{FileNode, FileTree, TreeError};
pub use wire::WireError;
