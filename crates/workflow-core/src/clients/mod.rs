//! Adapters for the engine's collaborator traits

pub mod coding_agent;
pub mod message_bus;
pub mod workspace;

pub use coding_agent::CommandCodingAgent;
pub use message_bus::{FileMessageBus, InMemoryMessageBus};
pub use workspace::DirectoryWorkspaceManager;
