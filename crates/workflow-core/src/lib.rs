//! Delivery Orchestration Core
//!
//! Drives a software-delivery request through proposal, approval,
//! development, quality assurance and delivery, with human approval
//! gates, a simulated planning meeting and a pluggable coding agent.

pub mod clients;
pub mod config;
pub mod error;
pub mod meeting;
pub mod paths;
pub mod runtime;
pub mod store;
pub mod workflow;

// Re-export main types for easy access
pub use config::OrchestratorConfig;
pub use error::{WorkflowError, Result};
pub use paths::WorkflowPaths;
pub use runtime::OrchestratorRuntime;
pub use store::WorkflowStore;

pub use clients::{CommandCodingAgent, DirectoryWorkspaceManager, FileMessageBus, InMemoryMessageBus};
pub use meeting::{MeetingCoordinator, OpinionGenerator, TemplateOpinionGenerator};
pub use workflow::{
    ApprovalGate, CodingAgent, CommandWatcher, DecisionDelivery, EngineSettings, EscalationOutcome,
    MessageBus, WorkflowEngine, WorkspaceManager,
};
