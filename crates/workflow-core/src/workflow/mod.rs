//! Phase engine and its supporting pieces

pub mod approval_gate;
pub mod command_watcher;
pub mod deliverable;
pub mod engine;
pub mod proposal_builder;
pub mod state_machine;
pub mod task_graph;
pub mod traits;

pub use approval_gate::{ApprovalGate, ApprovalWaiter};
pub use command_watcher::{enqueue_command, CommandWatcher};
pub use engine::{
    DecisionDelivery, EngineSettings, EscalationOutcome, RestoreSummary, WorkflowEngine,
    ORCHESTRATOR_AGENT_ID,
};
pub use traits::{
    CodingAgent, CodingAgentOutput, CodingAgentRequest, MessageBus, WorkspaceInfo, WorkspaceManager,
};
