//! Collaborator traits the engine and meeting coordinator depend on
//!
//! Each collaborator is injected at construction. Mocks implement these
//! traits directly in tests.

use std::path::PathBuf;
use std::time::Duration;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use workflow_types::{AgentMessage, MessageType};
use crate::error::Result;

/// Pull-model agent message bus with consumed-once delivery
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Deliver to the recipient's inbox and append to the run history
    async fn send(&self, message: AgentMessage) -> Result<()>;

    /// Append to the run history without queueing for the addressee.
    /// Used for audit traffic that no agent polls for.
    async fn record(&self, message: AgentMessage) -> Result<()>;

    /// Messages addressed to `agent_id`. A message is returned by at most one poll.
    async fn poll(&self, agent_id: &str, timeout: Duration) -> Result<Vec<AgentMessage>>;

    /// Every message sent for `run_id`, in send order
    async fn get_message_history(&self, run_id: &str) -> Result<Vec<AgentMessage>>;

    fn create_message(
        &self,
        run_id: &str,
        message_type: MessageType,
        from: &str,
        to: &str,
        payload: Value,
    ) -> AgentMessage {
        AgentMessage::new(run_id, message_type, from, to, payload)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodingAgentRequest {
    pub working_directory: PathBuf,
    pub prompt: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodingAgentOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub output: String,
    pub stderr: String,
}

/// Backend that writes or reviews code. Used for implementation, review, lint and test steps.
#[async_trait]
pub trait CodingAgent: Send + Sync {
    async fn execute(&self, request: CodingAgentRequest) -> Result<CodingAgentOutput>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub project_id: String,
    pub local_path: PathBuf,
}

/// Resolves a project's working directory
#[async_trait]
pub trait WorkspaceManager: Send + Sync {
    async fn get_workspace_info(&self, project_id: &str) -> Result<WorkspaceInfo>;
}
