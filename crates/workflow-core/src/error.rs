//! Error types for the delivery workflow engine

use std::path::PathBuf;
use thiserror::Error;
use workflow_types::{Phase, TypeError};

/// Main error type for all orchestration operations
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("Invalid rollback: {0}")]
    InvalidRollback(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence failed for {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: Box<WorkflowError>,
    },

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Approval already pending for workflow {0}")]
    ApprovalAlreadyPending(String),

    #[error("Approval cancelled for workflow {workflow_id}: {reason}")]
    ApprovalCancelled { workflow_id: String, reason: String },

    #[error("Meeting failed: {0}")]
    Meeting(String),

    #[error("Dependency cycle among tasks: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error("Coding agent error: {0}")]
    Agent(String),

    #[error("Phase {0} superseded while executing")]
    PhaseSuperseded(Phase),

    #[error("Workflow error: {0}")]
    Workflow(String),
}

impl WorkflowError {
    pub fn persistence(path: impl Into<PathBuf>, source: WorkflowError) -> Self {
        Self::Persistence { path: path.into(), source: Box::new(source) }
    }

    /// Errors that end a phase body without marking the workflow failed
    pub fn is_quiet_exit(&self) -> bool {
        matches!(self, Self::ApprovalCancelled { .. } | Self::PhaseSuperseded(_))
    }
}

impl From<TypeError> for WorkflowError {
    fn from(err: TypeError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, WorkflowError>;
