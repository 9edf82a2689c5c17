/// Path layout for persisted workflow documents
use std::path::{Path, PathBuf};
use workflow_types::WorkflowId;

// Directory names (relative to the data root)
pub const WORKFLOWS_DIR_NAME: &str = "workflows";
pub const MEETINGS_DIR_NAME: &str = "meetings";
pub const BUS_DIR_NAME: &str = "bus";
pub const BUS_INBOX_DIR_NAME: &str = "inbox";
pub const BUS_HISTORY_DIR_NAME: &str = "history";
pub const INBOX_DIR_NAME: &str = "inbox";
pub const PROCESSED_DIR_NAME: &str = "processed";
pub const FAILED_DIR_NAME: &str = "failed";

// Document names
pub const WORKFLOW_FILE_NAME: &str = "workflow.json";
pub const PROPOSAL_FILE_NAME: &str = "proposal.json";
pub const APPROVALS_FILE_NAME: &str = "approvals.json";

/// Every path the engine writes, derived from one injected root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowPaths {
    root: PathBuf,
}

impl WorkflowPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workflows_dir(&self) -> PathBuf {
        self.root.join(WORKFLOWS_DIR_NAME)
    }

    pub fn workflow_dir(&self, id: &WorkflowId) -> PathBuf {
        self.workflows_dir().join(id.as_str())
    }

    pub fn workflow_file(&self, id: &WorkflowId) -> PathBuf {
        self.workflow_dir(id).join(WORKFLOW_FILE_NAME)
    }

    pub fn proposal_file(&self, id: &WorkflowId) -> PathBuf {
        self.workflow_dir(id).join(PROPOSAL_FILE_NAME)
    }

    pub fn approvals_file(&self, id: &WorkflowId) -> PathBuf {
        self.workflow_dir(id).join(APPROVALS_FILE_NAME)
    }

    pub fn meetings_dir(&self, id: &WorkflowId) -> PathBuf {
        self.workflow_dir(id).join(MEETINGS_DIR_NAME)
    }

    pub fn meeting_file(&self, id: &WorkflowId, meeting_id: &str) -> PathBuf {
        self.meetings_dir(id).join(format!("{}.json", meeting_id))
    }

    pub fn bus_dir(&self) -> PathBuf {
        self.root.join(BUS_DIR_NAME)
    }

    pub fn bus_inbox_dir(&self, agent_id: &str) -> PathBuf {
        self.bus_dir().join(BUS_INBOX_DIR_NAME).join(agent_id)
    }

    pub fn bus_history_file(&self, run_id: &str) -> PathBuf {
        self.bus_dir().join(BUS_HISTORY_DIR_NAME).join(format!("{}.jsonl", run_id))
    }

    pub fn inbox_dir(&self) -> PathBuf {
        self.root.join(INBOX_DIR_NAME)
    }

    pub fn inbox_processed_dir(&self) -> PathBuf {
        self.inbox_dir().join(PROCESSED_DIR_NAME)
    }

    pub fn inbox_failed_dir(&self) -> PathBuf {
        self.inbox_dir().join(FAILED_DIR_NAME)
    }

    /// Directories created at startup
    pub fn all_directories(&self) -> Vec<PathBuf> {
        vec![
            self.root.clone(),
            self.workflows_dir(),
            self.bus_dir(),
            self.inbox_dir(),
            self.inbox_processed_dir(),
            self.inbox_failed_dir(),
        ]
    }
}
