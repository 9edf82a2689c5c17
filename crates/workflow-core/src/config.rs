//! Configuration management for the orchestrator

use serde::{Deserialize, Serialize};
use crate::error::{WorkflowError, Result};
use crate::meeting::participants::is_specialist_agent_id;
use crate::workflow::ORCHESTRATOR_AGENT_ID;
use std::path::{Path, PathBuf};

/// Raw configuration structure matching the JSON file
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(alias = "dataRoot", alias = "base_path")]
    pub data_root: String,

    #[serde(alias = "facilitatorId", default = "default_facilitator_id")]
    pub facilitator_id: String,

    #[serde(alias = "workspaceRoot", default)]
    pub workspace_root: Option<String>,

    #[serde(alias = "codingAgent", default)]
    pub coding_agent: Option<CodingAgentConfig>,

    #[serde(alias = "maxTaskRetries", default)]
    pub max_task_retries: u32,

    #[serde(alias = "maxQualityIterations", default = "default_max_quality_iterations")]
    pub max_quality_iterations: u32,

    #[serde(default)]
    pub inbox: InboxConfig,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub data_root: PathBuf,
    pub facilitator_id: String,
    pub workspace_root: Option<PathBuf>,
    pub coding_agent: Option<CodingAgentConfig>,
    pub max_task_retries: u32,
    pub max_quality_iterations: u32,
    pub inbox: InboxConfig,
}

/// External coding-agent CLI. The prompt is passed as the final argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodingAgentConfig {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(alias = "timeout", default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self { poll_interval_secs: default_poll_interval_secs() }
    }
}

// Default functions
fn default_facilitator_id() -> String {
    "facilitator".to_string()
}

fn default_max_quality_iterations() -> u32 {
    3
}

fn default_agent_timeout_secs() -> u64 {
    600
}

fn default_poll_interval_secs() -> u64 {
    5
}

impl OrchestratorConfig {
    /// Configuration with defaults for everything except the data root
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            facilitator_id: default_facilitator_id(),
            workspace_root: None,
            coding_agent: None,
            max_task_retries: 0,
            max_quality_iterations: default_max_quality_iterations(),
            inbox: InboxConfig::default(),
        }
    }

    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| WorkflowError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_json_str(&content)
    }

    /// Load configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw_config: RawConfig = serde_json::from_str(json)
            .map_err(|e| WorkflowError::Config(format!("Failed to parse config: {}", e)))?;

        let config = Self::from_raw_config(raw_config);
        config.validate()?;
        Ok(config)
    }

    fn from_raw_config(raw: RawConfig) -> Self {
        Self {
            data_root: PathBuf::from(raw.data_root),
            facilitator_id: raw.facilitator_id,
            workspace_root: raw.workspace_root.filter(|p| !p.trim().is_empty()).map(PathBuf::from),
            coding_agent: raw.coding_agent,
            max_task_retries: raw.max_task_retries,
            max_quality_iterations: raw.max_quality_iterations,
            inbox: raw.inbox,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.data_root.as_os_str().is_empty() {
            return Err(WorkflowError::Config("data_root is required".to_string()));
        }

        if self.facilitator_id.trim().is_empty() {
            return Err(WorkflowError::Config("facilitator_id must not be empty".to_string()));
        }

        let facilitator_id = self.facilitator_id.trim();
        if facilitator_id == ORCHESTRATOR_AGENT_ID || is_specialist_agent_id(facilitator_id) {
            return Err(WorkflowError::Config(format!(
                "facilitator_id {} collides with a built-in agent id",
                facilitator_id
            )));
        }

        if let Some(agent) = &self.coding_agent {
            if agent.command.trim().is_empty() {
                return Err(WorkflowError::Config("coding_agent.command must not be empty".to_string()));
            }
            if agent.timeout_secs == 0 {
                return Err(WorkflowError::Config("coding_agent.timeout_secs must be positive".to_string()));
            }
        }

        if self.max_quality_iterations == 0 {
            return Err(WorkflowError::Config("max_quality_iterations must be at least 1".to_string()));
        }

        if self.inbox.poll_interval_secs == 0 {
            return Err(WorkflowError::Config("inbox.poll_interval_secs must be positive".to_string()));
        }

        Ok(())
    }
}
