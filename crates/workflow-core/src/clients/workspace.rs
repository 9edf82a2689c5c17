//! Workspace resolution for projects on the local filesystem

use std::path::PathBuf;
use async_trait::async_trait;
use crate::error::{WorkflowError, Result};
use crate::workflow::traits::{WorkspaceInfo, WorkspaceManager};

/// Maps a project id to `<root>/<project_id>`, creating the directory on first use
pub struct DirectoryWorkspaceManager {
    root: PathBuf,
}

impl DirectoryWorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl WorkspaceManager for DirectoryWorkspaceManager {
    async fn get_workspace_info(&self, project_id: &str) -> Result<WorkspaceInfo> {
        let project_id = project_id.trim();
        if project_id.is_empty() || project_id.contains(['/', '\\']) || project_id.starts_with('.') {
            return Err(WorkflowError::InvalidInput(format!("invalid project id '{}'", project_id)));
        }

        let local_path = self.root.join(project_id);
        tokio::fs::create_dir_all(&local_path).await?;
        Ok(WorkspaceInfo {
            project_id: project_id.to_string(),
            local_path,
        })
    }
}
