//! Inbox watcher for operator commands
//!
//! The inbox directory is treated like a message queue: each `*.json` file
//! holds one `WorkflowCommand`. A file is claimed by renaming it to
//! `.processing`, then moved to `processed/` or `failed/` once dispatched.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::{debug, error, info, warn};
use tokio::time::{sleep, Duration};
use uuid::Uuid;
use workflow_types::{EscalationDecision, WorkflowCommand, WorkflowId};
use crate::error::{WorkflowError, Result};
use crate::paths::WorkflowPaths;
use crate::store::write_json_atomic;
use super::engine::{EscalationOutcome, WorkflowEngine};

pub struct CommandWatcher {
    engine: Arc<WorkflowEngine>,
    paths: WorkflowPaths,
}

/// Drop a command into the inbox; the watcher picks it up on its next scan
pub async fn enqueue_command(paths: &WorkflowPaths, command: &WorkflowCommand) -> Result<PathBuf> {
    let file_name = format!(
        "{}-{}-{}.json",
        chrono::Utc::now().format("%Y%m%d%H%M%S%3f"),
        command.name(),
        Uuid::new_v4().simple()
    );
    let path = paths.inbox_dir().join(file_name);
    write_json_atomic(&path, command).await?;
    Ok(path)
}

impl CommandWatcher {
    pub fn new(engine: Arc<WorkflowEngine>, paths: WorkflowPaths) -> Self {
        Self { engine, paths }
    }

    /// Scan forever at `interval`
    pub async fn start(self: Arc<Self>, interval: Duration) {
        info!("Starting command watcher for directory: {:?}", self.paths.inbox_dir());
        loop {
            self.process_pending().await;
            sleep(interval).await;
        }
    }

    /// Process every command currently in the inbox, oldest name first. Returns how many were handled.
    pub async fn process_pending(&self) -> usize {
        let files = match self.pending_files().await {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to read inbox directory: {}", e);
                return 0;
            }
        };

        let mut handled = 0;
        for path in files {
            if self.process_command_file(&path).await {
                handled += 1;
            }
        }
        if handled > 0 {
            debug!("Processed {} inbox command(s)", handled);
        }
        handled
    }

    async fn pending_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(self.paths.inbox_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if file_name.starts_with('.') || !file_name.ends_with(".json") {
                continue;
            }
            if entry.file_type().await?.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Returns false if the file could not be claimed
    async fn process_command_file(&self, path: &Path) -> bool {
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let processing_path = path.with_extension("json.processing");
        if let Err(e) = tokio::fs::rename(path, &processing_path).await {
            // another process claimed it first
            debug!("Could not claim {}: {}", file_name, e);
            return false;
        }

        let outcome = match self.read_command(&processing_path).await {
            Ok(command) => {
                info!("Processing {} command from {}", command.name(), file_name);
                self.dispatch(command).await
            }
            Err(e) => Err(e),
        };

        let target_dir = match &outcome {
            Ok(()) => self.paths.inbox_processed_dir(),
            Err(e) => {
                error!("Command {} failed: {}", file_name, e);
                self.paths.inbox_failed_dir()
            }
        };
        self.archive(&processing_path, &target_dir, &file_name).await;
        true
    }

    async fn read_command(&self, path: &Path) -> Result<WorkflowCommand> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn dispatch(&self, command: WorkflowCommand) -> Result<()> {
        match command {
            WorkflowCommand::Start { instruction, project_id } => {
                let id = self.engine.start_workflow(&instruction, &project_id).await?;
                info!("Inbox started workflow {}", id);
            }
            WorkflowCommand::Decide { workflow_id, action, feedback } => {
                let id = checked_id(&workflow_id)?;
                let delivery = self.engine.submit_decision(&id, action, feedback).await?;
                info!("Decision {} for workflow {} delivered: {:?}", action, id, delivery);
            }
            WorkflowCommand::Escalation { workflow_id, action, reason } => {
                let id = checked_id(&workflow_id)?;
                let decision = EscalationDecision { action, reason };
                if let EscalationOutcome::ResumeRequired { phase } = self.engine.handle_escalation(&id, decision).await? {
                    info!("Resuming workflow {} in {} phase", id, phase);
                    self.engine.resume_workflow(&id).await?;
                }
            }
            WorkflowCommand::Terminate { workflow_id, reason } => {
                let id = checked_id(&workflow_id)?;
                self.engine
                    .terminate_workflow(&id, reason.as_deref().unwrap_or_default())
                    .await?;
            }
            WorkflowCommand::Rollback { workflow_id, target_phase } => {
                let id = checked_id(&workflow_id)?;
                self.engine.rollback_to_phase(&id, target_phase).await?;
                self.engine.resume_workflow(&id).await?;
            }
        }
        Ok(())
    }

    async fn archive(&self, processing_path: &Path, target_dir: &Path, file_name: &str) {
        if let Err(e) = tokio::fs::create_dir_all(target_dir).await {
            error!("Failed to create {:?}: {}", target_dir, e);
        }
        let stem = file_name.trim_end_matches(".json");
        let target = target_dir.join(format!(
            "{}_{}.json",
            stem,
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));
        if let Err(e) = tokio::fs::rename(processing_path, &target).await {
            error!("Failed to move {} to {:?}: {}", file_name, target_dir, e);
        }
    }
}

/// Deserialized ids skip validation; reject anything that is not a plain path segment
fn checked_id(id: &WorkflowId) -> Result<WorkflowId> {
    WorkflowId::from_string(id.as_str()).map_err(WorkflowError::from)
}
