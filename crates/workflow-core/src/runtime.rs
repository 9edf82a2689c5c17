//! Wires the configured collaborators into a ready-to-run orchestrator

use std::sync::Arc;
use workflow_types::WorkflowCommand;
use crate::clients::{CommandCodingAgent, DirectoryWorkspaceManager, FileMessageBus};
use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::meeting::{MeetingCoordinator, TemplateOpinionGenerator};
use crate::paths::WorkflowPaths;
use crate::store::WorkflowStore;
use crate::workflow::{
    enqueue_command, ApprovalGate, CommandWatcher, EngineSettings, MessageBus, RestoreSummary,
    WorkflowEngine,
};

pub struct OrchestratorRuntime {
    pub config: OrchestratorConfig,
    pub paths: WorkflowPaths,
    pub store: WorkflowStore,
    pub engine: Arc<WorkflowEngine>,
    pub watcher: Arc<CommandWatcher>,
}

impl OrchestratorRuntime {
    /// Create the data directories and build every component from `config`
    pub async fn build(config: OrchestratorConfig) -> Result<Self> {
        config.validate()?;
        let paths = WorkflowPaths::new(&config.data_root);
        for dir in paths.all_directories() {
            tokio::fs::create_dir_all(&dir).await?;
        }
        log::info!("Using data directory: {}", paths.root().display());

        let store = WorkflowStore::new(paths.clone());
        let bus: Arc<dyn MessageBus> = Arc::new(FileMessageBus::new(paths.clone()));
        let gate = Arc::new(ApprovalGate::new(paths.clone()));
        let meetings = Arc::new(MeetingCoordinator::new(
            store.clone(),
            bus.clone(),
            Arc::new(TemplateOpinionGenerator),
        ));

        let mut engine = WorkflowEngine::new(
            store.clone(),
            gate,
            meetings,
            bus,
            EngineSettings::from_config(&config),
        );
        if let Some(agent) = &config.coding_agent {
            log::info!("Coding agent: {}", agent.command);
            engine = engine.with_coding_agent(Arc::new(CommandCodingAgent::new(agent.clone())));
        } else {
            log::info!("No coding agent configured; development and QA steps are simulated");
        }
        if let Some(root) = &config.workspace_root {
            tokio::fs::create_dir_all(root).await?;
            engine = engine.with_workspace_manager(Arc::new(DirectoryWorkspaceManager::new(root.clone())));
        }

        let engine = Arc::new(engine);
        let watcher = Arc::new(CommandWatcher::new(engine.clone(), paths.clone()));

        Ok(Self {
            config,
            paths,
            store,
            engine,
            watcher,
        })
    }

    /// Reload persisted workflows and drain commands left in the inbox
    pub async fn restore(&self) -> Result<RestoreSummary> {
        let summary = self.engine.restore_workflows().await?;
        let handled = self.watcher.process_pending().await;
        if handled > 0 {
            log::info!("Processed {} queued command(s) on startup", handled);
        }
        Ok(summary)
    }

    pub async fn enqueue(&self, command: &WorkflowCommand) -> Result<std::path::PathBuf> {
        enqueue_command(&self.paths, command).await
    }
}
