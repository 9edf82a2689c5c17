//! Workflow engine: owns every workflow's state and drives its phases
//!
//! Each workflow has at most one phase task at a time, serialized by a
//! per-workflow run lock. State changes go through `update`, which persists
//! before returning. A failed write leaves the in-memory change in place and
//! reports `Persistence` to the caller.

mod phases;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use workflow_types::{
    ApprovalAction, ApprovalContent, ApprovalDecision, DevelopmentProgress, EscalationAction,
    EscalationDecision, MessageType, PendingApproval, Phase, QualityResults, SubtaskStatus,
    WorkflowFilter, WorkflowId, WorkflowState, WorkflowStatus,
};
use crate::config::OrchestratorConfig;
use crate::error::{WorkflowError, Result};
use crate::meeting::MeetingCoordinator;
use crate::store::WorkflowStore;
use super::approval_gate::ApprovalGate;
use super::state_machine;
use super::traits::{CodingAgent, MessageBus, WorkspaceManager};

/// Sender id the engine uses on the message bus
pub const ORCHESTRATOR_AGENT_ID: &str = "orchestrator";

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub facilitator_id: String,
    pub max_task_retries: u32,
    pub max_quality_iterations: u32,
    pub agent_timeout: Duration,
    /// Used when no workspace manager is configured
    pub default_working_directory: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            facilitator_id: "facilitator".to_string(),
            max_task_retries: 0,
            max_quality_iterations: 3,
            agent_timeout: Duration::from_secs(600),
            default_working_directory: PathBuf::from("."),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        let defaults = Self::default();
        Self {
            facilitator_id: config.facilitator_id.clone(),
            max_task_retries: config.max_task_retries,
            max_quality_iterations: config.max_quality_iterations,
            agent_timeout: config
                .coding_agent
                .as_ref()
                .map(|agent| Duration::from_secs(agent.timeout_secs))
                .unwrap_or(defaults.agent_timeout),
            default_working_directory: defaults.default_working_directory,
        }
    }
}

/// How a submitted approval decision reached the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionDelivery {
    /// A live phase task was waiting and has been woken
    Resumed,
    /// Nobody was waiting; the decision was applied to the persisted state
    AppliedFromStore { execution_resumed: bool },
}

/// Result of `handle_escalation`. Retry and skip never restart execution
/// themselves; the caller decides when to call `resume_workflow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationOutcome {
    ResumeRequired { phase: Phase },
    Terminated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub loaded: usize,
    pub resumed: usize,
    pub awaiting_decision: usize,
    pub escalated: usize,
}

struct WorkflowEntry {
    state: Mutex<WorkflowState>,
    run_lock: Arc<Mutex<()>>,
}

impl WorkflowEntry {
    fn new(state: WorkflowState) -> Self {
        Self {
            state: Mutex::new(state),
            run_lock: Arc::new(Mutex::new(())),
        }
    }
}

pub struct WorkflowEngine {
    store: WorkflowStore,
    gate: Arc<ApprovalGate>,
    meetings: Arc<MeetingCoordinator>,
    bus: Arc<dyn MessageBus>,
    coding_agent: Option<Arc<dyn CodingAgent>>,
    workspace: Option<Arc<dyn WorkspaceManager>>,
    settings: EngineSettings,
    workflows: RwLock<HashMap<WorkflowId, Arc<WorkflowEntry>>>,
}

impl WorkflowEngine {
    pub fn new(
        store: WorkflowStore,
        gate: Arc<ApprovalGate>,
        meetings: Arc<MeetingCoordinator>,
        bus: Arc<dyn MessageBus>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            gate,
            meetings,
            bus,
            coding_agent: None,
            workspace: None,
            settings,
            workflows: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_coding_agent(mut self, agent: Arc<dyn CodingAgent>) -> Self {
        self.coding_agent = Some(agent);
        self
    }

    pub fn with_workspace_manager(mut self, workspace: Arc<dyn WorkspaceManager>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn approval_gate(&self) -> &Arc<ApprovalGate> {
        &self.gate
    }

    pub fn meetings(&self) -> &Arc<MeetingCoordinator> {
        &self.meetings
    }

    /// Create a workflow and start its proposal phase in the background
    pub async fn start_workflow(self: &Arc<Self>, instruction: &str, project_id: &str) -> Result<WorkflowId> {
        let instruction = instruction.trim();
        let project_id = project_id.trim();
        if instruction.is_empty() {
            return Err(WorkflowError::InvalidInput("instruction must not be empty".to_string()));
        }
        if project_id.is_empty() {
            return Err(WorkflowError::InvalidInput("project id must not be empty".to_string()));
        }

        let state = WorkflowState::new(instruction.to_string(), project_id.to_string());
        let id = state.workflow_id.clone();
        self.store.save_state(&state).await?;

        let entry = Arc::new(WorkflowEntry::new(state));
        let run_lock = entry.run_lock.clone();
        self.workflows.write().await.insert(id.clone(), entry);

        log::info!("Started workflow {} for project {}", id, project_id);
        self.spawn_phase_task(id.clone(), run_lock);
        Ok(id)
    }

    /// Memory first, then the persisted document
    pub async fn get_workflow_state(&self, id: &WorkflowId) -> Result<Option<WorkflowState>> {
        match self.entry(id).await {
            Ok(entry) => Ok(Some(entry.state.lock().await.clone())),
            Err(WorkflowError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Every known workflow, in-memory state taking precedence over disk, oldest first
    pub async fn list_workflows(&self, filter: Option<&WorkflowFilter>) -> Result<Vec<WorkflowState>> {
        let mut states: HashMap<WorkflowId, WorkflowState> = self
            .store
            .load_all_states()
            .await?
            .into_iter()
            .map(|state| (state.workflow_id.clone(), state))
            .collect();

        let entries: Vec<Arc<WorkflowEntry>> = self.workflows.read().await.values().cloned().collect();
        for entry in entries {
            let state = entry.state.lock().await.clone();
            states.insert(state.workflow_id.clone(), state);
        }

        let mut result: Vec<WorkflowState> = states
            .into_values()
            .filter(|state| filter.map_or(true, |f| f.matches(state)))
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    /// Return to a strictly earlier phase. Execution is not restarted; call `resume_workflow`.
    pub async fn rollback_to_phase(&self, id: &WorkflowId, target: Phase) -> Result<()> {
        let result = self
            .update(id, |state| {
                state_machine::rollback(state, target, format!("rollback to {}", target))?;
                state.escalation = None;
                reset_artifacts_after(state, target);
                Ok(())
            })
            .await;

        if matches!(result, Ok(()) | Err(WorkflowError::Persistence { .. })) {
            self.gate.cancel_approval(id, &format!("rolled back to {}", target)).await;
        }
        result
    }

    /// Terminal exit from any phase; wakes an outstanding approval wait with a cancellation
    pub async fn terminate_workflow(&self, id: &WorkflowId, reason: &str) -> Result<()> {
        let reason = match reason.trim() {
            "" => "terminated by operator",
            trimmed => trimmed,
        };

        let result = self
            .update(id, |state| match state.status {
                WorkflowStatus::Completed => Err(WorkflowError::Workflow(format!(
                    "workflow {} is already completed",
                    state.workflow_id
                ))),
                WorkflowStatus::Terminated => Ok(()),
                _ => {
                    state.status = WorkflowStatus::Terminated;
                    state.escalation = None;
                    state.log_error(format!("Terminated: {}", reason));
                    Ok(())
                }
            })
            .await;

        if matches!(result, Ok(()) | Err(WorkflowError::Persistence { .. })) {
            self.gate.cancel_approval(id, reason).await;
            log::info!("Workflow {} terminated: {}", id, reason);
        }
        result
    }

    /// Apply an operator decision to the outstanding escalation
    pub async fn handle_escalation(&self, id: &WorkflowId, decision: EscalationDecision) -> Result<EscalationOutcome> {
        let outcome = self
            .update(id, |state| {
                if state.status.is_terminal() || state.status == WorkflowStatus::Failed {
                    return Err(WorkflowError::Workflow(format!(
                        "workflow {} is {}; escalations can no longer be handled",
                        state.workflow_id, state.status
                    )));
                }
                let escalation = state.escalation.clone().ok_or_else(|| {
                    WorkflowError::NotFound(format!("no escalation outstanding for workflow {}", state.workflow_id))
                })?;

                if decision.action == EscalationAction::Abort {
                    state.escalation = None;
                    return Ok(EscalationOutcome::Terminated);
                }

                let workflow_id = state.workflow_id.clone();
                let progress = state.progress.as_mut().ok_or_else(|| {
                    WorkflowError::NotFound(format!("workflow {} has no development progress", workflow_id))
                })?;
                let subtask = progress.subtask_mut(&escalation.ticket_id).ok_or_else(|| {
                    WorkflowError::NotFound(format!("task {} not found in workflow {}", escalation.ticket_id, workflow_id))
                })?;

                let skipped = decision.action == EscalationAction::Skip;
                if skipped {
                    subtask.status = SubtaskStatus::Skipped;
                    subtask.completed_at = Some(Utc::now());
                } else {
                    subtask.status = SubtaskStatus::Pending;
                    subtask.assigned_worker = None;
                    subtask.review_status = None;
                    subtask.started_at = None;
                    subtask.completed_at = None;
                }
                if skipped {
                    progress.skipped_tasks += 1;
                }
                progress.failed_tasks = progress.failed_tasks.saturating_sub(1);
                progress.updated_at = Some(Utc::now());

                state.escalation = None;
                state.status = WorkflowStatus::Running;
                Ok(EscalationOutcome::ResumeRequired { phase: state.current_phase })
            })
            .await?;

        log::info!("Escalation for workflow {} resolved with {:?}", id, decision.action);

        if outcome == EscalationOutcome::Terminated {
            let reason = decision
                .reason
                .clone()
                .unwrap_or_else(|| "escalation aborted".to_string());
            self.terminate_workflow(id, &reason).await?;
        }
        Ok(outcome)
    }

    /// Spawn phase execution if the workflow is running. Returns whether a task was spawned.
    pub async fn resume_workflow(self: &Arc<Self>, id: &WorkflowId) -> Result<bool> {
        let entry = self.entry(id).await?;
        let status = entry.state.lock().await.status;
        if status != WorkflowStatus::Running {
            log::debug!("Workflow {} is {}; nothing to resume", id, status);
            return Ok(false);
        }
        self.spawn_phase_task(id.clone(), entry.run_lock.clone());
        Ok(true)
    }

    /// Submit a human decision for the phase the workflow is waiting on.
    ///
    /// Wakes the waiting phase task when there is one; otherwise applies the
    /// persisted decision directly and restarts execution.
    pub async fn submit_decision(
        self: &Arc<Self>,
        id: &WorkflowId,
        action: ApprovalAction,
        feedback: Option<String>,
    ) -> Result<DecisionDelivery> {
        let state = self.snapshot(id).await?;
        let phase = state.current_phase;
        if state.status != WorkflowStatus::WaitingApproval
            || state.escalation.is_some()
            || !matches!(phase, Phase::Approval | Phase::Delivery)
        {
            return Err(WorkflowError::Workflow(format!(
                "workflow {} is not awaiting an approval decision ({} / {})",
                id, phase, state.status
            )));
        }

        let decision = ApprovalDecision::new(id.clone(), phase, action, feedback);
        if self.gate.submit_decision(id, decision.clone()).await? {
            return Ok(DecisionDelivery::Resumed);
        }

        log::info!("Applying {} decision for workflow {} from persisted state", action, id);
        self.apply_approval_decision(id, decision).await?;
        let execution_resumed = self.resume_workflow(id).await?;
        Ok(DecisionDelivery::AppliedFromStore { execution_resumed })
    }

    /// Reload every persisted workflow and resume the ones that were running
    pub async fn restore_workflows(self: &Arc<Self>) -> Result<RestoreSummary> {
        let mut summary = RestoreSummary::default();

        for state in self.store.load_all_states().await? {
            let id = state.workflow_id.clone();
            let entry = self
                .workflows
                .write()
                .await
                .entry(id.clone())
                .or_insert_with(|| Arc::new(WorkflowEntry::new(state.clone())))
                .clone();
            summary.loaded += 1;

            match state.status {
                WorkflowStatus::Running => {
                    self.spawn_phase_task(id, entry.run_lock.clone());
                    summary.resumed += 1;
                }
                WorkflowStatus::WaitingApproval if state.escalation.is_some() => {
                    summary.escalated += 1;
                }
                WorkflowStatus::WaitingApproval => {
                    let content = match state.current_phase {
                        Phase::Approval => state.proposal.clone().map(ApprovalContent::Proposal),
                        Phase::Delivery => state.deliverable.clone().map(ApprovalContent::Deliverable),
                        _ => None,
                    };
                    match content {
                        Some(content) => {
                            self.gate.restore_pending_approval(&id, state.current_phase, content).await;
                            summary.awaiting_decision += 1;
                        }
                        None => log::warn!(
                            "Workflow {} waits for approval in {} without approval content",
                            id,
                            state.current_phase
                        ),
                    }
                }
                WorkflowStatus::Failed | WorkflowStatus::Completed | WorkflowStatus::Terminated => {}
            }
        }

        log::info!(
            "Restored {} workflow(s): {} resumed, {} awaiting decision, {} escalated",
            summary.loaded,
            summary.resumed,
            summary.awaiting_decision,
            summary.escalated
        );
        Ok(summary)
    }

    pub async fn get_progress(&self, id: &WorkflowId) -> Result<DevelopmentProgress> {
        Ok(self.snapshot(id).await?.progress.unwrap_or_default())
    }

    pub async fn get_quality_results(&self, id: &WorkflowId) -> Result<QualityResults> {
        Ok(self.snapshot(id).await?.quality_results.unwrap_or_default())
    }

    pub async fn get_pending_approvals(&self) -> Vec<PendingApproval> {
        self.gate.get_pending_approvals().await
    }

    pub async fn get_approval_history(&self, id: &WorkflowId) -> Result<Vec<ApprovalDecision>> {
        self.gate.get_approval_history(id).await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn entry(&self, id: &WorkflowId) -> Result<Arc<WorkflowEntry>> {
        if let Some(entry) = self.workflows.read().await.get(id) {
            return Ok(entry.clone());
        }
        let state = self
            .store
            .load_state(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("workflow {}", id)))?;
        let mut workflows = self.workflows.write().await;
        Ok(workflows
            .entry(id.clone())
            .or_insert_with(|| Arc::new(WorkflowEntry::new(state)))
            .clone())
    }

    async fn snapshot(&self, id: &WorkflowId) -> Result<WorkflowState> {
        let entry = self.entry(id).await?;
        let state = entry.state.lock().await.clone();
        Ok(state)
    }

    /// Mutate under the workflow lock and persist before returning.
    /// `f` must not mutate before it fails.
    async fn update<R, F>(&self, id: &WorkflowId, f: F) -> Result<R>
    where
        F: FnOnce(&mut WorkflowState) -> Result<R>,
    {
        let entry = self.entry(id).await?;
        let mut state = entry.state.lock().await;
        let result = f(&mut *state)?;
        state.updated_at = Utc::now();
        self.store.save_state(&state).await?;
        Ok(result)
    }

    /// Like `update`, but only while the workflow is still running `phase`
    async fn update_in_phase<R, F>(&self, id: &WorkflowId, phase: Phase, f: F) -> Result<R>
    where
        F: FnOnce(&mut WorkflowState) -> Result<R>,
    {
        self.update(id, |state| {
            if state.current_phase != phase || state.status != WorkflowStatus::Running {
                return Err(WorkflowError::PhaseSuperseded(phase));
            }
            f(state)
        })
        .await
    }

    fn spawn_phase_task(self: &Arc<Self>, id: WorkflowId, run_lock: Arc<Mutex<()>>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let _running = run_lock.lock_owned().await;
            engine.run_phases(&id).await;
        });
    }

    /// Execute phases until the workflow stops running
    async fn run_phases(&self, id: &WorkflowId) {
        loop {
            let (phase, status) = match self.snapshot(id).await {
                Ok(state) => (state.current_phase, state.status),
                Err(e) => {
                    log::error!("Cannot run workflow {}: {}", id, e);
                    return;
                }
            };
            if status != WorkflowStatus::Running {
                log::debug!("Workflow {} stopped in {} phase ({})", id, phase, status);
                return;
            }

            log::info!("Workflow {} executing {} phase", id, phase);
            let result = match phase {
                Phase::Proposal => self.run_proposal_phase(id).await,
                Phase::Approval => self.run_approval_phase(id).await,
                Phase::Development => self.run_development_phase(id).await,
                Phase::QualityAssurance => self.run_quality_phase(id).await,
                Phase::Delivery => self.run_delivery_phase(id).await,
            };

            match result {
                Ok(()) => {}
                Err(e) if e.is_quiet_exit() => {
                    log::info!("Workflow {} left {} phase: {}", id, phase, e);
                    return;
                }
                Err(e) => {
                    self.fail_workflow(id, phase, &e).await;
                    return;
                }
            }
        }
    }

    async fn fail_workflow(&self, id: &WorkflowId, phase: Phase, error: &WorkflowError) {
        log::error!("Workflow {} failed in {} phase: {}", id, phase, error);
        let result = self
            .update(id, |state| {
                if !state.status.is_terminal() {
                    state.status = WorkflowStatus::Failed;
                    state.log_error(format!("{} phase failed: {}", phase, error));
                }
                Ok(())
            })
            .await;
        if let Err(e) = result {
            log::error!("Failed to record failure of workflow {}: {}", id, e);
        }
    }

    /// Append the decision and branch on it. Shared by the live and the fallback path.
    async fn apply_approval_decision(&self, id: &WorkflowId, decision: ApprovalDecision) -> Result<()> {
        let phase = decision.phase;
        self.update(id, |state| {
            if state.status != WorkflowStatus::WaitingApproval
                || state.current_phase != phase
                || state.escalation.is_some()
            {
                return Err(WorkflowError::PhaseSuperseded(phase));
            }
            if !matches!(phase, Phase::Approval | Phase::Delivery) {
                return Err(WorkflowError::Workflow(format!("{} phase does not take approval decisions", phase)));
            }

            let feedback = decision.feedback_or_default().to_string();
            match (phase, decision.action) {
                (Phase::Approval, ApprovalAction::Approve) => {
                    state_machine::transition(state, Phase::Development, "proposal approved")?;
                    state.status = WorkflowStatus::Running;
                }
                (_, ApprovalAction::Approve) => {
                    state.status = WorkflowStatus::Completed;
                    log::info!("Workflow {} completed", state.workflow_id);
                }
                (Phase::Approval, ApprovalAction::RequestRevision) => {
                    state_machine::transition(state, Phase::Proposal, format!("revision requested: {}", feedback))?;
                    state.status = WorkflowStatus::Running;
                }
                (_, ApprovalAction::RequestRevision) => {
                    state_machine::transition(state, Phase::Development, format!("revision requested: {}", feedback))?;
                    state.deliverable = None;
                    state.quality_results = None;
                    state.status = WorkflowStatus::Running;
                }
                (_, ApprovalAction::Reject) => {
                    state.status = WorkflowStatus::Terminated;
                    state.log_error(format!("{} rejected: {}", phase, feedback));
                    log::info!("Workflow {} terminated by {} rejection", state.workflow_id, phase);
                }
            }
            state.approval_decisions.push(decision);
            Ok(())
        })
        .await
    }

    async fn notify(&self, run_id: &str, message_type: MessageType, to: &str, payload: Value) {
        let message = self.bus.create_message(run_id, message_type, ORCHESTRATOR_AGENT_ID, to, payload);
        if let Err(e) = self.bus.record(message).await {
            log::warn!("Failed to publish {:?} for run {}: {}", message_type, run_id, e);
        }
    }
}

/// Drop artefacts produced by phases after `target`
fn reset_artifacts_after(state: &mut WorkflowState, target: Phase) {
    if target.index() <= Phase::Approval.index() {
        state.progress = None;
    }
    if target.index() <= Phase::Development.index() {
        state.quality_results = None;
        state.quality_iterations = 0;
    }
    if target.index() <= Phase::QualityAssurance.index() {
        state.deliverable = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_types::{CheckResult, QualityResults};

    #[test]
    fn test_reset_artifacts_after_development() {
        let mut state = WorkflowState::new("x".to_string(), "p".to_string());
        state.progress = Some(DevelopmentProgress::default());
        state.quality_results = Some(QualityResults {
            lint: CheckResult::default(),
            ..Default::default()
        });
        state.quality_iterations = 2;

        reset_artifacts_after(&mut state, Phase::Development);
        assert!(state.progress.is_some());
        assert!(state.quality_results.is_none());
        assert_eq!(state.quality_iterations, 0);

        reset_artifacts_after(&mut state, Phase::Proposal);
        assert!(state.progress.is_none());
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = OrchestratorConfig::new("/tmp/data");
        config.max_task_retries = 2;
        config.coding_agent = Some(crate::config::CodingAgentConfig {
            command: "agent".to_string(),
            args: vec![],
            timeout_secs: 30,
        });
        let settings = EngineSettings::from_config(&config);
        assert_eq!(settings.max_task_retries, 2);
        assert_eq!(settings.agent_timeout, Duration::from_secs(30));
        assert_eq!(settings.facilitator_id, "facilitator");
    }
}
