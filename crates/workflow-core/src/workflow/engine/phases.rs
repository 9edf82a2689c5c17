//! Phase bodies run by the engine's phase task

use std::path::{Path, PathBuf};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use workflow_types::{
    ApprovalAction, ApprovalContent, CheckResult, DevelopmentProgress, MessageType, Phase,
    ProposalTask, QualityResults, ReviewStatus, SubtaskProgress, SubtaskStatus, WorkflowEscalation,
    WorkflowId, WorkflowState, WorkflowStatus,
};
use crate::error::{WorkflowError, Result};
use crate::workflow::deliverable::build_deliverable;
use crate::workflow::proposal_builder::build_proposal;
use crate::workflow::state_machine::transition;
use crate::workflow::task_graph::execution_order;
use crate::workflow::traits::{CodingAgentOutput, CodingAgentRequest};
use super::WorkflowEngine;

static REVIEW_VERDICT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(approve[sd]?|lgtm|needs[_ ]revision|revis\w*|reject\w*)\b")
        .expect("Failed to compile review verdict regex")
});

struct TaskExecution {
    attempts: u32,
    outcome: std::result::Result<String, String>,
}

enum ReviewVerdict {
    Approved,
    NeedsRevision(String),
}

impl WorkflowEngine {
    pub(super) async fn run_proposal_phase(&self, id: &WorkflowId) -> Result<()> {
        let snapshot = self.snapshot(id).await?;
        let feedback = revision_feedback(&snapshot);
        let topic = match &feedback {
            Some(feedback) => format!("{} (revision feedback: {})", snapshot.instruction, feedback),
            None => snapshot.instruction.clone(),
        };

        let minutes = self
            .meetings
            .convene_meeting(id, &topic, &self.settings.facilitator_id)
            .await?;
        let proposal = build_proposal(id, &minutes);
        let document = self.store.save_proposal(&proposal, feedback).await?;
        log::info!(
            "Workflow {} proposal v{} with {} task(s)",
            id,
            document.version,
            proposal.task_breakdown.len()
        );

        self.update_in_phase(id, Phase::Proposal, |state| {
            transition(state, Phase::Approval, "proposal ready for review")?;
            state.meeting_minutes_ids.push(minutes.meeting_id.clone());
            state.proposal = Some(proposal);
            state.progress = None;
            state.quality_results = None;
            state.deliverable = None;
            state.quality_iterations = 0;
            Ok(())
        })
        .await
    }

    pub(super) async fn run_approval_phase(&self, id: &WorkflowId) -> Result<()> {
        let proposal = self
            .snapshot(id)
            .await?
            .proposal
            .ok_or_else(|| WorkflowError::Workflow(format!("workflow {} has no proposal to approve", id)))?;
        self.await_decision(id, Phase::Approval, ApprovalContent::Proposal(proposal), |_| {})
            .await
    }

    pub(super) async fn run_development_phase(&self, id: &WorkflowId) -> Result<()> {
        let snapshot = self.snapshot(id).await?;
        let proposal = snapshot
            .proposal
            .clone()
            .ok_or_else(|| WorkflowError::Workflow(format!("workflow {} has no proposal to develop", id)))?;
        let order = execution_order(&proposal.task_breakdown, &proposal.dependencies)?;

        self.update_in_phase(id, Phase::Development, |state| {
            if !state.progress.as_ref().map_or(false, |p| p.matches(&proposal)) {
                state.progress = Some(DevelopmentProgress::from_proposal(&proposal));
            }
            Ok(())
        })
        .await?;

        let working_directory = self.working_directory(&snapshot.project_id).await?;

        for task_id in order {
            let Some(task) = proposal.task_breakdown.iter().find(|t| t.id == task_id) else {
                continue;
            };

            let started = self
                .update_in_phase(id, Phase::Development, |state| {
                    let subtask = subtask_mut(state, &task.id)?;
                    if subtask.status.is_settled() {
                        return Ok(false);
                    }
                    subtask.status = SubtaskStatus::Working;
                    subtask.assigned_worker = Some(task.worker_type.agent_id());
                    subtask.review_status = None;
                    subtask.started_at = Some(Utc::now());
                    touch_progress(state);
                    Ok(true)
                })
                .await?;
            if !started {
                continue;
            }

            log::info!("Workflow {} working on {} ({})", id, task.id, task.worker_type);
            self.notify(
                &snapshot.run_id,
                MessageType::TaskAssign,
                &task.worker_type.agent_id(),
                json!({ "workflow_id": id, "task_id": task.id, "title": task.title }),
            )
            .await;

            let execution = self.execute_task(task, &working_directory, &snapshot.instruction).await;
            let output = match execution.outcome {
                Ok(output) => output,
                Err(details) => {
                    self.record_attempts(id, &task.id, execution.attempts).await?;
                    return self.escalate(id, &snapshot.run_id, task, details).await;
                }
            };

            self.update_in_phase(id, Phase::Development, |state| {
                let subtask = subtask_mut(state, &task.id)?;
                subtask.attempts += execution.attempts;
                subtask.status = SubtaskStatus::Review;
                subtask.review_status = Some(ReviewStatus::Pending);
                touch_progress(state);
                Ok(())
            })
            .await?;

            match self.review_task(task, &working_directory, &output).await {
                ReviewVerdict::Approved => {
                    self.update_in_phase(id, Phase::Development, |state| {
                        let subtask = subtask_mut(state, &task.id)?;
                        subtask.status = SubtaskStatus::Completed;
                        subtask.review_status = Some(ReviewStatus::Approved);
                        subtask.completed_at = Some(Utc::now());
                        subtask.last_error = None;
                        if let Some(progress) = state.progress.as_mut() {
                            progress.completed_tasks += 1;
                        }
                        touch_progress(state);
                        Ok(())
                    })
                    .await?;
                    self.notify(
                        &snapshot.run_id,
                        MessageType::TaskComplete,
                        super::ORCHESTRATOR_AGENT_ID,
                        json!({ "workflow_id": id, "task_id": task.id }),
                    )
                    .await;
                }
                ReviewVerdict::NeedsRevision(details) => {
                    self.update_in_phase(id, Phase::Development, |state| {
                        subtask_mut(state, &task.id)?.review_status = Some(ReviewStatus::NeedsRevision);
                        Ok(())
                    })
                    .await?;
                    return self.escalate(id, &snapshot.run_id, task, details).await;
                }
            }
        }

        self.update_in_phase(id, Phase::Development, |state| {
            transition(state, Phase::QualityAssurance, "all development tasks settled")
        })
        .await
    }

    pub(super) async fn run_quality_phase(&self, id: &WorkflowId) -> Result<()> {
        let snapshot = self.snapshot(id).await?;
        let working_directory = self.working_directory(&snapshot.project_id).await?;

        let lint = self
            .run_check("lint", "Run the project's linters and report every violation.", &working_directory)
            .await;
        let test = self
            .run_check("test", "Run the project's test suite and report every failure.", &working_directory)
            .await;
        let overall_passed = lint.passed && test.passed;
        let final_review = CheckResult {
            passed: overall_passed,
            output: format!("lint {}, tests {}", verdict(lint.passed), verdict(test.passed)),
            simulated: lint.simulated && test.simulated,
        };

        let max_iterations = self.settings.max_quality_iterations;
        let exhausted = self
            .update_in_phase(id, Phase::QualityAssurance, |state| {
                let iteration = state.quality_iterations + 1;
                let exhausted = !overall_passed && iteration > max_iterations;
                if overall_passed {
                    transition(state, Phase::Delivery, "quality checks passed")?;
                    state.quality_iterations = 0;
                } else if !exhausted {
                    transition(
                        state,
                        Phase::Development,
                        format!("quality checks failed ({} of {} allowed)", iteration, max_iterations),
                    )?;
                    state.quality_iterations = iteration;
                } else {
                    state.quality_iterations = iteration;
                }
                state.quality_results = Some(QualityResults {
                    lint,
                    test,
                    final_review,
                    overall_passed,
                    iteration,
                    checked_at: Some(Utc::now()),
                });
                Ok(exhausted)
            })
            .await?;

        if exhausted {
            return Err(WorkflowError::Workflow(format!(
                "quality checks failed more than {} consecutive time(s)",
                max_iterations
            )));
        }
        Ok(())
    }

    pub(super) async fn run_delivery_phase(&self, id: &WorkflowId) -> Result<()> {
        let snapshot = self.snapshot(id).await?;
        let deliverable = match snapshot.deliverable.clone() {
            Some(deliverable) => deliverable,
            None => {
                let proposal = snapshot.proposal.as_ref().ok_or_else(|| {
                    WorkflowError::Workflow(format!("workflow {} has no proposal to deliver", id))
                })?;
                let quality = snapshot.quality_results.clone().unwrap_or_default();
                build_deliverable(&snapshot, proposal, &quality, self.store.paths())
            }
        };

        let content = ApprovalContent::Deliverable(deliverable.clone());
        self.await_decision(id, Phase::Delivery, content, move |state| {
            state.deliverable = Some(deliverable);
        })
        .await
    }

    /// Register with the gate, publish waiting_approval, then block for the decision
    async fn await_decision<F>(&self, id: &WorkflowId, phase: Phase, content: ApprovalContent, prepare: F) -> Result<()>
    where
        F: FnOnce(&mut WorkflowState),
    {
        let waiter = self.gate.register(id, phase, content).await?;

        let published = self
            .update_in_phase(id, phase, |state| {
                prepare(state);
                state.status = WorkflowStatus::WaitingApproval;
                Ok(())
            })
            .await;
        if let Err(e) = published {
            self.gate.cancel_approval(id, "approval request abandoned").await;
            return Err(e);
        }

        let decision = waiter.wait().await?;
        self.apply_approval_decision(id, decision).await
    }

    async fn record_attempts(&self, id: &WorkflowId, task_id: &str, attempts: u32) -> Result<()> {
        self.update_in_phase(id, Phase::Development, |state| {
            subtask_mut(state, task_id)?.attempts += attempts;
            Ok(())
        })
        .await
    }

    /// Fail the task and park the workflow until an operator decides
    async fn escalate(&self, id: &WorkflowId, run_id: &str, task: &ProposalTask, details: String) -> Result<()> {
        let escalation = self
            .update_in_phase(id, Phase::Development, |state| {
                if state.escalation.is_some() {
                    return Err(WorkflowError::Workflow(format!(
                        "workflow {} already has an outstanding escalation",
                        state.workflow_id
                    )));
                }
                let subtask = subtask_mut(state, &task.id)?;
                subtask.status = SubtaskStatus::Failed;
                subtask.last_error = Some(details.clone());
                subtask.completed_at = None;
                let retry_count = subtask.attempts.saturating_sub(1);
                if let Some(progress) = state.progress.as_mut() {
                    progress.failed_tasks += 1;
                }
                touch_progress(state);

                let escalation = WorkflowEscalation {
                    workflow_id: state.workflow_id.clone(),
                    ticket_id: task.id.clone(),
                    failure_details: details.clone(),
                    worker_type: task.worker_type,
                    retry_count,
                    created_at: Utc::now(),
                };
                state.escalation = Some(escalation.clone());
                state.status = WorkflowStatus::WaitingApproval;
                state.log_error(format!("Task {} escalated: {}", task.id, details));
                Ok(escalation)
            })
            .await?;

        log::warn!(
            "Workflow {} escalated task {} after {} retr(ies): {}",
            id,
            escalation.ticket_id,
            escalation.retry_count,
            escalation.failure_details
        );
        let payload = json!({
            "workflow_id": id,
            "task_id": escalation.ticket_id,
            "worker_type": escalation.worker_type,
            "retry_count": escalation.retry_count,
            "failure_details": escalation.failure_details,
        });
        self.notify(run_id, MessageType::TaskFailed, super::ORCHESTRATOR_AGENT_ID, payload.clone())
            .await;
        self.notify(run_id, MessageType::Escalate, &self.settings.facilitator_id, payload)
            .await;
        Ok(())
    }

    /// Code-writing tasks go to the agent with bounded retries; the rest are simulated
    async fn execute_task(&self, task: &ProposalTask, working_directory: &Path, instruction: &str) -> TaskExecution {
        let agent = match &self.coding_agent {
            Some(agent) if task.worker_type.writes_code() => agent,
            _ => {
                return TaskExecution {
                    attempts: 1,
                    outcome: Ok(format!("{} task {} completed (simulated)", task.worker_type, task.id)),
                }
            }
        };

        let prompt = format!(
            "You are the {} agent.\nOverall goal: {}\nTask {}: {}\n\n{}",
            task.worker_type, instruction, task.id, task.title, task.description
        );
        let max_attempts = self.settings.max_task_retries + 1;
        let mut last_failure = String::new();

        for attempt in 1..=max_attempts {
            let request = CodingAgentRequest {
                working_directory: working_directory.to_path_buf(),
                prompt: prompt.clone(),
                timeout: self.settings.agent_timeout,
            };
            match agent.execute(request).await {
                Ok(output) if output.success => {
                    return TaskExecution { attempts: attempt, outcome: Ok(output.output) };
                }
                Ok(output) => last_failure = failure_details(&output),
                Err(e) => last_failure = e.to_string(),
            }
            log::warn!("Task {} attempt {}/{} failed: {}", task.id, attempt, max_attempts, last_failure);
        }

        TaskExecution { attempts: max_attempts, outcome: Err(last_failure) }
    }

    async fn review_task(&self, task: &ProposalTask, working_directory: &Path, output: &str) -> ReviewVerdict {
        let agent = match &self.coding_agent {
            Some(agent) if task.worker_type.writes_code() => agent,
            _ => return ReviewVerdict::Approved,
        };

        let prompt = format!(
            "Review the changes made for task {} ({}). Answer APPROVE if they are acceptable, \
             otherwise NEEDS_REVISION followed by the reasons.\n\nImplementation output:\n{}",
            task.id, task.title, output
        );
        let request = CodingAgentRequest {
            working_directory: working_directory.to_path_buf(),
            prompt,
            timeout: self.settings.agent_timeout,
        };

        match agent.execute(request).await {
            Ok(review) if review.success => {
                if requests_revision(&review.output) {
                    ReviewVerdict::NeedsRevision(format!("review requested revision: {}", review.output.trim()))
                } else {
                    ReviewVerdict::Approved
                }
            }
            Ok(review) => ReviewVerdict::NeedsRevision(format!("review failed: {}", failure_details(&review))),
            Err(e) => ReviewVerdict::NeedsRevision(format!("review failed: {}", e)),
        }
    }

    async fn run_check(&self, name: &str, prompt: &str, working_directory: &Path) -> CheckResult {
        let Some(agent) = &self.coding_agent else {
            return CheckResult {
                passed: true,
                output: format!("{} passed (simulated)", name),
                simulated: true,
            };
        };

        let request = CodingAgentRequest {
            working_directory: working_directory.to_path_buf(),
            prompt: prompt.to_string(),
            timeout: self.settings.agent_timeout,
        };
        match agent.execute(request).await {
            Ok(output) if output.success => CheckResult { passed: true, output: output.output, simulated: false },
            Ok(output) => CheckResult { passed: false, output: failure_details(&output), simulated: false },
            Err(e) => CheckResult { passed: false, output: e.to_string(), simulated: false },
        }
    }

    async fn working_directory(&self, project_id: &str) -> Result<PathBuf> {
        match &self.workspace {
            Some(workspace) => Ok(workspace.get_workspace_info(project_id).await?.local_path),
            None => Ok(self.settings.default_working_directory.clone()),
        }
    }
}

/// Feedback of the revision request that sent the workflow back to proposal, if any
fn revision_feedback(state: &WorkflowState) -> Option<String> {
    let last = state.phase_history.last()?;
    if last.rollback || last.from != Phase::Approval || last.to != Phase::Proposal {
        return None;
    }
    state
        .approval_decisions
        .last()
        .filter(|d| d.phase == Phase::Approval && d.action == ApprovalAction::RequestRevision)
        .map(|d| d.feedback_or_default().to_string())
}

fn subtask_mut<'a>(state: &'a mut WorkflowState, task_id: &str) -> Result<&'a mut SubtaskProgress> {
    let workflow_id = state.workflow_id.clone();
    state
        .progress
        .as_mut()
        .and_then(|progress| progress.subtask_mut(task_id))
        .ok_or_else(|| WorkflowError::NotFound(format!("task {} in workflow {}", task_id, workflow_id)))
}

fn touch_progress(state: &mut WorkflowState) {
    if let Some(progress) = state.progress.as_mut() {
        progress.updated_at = Some(Utc::now());
    }
}

/// The first verdict keyword in the review decides; no keyword means approved
fn requests_revision(review: &str) -> bool {
    REVIEW_VERDICT.find(review).map_or(false, |verdict| {
        let word = verdict.as_str().to_ascii_lowercase();
        !(word.starts_with("approv") || word == "lgtm")
    })
}

fn failure_details(output: &CodingAgentOutput) -> String {
    let exit = output
        .exit_code
        .map(|code| format!("exit code {}", code))
        .unwrap_or_else(|| "no exit code".to_string());
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        format!("{}: {}", exit, output.output.trim())
    } else {
        format!("{}: {}", exit, stderr)
    }
}

fn verdict(passed: bool) -> &'static str {
    if passed {
        "passed"
    } else {
        "failed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_types::ApprovalDecision;

    #[test]
    fn test_revision_feedback_only_after_revision_request() {
        let mut state = WorkflowState::new("Build it".to_string(), "p".to_string());
        assert_eq!(revision_feedback(&state), None);

        transition(&mut state, Phase::Approval, "ready").unwrap();
        state.approval_decisions.push(ApprovalDecision::new(
            state.workflow_id.clone(),
            Phase::Approval,
            ApprovalAction::RequestRevision,
            Some("smaller tasks".to_string()),
        ));
        transition(&mut state, Phase::Proposal, "revise").unwrap();
        assert_eq!(revision_feedback(&state).as_deref(), Some("smaller tasks"));
    }

    #[test]
    fn test_requests_revision() {
        assert!(requests_revision("NEEDS_REVISION: missing tests"));
        assert!(requests_revision("please revise the error handling"));
        assert!(requests_revision("Needs revision: the migration is missing"));
        assert!(requests_revision("REJECTED, the diff is empty"));
        assert!(!requests_revision("APPROVE"));
        assert!(!requests_revision("APPROVE, nothing to revise"));
        assert!(!requests_revision("Approved. A later revision could add caching."));
        assert!(!requests_revision("looks fine"));
    }

    #[test]
    fn test_failure_details_prefers_stderr() {
        let output = CodingAgentOutput {
            success: false,
            exit_code: Some(2),
            output: "partial".to_string(),
            stderr: "boom\n".to_string(),
        };
        assert_eq!(failure_details(&output), "exit code 2: boom");
    }
}
