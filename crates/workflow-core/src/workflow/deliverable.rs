//! Deliverable assembly for the delivery phase

use chrono::Utc;
use workflow_types::{
    Artifact, ChangeEntry, ChangeKind, Deliverable, Proposal, QualityResults, ReviewLogEntry,
    SubtaskStatus, WorkflowState,
};
use crate::paths::{WorkflowPaths, APPROVALS_FILE_NAME, PROPOSAL_FILE_NAME};

pub fn build_deliverable(
    state: &WorkflowState,
    proposal: &Proposal,
    quality: &QualityResults,
    paths: &WorkflowPaths,
) -> Deliverable {
    let progress = state.progress.as_ref();

    let changes: Vec<ChangeEntry> = proposal
        .task_breakdown
        .iter()
        .map(|task| {
            let status = progress
                .and_then(|p| p.subtask(&task.id))
                .map(|s| s.status)
                .unwrap_or(SubtaskStatus::Pending);
            ChangeEntry {
                task_id: task.id.clone(),
                path: format!("{}/{}", task.worker_type, task.id),
                kind: ChangeKind::Added,
                description: match status {
                    SubtaskStatus::Skipped => format!("{} (skipped)", task.title),
                    _ => task.title.clone(),
                },
            }
        })
        .collect();

    let review_history = state
        .approval_decisions
        .iter()
        .map(|d| ReviewLogEntry {
            phase: d.phase,
            action: d.action,
            feedback: d.feedback.clone(),
            decided_at: d.decided_at,
        })
        .collect();

    let mut artifacts = vec![
        Artifact {
            name: PROPOSAL_FILE_NAME.to_string(),
            path: paths.proposal_file(&state.workflow_id).display().to_string(),
        },
        Artifact {
            name: APPROVALS_FILE_NAME.to_string(),
            path: paths.approvals_file(&state.workflow_id).display().to_string(),
        },
    ];
    artifacts.extend(state.meeting_minutes_ids.iter().map(|meeting_id| Artifact {
        name: format!("{}.json", meeting_id),
        path: paths.meeting_file(&state.workflow_id, meeting_id).display().to_string(),
    }));

    let (completed, skipped) = progress
        .map(|p| (p.completed_tasks, p.skipped_tasks))
        .unwrap_or((0, 0));
    let summary_report = format!(
        "{}\n\nTasks: {} total, {} completed, {} skipped. Quality: lint {}, tests {}, final review {}.",
        proposal.summary,
        proposal.task_breakdown.len(),
        completed,
        skipped,
        verdict(quality.lint.passed),
        verdict(quality.test.passed),
        verdict(quality.final_review.passed),
    );

    Deliverable {
        workflow_id: state.workflow_id.clone(),
        summary_report,
        changes,
        test_results: quality.clone(),
        review_history,
        artifacts,
        created_at: Utc::now(),
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
    use workflow_types::{
        ApprovalAction, ApprovalDecision, CheckResult, DevelopmentProgress, EffortLevel, Phase,
        ProposalTask, WorkerType,
    };

    #[test]
    fn test_one_change_per_task_and_review_log() {
        let mut state = WorkflowState::new("Implement login".to_string(), "proj-1".to_string());
        let proposal = Proposal {
            workflow_id: state.workflow_id.clone(),
            summary: "Login it is.".to_string(),
            scope: "Implement: login".to_string(),
            task_breakdown: vec![
                ProposalTask {
                    id: "task-001".to_string(),
                    title: "Implement: login".to_string(),
                    description: String::new(),
                    worker_type: WorkerType::Developer,
                    estimated_effort: EffortLevel::Large,
                    dependencies: vec![],
                },
                ProposalTask {
                    id: "task-002".to_string(),
                    title: "Mitigate risks".to_string(),
                    description: String::new(),
                    worker_type: WorkerType::Test,
                    estimated_effort: EffortLevel::Medium,
                    dependencies: vec!["task-001".to_string()],
                },
            ],
            worker_assignments: vec![],
            risk_assessment: vec![],
            dependencies: vec![],
            meeting_ids: vec!["mtg-1".to_string()],
            created_at: Utc::now(),
        };
        let mut progress = DevelopmentProgress::from_proposal(&proposal);
        progress.subtask_mut("task-002").unwrap().status = SubtaskStatus::Skipped;
        progress.completed_tasks = 1;
        progress.skipped_tasks = 1;
        state.progress = Some(progress);
        state.meeting_minutes_ids.push("mtg-1".to_string());
        state.approval_decisions.push(ApprovalDecision::new(
            state.workflow_id.clone(),
            Phase::Approval,
            ApprovalAction::Approve,
            Some("go".to_string()),
        ));
        let quality = QualityResults {
            lint: CheckResult { passed: true, output: String::new(), simulated: true },
            test: CheckResult { passed: true, output: String::new(), simulated: true },
            final_review: CheckResult { passed: true, output: String::new(), simulated: false },
            overall_passed: true,
            iteration: 1,
            checked_at: None,
        };

        let paths = WorkflowPaths::new("/data");
        let deliverable = build_deliverable(&state, &proposal, &quality, &paths);

        assert_eq!(deliverable.changes.len(), 2);
        assert_eq!(deliverable.changes[0].path, "developer/task-001");
        assert!(deliverable.changes[1].description.ends_with("(skipped)"));
        assert_eq!(deliverable.review_history.len(), 1);
        assert_eq!(deliverable.review_history[0].feedback.as_deref(), Some("go"));
        assert_eq!(deliverable.artifacts.len(), 3);
        assert!(deliverable.summary_report.contains("1 completed, 1 skipped"));
        assert!(deliverable.test_results.overall_passed);
    }
}
