//! Folds meeting minutes into a proposal

use chrono::Utc;
use workflow_types::{
    DependencyKind, EffortLevel, MeetingMinutes, Proposal, ProposalTask, RiskItem, Severity,
    TaskDependency, WorkerAssignment, WorkerType, WorkflowId,
};

pub fn task_id(index: usize) -> String {
    format!("task-{:03}", index + 1)
}

pub fn estimated_effort(worker_type: WorkerType) -> EffortLevel {
    match worker_type {
        WorkerType::Developer => EffortLevel::Large,
        WorkerType::Test => EffortLevel::Medium,
        WorkerType::Research | WorkerType::Design | WorkerType::Designer => EffortLevel::Small,
    }
}

/// One task per action item, chained sequentially in action-item order
pub fn build_proposal(workflow_id: &WorkflowId, minutes: &MeetingMinutes) -> Proposal {
    let summary = minutes
        .decisions
        .iter()
        .map(|d| d.content.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let scope = minutes
        .action_items
        .iter()
        .map(|a| a.description.as_str())
        .collect::<Vec<_>>()
        .join("; ");

    let mut task_breakdown = Vec::with_capacity(minutes.action_items.len());
    let mut worker_assignments = Vec::with_capacity(minutes.action_items.len());
    let mut dependencies = Vec::new();

    for (i, item) in minutes.action_items.iter().enumerate() {
        let id = task_id(i);
        let previous = (i > 0).then(|| task_id(i - 1));

        if let Some(previous) = &previous {
            dependencies.push(TaskDependency {
                from: previous.clone(),
                to: id.clone(),
                kind: DependencyKind::Sequential,
            });
        }

        task_breakdown.push(ProposalTask {
            id: id.clone(),
            title: item.description.clone(),
            description: format!("{} (decision {}, meeting {})", item.description, item.decision_id, minutes.meeting_id),
            worker_type: item.worker_type,
            estimated_effort: estimated_effort(item.worker_type),
            dependencies: previous.into_iter().collect(),
        });

        worker_assignments.push(WorkerAssignment {
            task_id: id,
            worker_type: item.worker_type,
            rationale: format!("Assigned to {} during meeting {}", item.assignee, minutes.meeting_id),
        });
    }

    let risk_assessment = vec![RiskItem {
        category: "schedule".to_string(),
        description: format!(
            "{} sequential task(s); one escalation blocks every later task",
            task_breakdown.len()
        ),
        severity: Severity::Medium,
        mitigation: "Resolve escalations promptly and keep tasks small".to_string(),
    }];

    Proposal {
        workflow_id: workflow_id.clone(),
        summary,
        scope,
        task_breakdown,
        worker_assignments,
        risk_assessment,
        dependencies,
        meeting_ids: vec![minutes.meeting_id.clone()],
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_types::{ActionItem, MeetingDecision, Participant};

    fn minutes(workers: &[WorkerType]) -> MeetingMinutes {
        let now = Utc::now();
        let decisions: Vec<MeetingDecision> = workers
            .iter()
            .enumerate()
            .map(|(i, _)| MeetingDecision {
                id: format!("decision-{}", i + 1),
                agenda_item_id: format!("agenda-{}", i + 1),
                content: format!("Decision {}.", i + 1),
                decided_by: "pm".to_string(),
                timestamp: now,
            })
            .collect();
        let action_items = workers
            .iter()
            .enumerate()
            .map(|(i, w)| ActionItem {
                id: format!("action-{}", i + 1),
                decision_id: format!("decision-{}", i + 1),
                description: format!("Do thing {}", i + 1),
                assignee: w.agent_id(),
                worker_type: *w,
            })
            .collect();
        MeetingMinutes {
            meeting_id: "mtg-1".to_string(),
            workflow_id: WorkflowId::from_string("wf-1").unwrap(),
            agenda: vec![],
            participants: vec![Participant::facilitator("pm")],
            statements: vec![],
            decisions,
            action_items,
            facilitator: "pm".to_string(),
            started_at: now,
            ended_at: now,
        }
    }

    #[test]
    fn test_tasks_follow_action_items() {
        let minutes = minutes(&[WorkerType::Research, WorkerType::Developer, WorkerType::Test]);
        let proposal = build_proposal(&minutes.workflow_id, &minutes);

        assert_eq!(proposal.summary, "Decision 1. Decision 2. Decision 3.");
        assert_eq!(proposal.scope, "Do thing 1; Do thing 2; Do thing 3");
        let ids: Vec<&str> = proposal.task_breakdown.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["task-001", "task-002", "task-003"]);
        assert_eq!(proposal.task_breakdown[1].estimated_effort, EffortLevel::Large);
        assert_eq!(proposal.task_breakdown[2].estimated_effort, EffortLevel::Medium);
        assert_eq!(proposal.worker_assignments[0].worker_type, WorkerType::Research);
        assert!(proposal.worker_assignments[0].rationale.contains("research-agent"));
        assert_eq!(proposal.meeting_ids, vec!["mtg-1"]);
    }

    #[test]
    fn test_sequential_chain_and_fixed_risk() {
        let minutes = minutes(&[WorkerType::Developer, WorkerType::Developer, WorkerType::Developer]);
        let proposal = build_proposal(&minutes.workflow_id, &minutes);

        let edges: Vec<(&str, &str)> = proposal.dependencies.iter().map(|d| (d.from.as_str(), d.to.as_str())).collect();
        assert_eq!(edges, vec![("task-001", "task-002"), ("task-002", "task-003")]);
        assert!(proposal.task_breakdown[0].dependencies.is_empty());
        assert_eq!(proposal.task_breakdown[2].dependencies, vec!["task-002"]);
        assert_eq!(proposal.risk_assessment.len(), 1);
        assert_eq!(proposal.risk_assessment[0].severity, Severity::Medium);
        assert_eq!(proposal.risk_assessment[0].category, "schedule");
    }
}
