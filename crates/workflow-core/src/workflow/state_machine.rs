//! Phase state machine: legal transitions and rollback guards
//!
//! The transition table encodes the valid edges between phases:
//! ```text
//! proposal          -> approval
//! approval          -> development | proposal
//! development       -> quality_assurance
//! quality_assurance -> delivery | development
//! delivery          -> development
//! ```
//! Terminal exits (terminate, completed) change `status`, never the phase.

use chrono::Utc;
use workflow_types::{Phase, PhaseTransition, WorkflowState, WorkflowStatus};
use crate::error::{WorkflowError, Result};

pub fn is_legal_transition(from: Phase, to: Phase) -> bool {
    use Phase::*;

    matches!(
        (from, to),
        (Proposal, Approval)
            | (Approval, Development)
            // revision loop
            | (Approval, Proposal)
            | (Development, QualityAssurance)
            | (QualityAssurance, Delivery)
            // QA failure loop
            | (QualityAssurance, Development)
            // delivery revision loop
            | (Delivery, Development)
    )
}

/// Move `state` to `to`, recording exactly one transition.
/// Leaves `state` untouched when the edge is not in the table.
pub fn transition(state: &mut WorkflowState, to: Phase, reason: impl Into<String>) -> Result<()> {
    let from = state.current_phase;
    if !is_legal_transition(from, to) {
        log::warn!("Rejected transition {} -> {} for workflow {}", from, to, state.workflow_id);
        return Err(WorkflowError::InvalidTransition { from, to });
    }
    if state.status.is_terminal() {
        return Err(WorkflowError::Workflow(format!(
            "workflow {} is {} and cannot change phase",
            state.workflow_id, state.status
        )));
    }

    let now = Utc::now();
    state.phase_history.push(PhaseTransition {
        from,
        to,
        timestamp: now,
        reason: reason.into(),
        rollback: false,
    });
    state.current_phase = to;
    state.updated_at = now;
    log::info!("Workflow {} transitioned {} -> {}", state.workflow_id, from, to);
    Ok(())
}

/// Check whether `state` may roll back to `target`
pub fn check_rollback(state: &WorkflowState, target: Phase) -> Result<()> {
    if state.status.is_terminal() {
        return Err(WorkflowError::InvalidRollback(format!(
            "workflow {} is {}",
            state.workflow_id, state.status
        )));
    }
    if !target.precedes(state.current_phase) {
        return Err(WorkflowError::InvalidRollback(format!(
            "{} does not precede current phase {}",
            target, state.current_phase
        )));
    }
    Ok(())
}

/// Roll `state` back to an earlier phase, recording a rollback transition
/// and resetting status to running.
pub fn rollback(state: &mut WorkflowState, target: Phase, reason: impl Into<String>) -> Result<()> {
    check_rollback(state, target)?;

    let now = Utc::now();
    let from = state.current_phase;
    state.phase_history.push(PhaseTransition {
        from,
        to: target,
        timestamp: now,
        reason: reason.into(),
        rollback: true,
    });
    state.current_phase = target;
    state.status = WorkflowStatus::Running;
    state.updated_at = now;
    log::info!("Workflow {} rolled back {} -> {}", state.workflow_id, from, target);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_at(phase: Phase) -> WorkflowState {
        let mut state = WorkflowState::new("Implement login".to_string(), "proj-1".to_string());
        state.current_phase = phase;
        state
    }

    const LEGAL: [(Phase, Phase); 7] = [
        (Phase::Proposal, Phase::Approval),
        (Phase::Approval, Phase::Development),
        (Phase::Approval, Phase::Proposal),
        (Phase::Development, Phase::QualityAssurance),
        (Phase::QualityAssurance, Phase::Delivery),
        (Phase::QualityAssurance, Phase::Development),
        (Phase::Delivery, Phase::Development),
    ];

    #[test]
    fn test_every_pair_against_table() {
        for from in Phase::ORDER {
            for to in Phase::ORDER {
                let mut state = state_at(from);
                let result = transition(&mut state, to, "test");
                if LEGAL.contains(&(from, to)) {
                    assert!(result.is_ok(), "{} -> {} should be legal", from, to);
                    assert_eq!(state.phase_history.len(), 1);
                    assert_eq!(state.current_phase, to);
                } else {
                    assert!(
                        matches!(result, Err(WorkflowError::InvalidTransition { .. })),
                        "{} -> {} should be rejected",
                        from,
                        to
                    );
                    assert!(state.phase_history.is_empty());
                    assert_eq!(state.current_phase, from);
                }
            }
        }
    }

    #[test]
    fn test_terminal_workflow_cannot_transition() {
        let mut state = state_at(Phase::Proposal);
        state.status = WorkflowStatus::Terminated;
        assert!(transition(&mut state, Phase::Approval, "late").is_err());
        assert!(state.phase_history.is_empty());
    }

    #[test]
    fn test_rollback_only_to_strictly_earlier_phase() {
        for current in Phase::ORDER {
            for target in Phase::ORDER {
                let mut state = state_at(current);
                state.status = WorkflowStatus::WaitingApproval;
                let result = rollback(&mut state, target, "operator");
                if target.index() < current.index() {
                    assert!(result.is_ok());
                    assert_eq!(state.current_phase, target);
                    assert_eq!(state.status, WorkflowStatus::Running);
                    assert!(state.phase_history[0].rollback);
                } else {
                    assert!(matches!(result, Err(WorkflowError::InvalidRollback(_))));
                    assert!(state.phase_history.is_empty());
                }
            }
        }
    }

    #[test]
    fn test_rollback_rejected_on_terminal_status() {
        for status in [WorkflowStatus::Completed, WorkflowStatus::Terminated] {
            let mut state = state_at(Phase::Delivery);
            state.status = status;
            assert!(rollback(&mut state, Phase::Proposal, "too late").is_err());
        }

        let mut failed = state_at(Phase::Development);
        failed.status = WorkflowStatus::Failed;
        assert!(rollback(&mut failed, Phase::Proposal, "recover").is_ok());
    }
}
