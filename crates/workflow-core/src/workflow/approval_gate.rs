//! Durable blocking rendezvous between a suspended phase and a decision-maker
//!
//! A phase awaits `request_approval`, which only returns once a matching
//! `submit_decision` arrives or the request is cancelled. Decisions are
//! always persisted first; waking the waiter is best effort, because the
//! waiter does not survive a process restart.

use std::collections::HashMap;
use chrono::Utc;
use tokio::sync::{oneshot, Mutex};
use workflow_types::{
    ApprovalContent, ApprovalDecision, ApprovalHistoryDocument, PendingApproval, Phase, WorkflowId,
};
use crate::error::{WorkflowError, Result};
use crate::paths::WorkflowPaths;
use crate::store;

type Resolver = oneshot::Sender<std::result::Result<ApprovalDecision, String>>;

#[derive(Default)]
struct GateState {
    resolvers: HashMap<WorkflowId, Resolver>,
    pending: HashMap<WorkflowId, PendingApproval>,
    history: HashMap<WorkflowId, Vec<ApprovalDecision>>,
}

pub struct ApprovalGate {
    paths: WorkflowPaths,
    state: Mutex<GateState>,
}

/// Handle to a registered request; resolves once decided or cancelled
pub struct ApprovalWaiter {
    workflow_id: WorkflowId,
    receiver: oneshot::Receiver<std::result::Result<ApprovalDecision, String>>,
}

impl ApprovalWaiter {
    pub async fn wait(self) -> Result<ApprovalDecision> {
        match self.receiver.await {
            Ok(Ok(decision)) => Ok(decision),
            Ok(Err(reason)) => Err(WorkflowError::ApprovalCancelled {
                workflow_id: self.workflow_id.to_string(),
                reason,
            }),
            Err(_) => Err(WorkflowError::ApprovalCancelled {
                workflow_id: self.workflow_id.to_string(),
                reason: "approval gate dropped".to_string(),
            }),
        }
    }
}

impl ApprovalGate {
    pub fn new(paths: WorkflowPaths) -> Self {
        Self { paths, state: Mutex::new(GateState::default()) }
    }

    /// Suspend until a decision for `workflow_id` is submitted or the request is cancelled
    pub async fn request_approval(
        &self,
        workflow_id: &WorkflowId,
        phase: Phase,
        content: ApprovalContent,
    ) -> Result<ApprovalDecision> {
        self.register(workflow_id, phase, content).await?.wait().await
    }

    /// Register the pending request without waiting yet.
    ///
    /// Lets the caller publish its own "waiting" state only once a
    /// submitted decision is guaranteed to find the waiter.
    pub async fn register(
        &self,
        workflow_id: &WorkflowId,
        phase: Phase,
        content: ApprovalContent,
    ) -> Result<ApprovalWaiter> {
        let receiver = {
            let mut state = self.state.lock().await;
            if let Some(existing) = state.resolvers.get(workflow_id) {
                if !existing.is_closed() {
                    return Err(WorkflowError::ApprovalAlreadyPending(workflow_id.to_string()));
                }
                // the previous waiter was dropped without a decision
                log::debug!("Replacing abandoned approval request for {}", workflow_id);
            }

            let (sender, receiver) = oneshot::channel();
            state.resolvers.insert(workflow_id.clone(), sender);
            state.pending.insert(
                workflow_id.clone(),
                PendingApproval {
                    workflow_id: workflow_id.clone(),
                    phase,
                    content,
                    created_at: Utc::now(),
                },
            );
            receiver
        };

        log::info!("Workflow {} waiting for {} approval", workflow_id, phase);
        Ok(ApprovalWaiter {
            workflow_id: workflow_id.clone(),
            receiver,
        })
    }

    /// Record a decision and wake the waiter if one is still listening.
    ///
    /// The decision history is persisted before the waiter is looked up.
    /// Returns `false` when nobody was waiting; the caller must then drive
    /// the continuation itself.
    pub async fn submit_decision(&self, workflow_id: &WorkflowId, decision: ApprovalDecision) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.ensure_history_loaded(&mut state, workflow_id).await?;

        let decisions = state.history.entry(workflow_id.clone()).or_default();
        decisions.push(decision.clone());
        let document = ApprovalHistoryDocument {
            workflow_id: workflow_id.clone(),
            decisions: decisions.clone(),
        };
        store::write_json_atomic(&self.paths.approvals_file(workflow_id), &document).await?;

        log::info!(
            "Recorded {} decision for workflow {} ({} phase)",
            decision.action,
            workflow_id,
            decision.phase
        );

        state.pending.remove(workflow_id);
        let resolved = match state.resolvers.remove(workflow_id) {
            Some(resolver) => resolver.send(Ok(decision)).is_ok(),
            None => false,
        };

        if !resolved {
            log::warn!("No live approval waiter for workflow {}; decision persisted only", workflow_id);
        }
        Ok(resolved)
    }

    /// Re-populate the visible pending item after a restart without a waiter. Idempotent.
    pub async fn restore_pending_approval(&self, workflow_id: &WorkflowId, phase: Phase, content: ApprovalContent) {
        let mut state = self.state.lock().await;
        if state.pending.contains_key(workflow_id) {
            return;
        }
        state.pending.insert(
            workflow_id.clone(),
            PendingApproval {
                workflow_id: workflow_id.clone(),
                phase,
                content,
                created_at: Utc::now(),
            },
        );
        log::info!("Restored pending {} approval for workflow {}", phase, workflow_id);
    }

    /// Reject an outstanding wait with a cancellation error. Returns whether a waiter existed.
    pub async fn cancel_approval(&self, workflow_id: &WorkflowId, reason: &str) -> bool {
        let mut state = self.state.lock().await;
        state.pending.remove(workflow_id);
        match state.resolvers.remove(workflow_id) {
            Some(resolver) => {
                log::info!("Cancelling approval wait for workflow {}: {}", workflow_id, reason);
                resolver.send(Err(reason.to_string())).is_ok()
            }
            None => false,
        }
    }

    pub async fn get_pending_approvals(&self) -> Vec<PendingApproval> {
        let state = self.state.lock().await;
        let mut pending: Vec<PendingApproval> = state.pending.values().cloned().collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending
    }

    pub async fn get_pending_approval(&self, workflow_id: &WorkflowId) -> Option<PendingApproval> {
        self.state.lock().await.pending.get(workflow_id).cloned()
    }

    pub async fn get_approval_history(&self, workflow_id: &WorkflowId) -> Result<Vec<ApprovalDecision>> {
        let mut state = self.state.lock().await;
        self.ensure_history_loaded(&mut state, workflow_id).await?;
        Ok(state.history.get(workflow_id).cloned().unwrap_or_default())
    }

    /// Whether an in-memory waiter is live for this workflow
    pub async fn is_waiting_approval(&self, workflow_id: &WorkflowId) -> bool {
        self.state
            .lock()
            .await
            .resolvers
            .get(workflow_id)
            .map_or(false, |resolver| !resolver.is_closed())
    }

    async fn ensure_history_loaded(&self, state: &mut GateState, workflow_id: &WorkflowId) -> Result<()> {
        if state.history.contains_key(workflow_id) {
            return Ok(());
        }
        let document: Option<ApprovalHistoryDocument> =
            store::read_json(&self.paths.approvals_file(workflow_id)).await?;
        state
            .history
            .insert(workflow_id.clone(), document.map(|d| d.decisions).unwrap_or_default());
        Ok(())
    }
}
