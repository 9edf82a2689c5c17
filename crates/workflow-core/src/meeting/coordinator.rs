//! Meeting coordinator: convenes a deterministic deliberation and records minutes

use std::collections::HashMap;
use std::sync::Arc;
use chrono::Utc;
use serde_json::json;
use tokio::sync::RwLock;
use uuid::Uuid;
use workflow_types::{
    ActionItem, AgendaItem, AgendaStatus, MeetingDecision, MeetingMinutes, MessageType, Participant,
    Statement, StatementKind, WorkflowId,
};
use crate::error::{WorkflowError, Result};
use crate::store::WorkflowStore;
use crate::workflow::traits::MessageBus;
use super::agenda::{generate_agenda, AgendaTopic};
use super::opinion::{OpinionContext, OpinionGenerator};
use super::participants::{is_specialist_agent_id, select_participants};

pub struct MeetingCoordinator {
    store: WorkflowStore,
    bus: Arc<dyn MessageBus>,
    generator: Arc<dyn OpinionGenerator>,
    minutes: RwLock<HashMap<WorkflowId, Vec<MeetingMinutes>>>,
}

/// Append-only statement list; sequence numbers follow insertion order
struct Transcript {
    statements: Vec<Statement>,
}

impl Transcript {
    fn record(&mut self, agenda_item_id: &str, speaker: &str, kind: StatementKind, content: String) {
        self.statements.push(Statement {
            sequence: self.statements.len() as u32 + 1,
            agenda_item_id: agenda_item_id.to_string(),
            speaker: speaker.to_string(),
            kind,
            content,
            timestamp: Utc::now(),
        });
    }
}

impl MeetingCoordinator {
    pub fn new(store: WorkflowStore, bus: Arc<dyn MessageBus>, generator: Arc<dyn OpinionGenerator>) -> Self {
        Self {
            store,
            bus,
            generator,
            minutes: RwLock::new(HashMap::new()),
        }
    }

    /// Run the full meeting and persist its minutes.
    ///
    /// Nothing is registered in memory unless the minutes were persisted.
    pub async fn convene_meeting(
        &self,
        workflow_id: &WorkflowId,
        instruction: &str,
        facilitator_id: &str,
    ) -> Result<MeetingMinutes> {
        let instruction = instruction.trim();
        let facilitator_id = facilitator_id.trim();
        if instruction.is_empty() {
            return Err(WorkflowError::InvalidInput("meeting instruction must not be empty".to_string()));
        }
        if facilitator_id.is_empty() {
            return Err(WorkflowError::InvalidInput("facilitator id must not be empty".to_string()));
        }
        if is_specialist_agent_id(facilitator_id) {
            return Err(WorkflowError::InvalidInput(format!(
                "facilitator id {} is reserved for a specialist",
                facilitator_id
            )));
        }

        let meeting_id = format!("mtg-{}", Uuid::new_v4());
        let started_at = Utc::now();
        let mut agenda = generate_agenda(instruction);
        let participants = select_participants(instruction, facilitator_id);
        let facilitator = Participant::facilitator(facilitator_id);
        let specialists: Vec<&Participant> = participants.iter().filter(|p| !p.is_facilitator()).collect();
        if specialists.is_empty() {
            return Err(WorkflowError::Meeting("no specialist participants selected".to_string()));
        }

        log::info!(
            "Convening meeting {} for workflow {} with {} specialist(s) over {} agenda item(s)",
            meeting_id,
            workflow_id,
            specialists.len(),
            agenda.len()
        );

        let mut transcript = Transcript { statements: Vec::new() };
        let mut decisions: Vec<MeetingDecision> = Vec::new();
        let mut action_items: Vec<ActionItem> = Vec::new();

        for item in agenda.iter_mut() {
            item.status = AgendaStatus::Discussing;

            let opening = self.statement(instruction, item, &facilitator, StatementKind::Opening, &[]).await?;
            transcript.record(&item.id, facilitator_id, StatementKind::Opening, opening);

            let mut opinions = Vec::with_capacity(specialists.len());
            for speaker in &specialists {
                let opinion = self.statement(instruction, item, speaker, StatementKind::Opinion, &[]).await?;
                self.relay(&meeting_id, facilitator_id, speaker, item, &opinion).await;
                transcript.record(&item.id, &speaker.agent_id, StatementKind::Opinion, opinion.clone());
                opinions.push(opinion);
            }

            let synthesis = self
                .statement(instruction, item, &facilitator, StatementKind::Synthesis, &opinions)
                .await?;
            transcript.record(&item.id, facilitator_id, StatementKind::Synthesis, synthesis.clone());

            let decision = MeetingDecision {
                id: format!("decision-{}", decisions.len() + 1),
                agenda_item_id: item.id.clone(),
                content: synthesis.clone(),
                decided_by: facilitator_id.to_string(),
                timestamp: Utc::now(),
            };

            let assignee = specialists[action_items.len() % specialists.len()];
            if let Some(worker_type) = assignee.worker_type() {
                action_items.push(ActionItem {
                    id: format!("action-{}", action_items.len() + 1),
                    decision_id: decision.id.clone(),
                    description: action_description(item, instruction),
                    assignee: assignee.agent_id.clone(),
                    worker_type,
                });
            }
            decisions.push(decision);

            item.status = AgendaStatus::Concluded;
            item.summary = Some(synthesis);
        }

        let minutes = MeetingMinutes {
            meeting_id: meeting_id.clone(),
            workflow_id: workflow_id.clone(),
            agenda,
            participants,
            statements: transcript.statements,
            decisions,
            action_items,
            facilitator: facilitator_id.to_string(),
            started_at,
            ended_at: Utc::now(),
        };

        self.store.save_minutes(&minutes).await.map_err(|e| {
            log::error!("Failed to persist minutes of meeting {}: {}", meeting_id, e);
            WorkflowError::Meeting(format!("failed to persist minutes {}: {}", meeting_id, e))
        })?;

        self.minutes
            .write()
            .await
            .entry(workflow_id.clone())
            .or_default()
            .push(minutes.clone());

        log::info!(
            "Meeting {} concluded with {} decision(s) and {} action item(s)",
            meeting_id,
            minutes.decisions.len(),
            minutes.action_items.len()
        );
        Ok(minutes)
    }

    /// Minutes by id, from memory first and then from disk
    pub async fn get_minutes(&self, workflow_id: &WorkflowId, meeting_id: &str) -> Result<Option<MeetingMinutes>> {
        if let Some(found) = self
            .minutes
            .read()
            .await
            .get(workflow_id)
            .and_then(|all| all.iter().find(|m| m.meeting_id == meeting_id).cloned())
        {
            return Ok(Some(found));
        }
        self.store.load_minutes(workflow_id, meeting_id).await
    }

    /// Minutes convened by this process for a workflow, oldest first
    pub async fn list_minutes(&self, workflow_id: &WorkflowId) -> Vec<MeetingMinutes> {
        self.minutes.read().await.get(workflow_id).cloned().unwrap_or_default()
    }

    async fn statement(
        &self,
        instruction: &str,
        agenda_item: &AgendaItem,
        speaker: &Participant,
        kind: StatementKind,
        opinions: &[String],
    ) -> Result<String> {
        let context = OpinionContext {
            instruction,
            agenda_item,
            speaker,
            kind,
            opinions,
        };
        self.generator
            .generate(&context)
            .await
            .map_err(|e| WorkflowError::Meeting(format!("statement generation failed: {}", e)))
    }

    /// Record one opinion exchange in the run history. Failures are only logged.
    async fn relay(&self, meeting_id: &str, facilitator_id: &str, speaker: &Participant, item: &AgendaItem, opinion: &str) {
        let request = self.bus.create_message(
            meeting_id,
            MessageType::StatusRequest,
            facilitator_id,
            &speaker.agent_id,
            json!({ "agenda_item_id": item.id, "topic": item.topic }),
        );
        let response = self.bus.create_message(
            meeting_id,
            MessageType::StatusResponse,
            &speaker.agent_id,
            facilitator_id,
            json!({ "agenda_item_id": item.id, "statement": opinion }),
        );
        for message in [request, response] {
            if let Err(e) = self.bus.record(message).await {
                log::warn!("Meeting {} bus relay failed: {}", meeting_id, e);
            }
        }
    }
}

fn action_description(item: &AgendaItem, instruction: &str) -> String {
    match AgendaTopic::from_title(&item.topic) {
        Some(AgendaTopic::Requirements) => format!("Document confirmed requirements for: {}", instruction),
        Some(AgendaTopic::TechnicalFeasibility) => format!("Prototype the technical approach for: {}", instruction),
        Some(AgendaTopic::DesignDirection) => format!("Produce the agreed design for: {}", instruction),
        Some(AgendaTopic::TaskDecomposition) => format!("Implement: {}", instruction),
        Some(AgendaTopic::RiskAssessment) => format!("Mitigate identified risks for: {}", instruction),
        None => format!("Follow up on {}: {}", item.topic, instruction),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{FileMessageBus, InMemoryMessageBus};
    use crate::meeting::opinion::TemplateOpinionGenerator;
    use crate::paths::WorkflowPaths;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;
    use workflow_types::{AgentMessage, WorkerType};

    fn coordinator(root: &std::path::Path, bus: Arc<dyn MessageBus>) -> MeetingCoordinator {
        MeetingCoordinator::new(
            WorkflowStore::new(WorkflowPaths::new(root)),
            bus,
            Arc::new(TemplateOpinionGenerator::new()),
        )
    }

    #[tokio::test]
    async fn test_meeting_structure() {
        let temp_dir = TempDir::new().unwrap();
        let bus = Arc::new(InMemoryMessageBus::new());
        let coordinator = coordinator(temp_dir.path(), bus.clone());
        let id = WorkflowId::from_string("wf-1").unwrap();

        let minutes = coordinator
            .convene_meeting(&id, "Research options and add regression tests", "pm")
            .await
            .unwrap();

        // facilitator + research + test
        assert_eq!(minutes.participants.len(), 3);
        assert_eq!(minutes.agenda.len(), 3);
        assert!(minutes.agenda.iter().all(|i| i.status == AgendaStatus::Concluded && i.summary.is_some()));
        // per item: opening + 2 opinions + synthesis
        assert_eq!(minutes.statements.len(), 3 * 4);
        for (i, statement) in minutes.statements.iter().enumerate() {
            assert_eq!(statement.sequence as usize, i + 1);
        }
        assert_eq!(minutes.decisions.len(), 3);
        let assignees: Vec<&str> = minutes.action_items.iter().map(|a| a.assignee.as_str()).collect();
        assert_eq!(assignees, vec!["research-agent", "test-agent", "research-agent"]);
        assert_eq!(minutes.action_items[1].worker_type, WorkerType::Test);

        let history = bus.get_message_history(&minutes.meeting_id).await.unwrap();
        assert_eq!(history.len(), 3 * 2 * 2);
    }

    #[tokio::test]
    async fn test_file_bus_relay_leaves_no_inbox_files() {
        let temp_dir = TempDir::new().unwrap();
        let paths = WorkflowPaths::new(temp_dir.path());
        let bus = Arc::new(FileMessageBus::new(paths.clone()));
        let coordinator = coordinator(temp_dir.path(), bus.clone());
        let id = WorkflowId::from_string("wf-7").unwrap();

        let mut last = None;
        for _ in 0..3 {
            last = Some(coordinator.convene_meeting(&id, "Implement login", "pm").await.unwrap());
        }

        assert!(!paths.bus_dir().join("inbox").exists());
        let history = bus.get_message_history(&last.unwrap().meeting_id).await.unwrap();
        assert!(!history.is_empty());
    }

    #[tokio::test]
    async fn test_meeting_is_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        let coordinator = coordinator(temp_dir.path(), Arc::new(InMemoryMessageBus::new()));
        let id = WorkflowId::from_string("wf-2").unwrap();
        let instruction = "Build a login API with a new dashboard layout";

        let first = coordinator.convene_meeting(&id, instruction, "pm").await.unwrap();
        let second = coordinator.convene_meeting(&id, instruction, "pm").await.unwrap();

        let topics = |m: &MeetingMinutes| m.agenda.iter().map(|i| i.topic.clone()).collect::<Vec<_>>();
        let assignees = |m: &MeetingMinutes| m.action_items.iter().map(|a| a.assignee.clone()).collect::<Vec<_>>();
        assert_eq!(topics(&first), topics(&second));
        assert_eq!(first.participants, second.participants);
        assert_eq!(assignees(&first), assignees(&second));
        assert_ne!(first.meeting_id, second.meeting_id);
        assert_eq!(coordinator.list_minutes(&id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_minutes_persisted_and_reloadable() {
        let temp_dir = TempDir::new().unwrap();
        let id = WorkflowId::from_string("wf-3").unwrap();
        let minutes = coordinator(temp_dir.path(), Arc::new(InMemoryMessageBus::new()))
            .convene_meeting(&id, "Implement login", "pm")
            .await
            .unwrap();

        let fresh = coordinator(temp_dir.path(), Arc::new(InMemoryMessageBus::new()));
        let loaded = fresh.get_minutes(&id, &minutes.meeting_id).await.unwrap().unwrap();
        assert_eq!(loaded, minutes);
    }

    #[tokio::test]
    async fn test_blank_arguments_fail_before_side_effects() {
        let temp_dir = TempDir::new().unwrap();
        let bus = Arc::new(InMemoryMessageBus::new());
        let coordinator = coordinator(temp_dir.path(), bus.clone());
        let id = WorkflowId::from_string("wf-4").unwrap();

        assert!(matches!(coordinator.convene_meeting(&id, "  ", "pm").await, Err(WorkflowError::InvalidInput(_))));
        assert!(matches!(coordinator.convene_meeting(&id, "Implement login", "").await, Err(WorkflowError::InvalidInput(_))));
        assert!(matches!(
            coordinator.convene_meeting(&id, "Implement login", "developer-agent").await,
            Err(WorkflowError::InvalidInput(_))
        ));
        assert!(coordinator.list_minutes(&id).await.is_empty());
        assert!(!temp_dir.path().join("workflows").exists());
    }

    #[tokio::test]
    async fn test_persistence_failure_registers_nothing() {
        let temp_dir = TempDir::new().unwrap();
        // a file where the workflows directory should be
        std::fs::write(temp_dir.path().join("workflows"), "blocker").unwrap();
        let coordinator = coordinator(temp_dir.path(), Arc::new(InMemoryMessageBus::new()));
        let id = WorkflowId::from_string("wf-5").unwrap();

        let result = coordinator.convene_meeting(&id, "Implement login", "pm").await;
        assert!(matches!(result, Err(WorkflowError::Meeting(_))));
        assert!(coordinator.list_minutes(&id).await.is_empty());
    }

    struct BrokenBus;

    #[async_trait]
    impl MessageBus for BrokenBus {
        async fn send(&self, _message: AgentMessage) -> Result<()> {
            Err(WorkflowError::Workflow("bus down".to_string()))
        }
        async fn record(&self, _message: AgentMessage) -> Result<()> {
            Err(WorkflowError::Workflow("bus down".to_string()))
        }
        async fn poll(&self, _agent_id: &str, _timeout: Duration) -> Result<Vec<AgentMessage>> {
            Ok(Vec::new())
        }
        async fn get_message_history(&self, _run_id: &str) -> Result<Vec<AgentMessage>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_bus_failures_do_not_affect_minutes() {
        let temp_dir = TempDir::new().unwrap();
        let coordinator = coordinator(temp_dir.path(), Arc::new(BrokenBus));
        let id = WorkflowId::from_string("wf-6").unwrap();

        let minutes = coordinator.convene_meeting(&id, "Implement login", "pm").await.unwrap();
        assert!(!minutes.action_items.is_empty());
    }
}
