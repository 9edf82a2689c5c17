//! Pluggable statement content for meetings

use async_trait::async_trait;
use workflow_types::{AgendaItem, Participant, ParticipantRole, StatementKind, WorkerType};
use crate::error::Result;
use super::agenda::AgendaTopic;

/// Everything a generator may use to write one statement
#[derive(Debug, Clone, Copy)]
pub struct OpinionContext<'a> {
    pub instruction: &'a str,
    pub agenda_item: &'a AgendaItem,
    pub speaker: &'a Participant,
    pub kind: StatementKind,
    /// Opinions already given on this agenda item, used for synthesis
    pub opinions: &'a [String],
}

/// Produces statement text. Control flow never depends on the returned text.
#[async_trait]
pub trait OpinionGenerator: Send + Sync {
    async fn generate(&self, context: &OpinionContext<'_>) -> Result<String>;
}

/// Deterministic template-based content
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateOpinionGenerator;

impl TemplateOpinionGenerator {
    pub fn new() -> Self {
        Self
    }

    fn specialist_view(worker_type: WorkerType, topic: Option<AgendaTopic>, instruction: &str) -> String {
        let focus = match (worker_type, topic) {
            (WorkerType::Research, Some(AgendaTopic::Requirements)) => "we should confirm prior art and the user need before committing",
            (WorkerType::Research, _) => "existing solutions and their trade-offs should inform this",
            (WorkerType::Design, Some(AgendaTopic::TechnicalFeasibility)) => "the module boundaries and data model need to be fixed first",
            (WorkerType::Design, _) => "the structure should stay simple and the interfaces explicit",
            (WorkerType::Designer, Some(AgendaTopic::DesignDirection)) => "the interface should follow the existing visual language",
            (WorkerType::Designer, _) => "the user-facing flow must stay consistent and accessible",
            (WorkerType::Developer, Some(AgendaTopic::TaskDecomposition)) => "the implementation splits into small, reviewable changes",
            (WorkerType::Developer, Some(AgendaTopic::RiskAssessment)) => "integration with existing code is the main implementation risk",
            (WorkerType::Developer, _) => "this is implementable with the current codebase",
            (WorkerType::Test, Some(AgendaTopic::RiskAssessment)) => "regressions are the main risk, so tests must gate delivery",
            (WorkerType::Test, _) => "every change needs automated coverage before review",
        };
        format!("From the {} perspective on '{}': {}.", worker_type, instruction, focus)
    }
}

#[async_trait]
impl OpinionGenerator for TemplateOpinionGenerator {
    async fn generate(&self, context: &OpinionContext<'_>) -> Result<String> {
        let item = context.agenda_item;
        let text = match (context.kind, context.speaker.role) {
            (StatementKind::Opening, _) => format!("Next topic: {}. {}.", item.topic, item.description),
            (StatementKind::Opinion, ParticipantRole::Specialist(worker_type)) => {
                Self::specialist_view(worker_type, AgendaTopic::from_title(&item.topic), context.instruction)
            }
            (StatementKind::Opinion, ParticipantRole::Facilitator) => {
                format!("Noted for {}.", item.topic)
            }
            (StatementKind::Synthesis, _) => format!(
                "{} for '{}' agreed after {} viewpoint(s).",
                item.topic,
                context.instruction,
                context.opinions.len()
            ),
        };
        Ok(text)
    }
}
