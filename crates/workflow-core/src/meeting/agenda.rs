//! Agenda generation from the instruction text

use once_cell::sync::Lazy;
use regex::Regex;
use workflow_types::{AgendaItem, AgendaStatus};

static TECHNICAL_VOCABULARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(api|apis|backend|server|database|db|schema|architecture|performance|scalab\w*|integrat\w*|migrat\w*|security|auth\w*|login|infrastructure|deploy\w*|protocol|cache|caching|latency|algorithm\w*)\b",
    )
    .expect("Failed to compile technical vocabulary regex")
});

static DESIGN_VOCABULARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(ui|ux|design\w*|layout|screen\w*|page|pages|style\w*|css|theme|frontend|front-end|mockup\w*|wireframe\w*|visual\w*|dashboard|responsive|accessibility)\b",
    )
    .expect("Failed to compile design vocabulary regex")
});

/// Agenda topics in the order they are discussed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgendaTopic {
    Requirements,
    TechnicalFeasibility,
    DesignDirection,
    TaskDecomposition,
    RiskAssessment,
}

impl AgendaTopic {
    pub fn title(self) -> &'static str {
        match self {
            Self::Requirements => "Requirements confirmation",
            Self::TechnicalFeasibility => "Technical feasibility",
            Self::DesignDirection => "Design direction",
            Self::TaskDecomposition => "Task decomposition & assignment",
            Self::RiskAssessment => "Risk assessment",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Requirements => "Confirm what the instruction asks for and what done looks like",
            Self::TechnicalFeasibility => "Check the technical approach, constraints and integration points",
            Self::DesignDirection => "Agree on the user-facing design and interaction direction",
            Self::TaskDecomposition => "Split the work into tasks and assign them to specialists",
            Self::RiskAssessment => "Identify delivery risks and their mitigations",
        }
    }

    pub fn from_title(title: &str) -> Option<Self> {
        [
            Self::Requirements,
            Self::TechnicalFeasibility,
            Self::DesignDirection,
            Self::TaskDecomposition,
            Self::RiskAssessment,
        ]
        .into_iter()
        .find(|topic| topic.title() == title)
    }
}

pub fn mentions_technical_topics(instruction: &str) -> bool {
    TECHNICAL_VOCABULARY.is_match(instruction)
}

pub fn mentions_design_topics(instruction: &str) -> bool {
    DESIGN_VOCABULARY.is_match(instruction)
}

/// Topics for this instruction; the three core topics are always present
pub fn agenda_topics(instruction: &str) -> Vec<AgendaTopic> {
    let mut topics = vec![AgendaTopic::Requirements];
    if mentions_technical_topics(instruction) {
        topics.push(AgendaTopic::TechnicalFeasibility);
    }
    if mentions_design_topics(instruction) {
        topics.push(AgendaTopic::DesignDirection);
    }
    topics.push(AgendaTopic::TaskDecomposition);
    topics.push(AgendaTopic::RiskAssessment);
    topics
}

/// Build the agenda, every item starting out pending
pub fn generate_agenda(instruction: &str) -> Vec<AgendaItem> {
    agenda_topics(instruction)
        .into_iter()
        .enumerate()
        .map(|(i, topic)| AgendaItem {
            id: format!("agenda-{}", i + 1),
            topic: topic.title().to_string(),
            description: topic.description().to_string(),
            status: AgendaStatus::Pending,
            summary: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_topics_always_present() {
        let topics = agenda_topics("Tidy up the README");
        assert_eq!(
            topics,
            vec![AgendaTopic::Requirements, AgendaTopic::TaskDecomposition, AgendaTopic::RiskAssessment]
        );
    }

    #[test]
    fn test_conditional_topics_in_order() {
        let topics = agenda_topics("Build a login API and a responsive dashboard UI");
        assert_eq!(
            topics,
            vec![
                AgendaTopic::Requirements,
                AgendaTopic::TechnicalFeasibility,
                AgendaTopic::DesignDirection,
                AgendaTopic::TaskDecomposition,
                AgendaTopic::RiskAssessment,
            ]
        );
    }

    #[test]
    fn test_vocabulary_matches_whole_words() {
        assert!(mentions_technical_topics("Implement login"));
        assert!(!mentions_technical_topics("Rapid prototype"));
        assert!(mentions_design_topics("Redesign the settings page"));
        assert!(!mentions_design_topics("Implement login"));
    }

    #[test]
    fn test_agenda_items_start_pending() {
        let agenda = generate_agenda("Implement login");
        assert!(agenda.iter().all(|item| item.status == AgendaStatus::Pending && item.summary.is_none()));
        assert_eq!(agenda[0].id, "agenda-1");
        assert_eq!(AgendaTopic::from_title(&agenda[1].topic), Some(AgendaTopic::TechnicalFeasibility));
    }
}
