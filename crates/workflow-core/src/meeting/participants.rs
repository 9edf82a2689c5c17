//! Participant selection by worker expertise

use once_cell::sync::Lazy;
use regex::Regex;
use workflow_types::{Participant, WorkerType};

static RESEARCH_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(research\w*|investigat\w*|analy[sz]\w*|survey\w*|compar\w*|evaluat\w*|benchmark\w*|explor\w*|feasibility)\b")
        .expect("Failed to compile research keywords")
});

static DESIGN_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(architect\w*|schema\w*|data model|interface\w*|structur\w*|modul\w*|specification\w*|system design)\b")
        .expect("Failed to compile design keywords")
});

static DESIGNER_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(ui|ux|visual\w*|layout\w*|mockup\w*|wireframe\w*|style\w*|css|screen\w*|page|pages|theme\w*|icon\w*|dashboard)\b")
        .expect("Failed to compile designer keywords")
});

static DEVELOPER_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(implement\w*|build\w*|develop\w*|code|coding|fix\w*|feature\w*|refactor\w*|login|api|apis|endpoint\w*|integrat\w*|migrat\w*|bug\w*)\b")
        .expect("Failed to compile developer keywords")
});

static TEST_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(test\w*|qa|verif\w*|validat\w*|coverage|regression\w*|e2e)\b")
        .expect("Failed to compile test keywords")
});

fn expertise(worker_type: WorkerType) -> &'static Regex {
    match worker_type {
        WorkerType::Research => &*RESEARCH_KEYWORDS,
        WorkerType::Design => &*DESIGN_KEYWORDS,
        WorkerType::Designer => &*DESIGNER_KEYWORDS,
        WorkerType::Developer => &*DEVELOPER_KEYWORDS,
        WorkerType::Test => &*TEST_KEYWORDS,
    }
}

pub fn matches_expertise(worker_type: WorkerType, instruction: &str) -> bool {
    expertise(worker_type).is_match(instruction)
}

/// Specialists whose vocabulary the instruction mentions, developer when none do
pub fn select_specialists(instruction: &str) -> Vec<WorkerType> {
    let selected: Vec<WorkerType> = WorkerType::ALL
        .into_iter()
        .filter(|worker_type| matches_expertise(*worker_type, instruction))
        .collect();
    if selected.is_empty() {
        vec![WorkerType::Developer]
    } else {
        selected
    }
}

/// Whether `agent_id` is the id a specialist representative speaks under
pub fn is_specialist_agent_id(agent_id: &str) -> bool {
    WorkerType::ALL.into_iter().any(|worker_type| worker_type.agent_id() == agent_id)
}

/// Facilitator first, then one representative per selected specialist type
pub fn select_participants(instruction: &str, facilitator_id: &str) -> Vec<Participant> {
    std::iter::once(Participant::facilitator(facilitator_id))
        .chain(select_specialists(instruction).into_iter().map(Participant::specialist))
        .collect()
}
