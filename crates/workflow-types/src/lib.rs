//! Shared types for the delivery workflow engine
//!
//! Everything in here is plain, serde-serializable data. The orchestration
//! logic that mutates these records lives in `workflow-core`.

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Strongly typed WorkflowId
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Result<Self, TypeError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(TypeError::InvalidId("workflow id must not be empty".to_string()));
        }
        if trimmed.contains(['/', '\\']) || trimmed.starts_with('.') {
            return Err(TypeError::InvalidId(format!("workflow id '{}' is not a valid path segment", trimmed)));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse failures for the closed enums and ids in this crate
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TypeError {
    #[error("Unknown phase: {0}")]
    UnknownPhase(String),

    #[error("Unknown worker type: {0}")]
    UnknownWorkerType(String),

    #[error("Unknown approval action: {0}")]
    UnknownApprovalAction(String),

    #[error("Unknown escalation action: {0}")]
    UnknownEscalationAction(String),

    #[error("Unknown workflow status: {0}")]
    UnknownStatus(String),

    #[error("Invalid id: {0}")]
    InvalidId(String),
}

// ---------------------------------------------------------------------------
// Phases and status
// ---------------------------------------------------------------------------

/// The five sequential workflow stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Proposal,
    Approval,
    Development,
    QualityAssurance,
    Delivery,
}

impl Phase {
    /// Canonical order used by rollback
    pub const ORDER: [Phase; 5] = [
        Phase::Proposal,
        Phase::Approval,
        Phase::Development,
        Phase::QualityAssurance,
        Phase::Delivery,
    ];

    /// Position in the canonical order
    pub fn index(self) -> usize {
        match self {
            Self::Proposal => 0,
            Self::Approval => 1,
            Self::Development => 2,
            Self::QualityAssurance => 3,
            Self::Delivery => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proposal => "proposal",
            Self::Approval => "approval",
            Self::Development => "development",
            Self::QualityAssurance => "quality_assurance",
            Self::Delivery => "delivery",
        }
    }

    /// Whether this phase strictly precedes `other` in the canonical order
    pub fn precedes(self, other: Phase) -> bool {
        self.index() < other.index()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "proposal" => Ok(Self::Proposal),
            "approval" => Ok(Self::Approval),
            "development" => Ok(Self::Development),
            "quality_assurance" | "qa" => Ok(Self::QualityAssurance),
            "delivery" => Ok(Self::Delivery),
            other => Err(TypeError::UnknownPhase(other.to_string())),
        }
    }
}

/// Workflow processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    WaitingApproval,
    Failed,
    Completed,
    Terminated,
}

impl WorkflowStatus {
    /// Completed and terminated are one-way exits. Failed is not: an operator
    /// can still roll a failed workflow back.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Terminated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::WaitingApproval => "waiting_approval",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "waiting_approval" => Ok(Self::WaitingApproval),
            "failed" => Ok(Self::Failed),
            "completed" => Ok(Self::Completed),
            "terminated" => Ok(Self::Terminated),
            other => Err(TypeError::UnknownStatus(other.to_string())),
        }
    }
}

/// Immutable record of a phase change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    #[serde(default)]
    pub rollback: bool,
}

// ---------------------------------------------------------------------------
// Worker types
// ---------------------------------------------------------------------------

/// Specialist worker types. Closed set, matched exhaustively at every dispatch site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerType {
    Research,
    Design,
    Designer,
    Developer,
    Test,
}

impl WorkerType {
    pub const ALL: [WorkerType; 5] = [
        WorkerType::Research,
        WorkerType::Design,
        WorkerType::Designer,
        WorkerType::Developer,
        WorkerType::Test,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Design => "design",
            Self::Designer => "designer",
            Self::Developer => "developer",
            Self::Test => "test",
        }
    }

    /// Worker types whose tasks are handed to the coding agent
    pub fn writes_code(self) -> bool {
        matches!(self, Self::Developer | Self::Test)
    }

    /// Default agent id representing this worker type in meetings and on the bus
    pub fn agent_id(self) -> String {
        format!("{}-agent", self.as_str())
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "research" => Ok(Self::Research),
            "design" => Ok(Self::Design),
            "designer" => Ok(Self::Designer),
            "developer" => Ok(Self::Developer),
            "test" => Ok(Self::Test),
            other => Err(TypeError::UnknownWorkerType(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Proposal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffortLevel {
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// One unit of development work from the proposal's task breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalTask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub worker_type: WorkerType,
    pub estimated_effort: EffortLevel,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerAssignment {
    pub task_id: String,
    pub worker_type: WorkerType,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskItem {
    pub category: String,
    pub description: String,
    pub severity: Severity,
    pub mitigation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Sequential,
    Blocking,
}

/// Dependency edge: `from` must finish before `to` may start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDependency {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: DependencyKind,
}

/// Structured output of the proposal phase. Never mutated after persistence;
/// a revision produces a new proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub workflow_id: WorkflowId,
    pub summary: String,
    pub scope: String,
    pub task_breakdown: Vec<ProposalTask>,
    pub worker_assignments: Vec<WorkerAssignment>,
    pub risk_assessment: Vec<RiskItem>,
    pub dependencies: Vec<TaskDependency>,
    pub meeting_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalRevision {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub feedback: Option<String>,
}

/// On-disk form of `proposal.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalDocument {
    pub proposal: Proposal,
    pub version: u32,
    #[serde(default)]
    pub revision_history: Vec<ProposalRevision>,
}

// ---------------------------------------------------------------------------
// Approvals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Approve,
    RequestRevision,
    Reject,
}

impl fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approve => f.write_str("approve"),
            Self::RequestRevision => f.write_str("request_revision"),
            Self::Reject => f.write_str("reject"),
        }
    }
}

impl FromStr for ApprovalAction {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "approve" | "approved" => Ok(Self::Approve),
            "request_revision" | "revise" => Ok(Self::RequestRevision),
            "reject" | "rejected" => Ok(Self::Reject),
            other => Err(TypeError::UnknownApprovalAction(other.to_string())),
        }
    }
}

/// A human decision on a gated phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub workflow_id: WorkflowId,
    pub phase: Phase,
    pub action: ApprovalAction,
    #[serde(default)]
    pub feedback: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl ApprovalDecision {
    pub fn new(workflow_id: WorkflowId, phase: Phase, action: ApprovalAction, feedback: Option<String>) -> Self {
        Self {
            workflow_id,
            phase,
            action,
            feedback,
            decided_at: Utc::now(),
        }
    }

    pub fn feedback_or_default(&self) -> &str {
        self.feedback.as_deref().unwrap_or("no feedback provided")
    }
}

/// What is being put in front of the decision-maker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ApprovalContent {
    Proposal(Proposal),
    Deliverable(Deliverable),
}

/// Outstanding request, only present while a phase awaits a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub workflow_id: WorkflowId,
    pub phase: Phase,
    pub content: ApprovalContent,
    pub created_at: DateTime<Utc>,
}

/// On-disk form of `approvals.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalHistoryDocument {
    pub workflow_id: WorkflowId,
    pub decisions: Vec<ApprovalDecision>,
}

// ---------------------------------------------------------------------------
// Meetings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgendaStatus {
    Pending,
    Discussing,
    Concluded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgendaItem {
    pub id: String,
    pub topic: String,
    pub description: String,
    pub status: AgendaStatus,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "worker_type", rename_all = "snake_case")]
pub enum ParticipantRole {
    Facilitator,
    Specialist(WorkerType),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub agent_id: String,
    pub role: ParticipantRole,
}

impl Participant {
    pub fn facilitator(agent_id: impl Into<String>) -> Self {
        Self { agent_id: agent_id.into(), role: ParticipantRole::Facilitator }
    }

    pub fn specialist(worker_type: WorkerType) -> Self {
        Self { agent_id: worker_type.agent_id(), role: ParticipantRole::Specialist(worker_type) }
    }

    pub fn worker_type(&self) -> Option<WorkerType> {
        match self.role {
            ParticipantRole::Facilitator => None,
            ParticipantRole::Specialist(worker_type) => Some(worker_type),
        }
    }

    pub fn is_facilitator(&self) -> bool {
        matches!(self.role, ParticipantRole::Facilitator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Opening,
    Opinion,
    Synthesis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub sequence: u32,
    pub agenda_item_id: String,
    pub speaker: String,
    pub kind: StatementKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingDecision {
    pub id: String,
    pub agenda_item_id: String,
    pub content: String,
    pub decided_by: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub id: String,
    pub decision_id: String,
    pub description: String,
    pub assignee: String,
    pub worker_type: WorkerType,
}

/// Structured record of one convened meeting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingMinutes {
    pub meeting_id: String,
    pub workflow_id: WorkflowId,
    pub agenda: Vec<AgendaItem>,
    pub participants: Vec<Participant>,
    pub statements: Vec<Statement>,
    pub decisions: Vec<MeetingDecision>,
    pub action_items: Vec<ActionItem>,
    pub facilitator: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Development progress, quality, escalation, delivery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Working,
    Review,
    Completed,
    Failed,
    Skipped,
}

impl SubtaskStatus {
    /// Already settled, resumption skips these
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    NeedsRevision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskProgress {
    pub id: String,
    pub title: String,
    pub status: SubtaskStatus,
    pub worker_type: WorkerType,
    #[serde(default)]
    pub assigned_worker: Option<String>,
    #[serde(default)]
    pub review_status: Option<ReviewStatus>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl SubtaskProgress {
    pub fn from_task(task: &ProposalTask) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            status: SubtaskStatus::Pending,
            worker_type: task.worker_type,
            assigned_worker: None,
            review_status: None,
            attempts: 0,
            started_at: None,
            completed_at: None,
            last_error: None,
        }
    }
}

/// Development-phase progress snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevelopmentProgress {
    pub subtasks: Vec<SubtaskProgress>,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub failed_tasks: u32,
    pub skipped_tasks: u32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DevelopmentProgress {
    pub fn from_proposal(proposal: &Proposal) -> Self {
        let subtasks: Vec<SubtaskProgress> = proposal.task_breakdown.iter().map(SubtaskProgress::from_task).collect();
        Self {
            total_tasks: subtasks.len() as u32,
            subtasks,
            completed_tasks: 0,
            failed_tasks: 0,
            skipped_tasks: 0,
            updated_at: Some(Utc::now()),
        }
    }

    /// True when this progress was derived from the given proposal's task set
    pub fn matches(&self, proposal: &Proposal) -> bool {
        self.subtasks.len() == proposal.task_breakdown.len()
            && self
                .subtasks
                .iter()
                .zip(proposal.task_breakdown.iter())
                .all(|(subtask, task)| subtask.id == task.id)
    }

    pub fn subtask(&self, id: &str) -> Option<&SubtaskProgress> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    pub fn subtask_mut(&mut self, id: &str) -> Option<&mut SubtaskProgress> {
        self.subtasks.iter_mut().find(|s| s.id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub passed: bool,
    pub output: String,
    #[serde(default)]
    pub simulated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityResults {
    pub lint: CheckResult,
    pub test: CheckResult,
    pub final_review: CheckResult,
    pub overall_passed: bool,
    #[serde(default)]
    pub iteration: u32,
    #[serde(default)]
    pub checked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEscalation {
    pub workflow_id: WorkflowId,
    pub ticket_id: String,
    pub failure_details: String,
    pub worker_type: WorkerType,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
    Retry,
    Skip,
    Abort,
}

impl FromStr for EscalationAction {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(Self::Retry),
            "skip" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            other => Err(TypeError::UnknownEscalationAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub action: EscalationAction,
    #[serde(default)]
    pub reason: Option<String>,
}

impl EscalationDecision {
    pub fn new(action: EscalationAction) -> Self {
        Self { action, reason: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub task_id: String,
    pub path: String,
    pub kind: ChangeKind,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewLogEntry {
    pub phase: Phase,
    pub action: ApprovalAction,
    pub feedback: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub path: String,
}

/// Final output presented for delivery approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deliverable {
    pub workflow_id: WorkflowId,
    pub summary_report: String,
    pub changes: Vec<ChangeEntry>,
    pub test_results: QualityResults,
    pub review_history: Vec<ReviewLogEntry>,
    pub artifacts: Vec<Artifact>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Workflow state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    pub message: String,
}

/// One per workflow instance, owned by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: WorkflowId,
    pub run_id: String,
    pub project_id: String,
    pub instruction: String,
    pub current_phase: Phase,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub phase_history: Vec<PhaseTransition>,
    #[serde(default)]
    pub approval_decisions: Vec<ApprovalDecision>,
    #[serde(default)]
    pub error_log: Vec<ErrorLogEntry>,
    #[serde(default)]
    pub meeting_minutes_ids: Vec<String>,
    #[serde(default)]
    pub proposal: Option<Proposal>,
    #[serde(default)]
    pub deliverable: Option<Deliverable>,
    #[serde(default)]
    pub progress: Option<DevelopmentProgress>,
    #[serde(default)]
    pub quality_results: Option<QualityResults>,
    #[serde(default)]
    pub escalation: Option<WorkflowEscalation>,
    #[serde(default)]
    pub quality_iterations: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Initial state: proposal phase, running
    pub fn new(instruction: String, project_id: String) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: WorkflowId::new(),
            run_id: Uuid::new_v4().to_string(),
            project_id,
            instruction,
            current_phase: Phase::Proposal,
            status: WorkflowStatus::Running,
            phase_history: Vec::new(),
            approval_decisions: Vec::new(),
            error_log: Vec::new(),
            meeting_minutes_ids: Vec::new(),
            proposal: None,
            deliverable: None,
            progress: None,
            quality_results: None,
            escalation: None,
            quality_iterations: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.error_log.push(ErrorLogEntry {
            timestamp: Utc::now(),
            phase: self.current_phase,
            message: message.into(),
        });
    }
}

/// Optional filter for listing workflows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowFilter {
    #[serde(default)]
    pub status: Option<WorkflowStatus>,
    #[serde(default)]
    pub phase: Option<Phase>,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl WorkflowFilter {
    pub fn matches(&self, state: &WorkflowState) -> bool {
        self.status.map_or(true, |s| s == state.status)
            && self.phase.map_or(true, |p| p == state.current_phase)
            && self.project_id.as_deref().map_or(true, |p| p == state.project_id)
    }
}

// ---------------------------------------------------------------------------
// Agent message bus envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TaskAssign,
    TaskComplete,
    TaskFailed,
    Escalate,
    StatusRequest,
    StatusResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub run_id: String,
    pub message_type: MessageType,
    pub from: String,
    pub to: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(
        run_id: impl Into<String>,
        message_type: MessageType,
        from: impl Into<String>,
        to: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            message_type,
            from: from.into(),
            to: to.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Operator commands
// ---------------------------------------------------------------------------

/// Command file dropped into the inbox directory by an operator or the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WorkflowCommand {
    Start {
        instruction: String,
        project_id: String,
    },
    Decide {
        workflow_id: WorkflowId,
        action: ApprovalAction,
        #[serde(default)]
        feedback: Option<String>,
    },
    Escalation {
        workflow_id: WorkflowId,
        action: EscalationAction,
        #[serde(default)]
        reason: Option<String>,
    },
    Terminate {
        workflow_id: WorkflowId,
        #[serde(default)]
        reason: Option<String>,
    },
    Rollback {
        workflow_id: WorkflowId,
        target_phase: Phase,
    },
}

impl WorkflowCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Decide { .. } => "decide",
            Self::Escalation { .. } => "escalation",
            Self::Terminate { .. } => "terminate",
            Self::Rollback { .. } => "rollback",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_command_wire_format() {
        let json = r#"{"command":"decide","workflow_id":"wf-1","action":"request_revision","feedback":"split task 2"}"#;
        let command: WorkflowCommand = serde_json::from_str(json).unwrap();
        assert_eq!(
            command,
            WorkflowCommand::Decide {
                workflow_id: WorkflowId::from_string("wf-1").unwrap(),
                action: ApprovalAction::RequestRevision,
                feedback: Some("split task 2".to_string()),
            }
        );
        assert_eq!(command.name(), "decide");

        let rollback: WorkflowCommand =
            serde_json::from_str(r#"{"command":"rollback","workflow_id":"wf-1","target_phase":"development"}"#).unwrap();
        assert!(matches!(rollback, WorkflowCommand::Rollback { target_phase: Phase::Development, .. }));
    }

    #[test]
    fn test_phase_order_and_precedence() {
        for (i, phase) in Phase::ORDER.iter().enumerate() {
            assert_eq!(phase.index(), i);
        }
        assert!(Phase::Proposal.precedes(Phase::Delivery));
        assert!(!Phase::Delivery.precedes(Phase::Delivery));
        assert!(!Phase::Development.precedes(Phase::Approval));
    }

    #[test]
    fn test_phase_serializes_snake_case() {
        let json = serde_json::to_string(&Phase::QualityAssurance).unwrap();
        assert_eq!(json, "\"quality_assurance\"");
        assert_eq!("quality-assurance".parse::<Phase>().unwrap(), Phase::QualityAssurance);
        assert!("shipping".parse::<Phase>().is_err());
    }

    #[test]
    fn test_status_terminality() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Terminated.is_terminal());
        assert!(!WorkflowStatus::Failed.is_terminal());
        assert!(!WorkflowStatus::WaitingApproval.is_terminal());
        assert_eq!(serde_json::to_string(&WorkflowStatus::WaitingApproval).unwrap(), "\"waiting_approval\"");
    }

    #[test]
    fn test_unknown_worker_type_rejected() {
        assert_eq!("Developer".parse::<WorkerType>().unwrap(), WorkerType::Developer);
        assert_eq!(
            "astronaut".parse::<WorkerType>(),
            Err(TypeError::UnknownWorkerType("astronaut".to_string()))
        );
        assert!(WorkerType::Test.writes_code());
        assert!(!WorkerType::Designer.writes_code());
    }

    #[test]
    fn test_workflow_id_rejects_path_segments() {
        assert!(WorkflowId::from_string("").is_err());
        assert!(WorkflowId::from_string("../etc").is_err());
        assert!(WorkflowId::from_string("a/b").is_err());
        assert_eq!(WorkflowId::from_string(" wf-1 ").unwrap().as_str(), "wf-1");
    }

    #[test]
    fn test_new_workflow_state_defaults() {
        let state = WorkflowState::new("Implement login".to_string(), "proj-1".to_string());
        assert_eq!(state.current_phase, Phase::Proposal);
        assert_eq!(state.status, WorkflowStatus::Running);
        assert!(state.phase_history.is_empty());
        assert!(state.escalation.is_none());
        assert_ne!(state.run_id, state.workflow_id.as_str());
    }

    #[test]
    fn test_workflow_state_tolerates_missing_optional_fields() {
        let json = r#"{
            "workflow_id": "wf-legacy",
            "run_id": "run-1",
            "project_id": "proj",
            "instruction": "do it",
            "current_phase": "approval",
            "status": "waiting_approval",
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z"
        }"#;
        let state: WorkflowState = serde_json::from_str(json).unwrap();
        assert_eq!(state.current_phase, Phase::Approval);
        assert!(state.approval_decisions.is_empty());
        assert_eq!(state.quality_iterations, 0);
    }

    #[test]
    fn test_filter_matching() {
        let state = WorkflowState::new("x".to_string(), "proj-1".to_string());
        assert!(WorkflowFilter::default().matches(&state));
        let by_project = WorkflowFilter { project_id: Some("proj-2".to_string()), ..Default::default() };
        assert!(!by_project.matches(&state));
        let by_status = WorkflowFilter { status: Some(WorkflowStatus::Running), ..Default::default() };
        assert!(by_status.matches(&state));
    }

    #[test]
    fn test_approval_content_is_tagged() {
        let deliverable = Deliverable {
            workflow_id: WorkflowId::from_string("wf-1").unwrap(),
            summary_report: "done".to_string(),
            changes: vec![],
            test_results: QualityResults::default(),
            review_history: vec![],
            artifacts: vec![],
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(ApprovalContent::Deliverable(deliverable)).unwrap();
        assert_eq!(json["kind"], "deliverable");
        assert_eq!(json["data"]["summary_report"], "done");
    }
}
