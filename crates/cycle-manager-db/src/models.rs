use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The role a task (and the agent executing it) plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskRole {
    Worker,
    Tester,
    Docser,
}

impl fmt::Display for TaskRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Worker => "worker",
            Self::Tester => "tester",
            Self::Docser => "docser",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskRole {
    type Err = TaskRoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "worker" => Ok(Self::Worker),
            "tester" => Ok(Self::Tester),
            "docser" => Ok(Self::Docser),
            other => Err(TaskRoleParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskRole`] string.
#[derive(Debug, Clone)]
pub struct TaskRoleParseError(pub String);

impl fmt::Display for TaskRoleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task role: {:?}", self.0)
    }
}

impl std::error::Error for TaskRoleParseError {}

// ---------------------------------------------------------------------------

/// The kind of work a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Code,
    Research,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Code => "code",
            Self::Research => "research",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskKind {
    type Err = TaskKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(Self::Code),
            "research" => Ok(Self::Research),
            other => Err(TaskKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskKind`] string.
#[derive(Debug, Clone)]
pub struct TaskKindParseError(pub String);

impl fmt::Display for TaskKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task kind: {:?}", self.0)
    }
}

impl std::error::Error for TaskKindParseError {}

// ---------------------------------------------------------------------------

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Blocked,
    Failed,
    Done,
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "blocked" => Ok(Self::Blocked),
            "failed" => Ok(Self::Failed),
            "done" => Ok(Self::Done),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Why a task is blocked. Stored as text; `null` in the database maps to
/// `Option::None` at the Rust boundary.
///
/// The legacy value `needs_human` is normalized to [`BlockReason::AwaitingJudge`]
/// at the parsing boundary (see [`FromStr`] impl) rather than kept as a
/// distinct variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    AwaitingJudge,
    NeedsRework,
    QuotaWait,
    IssueLinking,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AwaitingJudge => "awaiting_judge",
            Self::NeedsRework => "needs_rework",
            Self::QuotaWait => "quota_wait",
            Self::IssueLinking => "issue_linking",
        };
        f.write_str(s)
    }
}

impl FromStr for BlockReason {
    type Err = BlockReasonParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awaiting_judge" => Ok(Self::AwaitingJudge),
            // Legacy value normalized on read; never written by this crate.
            "needs_human" => Ok(Self::AwaitingJudge),
            "needs_rework" => Ok(Self::NeedsRework),
            "quota_wait" => Ok(Self::QuotaWait),
            "issue_linking" => Ok(Self::IssueLinking),
            other => Err(BlockReasonParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`BlockReason`] string.
#[derive(Debug, Clone)]
pub struct BlockReasonParseError(pub String);

impl fmt::Display for BlockReasonParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid block reason: {:?}", self.0)
    }
}

impl std::error::Error for BlockReasonParseError {}

// ---------------------------------------------------------------------------

/// Status of a single agent execution (run) of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for RunStatus {
    type Err = RunStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(RunStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`RunStatus`] string.
#[derive(Debug, Clone)]
pub struct RunStatusParseError(pub String);

impl fmt::Display for RunStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid run status: {:?}", self.0)
    }
}

impl std::error::Error for RunStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of an agent registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Offline,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Offline => "offline",
        };
        f.write_str(s)
    }
}

impl FromStr for AgentStatus {
    type Err = AgentStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "busy" => Ok(Self::Busy),
            "offline" => Ok(Self::Offline),
            other => Err(AgentStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`AgentStatus`] string.
#[derive(Debug, Clone)]
pub struct AgentStatusParseError(pub String);

impl fmt::Display for AgentStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid agent status: {:?}", self.0)
    }
}

impl std::error::Error for AgentStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a PR merge-queue claim row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MergeQueueStatus {
    Pending,
    Processing,
    Merged,
    Failed,
}

impl fmt::Display for MergeQueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Merged => "merged",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for MergeQueueStatus {
    type Err = MergeQueueStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "merged" => Ok(Self::Merged),
            "failed" => Ok(Self::Failed),
            other => Err(MergeQueueStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`MergeQueueStatus`] string.
#[derive(Debug, Clone)]
pub struct MergeQueueStatusParseError(pub String);

impl fmt::Display for MergeQueueStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid merge queue status: {:?}", self.0)
    }
}

impl std::error::Error for MergeQueueStatusParseError {}

// ---------------------------------------------------------------------------

/// Kind of artifact a run produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Pr,
    Worktree,
    ResearchClaim,
    ResearchSource,
    ResearchReport,
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pr => "pr",
            Self::Worktree => "worktree",
            Self::ResearchClaim => "research_claim",
            Self::ResearchSource => "research_source",
            Self::ResearchReport => "research_report",
        };
        f.write_str(s)
    }
}

impl FromStr for ArtifactType {
    type Err = ArtifactTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pr" => Ok(Self::Pr),
            "worktree" => Ok(Self::Worktree),
            "research_claim" => Ok(Self::ResearchClaim),
            "research_source" => Ok(Self::ResearchSource),
            "research_report" => Ok(Self::ResearchReport),
            other => Err(ArtifactTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ArtifactType`] string.
#[derive(Debug, Clone)]
pub struct ArtifactTypeParseError(pub String);

impl fmt::Display for ArtifactTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid artifact type: {:?}", self.0)
    }
}

impl std::error::Error for ArtifactTypeParseError {}

// ---------------------------------------------------------------------------

/// Status of a control-loop cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Running,
    Completed,
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl FromStr for CycleStatus {
    type Err = CycleStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            other => Err(CycleStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`CycleStatus`] string.
#[derive(Debug, Clone)]
pub struct CycleStatusParseError(pub String);

impl fmt::Display for CycleStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid cycle status: {:?}", self.0)
    }
}

impl std::error::Error for CycleStatusParseError {}

// ---------------------------------------------------------------------------

/// Failure category produced by the classifier (`cycle-manager-core`).
///
/// Lives here (rather than in `cycle-manager-core`) because `errorMeta` on a
/// [`Run`] stores the category name once classification has happened, and
/// query code needs to read it back without a dependency on `core`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Env,
    Setup,
    Permission,
    Noop,
    Policy,
    Test,
    Flaky,
    Model,
    ModelLoop,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Env => "env",
            Self::Setup => "setup",
            Self::Permission => "permission",
            Self::Noop => "noop",
            Self::Policy => "policy",
            Self::Test => "test",
            Self::Flaky => "flaky",
            Self::Model => "model",
            Self::ModelLoop => "model_loop",
        };
        f.write_str(s)
    }
}

impl FromStr for FailureCategory {
    type Err = FailureCategoryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "env" => Ok(Self::Env),
            "setup" => Ok(Self::Setup),
            "permission" => Ok(Self::Permission),
            "noop" => Ok(Self::Noop),
            "policy" => Ok(Self::Policy),
            "test" => Ok(Self::Test),
            "flaky" => Ok(Self::Flaky),
            "model" => Ok(Self::Model),
            "model_loop" => Ok(Self::ModelLoop),
            other => Err(FailureCategoryParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`FailureCategory`] string.
#[derive(Debug, Clone)]
pub struct FailureCategoryParseError(pub String);

impl fmt::Display for FailureCategoryParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid failure category: {:?}", self.0)
    }
}

impl std::error::Error for FailureCategoryParseError {}

// ---------------------------------------------------------------------------
// Structured JSON payloads
// ---------------------------------------------------------------------------

/// Pull-request context carried on a task born from, or tracking, a PR.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrContext {
    pub number: i64,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_task_id: Option<Uuid>,
    pub head_ref: String,
    pub head_sha: String,
    pub base_ref: String,
}

/// Issue-tracker context carried on a task born from an issue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueContext {
    pub number: i64,
    pub url: String,
}

/// Structured, freeform context attached to a task.
///
/// Stored as `jsonb`; serialized/deserialized at the query boundary rather
/// than given dedicated columns, matching how the persistence layer treats
/// every other structured payload (`errorMeta`, `metadata`, `stats`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskContext {
    pub files: Vec<String>,
    pub specs: Vec<String>,
    pub notes: String,
    pub pr: Option<PrContext>,
    pub issue: Option<IssueContext>,
    pub imported_from_pr_backlog: bool,
}

/// Structured detail attached to a failed/cancelled run's error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorMeta {
    pub failure_code: Option<String>,
    pub failed_command: Option<String>,
    pub policy_violations: Vec<String>,
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A task -- a unit of work in the queue.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub goal: String,
    pub role: TaskRole,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub block_reason: Option<BlockReason>,
    pub retry_count: i32,
    pub priority: i32,
    pub risk_level: i32,
    pub timebox_minutes: i32,
    pub allowed_paths: Vec<String>,
    pub commands: Vec<String>,
    #[sqlx(json)]
    pub context: sqlx::types::Json<TaskContext>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An edge in the task dependency graph: `task_id` depends on `depends_on`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskDependency {
    pub task_id: Uuid,
    pub depends_on: Uuid,
}

/// One agent execution of a task.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Run {
    pub id: Uuid,
    pub task_id: Uuid,
    pub agent_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cost_tokens: Option<i64>,
    pub error_message: Option<String>,
    #[sqlx(json)]
    pub error_meta: sqlx::types::Json<Option<ErrorMeta>>,
    pub judged_at: Option<DateTime<Utc>>,
}

/// A worker's exclusive hold on a task.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Lease {
    pub id: Uuid,
    pub task_id: Uuid,
    pub owner_agent_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// An executor registration.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Agent {
    pub id: Uuid,
    pub role: TaskRole,
    pub status: AgentStatus,
    pub current_task_id: Option<Uuid>,
    pub last_heartbeat: DateTime<Utc>,
    #[sqlx(json)]
    pub metadata: sqlx::types::Json<serde_json::Value>,
}

/// A row in the external PR merge queue.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MergeQueueEntry {
    pub id: Uuid,
    pub task_id: Uuid,
    pub pr_number: i64,
    pub status: MergeQueueStatus,
    pub claim_owner: Option<String>,
    pub claim_token: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claim_expires_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// An append-only structured log row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: i64,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub agent_id: Option<Uuid>,
    #[sqlx(json)]
    pub payload: sqlx::types::Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A produced artifact tied to a run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Artifact {
    pub run_id: Uuid,
    pub artifact_type: ArtifactType,
    pub created_at: DateTime<Utc>,
}

/// A bounded epoch of control-loop activity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Cycle {
    pub id: Uuid,
    pub number: i64,
    pub status: CycleStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[sqlx(json)]
    pub stats: sqlx::types::Json<serde_json::Value>,
    #[sqlx(json)]
    pub state_snapshot: sqlx::types::Json<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_role_display_roundtrip() {
        let variants = [TaskRole::Worker, TaskRole::Tester, TaskRole::Docser];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskRole = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_role_invalid() {
        assert!("architect".parse::<TaskRole>().is_err());
    }

    #[test]
    fn task_kind_display_roundtrip() {
        for v in [TaskKind::Code, TaskKind::Research] {
            let s = v.to_string();
            assert_eq!(v, s.parse::<TaskKind>().expect("should parse"));
        }
    }

    #[test]
    fn task_kind_invalid() {
        assert!("docs".parse::<TaskKind>().is_err());
    }

    #[test]
    fn task_status_display_roundtrip() {
        let variants = [
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Blocked,
            TaskStatus::Failed,
            TaskStatus::Done,
            TaskStatus::Cancelled,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_status_invalid() {
        assert!("paused".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn block_reason_display_roundtrip() {
        let variants = [
            BlockReason::AwaitingJudge,
            BlockReason::NeedsRework,
            BlockReason::QuotaWait,
            BlockReason::IssueLinking,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: BlockReason = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn block_reason_normalizes_legacy_needs_human() {
        assert_eq!(
            "needs_human".parse::<BlockReason>().unwrap(),
            BlockReason::AwaitingJudge
        );
    }

    #[test]
    fn block_reason_invalid() {
        assert!("confused".parse::<BlockReason>().is_err());
    }

    #[test]
    fn run_status_display_roundtrip() {
        let variants = [
            RunStatus::Running,
            RunStatus::Success,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: RunStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn run_status_invalid() {
        assert!("pending".parse::<RunStatus>().is_err());
    }

    #[test]
    fn agent_status_display_roundtrip() {
        for v in [AgentStatus::Idle, AgentStatus::Busy, AgentStatus::Offline] {
            let s = v.to_string();
            assert_eq!(v, s.parse::<AgentStatus>().expect("should parse"));
        }
    }

    #[test]
    fn agent_status_invalid() {
        assert!("sleeping".parse::<AgentStatus>().is_err());
    }

    #[test]
    fn merge_queue_status_display_roundtrip() {
        let variants = [
            MergeQueueStatus::Pending,
            MergeQueueStatus::Processing,
            MergeQueueStatus::Merged,
            MergeQueueStatus::Failed,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: MergeQueueStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn merge_queue_status_invalid() {
        assert!("claimed".parse::<MergeQueueStatus>().is_err());
    }

    #[test]
    fn artifact_type_display_roundtrip() {
        let variants = [
            ArtifactType::Pr,
            ArtifactType::Worktree,
            ArtifactType::ResearchClaim,
            ArtifactType::ResearchSource,
            ArtifactType::ResearchReport,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: ArtifactType = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn artifact_type_invalid() {
        assert!("log".parse::<ArtifactType>().is_err());
    }

    #[test]
    fn cycle_status_display_roundtrip() {
        for v in [CycleStatus::Running, CycleStatus::Completed] {
            let s = v.to_string();
            assert_eq!(v, s.parse::<CycleStatus>().expect("should parse"));
        }
    }

    #[test]
    fn cycle_status_invalid() {
        assert!("idle".parse::<CycleStatus>().is_err());
    }

    #[test]
    fn failure_category_display_roundtrip() {
        let variants = [
            FailureCategory::Env,
            FailureCategory::Setup,
            FailureCategory::Permission,
            FailureCategory::Noop,
            FailureCategory::Policy,
            FailureCategory::Test,
            FailureCategory::Flaky,
            FailureCategory::Model,
            FailureCategory::ModelLoop,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: FailureCategory = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn failure_category_invalid() {
        assert!("unknown_category".parse::<FailureCategory>().is_err());
    }

    #[test]
    fn task_context_defaults_are_empty() {
        let ctx: TaskContext = serde_json::from_str("{}").unwrap();
        assert!(ctx.files.is_empty());
        assert!(ctx.pr.is_none());
        assert!(!ctx.imported_from_pr_backlog);
    }
}
