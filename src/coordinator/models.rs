use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Presence status of a registered agent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Idle,
    Offline,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentStatus::Active => "active",
            AgentStatus::Idle => "idle",
            AgentStatus::Offline => "offline",
        };
        f.write_str(s)
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AgentStatus::Active),
            "idle" => Ok(AgentStatus::Idle),
            "offline" => Ok(AgentStatus::Offline),
            _ => Err(format!("Unknown agent status: {s}")),
        }
    }
}

/// A registered participant: an autonomous agent or a human operator
///
/// Exactly one record exists per `agentId`. Created on first contact and
/// merged field-by-field on every subsequent upsert; `lastSeen` always
/// advances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub agent_id: String,
    pub status: AgentStatus,
    pub current_task: Option<String>,
    pub working_on: Option<String>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub offers: Vec<String>,
    #[serde(default)]
    pub needs: Vec<String>,
}

impl AgentRecord {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            status: AgentStatus::Active,
            current_task: None,
            working_on: None,
            last_seen: Utc::now(),
            capabilities: Vec::new(),
            offers: Vec::new(),
            needs: Vec::new(),
        }
    }
}

/// Partial agent update merged into the stored record
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentUpsert {
    pub agent_id: String,
    pub status: Option<AgentStatus>,
    pub current_task: Option<String>,
    pub working_on: Option<String>,
    pub capabilities: Option<Vec<String>>,
    pub offers: Option<Vec<String>>,
    pub needs: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthorType {
    Agent,
    Human,
    System,
}

impl fmt::Display for AuthorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthorType::Agent => "agent",
            AuthorType::Human => "human",
            AuthorType::System => "system",
        };
        f.write_str(s)
    }
}

impl FromStr for AuthorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(AuthorType::Agent),
            "human" => Ok(AuthorType::Human),
            "system" => Ok(AuthorType::System),
            _ => Err(format!("Unknown author type: {s}")),
        }
    }
}

/// A group-chat message. Append-only; retrieval returns the most recent N
/// in chronological order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub author: String,
    pub author_type: AuthorType,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub reactions: Vec<String>,
}

impl ChatMessage {
    pub fn new(author: impl Into<String>, author_type: AuthorType, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            author: author.into(),
            author_type,
            message: message.into(),
            timestamp: Utc::now(),
            reactions: Vec::new(),
        }
    }
}

/// Task priority levels, `critical` first in every listing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl TaskPriority {
    /// Sort rank: lower sorts first.
    pub fn rank(&self) -> u8 {
        match self {
            TaskPriority::Critical => 0,
            TaskPriority::High => 1,
            TaskPriority::Medium => 2,
            TaskPriority::Low => 3,
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskPriority::Critical => "critical",
            TaskPriority::High => "high",
            TaskPriority::Medium => "medium",
            TaskPriority::Low => "low",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(TaskPriority::Critical),
            "high" => Ok(TaskPriority::High),
            "medium" => Ok(TaskPriority::Medium),
            "low" => Ok(TaskPriority::Low),
            _ => Err(format!("Unknown priority: {s}")),
        }
    }
}

/// Current status of a task in its lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Review,
    Done,
    Blocked,
}

impl TaskStatus {
    /// Statuses that require a non-empty assignee.
    pub fn requires_assignee(&self) -> bool {
        matches!(
            self,
            TaskStatus::InProgress | TaskStatus::Review | TaskStatus::Blocked
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
            TaskStatus::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(TaskStatus::Todo),
            "in-progress" => Ok(TaskStatus::InProgress),
            "review" => Ok(TaskStatus::Review),
            "done" => Ok(TaskStatus::Done),
            "blocked" => Ok(TaskStatus::Blocked),
            _ => Err(format!("Unknown task status: {s}")),
        }
    }
}

/// A unit of team work
///
/// Lifecycle: `todo → in-progress` (pickup) `→ done` (complete), or
/// `→ blocked → todo` (release). A task in `in-progress`, `review` or
/// `blocked` always has an assignee; `completedAt` is set exactly when the
/// task is `done`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assignee: Option<String>,
    pub created_by: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub blocked_reason: Option<String>,
}

impl Task {
    pub fn new(
        title: impl Into<String>,
        priority: TaskPriority,
        created_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: None,
            status: TaskStatus::Todo,
            priority,
            assignee: None,
            created_by: created_by.into(),
            tags: Vec::new(),
            files: Vec::new(),
            created_at: now,
            updated_at: now,
            picked_up_at: None,
            completed_at: None,
            blocked_reason: None,
        }
    }
}

/// Request payload for creating a task
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub created_by: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

/// Partial task update applied through PATCH
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee: Option<String>,
    pub tags: Option<Vec<String>>,
    pub files: Option<Vec<String>>,
    pub blocked_reason: Option<String>,
}

/// A filesystem-prefix claim granting exclusive write intent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub zone_id: String,
    pub path: String,
    pub owner: String,
    pub description: Option<String>,
    pub claimed_at: DateTime<Utc>,
}

/// A named, soft exclusivity marker on a work item
///
/// `stale` is derived at read time: thirty minutes without a refresh lets
/// another agent overwrite the claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub what: String,
    pub by: String,
    pub description: Option<String>,
    pub since: DateTime<Utc>,
    #[serde(default)]
    pub stale: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HandoffStatus {
    Pending,
    Claimed,
    Completed,
}

impl fmt::Display for HandoffStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandoffStatus::Pending => "pending",
            HandoffStatus::Claimed => "claimed",
            HandoffStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl FromStr for HandoffStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(HandoffStatus::Pending),
            "claimed" => Ok(HandoffStatus::Claimed),
            "completed" => Ok(HandoffStatus::Completed),
            _ => Err(format!("Unknown handoff status: {s}")),
        }
    }
}

/// A structured package of context and next steps passed between agents
///
/// `toAgent = None` means any agent may claim it. Invariants: `claimedAt`
/// is set exactly when the handoff leaves `pending`; `completedAt` exactly
/// when it reaches `completed`; `claimedBy` is set iff `claimedAt` is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handoff {
    pub id: String,
    pub from_agent: String,
    pub to_agent: Option<String>,
    pub title: String,
    pub context: String,
    pub code: Option<String>,
    pub file_path: Option<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    pub priority: TaskPriority,
    pub status: HandoffStatus,
    pub claimed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Request payload for creating a handoff
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHandoff {
    pub from_agent: String,
    pub to_agent: Option<String>,
    pub title: String,
    pub context: String,
    pub code: Option<String>,
    pub file_path: Option<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    pub priority: Option<TaskPriority>,
}

impl Handoff {
    pub fn from_request(req: CreateHandoff) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from_agent: req.from_agent,
            to_agent: req.to_agent,
            title: req.title,
            context: req.context,
            code: req.code,
            file_path: req.file_path,
            next_steps: req.next_steps,
            priority: req.priority.unwrap_or(TaskPriority::Medium),
            status: HandoffStatus::Pending,
            claimed_by: None,
            created_at: Utc::now(),
            claimed_at: None,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_in_todo_without_assignee() {
        let task = Task::new("ship", TaskPriority::High, "alice");
        assert_eq!(task.status, TaskStatus::Todo);
        assert!(task.assignee.is_none());
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn priority_rank_orders_critical_first() {
        assert!(TaskPriority::Critical.rank() < TaskPriority::High.rank());
        assert!(TaskPriority::High.rank() < TaskPriority::Medium.rank());
        assert!(TaskPriority::Medium.rank() < TaskPriority::Low.rank());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::Review,
            TaskStatus::Done,
            TaskStatus::Blocked,
        ] {
            assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
        }
    }

    #[test]
    fn handoff_from_request_defaults() {
        let handoff = Handoff::from_request(CreateHandoff {
            from_agent: "alice".to_string(),
            to_agent: None,
            title: "X".to_string(),
            context: "c".to_string(),
            code: None,
            file_path: None,
            next_steps: vec![],
            priority: None,
        });
        assert_eq!(handoff.status, HandoffStatus::Pending);
        assert_eq!(handoff.priority, TaskPriority::Medium);
        assert!(handoff.claimed_at.is_none());
    }
}
