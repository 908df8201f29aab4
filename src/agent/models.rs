use crate::constants;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Session-survival snapshot an agent saves before its context runs out.
///
/// Saved with a field-level merge: a null field preserves the prior value,
/// so partial saves never erase earlier context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub conversation_summary: Option<String>,
    #[serde(default)]
    pub accomplishments: Vec<String>,
    #[serde(default)]
    pub pending_work: Vec<String>,
    pub recent_context: Option<String>,
    #[serde(default)]
    pub files_edited: Vec<String>,
    pub checkpoint_at: Option<DateTime<Utc>>,
}

/// Partial checkpoint save
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointUpdate {
    pub conversation_summary: Option<String>,
    pub accomplishments: Option<Vec<String>>,
    pub pending_work: Option<Vec<String>>,
    pub recent_context: Option<String>,
    pub files_edited: Option<Vec<String>>,
}

impl Checkpoint {
    /// Merge a partial save into the stored checkpoint. Missing fields keep
    /// their prior values; `checkpointAt` always advances.
    pub fn merge(&mut self, update: CheckpointUpdate) {
        if update.conversation_summary.is_some() {
            self.conversation_summary = update.conversation_summary;
        }
        if let Some(a) = update.accomplishments {
            self.accomplishments = a;
        }
        if let Some(p) = update.pending_work {
            self.pending_work = p;
        }
        if update.recent_context.is_some() {
            self.recent_context = update.recent_context;
        }
        if let Some(f) = update.files_edited {
            self.files_edited = f;
        }
        self.checkpoint_at = Some(Utc::now());
    }

    /// Whether there is anything to resume from.
    pub fn has_resume_material(&self) -> bool {
        !self.pending_work.is_empty() || self.conversation_summary.is_some()
    }
}

/// A message sent directly to one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub id: String,
    pub from: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub message: String,
    pub read: bool,
    pub timestamp: DateTime<Utc>,
}

impl DirectMessage {
    pub fn new(from: impl Into<String>, message_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            message_type: message_type.into(),
            message: message.into(),
            read: false,
            timestamp: Utc::now(),
        }
    }
}

/// A categorized note in the agent's long-term memory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub id: String,
    pub category: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(category: impl Into<String>, content: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            category: category.into(),
            content: content.into(),
            tags,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of a single tool-using step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Found,
    Partial,
    Nothing,
    Error,
}

impl StepOutcome {
    pub fn is_productive(&self) -> bool {
        matches!(self, StepOutcome::Found | StepOutcome::Partial)
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepOutcome::Found => "found",
            StepOutcome::Partial => "partial",
            StepOutcome::Nothing => "nothing",
            StepOutcome::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for StepOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "found" => Ok(StepOutcome::Found),
            "partial" => Ok(StepOutcome::Partial),
            "nothing" => Ok(StepOutcome::Nothing),
            "error" => Ok(StepOutcome::Error),
            _ => Err(format!("Unknown step outcome: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContributionType {
    Direct,
    Supporting,
    Minimal,
}

impl fmt::Display for ContributionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContributionType::Direct => "direct",
            ContributionType::Supporting => "supporting",
            ContributionType::Minimal => "minimal",
        };
        f.write_str(s)
    }
}

impl FromStr for ContributionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(ContributionType::Direct),
            "supporting" => Ok(ContributionType::Supporting),
            "minimal" => Ok(ContributionType::Minimal),
            _ => Err(format!("Unknown contribution type: {s}")),
        }
    }
}

/// One tool-using step inside a work trace
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkStep {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub tool: String,
    pub intent: String,
    pub outcome: StepOutcome,
    pub duration_ms: i64,
    pub contribution_type: Option<ContributionType>,
    #[serde(default)]
    pub knowledge_gained: Vec<String>,
    #[serde(default)]
    pub eliminated_paths: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Caller-supplied step data
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepInput {
    pub tool: String,
    pub intent: String,
    pub outcome: StepOutcome,
    #[serde(default)]
    pub duration_ms: i64,
    pub contribution_type: Option<ContributionType>,
    #[serde(default)]
    pub knowledge_gained: Vec<String>,
    #[serde(default)]
    pub eliminated_paths: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl WorkStep {
    pub fn from_input(input: StepInput) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            tool: input.tool,
            intent: input.intent,
            outcome: input.outcome,
            duration_ms: input.duration_ms,
            contribution_type: input.contribution_type,
            knowledge_gained: input.knowledge_gained,
            eliminated_paths: input.eliminated_paths,
            depends_on: input.depends_on,
        }
    }

    /// A step that moved the task forward: a productive outcome not marked
    /// as a minimal contribution.
    pub fn is_productive(&self) -> bool {
        self.outcome.is_productive()
            && self.contribution_type != Some(ContributionType::Minimal)
    }
}

/// Computed when a trace completes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSummary {
    pub total_steps: usize,
    pub dead_ends: usize,
    pub exploration_time_ms: i64,
    pub solution_time_ms: i64,
    pub efficiency: f64,
}

/// An ordered log of tool-using steps taken during one task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkTrace {
    pub session_id: String,
    pub task: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<WorkStep>,
    pub summary: Option<TraceSummary>,
}

impl WorkTrace {
    /// Summary over the recorded steps. Solution time is the total duration
    /// of steps that moved the task forward (`found`, or a non-minimal
    /// explicit contribution); everything else is exploration. Efficiency is
    /// solution over total, zero when no time was recorded.
    pub fn summarize(&self) -> TraceSummary {
        let total_steps = self.steps.len();
        let dead_ends = self
            .steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Nothing | StepOutcome::Error))
            .count();
        let total_time_ms: i64 = self.steps.iter().map(|s| s.duration_ms.max(0)).sum();
        let solution_time_ms: i64 = self
            .steps
            .iter()
            .filter(|s| {
                s.outcome == StepOutcome::Found
                    || matches!(
                        s.contribution_type,
                        Some(ContributionType::Direct) | Some(ContributionType::Supporting)
                    )
            })
            .map(|s| s.duration_ms.max(0))
            .sum();
        let solution_time_ms = solution_time_ms.min(total_time_ms);
        let efficiency = if total_time_ms == 0 {
            0.0
        } else {
            solution_time_ms as f64 / total_time_ms as f64
        };
        TraceSummary {
            total_steps,
            dead_ends,
            exploration_time_ms: total_time_ms - solution_time_ms,
            solution_time_ms,
            efficiency,
        }
    }
}

/// A single fired trigger inside an escalation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationTrigger {
    #[serde(rename = "type")]
    pub trigger_type: String,
    pub level: u8,
    pub reason: String,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResolvedBy {
    #[serde(rename = "self")]
    SelfResolved,
    #[serde(rename = "peer")]
    Peer,
    #[serde(rename = "human")]
    Human,
}

impl fmt::Display for ResolvedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResolvedBy::SelfResolved => "self",
            ResolvedBy::Peer => "peer",
            ResolvedBy::Human => "human",
        };
        f.write_str(s)
    }
}

impl FromStr for ResolvedBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "self" => Ok(ResolvedBy::SelfResolved),
            "peer" => Ok(ResolvedBy::Peer),
            "human" => Ok(ResolvedBy::Human),
            _ => Err(format!("Unknown resolver: {s}")),
        }
    }
}

/// A signal that an agent is stuck, inefficient, or failing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Escalation {
    pub id: String,
    pub session_id: String,
    pub triggered_at: DateTime<Utc>,
    pub triggers: Vec<EscalationTrigger>,
    pub highest_level: u8,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<ResolvedBy>,
    pub resolver_agent: Option<String>,
    pub helpful_hint: Option<String>,
}

impl Escalation {
    pub fn new(session_id: impl Into<String>, triggers: Vec<EscalationTrigger>) -> Self {
        let highest_level = triggers.iter().map(|t| t.level).max().unwrap_or(0);
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            triggered_at: Utc::now(),
            triggers,
            highest_level,
            resolved_at: None,
            resolved_by: None,
            resolver_agent: None,
            helpful_hint: None,
        }
    }
}

/// Soul progression levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum SoulLevel {
    Novice,
    Capable,
    Expert,
    Master,
}

impl fmt::Display for SoulLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SoulLevel::Novice => "novice",
            SoulLevel::Capable => "capable",
            SoulLevel::Expert => "expert",
            SoulLevel::Master => "master",
        };
        f.write_str(s)
    }
}

impl FromStr for SoulLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "novice" => Ok(SoulLevel::Novice),
            "capable" => Ok(SoulLevel::Capable),
            "expert" => Ok(SoulLevel::Expert),
            "master" => Ok(SoulLevel::Master),
            _ => Err(format!("Unknown soul level: {s}")),
        }
    }
}

/// Abilities unlocked cumulatively as a soul levels up
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Abilities {
    pub can_commit: bool,
    pub can_spawn_subagents: bool,
    pub can_access_prod: bool,
    pub can_mentor_peers: bool,
    pub extended_budget: bool,
}

/// XP accumulated per work domain
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Specializations {
    pub frontend: i64,
    pub backend: i64,
    pub devops: i64,
    pub research: i64,
}

impl Specializations {
    pub fn add(&mut self, domain: &str, xp: i64) -> bool {
        match domain {
            "frontend" => self.frontend += xp,
            "backend" => self.backend += xp,
            "devops" => self.devops += xp,
            "research" => self.research += xp,
            _ => return false,
        }
        true
    }
}

/// The persistent gamified progression record of an agent
///
/// `rustLevel` and `effectiveXpMultiplier` are derived on read from days
/// since the last completed trace; they are never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Soul {
    pub soul_id: String,
    pub name: String,
    pub personality: Option<String>,
    pub created_at: DateTime<Utc>,
    pub total_xp: i64,
    pub level: SoulLevel,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub tasks_completed: i64,
    pub tasks_successful: i64,
    pub avg_efficiency: f64,
    pub peers_helped: i64,
    pub last_trace_id: Option<String>,
    pub escalation_count: i64,
    pub self_resolved_count: i64,
    pub peer_assist_count: i64,
    pub human_escalation_count: i64,
    pub specializations: Specializations,
    #[serde(default)]
    pub achievements: Vec<String>,
    pub abilities: Abilities,
    pub trust_score: f64,
    pub transparency_score: f64,
    pub track_record_score: f64,
    #[serde(default)]
    pub rust_level: f64,
    #[serde(default = "default_multiplier")]
    pub effective_xp_multiplier: f64,
}

fn default_multiplier() -> f64 {
    1.0
}

impl Soul {
    pub fn fresh(name: impl Into<String>) -> Self {
        Self {
            soul_id: Uuid::new_v4().to_string(),
            name: name.into(),
            personality: None,
            created_at: Utc::now(),
            total_xp: 0,
            level: SoulLevel::Novice,
            current_streak: 0,
            longest_streak: 0,
            tasks_completed: 0,
            tasks_successful: 0,
            avg_efficiency: 0.0,
            peers_helped: 0,
            last_trace_id: None,
            escalation_count: 0,
            self_resolved_count: 0,
            peer_assist_count: 0,
            human_escalation_count: 0,
            specializations: Specializations::default(),
            achievements: Vec::new(),
            abilities: Abilities::default(),
            trust_score: 0.5,
            transparency_score: 0.5,
            track_record_score: 0.0,
            rust_level: 0.0,
            effective_xp_multiplier: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ShadowStatus {
    None,
    Monitoring,
    TakenOver,
}

impl fmt::Display for ShadowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShadowStatus::None => "none",
            ShadowStatus::Monitoring => "monitoring",
            ShadowStatus::TakenOver => "taken-over",
        };
        f.write_str(s)
    }
}

impl FromStr for ShadowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ShadowStatus::None),
            "monitoring" => Ok(ShadowStatus::Monitoring),
            "taken-over" => Ok(ShadowStatus::TakenOver),
            _ => Err(format!("Unknown shadow status: {s}")),
        }
    }
}

/// Heartbeat-driven shadow takeover state for one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowMonitor {
    pub shadow_id: Option<String>,
    pub shadow_status: ShadowStatus,
    pub primary_agent: Option<String>,
    pub is_shadow: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub heartbeat_interval_ms: i64,
    pub stall_threshold_ms: i64,
    pub registered_at: Option<DateTime<Utc>>,
    pub takeover_at: Option<DateTime<Utc>>,
}

impl Default for ShadowMonitor {
    fn default() -> Self {
        Self {
            shadow_id: None,
            shadow_status: ShadowStatus::None,
            primary_agent: None,
            is_shadow: false,
            last_heartbeat: None,
            heartbeat_interval_ms: constants::DEFAULT_HEARTBEAT_INTERVAL_MS,
            stall_threshold_ms: constants::DEFAULT_STALL_THRESHOLD_MS,
            registered_at: None,
            takeover_at: None,
        }
    }
}

impl ShadowMonitor {
    /// A primary is healthy while its last heartbeat is younger than the
    /// stall threshold. No heartbeat at all means not healthy.
    pub fn is_healthy(&self, now: DateTime<Utc>) -> bool {
        match self.last_heartbeat {
            Some(last) => (now - last).num_milliseconds() < self.stall_threshold_ms,
            None => false,
        }
    }
}

/// One recorded heartbeat
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub timestamp: DateTime<Utc>,
    pub tokens_used: Option<i64>,
    pub current_task: Option<String>,
    pub status: Option<String>,
}

/// Derived classification of an agent's current productivity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    InFlow,
    Available,
    Stuck,
    Offline,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowState::InFlow => "in_flow",
            FlowState::Available => "available",
            FlowState::Stuck => "stuck",
            FlowState::Offline => "offline",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_merge_preserves_missing_fields() {
        let mut checkpoint = Checkpoint {
            conversation_summary: Some("built the parser".to_string()),
            pending_work: vec!["wire it up".to_string()],
            ..Default::default()
        };
        checkpoint.merge(CheckpointUpdate {
            recent_context: Some("in src/parse.rs".to_string()),
            ..Default::default()
        });

        assert_eq!(
            checkpoint.conversation_summary.as_deref(),
            Some("built the parser")
        );
        assert_eq!(checkpoint.pending_work, vec!["wire it up".to_string()]);
        assert_eq!(checkpoint.recent_context.as_deref(), Some("in src/parse.rs"));
        assert!(checkpoint.checkpoint_at.is_some());
    }

    #[test]
    fn summary_efficiency_is_zero_without_time() {
        let trace = WorkTrace {
            session_id: "s1".to_string(),
            task: "t".to_string(),
            started_at: Utc::now(),
            completed_at: None,
            steps: vec![],
            summary: None,
        };
        let summary = trace.summarize();
        assert_eq!(summary.total_steps, 0);
        assert_eq!(summary.efficiency, 0.0);
    }

    #[test]
    fn summary_efficiency_within_unit_interval() {
        let mut trace = WorkTrace {
            session_id: "s1".to_string(),
            task: "t".to_string(),
            started_at: Utc::now(),
            completed_at: None,
            steps: vec![],
            summary: None,
        };
        for (outcome, duration) in [
            (StepOutcome::Nothing, 400),
            (StepOutcome::Found, 600),
            (StepOutcome::Error, 250),
        ] {
            trace.steps.push(WorkStep::from_input(StepInput {
                tool: "grep".to_string(),
                intent: "search".to_string(),
                outcome,
                duration_ms: duration,
                contribution_type: None,
                knowledge_gained: vec![],
                eliminated_paths: vec![],
                depends_on: vec![],
            }));
        }
        let summary = trace.summarize();
        assert_eq!(summary.total_steps, 3);
        assert_eq!(summary.dead_ends, 2);
        assert_eq!(summary.solution_time_ms, 600);
        assert_eq!(summary.exploration_time_ms, 650);
        assert!((summary.efficiency - 600.0 / 1250.0).abs() < 1e-9);
        assert!(summary.efficiency >= 0.0 && summary.efficiency <= 1.0);
    }

    #[test]
    fn escalation_highest_level_is_max_of_triggers() {
        let escalation = Escalation::new(
            "s1",
            vec![
                EscalationTrigger {
                    trigger_type: "repeated_failures".to_string(),
                    level: 1,
                    reason: "3 empty outcomes".to_string(),
                    detected_at: Utc::now(),
                },
                EscalationTrigger {
                    trigger_type: "stuck_loop".to_string(),
                    level: 2,
                    reason: "grep used 3 of last 5 steps".to_string(),
                    detected_at: Utc::now(),
                },
            ],
        );
        assert_eq!(escalation.highest_level, 2);
    }

    #[test]
    fn shadow_health_requires_recent_heartbeat() {
        let mut monitor = ShadowMonitor::default();
        let now = Utc::now();
        assert!(!monitor.is_healthy(now));

        monitor.last_heartbeat = Some(now - chrono::Duration::milliseconds(1000));
        assert!(monitor.is_healthy(now));

        monitor.last_heartbeat =
            Some(now - chrono::Duration::milliseconds(monitor.stall_threshold_ms + 1));
        assert!(!monitor.is_healthy(now));
    }
}
