//! The onboarding aggregator: one call that tells a newly arrived (or
//! returning) agent who is around, what state it left behind, and the one
//! task it should pick up first.
//!
//! AgentState lookups are recoverable: a failing sub-bundle is omitted and
//! the rest of the bundle is still returned.

use super::models::{AgentRecord, AgentStatus, ChatMessage, TaskPriority};
use super::Coordinator;
use crate::{
    agent::{
        dashboard::{Dashboard, FlowReport},
        models::{Checkpoint, Soul},
    },
    constants, Result,
};
use serde::Serialize;
use tracing::warn;

/// A team member with their current flow classification (when their state
/// singleton answered).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    #[serde(flatten)]
    pub agent: AgentRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<FlowReport>,
}

/// Where the suggested task came from.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SuggestionSource {
    Checkpoint,
    Handoff,
    TodoTask,
    Introduction,
}

/// The single task the hub proposes the agent starts with.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedTask {
    pub source: SuggestionSource,
    pub task: String,
    pub reason: String,
    pub xp_estimate: i64,
    pub priority: TaskPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingBundle {
    pub agent_id: String,
    pub is_new_agent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soul: Option<Soul>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dashboard: Option<Dashboard>,
    pub team: Vec<TeamMember>,
    pub suggested_task: SuggestedTask,
    pub recent_chat: Vec<ChatMessage>,
}

impl Coordinator {
    pub async fn onboard(&self, agent_id: &str) -> Result<OnboardingBundle> {
        let registry = self.agent_registry().clone();

        // The agent's own state: soul (created fresh for newcomers),
        // checkpoint and dashboard. Each lookup is allowed to fail.
        let mut is_new_agent = true;
        let mut soul = None;
        let mut checkpoint = None;
        let mut dashboard = None;
        match registry.get_or_create(agent_id).await {
            Ok(state) => {
                match state.ensure_soul().await {
                    Ok((loaded, created)) => {
                        is_new_agent = created;
                        soul = Some(loaded);
                    }
                    Err(e) => warn!("onboarding {agent_id}: soul lookup failed: {e}"),
                }
                match state.checkpoint().await {
                    Ok(loaded) => checkpoint = Some(loaded),
                    Err(e) => warn!("onboarding {agent_id}: checkpoint lookup failed: {e}"),
                }
                if !is_new_agent {
                    match state.dashboard().await {
                        Ok(loaded) => dashboard = Some(loaded),
                        Err(e) => warn!("onboarding {agent_id}: dashboard lookup failed: {e}"),
                    }
                }
            }
            Err(e) => warn!("onboarding {agent_id}: agent state unavailable: {e}"),
        }

        // The online team, each with their flow status when available
        let mut team = Vec::new();
        for agent in self.list_agents().await? {
            if agent.status == AgentStatus::Offline || agent.agent_id == agent_id {
                continue;
            }
            let flow = match registry.get_or_create(&agent.agent_id).await {
                Ok(state) => state.flow().await.ok(),
                Err(_) => None,
            };
            team.push(TeamMember { agent, flow });
        }

        let suggested_task = self.suggest_task(agent_id, checkpoint.as_ref()).await?;
        let recent_chat = self.recent_chat(constants::ONBOARD_CHAT_LIMIT).await?;

        Ok(OnboardingBundle {
            agent_id: agent_id.to_string(),
            is_new_agent,
            soul,
            checkpoint,
            dashboard,
            team,
            suggested_task,
            recent_chat,
        })
    }

    /// Suggestion priority: resume the checkpoint, then a pending handoff,
    /// then an unassigned todo task, then an introduction.
    async fn suggest_task(
        &self,
        agent_id: &str,
        checkpoint: Option<&Checkpoint>,
    ) -> Result<SuggestedTask> {
        if let Some(checkpoint) = checkpoint {
            if checkpoint.has_resume_material() {
                let task = checkpoint
                    .pending_work
                    .first()
                    .cloned()
                    .or_else(|| checkpoint.conversation_summary.clone())
                    .unwrap_or_default();
                let pending = checkpoint.pending_work.len();
                return Ok(SuggestedTask {
                    source: SuggestionSource::Checkpoint,
                    task,
                    reason: format!(
                        "continuing previous session: {pending} pending item(s) in your checkpoint"
                    ),
                    xp_estimate: 30,
                    priority: TaskPriority::High,
                    task_id: None,
                    handoff_id: None,
                });
            }
        }

        let pending = self
            .list_handoffs(Some(super::models::HandoffStatus::Pending))
            .await?;
        if let Some(handoff) = pending
            .iter()
            .find(|h| h.to_agent.is_none() || h.to_agent.as_deref() == Some(agent_id))
        {
            return Ok(SuggestedTask {
                source: SuggestionSource::Handoff,
                task: handoff.title.clone(),
                reason: format!("pending handoff from {}", handoff.from_agent),
                xp_estimate: 50,
                priority: TaskPriority::Medium,
                task_id: None,
                handoff_id: Some(handoff.id.clone()),
            });
        }

        let todo = self
            .list_tasks(Some(super::models::TaskStatus::Todo), None)
            .await?;
        if let Some(task) = todo.iter().find(|t| t.assignee.is_none()) {
            return Ok(SuggestedTask {
                source: SuggestionSource::TodoTask,
                task: task.title.clone(),
                reason: format!("unassigned {} priority task on the board", task.priority),
                xp_estimate: 25,
                priority: task.priority,
                task_id: Some(task.id.clone()),
                handoff_id: None,
            });
        }

        Ok(SuggestedTask {
            source: SuggestionSource::Introduction,
            task: "introduce yourself in the team chat".to_string(),
            reason: "no pending work found; let the team know you're here".to_string(),
            xp_estimate: 10,
            priority: TaskPriority::Low,
            task_id: None,
            handoff_id: None,
        })
    }
}
