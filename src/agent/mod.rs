//! Per-agent state singletons.
//!
//! Each agent gets its own [`AgentState`]: a single-writer actor over an
//! embedded database holding the agent's checkpoint, direct messages,
//! memory, work traces, escalations, soul, and shadow monitor. The
//! [`AgentStateRegistry`] lazily creates one instance per `agentId` on
//! first contact.

pub mod dashboard;
pub mod models;
pub mod soul;
pub mod store;
pub mod trace;

use crate::{
    constants,
    push::{Broadcaster, PushEvent, Subscription},
    storage, HubError, Result,
};
use chrono::{DateTime, Utc};
use dashboard::{Dashboard, FlowReport};
use models::{
    Checkpoint, CheckpointUpdate, DirectMessage, Escalation, Heartbeat, MemoryEntry, ResolvedBy,
    ShadowMonitor, ShadowStatus, Soul, StepInput, WorkStep, WorkTrace,
};
use serde::{Deserialize, Serialize};
use soul::ProgressionOutcome;
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use store::AgentStore;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// What a recorded step returns to the caller: the step itself, the
/// escalation it tripped (if any), and a recommendation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecorded {
    pub step: WorkStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation: Option<Escalation>,
    pub recommendation: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveEscalation {
    pub escalation_id: Option<String>,
    pub resolved_by: ResolvedBy,
    pub resolver_agent: Option<String>,
    pub helpful_hint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatInput {
    pub tokens_used: Option<i64>,
    pub current_task: Option<String>,
    pub status: Option<String>,
}

/// Echoed back so a polling shadow learns health in the same round trip.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatAck {
    pub recorded: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub is_healthy: bool,
}

/// Combined snapshot for returning agents and the `state-sync` push frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub agent_id: String,
    pub checkpoint: Checkpoint,
    pub unread_messages: usize,
    pub soul: Option<Soul>,
    pub shadow: ShadowMonitor,
    pub flow: FlowReport,
}

/// One agent's state singleton. All mutations serialize through the inner
/// mutex; there are no await points while it is held, so every operation
/// is atomic from outside.
pub struct AgentState {
    agent_id: String,
    store: Mutex<AgentStore>,
    push: Broadcaster,
}

impl AgentState {
    fn new(agent_id: String, store: AgentStore) -> Self {
        Self {
            agent_id,
            store: Mutex::new(store),
            push: Broadcaster::new(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    // ----- checkpoint -----

    pub async fn checkpoint(&self) -> Result<Checkpoint> {
        self.store.lock().await.checkpoint()
    }

    pub async fn save_checkpoint(&self, update: CheckpointUpdate) -> Result<Checkpoint> {
        let store = self.store.lock().await;
        let mut checkpoint = store.checkpoint()?;
        checkpoint.merge(update);
        store.save_checkpoint(&checkpoint)?;
        debug!("{}: checkpoint saved", self.agent_id);
        Ok(checkpoint)
    }

    // ----- direct messages -----

    pub async fn send_message(
        &self,
        from: &str,
        message_type: &str,
        message: &str,
    ) -> Result<DirectMessage> {
        if from.trim().is_empty() || message.trim().is_empty() {
            return Err(HubError::Validation(
                "from and message are required".to_string(),
            ));
        }
        let msg = DirectMessage::new(from, message_type, message);
        self.store.lock().await.insert_message(&msg)?;
        Ok(msg)
    }

    pub async fn messages(&self, unread_only: bool) -> Result<Vec<DirectMessage>> {
        self.store.lock().await.list_messages(unread_only)
    }

    pub async fn mark_messages_read(&self, ids: &[String]) -> Result<usize> {
        self.store.lock().await.mark_messages_read(ids)
    }

    // ----- memory -----

    pub async fn remember(
        &self,
        category: &str,
        content: &str,
        tags: Vec<String>,
    ) -> Result<MemoryEntry> {
        if category.trim().is_empty() || content.trim().is_empty() {
            return Err(HubError::Validation(
                "category and content are required".to_string(),
            ));
        }
        let entry = MemoryEntry::new(category, content, tags);
        self.store.lock().await.insert_memory(&entry)?;
        Ok(entry)
    }

    pub async fn search_memory(
        &self,
        category: Option<&str>,
        query: Option<&str>,
    ) -> Result<Vec<MemoryEntry>> {
        self.store
            .lock()
            .await
            .search_memory(category, query, constants::MEMORY_SEARCH_LIMIT)
    }

    // ----- work traces -----

    pub async fn start_trace(&self, task: &str, session_id: Option<String>) -> Result<WorkTrace> {
        if task.trim().is_empty() {
            return Err(HubError::Validation("task is required".to_string()));
        }
        let store = self.store.lock().await;
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if store.trace_exists(&session_id)? {
            return Err(HubError::conflict(format!(
                "trace session {session_id} already exists"
            )));
        }
        let trace = WorkTrace {
            session_id,
            task: task.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            steps: Vec::new(),
            summary: None,
        };
        store.insert_trace(&trace)?;
        info!("{}: trace {} started", self.agent_id, trace.session_id);
        Ok(trace)
    }

    /// Append a step, then evaluate the escalation triggers against the
    /// updated trace. Any that fire are recorded as one new escalation and
    /// returned with a recommendation for the agent.
    pub async fn record_step(&self, session_id: &str, input: StepInput) -> Result<StepRecorded> {
        let store = self.store.lock().await;
        let mut trace = store
            .get_trace(session_id)?
            .ok_or_else(|| HubError::NotFound(format!("trace {session_id} not found")))?;
        if trace.completed_at.is_some() {
            return Err(HubError::InvalidState(format!(
                "trace {session_id} is already completed"
            )));
        }

        let step = WorkStep::from_input(input);
        store.insert_step(session_id, &step)?;
        trace.steps.push(step.clone());

        let now = Utc::now();
        let fired = trace::evaluate_triggers(&trace, now);
        let escalation = if fired.is_empty() {
            None
        } else {
            let escalation = Escalation::new(session_id, fired);
            store.insert_escalation(&escalation)?;
            info!(
                "{}: escalation level {} on trace {}",
                self.agent_id, escalation.highest_level, session_id
            );
            Some(escalation)
        };

        let level = escalation.as_ref().map(|e| e.highest_level).unwrap_or(0);
        Ok(StepRecorded {
            step,
            escalation,
            recommendation: trace::recommendation_for(level),
        })
    }

    pub async fn complete_trace(&self, session_id: &str) -> Result<WorkTrace> {
        let store = self.store.lock().await;
        let mut trace = store
            .get_trace(session_id)?
            .ok_or_else(|| HubError::NotFound(format!("trace {session_id} not found")))?;
        if trace.completed_at.is_some() {
            return Err(HubError::InvalidState(format!(
                "trace {session_id} is already completed"
            )));
        }
        let summary = trace.summarize();
        let completed_at = Utc::now();
        store.complete_trace(session_id, completed_at, &summary)?;
        trace.completed_at = Some(completed_at);
        trace.summary = Some(summary);
        info!("{}: trace {} completed", self.agent_id, session_id);
        Ok(trace)
    }

    pub async fn get_trace(&self, session_id: &str) -> Result<WorkTrace> {
        self.store
            .lock()
            .await
            .get_trace(session_id)?
            .ok_or_else(|| HubError::NotFound(format!("trace {session_id} not found")))
    }

    pub async fn list_traces(&self, limit: usize) -> Result<Vec<WorkTrace>> {
        self.store.lock().await.list_traces(limit)
    }

    pub async fn escalations(&self, session_id: &str) -> Result<Vec<Escalation>> {
        self.store.lock().await.list_escalations(session_id)
    }

    /// Resolve an escalation on this session: the one named in the request,
    /// or the most recent unresolved one.
    pub async fn resolve_escalation(
        &self,
        session_id: &str,
        req: ResolveEscalation,
    ) -> Result<Escalation> {
        let store = self.store.lock().await;
        let mut escalation = match &req.escalation_id {
            Some(id) => store
                .get_escalation(id)?
                .filter(|e| e.session_id == session_id)
                .ok_or_else(|| HubError::NotFound(format!("escalation {id} not found")))?,
            None => store
                .latest_unresolved_escalation(session_id)?
                .ok_or_else(|| {
                    HubError::NotFound(format!("no unresolved escalation on {session_id}"))
                })?,
        };
        if escalation.resolved_at.is_some() {
            return Err(HubError::InvalidState(format!(
                "escalation {} is already resolved",
                escalation.id
            )));
        }
        escalation.resolved_at = Some(Utc::now());
        escalation.resolved_by = Some(req.resolved_by);
        escalation.resolver_agent = req.resolver_agent;
        escalation.helpful_hint = req.helpful_hint;
        store.update_escalation(&escalation)?;
        Ok(escalation)
    }

    // ----- soul -----

    /// Load the soul from an already-locked store, creating a fresh novice
    /// one on first contact. The boolean reports whether it was created.
    fn load_or_create_soul(&self, store: &AgentStore) -> Result<(Soul, bool)> {
        match store.soul()? {
            Some(mut soul) => {
                soul::refresh_derived(&mut soul, store.last_completed_trace_at()?, Utc::now());
                Ok((soul, false))
            }
            None => {
                let soul = Soul::fresh(&self.agent_id);
                store.put_soul(&soul)?;
                info!("{}: fresh soul created", self.agent_id);
                Ok((soul, true))
            }
        }
    }

    pub async fn ensure_soul(&self) -> Result<(Soul, bool)> {
        let store = self.store.lock().await;
        self.load_or_create_soul(&store)
    }

    pub async fn soul(&self) -> Result<Soul> {
        Ok(self.ensure_soul().await?.0)
    }

    pub async fn patch_soul(
        &self,
        name: Option<String>,
        personality: Option<String>,
    ) -> Result<Soul> {
        let store = self.store.lock().await;
        let (mut soul, _) = self.load_or_create_soul(&store)?;
        if let Some(name) = name {
            if name.trim().is_empty() {
                return Err(HubError::Validation("name cannot be blank".to_string()));
            }
            soul.name = name;
        }
        if personality.is_some() {
            soul.personality = personality;
        }
        store.put_soul(&soul)?;
        Ok(soul)
    }

    /// Fold a completed trace into the soul's progression.
    pub async fn update_soul_from_trace(
        &self,
        trace_id: &str,
        domain: Option<&str>,
    ) -> Result<(Soul, ProgressionOutcome)> {
        let store = self.store.lock().await;
        let (mut soul, _) = self.load_or_create_soul(&store)?;

        let trace = store
            .get_trace(trace_id)?
            .ok_or_else(|| HubError::NotFound(format!("trace {trace_id} not found")))?;
        let (completed_at, summary) = match (&trace.completed_at, &trace.summary) {
            (Some(at), Some(summary)) => (*at, summary.clone()),
            _ => {
                return Err(HubError::InvalidState(format!(
                    "trace {trace_id} is not completed"
                )))
            }
        };
        let escalations = store.list_escalations(trace_id)?;

        // Rust is measured as the idle gap before this task
        let previous = match &soul.last_trace_id {
            Some(prev) => store.get_trace(prev)?.and_then(|t| t.completed_at),
            None => None,
        };
        let anchor = previous.unwrap_or(soul.created_at);
        let days_inactive = (completed_at - anchor).num_days().max(0);

        let outcome = soul::apply_trace(
            &mut soul,
            trace_id,
            &summary,
            &escalations,
            domain,
            days_inactive,
        );
        store.put_soul(&soul)?;
        soul::refresh_derived(&mut soul, store.last_completed_trace_at()?, Utc::now());
        info!(
            "{}: +{} XP from trace {} (level {})",
            self.agent_id, outcome.xp_awarded, trace_id, soul.level
        );
        Ok((soul, outcome))
    }

    pub async fn add_xp(&self, amount: i64, reason: Option<&str>) -> Result<Soul> {
        if amount <= 0 {
            return Err(HubError::Validation("amount must be positive".to_string()));
        }
        let store = self.store.lock().await;
        let (mut soul, _) = self.load_or_create_soul(&store)?;
        soul.total_xp += amount;
        let new_level = soul::level_for(soul.total_xp, soul.current_streak, soul.tasks_completed);
        if new_level != soul.level {
            soul.level = new_level;
            soul.abilities = soul::abilities_for(new_level);
        }
        store.put_soul(&soul)?;
        info!(
            "{}: +{amount} XP ({})",
            self.agent_id,
            reason.unwrap_or("unspecified")
        );
        Ok(soul)
    }

    pub async fn unlock_achievement(&self, name: &str) -> Result<Soul> {
        if name.trim().is_empty() {
            return Err(HubError::Validation("achievement name is required".to_string()));
        }
        let store = self.store.lock().await;
        let (mut soul, _) = self.load_or_create_soul(&store)?;
        if !soul.achievements.iter().any(|a| a == name) {
            soul.achievements.push(name.to_string());
            store.put_soul(&soul)?;
        }
        Ok(soul)
    }

    /// Increment the helped-a-peer counter; called when this agent is named
    /// as the resolver of another agent's escalation.
    pub async fn record_peer_assist(&self) -> Result<Soul> {
        let store = self.store.lock().await;
        let (mut soul, _) = self.load_or_create_soul(&store)?;
        soul.peers_helped += 1;
        store.put_soul(&soul)?;
        Ok(soul)
    }

    // ----- flow and dashboard -----

    pub async fn flow(&self) -> Result<FlowReport> {
        let store = self.store.lock().await;
        let open = store.open_traces()?;
        let unresolved = store.unresolved_escalations()?;
        Ok(dashboard::flow_state(&open, &unresolved, Utc::now()))
    }

    pub async fn dashboard(&self) -> Result<Dashboard> {
        let now = Utc::now();
        let store = self.store.lock().await;
        let (soul, _) = self.load_or_create_soul(&store)?;
        let open = store.open_traces()?;
        let recent = store.list_traces(constants::DASHBOARD_RECENT_TRACES)?;
        let unresolved = store.unresolved_escalations()?;
        let shadow = store.shadow()?;
        let last_completed = store.last_completed_trace_at()?;
        let unread = store.unread_count()?;
        Ok(dashboard::build_dashboard(
            &self.agent_id,
            Some(soul),
            &open,
            &recent,
            unresolved,
            shadow,
            last_completed,
            unread,
            now,
        ))
    }

    // ----- heartbeats and shadow -----

    pub async fn heartbeat(&self, input: HeartbeatInput) -> Result<HeartbeatAck> {
        let store = self.store.lock().await;
        let now = Utc::now();
        store.insert_heartbeat(&Heartbeat {
            timestamp: now,
            tokens_used: input.tokens_used,
            current_task: input.current_task,
            status: input.status,
        })?;
        let mut monitor = store.shadow()?;
        monitor.last_heartbeat = Some(now);
        store.put_shadow(&monitor)?;
        Ok(HeartbeatAck {
            recorded: true,
            last_heartbeat: now,
            is_healthy: monitor.is_healthy(now),
        })
    }

    pub async fn heartbeats(&self, limit: usize) -> Result<Vec<Heartbeat>> {
        self.store.lock().await.list_heartbeats(limit)
    }

    pub async fn shadow(&self) -> Result<ShadowMonitor> {
        self.store.lock().await.shadow()
    }

    pub async fn register_shadow(
        &self,
        shadow_id: &str,
        stall_threshold_ms: Option<i64>,
        heartbeat_interval_ms: Option<i64>,
    ) -> Result<ShadowMonitor> {
        if shadow_id.trim().is_empty() {
            return Err(HubError::Validation("shadowId is required".to_string()));
        }
        let store = self.store.lock().await;
        let mut monitor = store.shadow()?;
        monitor.shadow_id = Some(shadow_id.to_string());
        monitor.shadow_status = ShadowStatus::Monitoring;
        monitor.registered_at = Some(Utc::now());
        if let Some(ms) = stall_threshold_ms {
            if ms <= 0 {
                return Err(HubError::Validation(
                    "stallThresholdMs must be positive".to_string(),
                ));
            }
            monitor.stall_threshold_ms = ms;
        }
        if let Some(ms) = heartbeat_interval_ms {
            if ms <= 0 {
                return Err(HubError::Validation(
                    "heartbeatIntervalMs must be positive".to_string(),
                ));
            }
            monitor.heartbeat_interval_ms = ms;
        }
        store.put_shadow(&monitor)?;
        info!("{}: shadow {} registered", self.agent_id, shadow_id);
        Ok(monitor)
    }

    pub async fn become_shadow(&self, primary_agent: &str) -> Result<ShadowMonitor> {
        if primary_agent.trim().is_empty() {
            return Err(HubError::Validation("primaryAgent is required".to_string()));
        }
        let store = self.store.lock().await;
        let mut monitor = store.shadow()?;
        monitor.is_shadow = true;
        monitor.primary_agent = Some(primary_agent.to_string());
        store.put_shadow(&monitor)?;
        Ok(monitor)
    }

    /// The decision to take over is the shadow's; this just records it.
    pub async fn takeover(&self) -> Result<ShadowMonitor> {
        let store = self.store.lock().await;
        let mut monitor = store.shadow()?;
        if monitor.shadow_status == ShadowStatus::None {
            return Err(HubError::InvalidState(
                "no shadow is registered".to_string(),
            ));
        }
        monitor.shadow_status = ShadowStatus::TakenOver;
        monitor.takeover_at = Some(Utc::now());
        store.put_shadow(&monitor)?;
        info!("{}: shadow takeover recorded", self.agent_id);
        Ok(monitor)
    }

    // ----- snapshot and push -----

    pub async fn state_snapshot(&self) -> Result<StateSnapshot> {
        let store = self.store.lock().await;
        let checkpoint = store.checkpoint()?;
        let unread = store.unread_count()?;
        let mut soul = store.soul()?;
        if let Some(s) = soul.as_mut() {
            soul::refresh_derived(s, store.last_completed_trace_at()?, Utc::now());
        }
        let shadow = store.shadow()?;
        let open = store.open_traces()?;
        let unresolved = store.unresolved_escalations()?;
        let flow = dashboard::flow_state(&open, &unresolved, Utc::now());
        Ok(StateSnapshot {
            agent_id: self.agent_id.clone(),
            checkpoint,
            unread_messages: unread,
            soul,
            shadow,
            flow,
        })
    }

    /// Open this agent's push channel. The caller receives a `state-sync`
    /// frame first, then live events.
    pub async fn subscribe(&self) -> Result<Subscription> {
        let subscription = self.push.subscribe(&self.agent_id);
        let snapshot = self.state_snapshot().await?;
        self.push.send_to(
            &self.agent_id,
            PushEvent::StateSync {
                state: serde_json::to_value(&snapshot)?,
            },
        );
        Ok(subscription)
    }

    pub fn unsubscribe(&self, token: u64) -> bool {
        self.push.unsubscribe(&self.agent_id, token)
    }

    /// Enqueue an event to this agent's own push channel (pong replies).
    pub fn push_to_self(&self, event: PushEvent) {
        self.push.send_to(&self.agent_id, event);
    }
}

/// Lazily creates one [`AgentState`] per agent id. Creation is idempotent;
/// the same id always resolves to the same singleton.
pub struct AgentStateRegistry {
    data_dir: Option<PathBuf>,
    agents: RwLock<HashMap<String, Arc<AgentState>>>,
}

impl AgentStateRegistry {
    pub fn new(data_dir: Option<PathBuf>) -> Self {
        Self {
            data_dir,
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_or_create(&self, agent_id: &str) -> Result<Arc<AgentState>> {
        if agent_id.trim().is_empty() {
            return Err(HubError::Validation("agentId is required".to_string()));
        }

        if let Some(existing) = self.agents.read().await.get(agent_id) {
            return Ok(existing.clone());
        }

        let mut agents = self.agents.write().await;
        // Double-checked under the write lock: another request may have
        // created the singleton while we waited.
        if let Some(existing) = agents.get(agent_id) {
            return Ok(existing.clone());
        }

        let store = match &self.data_dir {
            Some(dir) => {
                let class_dir = storage::class_dir(dir, "agents")?;
                AgentStore::open(&class_dir.join(storage::db_file_name(agent_id)))?
            }
            None => AgentStore::open_in_memory()?,
        };
        let state = Arc::new(AgentState::new(agent_id.to_string(), store));
        agents.insert(agent_id.to_string(), state.clone());
        debug!("agent state created for {agent_id}");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::models::StepOutcome;

    fn registry() -> AgentStateRegistry {
        AgentStateRegistry::new(None)
    }

    fn step(tool: &str, outcome: StepOutcome) -> StepInput {
        StepInput {
            tool: tool.to_string(),
            intent: "search the tree".to_string(),
            outcome,
            duration_ms: 100,
            contribution_type: None,
            knowledge_gained: vec![],
            eliminated_paths: vec![],
            depends_on: vec![],
        }
    }

    #[tokio::test]
    async fn registry_returns_same_singleton() {
        let registry = registry();
        let a = registry.get_or_create("alice").await.unwrap();
        let b = registry.get_or_create("alice").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn registry_rejects_blank_id() {
        let registry = registry();
        assert!(matches!(
            registry.get_or_create("  ").await,
            Err(HubError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn checkpoint_merge_survives_partial_saves() {
        let registry = registry();
        let alice = registry.get_or_create("alice").await.unwrap();

        alice
            .save_checkpoint(CheckpointUpdate {
                pending_work: Some(vec!["finish parser".to_string()]),
                ..Default::default()
            })
            .await
            .unwrap();
        alice
            .save_checkpoint(CheckpointUpdate {
                recent_context: Some("src/parse.rs".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let checkpoint = alice.checkpoint().await.unwrap();
        assert_eq!(checkpoint.pending_work, vec!["finish parser".to_string()]);
        assert_eq!(checkpoint.recent_context.as_deref(), Some("src/parse.rs"));
    }

    #[tokio::test]
    async fn three_fruitless_greps_escalate() {
        let registry = registry();
        let alice = registry.get_or_create("alice").await.unwrap();
        let trace = alice.start_trace("find the bug", None).await.unwrap();

        let mut last = None;
        for _ in 0..3 {
            last = Some(
                alice
                    .record_step(&trace.session_id, step("grep", StepOutcome::Nothing))
                    .await
                    .unwrap(),
            );
        }
        let last = last.unwrap();
        let escalation = last.escalation.expect("third step should escalate");
        let types: Vec<_> = escalation
            .triggers
            .iter()
            .map(|t| t.trigger_type.as_str())
            .collect();
        assert!(types.contains(&"stuck_loop"));
        assert!(types.contains(&"repeated_failures"));
        assert_eq!(escalation.highest_level, 2);
        assert!(last.recommendation.contains("pause"));
    }

    #[tokio::test]
    async fn complete_trace_computes_summary() {
        let registry = registry();
        let alice = registry.get_or_create("alice").await.unwrap();
        let trace = alice.start_trace("task", None).await.unwrap();
        alice
            .record_step(&trace.session_id, step("read", StepOutcome::Found))
            .await
            .unwrap();
        alice
            .record_step(&trace.session_id, step("grep", StepOutcome::Nothing))
            .await
            .unwrap();

        let completed = alice.complete_trace(&trace.session_id).await.unwrap();
        let summary = completed.summary.unwrap();
        assert_eq!(summary.total_steps, 2);
        assert_eq!(summary.dead_ends, 1);
        assert!((summary.efficiency - 0.5).abs() < 1e-9);

        // Completing twice is an invalid state, not a silent overwrite
        assert!(matches!(
            alice.complete_trace(&trace.session_id).await,
            Err(HubError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn soul_levels_up_after_five_clean_traces() {
        let registry = registry();
        let alice = registry.get_or_create("alice").await.unwrap();

        for i in 0..5 {
            let trace = alice
                .start_trace(&format!("task {i}"), None)
                .await
                .unwrap();
            for _ in 0..3 {
                alice
                    .record_step(&trace.session_id, step("edit", StepOutcome::Found))
                    .await
                    .unwrap();
            }
            alice.complete_trace(&trace.session_id).await.unwrap();
            alice
                .update_soul_from_trace(&trace.session_id, Some("backend"))
                .await
                .unwrap();
        }

        let soul = alice.soul().await.unwrap();
        assert!(soul.total_xp >= 100);
        assert_eq!(soul.tasks_completed, 5);
        assert_eq!(soul.current_streak, 5);
        assert_eq!(soul.level, models::SoulLevel::Capable);
        assert!(soul.abilities.can_commit);
        assert!(!soul.abilities.can_access_prod);
    }

    #[tokio::test]
    async fn update_from_open_trace_is_rejected() {
        let registry = registry();
        let alice = registry.get_or_create("alice").await.unwrap();
        let trace = alice.start_trace("task", None).await.unwrap();
        assert!(matches!(
            alice.update_soul_from_trace(&trace.session_id, None).await,
            Err(HubError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn resolve_escalation_marks_resolver() {
        let registry = registry();
        let alice = registry.get_or_create("alice").await.unwrap();
        let trace = alice.start_trace("task", None).await.unwrap();
        for _ in 0..3 {
            alice
                .record_step(&trace.session_id, step("grep", StepOutcome::Nothing))
                .await
                .unwrap();
        }

        let resolved = alice
            .resolve_escalation(
                &trace.session_id,
                ResolveEscalation {
                    escalation_id: None,
                    resolved_by: ResolvedBy::Peer,
                    resolver_agent: Some("bob".to_string()),
                    helpful_hint: Some("look in src/parse.rs".to_string()),
                },
            )
            .await
            .unwrap();
        assert!(resolved.resolved_at.is_some());
        assert_eq!(resolved.resolved_by, Some(ResolvedBy::Peer));
        assert_eq!(resolved.resolver_agent.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn heartbeat_updates_monitor_health() {
        let registry = registry();
        let alice = registry.get_or_create("alice").await.unwrap();

        let shadow = alice.shadow().await.unwrap();
        assert!(!shadow.is_healthy(Utc::now()));

        let ack = alice
            .heartbeat(HeartbeatInput {
                tokens_used: Some(1200),
                current_task: Some("parser".to_string()),
                status: Some("working".to_string()),
            })
            .await
            .unwrap();
        assert!(ack.is_healthy);

        let shadow = alice.shadow().await.unwrap();
        assert!(shadow.last_heartbeat.is_some());
    }

    #[tokio::test]
    async fn shadow_lifecycle_register_then_takeover() {
        let registry = registry();
        let alice = registry.get_or_create("alice").await.unwrap();

        // Takeover before any registration is an invalid state
        assert!(matches!(
            alice.takeover().await,
            Err(HubError::InvalidState(_))
        ));

        let monitor = alice
            .register_shadow("alice-shadow", Some(10_000), None)
            .await
            .unwrap();
        assert_eq!(monitor.shadow_status, ShadowStatus::Monitoring);
        assert_eq!(monitor.stall_threshold_ms, 10_000);

        let monitor = alice.takeover().await.unwrap();
        assert_eq!(monitor.shadow_status, ShadowStatus::TakenOver);
        assert!(monitor.takeover_at.is_some());
    }

    #[tokio::test]
    async fn state_sync_is_pushed_on_subscribe() {
        let registry = registry();
        let alice = registry.get_or_create("alice").await.unwrap();
        let mut subscription = alice.subscribe().await.unwrap();
        match subscription.receiver.recv().await {
            Some(PushEvent::StateSync { state }) => {
                assert_eq!(state["agentId"], "alice");
            }
            other => panic!("expected state-sync, got {other:?}"),
        }
    }
}
