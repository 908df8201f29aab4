//! The team-wide coordination singleton.
//!
//! One Coordinator exists per deployment. It owns the agent registry, group
//! chat, tasks, zones, claims and handoffs, aggregates onboarding and
//! session-resume bundles, and fans state changes out on its push channel.
//! All mutations serialize through the inner mutex in arrival order.

pub mod models;
pub mod onboarding;
pub mod session_resume;
pub mod store;

use crate::{
    agent::AgentStateRegistry,
    config::HubConfig,
    push::{Broadcaster, PushEvent, Subscription},
    storage, HubError, Result,
};
use chrono::{Duration, Utc};
use models::{
    AgentRecord, AgentStatus, AgentUpsert, AuthorType, ChatMessage, Claim, CreateHandoff,
    CreateTask, Handoff, HandoffStatus, Task, TaskPatch, TaskPriority, TaskStatus, Zone,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use store::CoordinatorStore;
use tokio::sync::Mutex;
use tracing::info;

/// One-call snapshot of everything an agent needs to start working.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkBundle {
    pub agent_id: String,
    pub active_agents: usize,
    pub todo_tasks: usize,
    pub in_progress_tasks: usize,
    pub team: Vec<AgentRecord>,
    pub tasks: WorkBundleTasks,
    pub recent_chat: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkBundleTasks {
    pub todo: Vec<Task>,
    pub mine: Vec<Task>,
}

pub struct Coordinator {
    store: Mutex<CoordinatorStore>,
    push: Broadcaster,
    agents: Arc<AgentStateRegistry>,
    config: HubConfig,
}

impl Coordinator {
    pub fn new(config: HubConfig, agents: Arc<AgentStateRegistry>) -> Result<Self> {
        let store = match &config.data_dir {
            Some(dir) => {
                let class_dir = storage::class_dir(dir, "coordinator")?;
                CoordinatorStore::open(&class_dir.join("main.db"))?
            }
            None => CoordinatorStore::open_in_memory()?,
        };
        Ok(Self {
            store: Mutex::new(store),
            push: Broadcaster::new(),
            agents,
            config,
        })
    }

    pub fn agent_registry(&self) -> &Arc<AgentStateRegistry> {
        &self.agents
    }

    pub(crate) fn hub_config(&self) -> &HubConfig {
        &self.config
    }

    // ----- agents -----

    /// Merge the provided fields into the stored record. Missing fields
    /// keep their prior values; `lastSeen` always advances.
    pub async fn upsert_agent(&self, upsert: AgentUpsert) -> Result<AgentRecord> {
        if upsert.agent_id.trim().is_empty() {
            return Err(HubError::Validation("agentId is required".to_string()));
        }
        let store = self.store.lock().await;
        let mut record = store
            .get_agent(&upsert.agent_id)?
            .unwrap_or_else(|| AgentRecord::new(&upsert.agent_id));

        if let Some(status) = upsert.status {
            record.status = status;
        }
        if upsert.current_task.is_some() {
            record.current_task = upsert.current_task;
        }
        if upsert.working_on.is_some() {
            record.working_on = upsert.working_on;
        }
        if let Some(capabilities) = upsert.capabilities {
            record.capabilities = capabilities;
        }
        if let Some(offers) = upsert.offers {
            record.offers = offers;
        }
        if let Some(needs) = upsert.needs {
            record.needs = needs;
        }
        record.last_seen = Utc::now();
        store.put_agent(&record)?;
        drop(store);

        self.push.broadcast(PushEvent::AgentUpdate {
            agent: record.clone(),
        });
        Ok(record)
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        self.store.lock().await.list_agents()
    }

    /// Refresh `lastSeen` without touching anything else (ping path).
    pub async fn touch_agent(&self, agent_id: &str) -> Result<()> {
        let store = self.store.lock().await;
        if let Some(mut record) = store.get_agent(agent_id)? {
            record.last_seen = Utc::now();
            store.put_agent(&record)?;
        }
        Ok(())
    }

    // ----- chat -----

    pub async fn post_chat(
        &self,
        author: &str,
        author_type: AuthorType,
        message: &str,
    ) -> Result<ChatMessage> {
        if author.trim().is_empty() || message.trim().is_empty() {
            return Err(HubError::Validation(
                "author and message are required".to_string(),
            ));
        }
        let msg = ChatMessage::new(author, author_type, message);
        self.store
            .lock()
            .await
            .append_chat(&msg, self.config.chat_retention)?;
        self.push.broadcast(PushEvent::Chat {
            message: msg.clone(),
        });
        Ok(msg)
    }

    pub async fn recent_chat(&self, limit: usize) -> Result<Vec<ChatMessage>> {
        self.store.lock().await.recent_chat(limit)
    }

    pub async fn react_to_chat(
        &self,
        message_id: &str,
        emoji: &str,
        by: &str,
    ) -> Result<ChatMessage> {
        if emoji.trim().is_empty() || by.trim().is_empty() {
            return Err(HubError::Validation("emoji and by are required".to_string()));
        }
        let entry = format!("{emoji}:{by}");
        let msg = self.store.lock().await.add_reaction(message_id, &entry)?;
        self.push.broadcast(PushEvent::Chat {
            message: msg.clone(),
        });
        Ok(msg)
    }

    /// System chat line posted by lifecycle events; never fails the owning
    /// mutation.
    fn post_system_line(&self, store: &CoordinatorStore, message: String) {
        let msg = ChatMessage::new("coordinator", AuthorType::System, message);
        if store.append_chat(&msg, self.config.chat_retention).is_ok() {
            self.push.broadcast(PushEvent::Chat { message: msg });
        }
    }

    // ----- tasks -----

    pub async fn create_task(&self, req: CreateTask) -> Result<Task> {
        if req.title.trim().is_empty() {
            return Err(HubError::Validation("title is required".to_string()));
        }
        if req.created_by.trim().is_empty() {
            return Err(HubError::Validation("createdBy is required".to_string()));
        }
        let mut task = Task::new(
            req.title,
            req.priority.unwrap_or(TaskPriority::Medium),
            req.created_by,
        );
        task.description = req.description;
        task.tags = req.tags;
        task.files = req.files;

        self.store.lock().await.put_task(&task)?;
        info!("task {} created: {}", task.id, task.title);
        self.push
            .broadcast(PushEvent::task_update("created", task.clone()));
        Ok(task)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        self.store
            .lock()
            .await
            .get_task(task_id)?
            .ok_or_else(|| HubError::NotFound(format!("task {task_id} not found")))
    }

    pub async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        assignee: Option<&str>,
    ) -> Result<Vec<Task>> {
        self.store.lock().await.list_tasks(status, assignee)
    }

    /// Direct field update. Rejects combinations that would store an
    /// invariant violation (an assignee-requiring status with no assignee).
    pub async fn patch_task(&self, patch: TaskPatch) -> Result<Task> {
        let store = self.store.lock().await;
        let mut task = store
            .get_task(&patch.id)?
            .ok_or_else(|| HubError::NotFound(format!("task {} not found", patch.id)))?;

        if let Some(title) = patch.title {
            if title.trim().is_empty() {
                return Err(HubError::Validation("title cannot be blank".to_string()));
            }
            task.title = title;
        }
        if patch.description.is_some() {
            task.description = patch.description;
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if patch.assignee.is_some() {
            task.assignee = patch.assignee.filter(|a| !a.trim().is_empty());
        }
        if let Some(tags) = patch.tags {
            task.tags = tags;
        }
        if let Some(files) = patch.files {
            task.files = files;
        }
        if patch.blocked_reason.is_some() {
            task.blocked_reason = patch.blocked_reason;
        }
        if let Some(status) = patch.status {
            if status.requires_assignee() && task.assignee.is_none() {
                return Err(HubError::Validation(format!(
                    "status {status} requires an assignee"
                )));
            }
            // completedAt tracks done-ness exactly
            match (task.status, status) {
                (TaskStatus::Done, s) if s != TaskStatus::Done => task.completed_at = None,
                (s, TaskStatus::Done) if s != TaskStatus::Done => {
                    task.completed_at = Some(Utc::now())
                }
                _ => {}
            }
            task.status = status;
        }
        task.updated_at = Utc::now();
        store.put_task(&task)?;
        drop(store);

        self.push
            .broadcast(PushEvent::task_update("updated", task.clone()));
        Ok(task)
    }

    pub async fn pickup_task(&self, task_id: &str, agent_id: &str) -> Result<Task> {
        if agent_id.trim().is_empty() {
            return Err(HubError::Validation("agentId is required".to_string()));
        }
        let store = self.store.lock().await;
        let mut task = store
            .get_task(task_id)?
            .ok_or_else(|| HubError::NotFound(format!("task {task_id} not found")))?;

        if let Some(assignee) = &task.assignee {
            if assignee != agent_id {
                return Err(HubError::conflict_with(
                    format!("task is already assigned to {assignee}"),
                    json!({ "assignedTo": assignee }),
                ));
            }
        }
        if task.status != TaskStatus::Todo {
            let context = task
                .assignee
                .as_ref()
                .map(|a| json!({ "assignedTo": a }))
                .unwrap_or(serde_json::Value::Null);
            return Err(HubError::Conflict {
                message: format!("task is {} and cannot be picked up", task.status),
                context,
            });
        }

        let now = Utc::now();
        task.assignee = Some(agent_id.to_string());
        task.status = TaskStatus::InProgress;
        task.picked_up_at = Some(now);
        task.updated_at = now;
        store.put_task(&task)?;
        self.post_system_line(
            &store,
            format!("{agent_id} picked up task \"{}\"", task.title),
        );
        drop(store);

        info!("task {task_id} picked up by {agent_id}");
        self.push
            .broadcast(PushEvent::task_update("picked-up", task.clone()));
        Ok(task)
    }

    pub async fn complete_task(&self, task_id: &str, agent_id: &str) -> Result<Task> {
        let store = self.store.lock().await;
        let mut task = store
            .get_task(task_id)?
            .ok_or_else(|| HubError::NotFound(format!("task {task_id} not found")))?;

        if task.assignee.as_deref() != Some(agent_id) {
            return Err(HubError::Forbidden(match &task.assignee {
                Some(assignee) => format!("task is assigned to {assignee}"),
                None => "task has no assignee".to_string(),
            }));
        }
        if task.status == TaskStatus::Done {
            return Err(HubError::InvalidState("task is already done".to_string()));
        }

        let now = Utc::now();
        task.status = TaskStatus::Done;
        task.completed_at = Some(now);
        task.updated_at = now;
        store.put_task(&task)?;
        self.post_system_line(
            &store,
            format!("{agent_id} completed task \"{}\"", task.title),
        );
        drop(store);

        info!("task {task_id} completed by {agent_id}");
        self.push
            .broadcast(PushEvent::task_update("completed", task.clone()));
        Ok(task)
    }

    pub async fn block_task(&self, task_id: &str, agent_id: &str, reason: &str) -> Result<Task> {
        if reason.trim().is_empty() {
            return Err(HubError::Validation("reason is required".to_string()));
        }
        let store = self.store.lock().await;
        let mut task = store
            .get_task(task_id)?
            .ok_or_else(|| HubError::NotFound(format!("task {task_id} not found")))?;

        // Blocked tasks always carry an assignee; the blocker adopts an
        // unowned task.
        if task.assignee.is_none() {
            task.assignee = Some(agent_id.to_string());
        }
        task.status = TaskStatus::Blocked;
        task.blocked_reason = Some(reason.to_string());
        task.completed_at = None;
        task.updated_at = Utc::now();
        store.put_task(&task)?;
        drop(store);

        self.push
            .broadcast(PushEvent::task_update("blocked", task.clone()));
        Ok(task)
    }

    pub async fn release_task(&self, task_id: &str, agent_id: &str) -> Result<Task> {
        let store = self.store.lock().await;
        let mut task = store
            .get_task(task_id)?
            .ok_or_else(|| HubError::NotFound(format!("task {task_id} not found")))?;

        if task.assignee.as_deref() != Some(agent_id) {
            return Err(HubError::Forbidden(match &task.assignee {
                Some(assignee) => format!("task is assigned to {assignee}"),
                None => "task has no assignee".to_string(),
            }));
        }

        task.assignee = None;
        task.status = TaskStatus::Todo;
        task.picked_up_at = None;
        task.completed_at = None;
        task.blocked_reason = None;
        task.updated_at = Utc::now();
        store.put_task(&task)?;
        drop(store);

        info!("task {task_id} released by {agent_id}");
        self.push
            .broadcast(PushEvent::task_update("released", task.clone()));
        Ok(task)
    }

    // ----- zones -----

    /// Overlapping paths are accepted; resolution is longest-prefix, so
    /// clients are expected to query before claiming.
    pub async fn claim_zone(
        &self,
        zone_id: &str,
        path: &str,
        owner: &str,
        description: Option<String>,
    ) -> Result<Zone> {
        if zone_id.trim().is_empty() || path.trim().is_empty() || owner.trim().is_empty() {
            return Err(HubError::Validation(
                "zoneId, path and owner are required".to_string(),
            ));
        }
        let zone = Zone {
            zone_id: zone_id.to_string(),
            path: path.to_string(),
            owner: owner.to_string(),
            description,
            claimed_at: Utc::now(),
        };
        self.store.lock().await.put_zone(&zone)?;
        info!("zone {zone_id} claimed on {path} by {owner}");
        Ok(zone)
    }

    pub async fn release_zone(&self, zone_id: &str, owner: &str) -> Result<()> {
        let store = self.store.lock().await;
        let zone = store
            .get_zone(zone_id)?
            .ok_or_else(|| HubError::NotFound(format!("zone {zone_id} not found")))?;
        if zone.owner != owner {
            return Err(HubError::Forbidden(format!(
                "zone is owned by {}",
                zone.owner
            )));
        }
        store.delete_zone(zone_id)?;
        Ok(())
    }

    pub async fn list_zones(&self) -> Result<Vec<Zone>> {
        self.store.lock().await.list_zones()
    }

    /// Who owns path P? The zone whose path is the longest prefix of P.
    pub async fn resolve_zone(&self, path: &str) -> Result<Option<Zone>> {
        let zones = self.store.lock().await.list_zones()?;
        Ok(zones
            .into_iter()
            .filter(|z| path.starts_with(&z.path))
            .max_by_key(|z| z.path.len()))
    }

    // ----- claims -----

    fn mark_stale(&self, mut claim: Claim) -> Claim {
        let age = Utc::now() - claim.since;
        claim.stale = age > Duration::seconds(self.config.claim_stale_secs);
        claim
    }

    /// Claim a work item. A live claim by someone else is a conflict; a
    /// stale one may be overwritten. Re-claiming your own refreshes it.
    pub async fn claim(
        &self,
        what: &str,
        by: &str,
        description: Option<String>,
    ) -> Result<Claim> {
        if what.trim().is_empty() || by.trim().is_empty() {
            return Err(HubError::Validation("what and by are required".to_string()));
        }
        let store = self.store.lock().await;
        if let Some(existing) = store.get_claim(what)? {
            let existing = self.mark_stale(existing);
            if !existing.stale && existing.by != by {
                return Err(HubError::conflict_with(
                    format!("\"{what}\" is claimed by {}", existing.by),
                    json!({ "claimedBy": existing.by, "since": existing.since }),
                ));
            }
        }
        let claim = Claim {
            what: what.to_string(),
            by: by.to_string(),
            description,
            since: Utc::now(),
            stale: false,
        };
        store.put_claim(&claim)?;
        info!("claim on \"{what}\" by {by}");
        Ok(claim)
    }

    pub async fn release_claim(&self, what: &str, by: &str) -> Result<()> {
        let store = self.store.lock().await;
        let claim = store
            .get_claim(what)?
            .ok_or_else(|| HubError::NotFound(format!("no claim on \"{what}\"")))?;
        if claim.by != by {
            return Err(HubError::Forbidden(format!(
                "claim is held by {}",
                claim.by
            )));
        }
        store.delete_claim(what)?;
        Ok(())
    }

    pub async fn list_claims(&self, include_stale: bool) -> Result<Vec<Claim>> {
        let claims = self.store.lock().await.list_claims()?;
        let claims: Vec<Claim> = claims.into_iter().map(|c| self.mark_stale(c)).collect();
        Ok(if include_stale {
            claims
        } else {
            claims.into_iter().filter(|c| !c.stale).collect()
        })
    }

    // ----- handoffs -----

    pub async fn create_handoff(&self, req: CreateHandoff) -> Result<Handoff> {
        if req.from_agent.trim().is_empty()
            || req.title.trim().is_empty()
            || req.context.trim().is_empty()
        {
            return Err(HubError::Validation(
                "fromAgent, title and context are required".to_string(),
            ));
        }
        let handoff = Handoff::from_request(req);
        self.store.lock().await.put_handoff(&handoff)?;
        info!("handoff {} created by {}", handoff.id, handoff.from_agent);
        self.push
            .broadcast(PushEvent::handoff_update("handoff-created", handoff.clone()));
        Ok(handoff)
    }

    pub async fn claim_handoff(&self, id: &str, agent_id: &str) -> Result<Handoff> {
        let store = self.store.lock().await;
        let mut handoff = store
            .get_handoff(id)?
            .ok_or_else(|| HubError::NotFound(format!("handoff {id} not found")))?;

        if handoff.status != HandoffStatus::Pending {
            return Err(HubError::conflict_with(
                format!("handoff is {}", handoff.status),
                match &handoff.claimed_by {
                    Some(claimed_by) => json!({ "claimedBy": claimed_by }),
                    None => serde_json::Value::Null,
                },
            ));
        }
        if let Some(to_agent) = &handoff.to_agent {
            if to_agent != agent_id {
                return Err(HubError::Forbidden(format!(
                    "handoff is addressed to {to_agent}"
                )));
            }
        }

        handoff.status = HandoffStatus::Claimed;
        handoff.claimed_by = Some(agent_id.to_string());
        handoff.claimed_at = Some(Utc::now());
        store.put_handoff(&handoff)?;
        drop(store);

        info!("handoff {id} claimed by {agent_id}");
        self.push
            .broadcast(PushEvent::handoff_update("handoff-claimed", handoff.clone()));
        Ok(handoff)
    }

    pub async fn complete_handoff(&self, id: &str, agent_id: &str) -> Result<Handoff> {
        let store = self.store.lock().await;
        let mut handoff = store
            .get_handoff(id)?
            .ok_or_else(|| HubError::NotFound(format!("handoff {id} not found")))?;

        match (&handoff.status, &handoff.claimed_by) {
            (HandoffStatus::Claimed, Some(claimed_by)) if claimed_by == agent_id => {}
            (HandoffStatus::Claimed, Some(claimed_by)) => {
                return Err(HubError::Forbidden(format!("claimed by {claimed_by}")));
            }
            _ => {
                return Err(HubError::InvalidState(format!(
                    "handoff is {} and cannot be completed",
                    handoff.status
                )));
            }
        }

        handoff.status = HandoffStatus::Completed;
        handoff.completed_at = Some(Utc::now());
        store.put_handoff(&handoff)?;
        drop(store);

        info!("handoff {id} completed by {agent_id}");
        self.push.broadcast(PushEvent::handoff_update(
            "handoff-completed",
            handoff.clone(),
        ));
        Ok(handoff)
    }

    pub async fn list_handoffs(&self, status: Option<HandoffStatus>) -> Result<Vec<Handoff>> {
        self.store.lock().await.list_handoffs(status)
    }

    // ----- work bundle -----

    /// One-call snapshot; read-only except for promoting the caller to
    /// `active`.
    pub async fn work_bundle(&self, agent_id: &str) -> Result<WorkBundle> {
        let record = self
            .upsert_agent(AgentUpsert {
                agent_id: agent_id.to_string(),
                status: Some(AgentStatus::Active),
                ..Default::default()
            })
            .await?;

        let store = self.store.lock().await;
        let team = store.list_agents()?;
        let todo = store.list_tasks(Some(TaskStatus::Todo), None)?;
        let mine = store.list_tasks(Some(TaskStatus::InProgress), Some(agent_id))?;
        let recent_chat = store.recent_chat(crate::constants::WORK_BUNDLE_CHAT_LIMIT)?;

        Ok(WorkBundle {
            agent_id: record.agent_id,
            active_agents: team
                .iter()
                .filter(|a| a.status == AgentStatus::Active)
                .count(),
            todo_tasks: todo.len(),
            in_progress_tasks: mine.len(),
            team,
            tasks: WorkBundleTasks { todo, mine },
            recent_chat,
        })
    }

    // ----- push channel -----

    /// Open the coordinator push channel for an agent: the agent is marked
    /// `active`, recorded as the sole subscriber under its id, and greeted
    /// with the current active-agent list.
    pub async fn subscribe(&self, agent_id: &str) -> Result<Subscription> {
        if agent_id.trim().is_empty() {
            return Err(HubError::Validation("agentId is required".to_string()));
        }
        let subscription = self.push.subscribe(agent_id);

        self.upsert_agent(AgentUpsert {
            agent_id: agent_id.to_string(),
            status: Some(AgentStatus::Active),
            ..Default::default()
        })
        .await?;

        let active: Vec<AgentRecord> = self
            .list_agents()
            .await?
            .into_iter()
            .filter(|a| a.status == AgentStatus::Active)
            .collect();
        self.push.send_to(
            agent_id,
            PushEvent::Welcome {
                active_agents: active,
            },
        );
        Ok(subscription)
    }

    /// Close a push channel. Only the current subscriber's disconnect marks
    /// the agent offline; a replaced connection going away is ignored.
    pub async fn disconnect(&self, agent_id: &str, token: u64) {
        if !self.push.unsubscribe(agent_id, token) {
            return;
        }
        let _ = self
            .upsert_agent(AgentUpsert {
                agent_id: agent_id.to_string(),
                status: Some(AgentStatus::Offline),
                ..Default::default()
            })
            .await;
    }

    pub fn push_channel(&self) -> &Broadcaster {
        &self.push
    }
}
