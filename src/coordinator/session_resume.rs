//! The session-resume aggregator: reconstructs "what happened while I was
//! gone" from the recent chat window plus the live task/handoff/claim
//! state, and offers quick actions sized to what it found.

use super::models::{AuthorType, ChatMessage, Claim, Handoff, HandoffStatus, Task, TaskStatus};
use super::Coordinator;
use crate::{constants, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub author: String,
    pub author_type: AuthorType,
    pub message_count: usize,
    pub last_message: String,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickAction {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionWindow {
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
    pub message_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResumeBundle {
    pub participants: Vec<Participant>,
    pub accomplishments: Vec<String>,
    pub pending_handoffs: Vec<Handoff>,
    pub in_progress_tasks: Vec<Task>,
    pub active_claims: Vec<Claim>,
    pub quick_actions: Vec<QuickAction>,
    pub session: SessionWindow,
}

impl Coordinator {
    pub async fn session_resume(&self) -> Result<SessionResumeBundle> {
        let chat = self
            .recent_chat(constants::SESSION_RESUME_CHAT_WINDOW)
            .await?;

        let participants = participants(&chat);
        let accomplishments = extract_accomplishments(
            &chat,
            &self.hub_config().accomplishment_keywords,
            constants::SESSION_RESUME_ACCOMPLISHMENT_CAP,
        );

        let mut pending_handoffs = self.list_handoffs(Some(HandoffStatus::Pending)).await?;
        pending_handoffs.truncate(constants::SESSION_RESUME_HANDOFF_CAP);

        let mut in_progress_tasks = self
            .list_tasks(Some(TaskStatus::InProgress), None)
            .await?;
        in_progress_tasks.truncate(constants::SESSION_RESUME_TASK_CAP);

        let mut active_claims = self.list_claims(false).await?;
        active_claims.truncate(constants::SESSION_RESUME_CLAIM_CAP);

        let quick_actions =
            quick_actions(&pending_handoffs, &in_progress_tasks, &active_claims);

        let session = SessionWindow {
            started_at: chat.first().map(|m| m.timestamp),
            ended_at: chat.last().map(|m| m.timestamp),
            duration_minutes: match (chat.first(), chat.last()) {
                (Some(first), Some(last)) => {
                    (last.timestamp - first.timestamp).num_minutes().max(0)
                }
                _ => 0,
            },
            message_count: chat.len(),
        };

        Ok(SessionResumeBundle {
            participants,
            accomplishments,
            pending_handoffs,
            in_progress_tasks,
            active_claims,
            quick_actions,
            session,
        })
    }
}

fn participants(chat: &[ChatMessage]) -> Vec<Participant> {
    let mut by_author: HashMap<&str, Participant> = HashMap::new();
    for msg in chat {
        by_author
            .entry(msg.author.as_str())
            .and_modify(|p| {
                p.message_count += 1;
                p.last_message = msg.message.clone();
                p.last_seen = msg.timestamp;
            })
            .or_insert_with(|| Participant {
                author: msg.author.clone(),
                author_type: msg.author_type,
                message_count: 1,
                last_message: msg.message.clone(),
                last_seen: msg.timestamp,
            });
    }
    let mut participants: Vec<Participant> = by_author.into_values().collect();
    participants.sort_by(|a, b| b.message_count.cmp(&a.message_count));
    participants
}

/// Keyword-matched accomplishment lines: first line of each matching
/// message, deduped in order, capped.
fn extract_accomplishments(chat: &[ChatMessage], keywords: &[String], cap: usize) -> Vec<String> {
    let mut seen = Vec::new();
    for msg in chat {
        let lowered = msg.message.to_lowercase();
        if !keywords.iter().any(|k| lowered.contains(k.as_str())) {
            continue;
        }
        let first_line = msg.message.lines().next().unwrap_or("").trim().to_string();
        if first_line.is_empty() || seen.contains(&first_line) {
            continue;
        }
        seen.push(first_line);
        if seen.len() >= cap {
            break;
        }
    }
    seen
}

fn quick_actions(
    handoffs: &[Handoff],
    tasks: &[Task],
    claims: &[Claim],
) -> Vec<QuickAction> {
    let mut actions = Vec::new();
    if !handoffs.is_empty() {
        actions.push(QuickAction {
            id: "claim-handoff".to_string(),
            label: format!("Claim a pending handoff ({} waiting)", handoffs.len()),
        });
    }
    if !tasks.is_empty() {
        actions.push(QuickAction {
            id: "check-in-progress".to_string(),
            label: format!("Check {} in-progress task(s)", tasks.len()),
        });
    }
    if !claims.is_empty() {
        actions.push(QuickAction {
            id: "review-claims".to_string(),
            label: format!("Review {} active claim(s)", claims.len()),
        });
    }
    actions.push(QuickAction {
        id: "catch-up-chat".to_string(),
        label: "Catch up on team chat".to_string(),
    });
    actions
}

#[cfg(test)]
mod tests {
    use super::super::models::{CreateHandoff, CreateTask, TaskPriority};
    use super::super::tests::coordinator;
    use super::*;

    #[tokio::test]
    async fn accomplishments_are_keyword_matched_and_deduped() {
        let coordinator = coordinator();
        coordinator
            .post_chat("alice", AuthorType::Agent, "shipped the parser\ndetails below")
            .await
            .unwrap();
        coordinator
            .post_chat("alice", AuthorType::Agent, "shipped the parser\nagain")
            .await
            .unwrap();
        coordinator
            .post_chat("bob", AuthorType::Agent, "fixed the flaky test")
            .await
            .unwrap();
        coordinator
            .post_chat("bob", AuthorType::Agent, "thinking about lunch")
            .await
            .unwrap();

        let bundle = coordinator.session_resume().await.unwrap();
        assert_eq!(
            bundle.accomplishments,
            vec![
                "shipped the parser".to_string(),
                "fixed the flaky test".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn participants_are_counted_and_ranked() {
        let coordinator = coordinator();
        for i in 0..3 {
            coordinator
                .post_chat("alice", AuthorType::Agent, &format!("msg {i}"))
                .await
                .unwrap();
        }
        coordinator
            .post_chat("bob", AuthorType::Human, "hello")
            .await
            .unwrap();

        let bundle = coordinator.session_resume().await.unwrap();
        assert_eq!(bundle.participants.len(), 2);
        assert_eq!(bundle.participants[0].author, "alice");
        assert_eq!(bundle.participants[0].message_count, 3);
        assert_eq!(bundle.participants[0].last_message, "msg 2");
        assert_eq!(bundle.session.message_count, 4);
    }

    #[tokio::test]
    async fn quick_actions_match_counts() {
        let coordinator = coordinator();

        // Nothing pending: only the catch-up action
        let bundle = coordinator.session_resume().await.unwrap();
        assert_eq!(bundle.quick_actions.len(), 1);
        assert_eq!(bundle.quick_actions[0].id, "catch-up-chat");

        coordinator
            .create_handoff(CreateHandoff {
                from_agent: "alice".to_string(),
                to_agent: None,
                title: "X".to_string(),
                context: "c".to_string(),
                code: None,
                file_path: None,
                next_steps: vec![],
                priority: None,
            })
            .await
            .unwrap();
        let task = coordinator
            .create_task(CreateTask {
                title: "ship".to_string(),
                description: None,
                priority: Some(TaskPriority::High),
                created_by: "u".to_string(),
                tags: vec![],
                files: vec![],
            })
            .await
            .unwrap();
        coordinator.pickup_task(&task.id, "alice").await.unwrap();
        coordinator.claim("parser", "alice", None).await.unwrap();

        let bundle = coordinator.session_resume().await.unwrap();
        let ids: Vec<_> = bundle.quick_actions.iter().map(|a| a.id.as_str()).collect();
        assert!(ids.contains(&"claim-handoff"));
        assert!(ids.contains(&"check-in-progress"));
        assert!(ids.contains(&"review-claims"));
        assert_eq!(bundle.pending_handoffs.len(), 1);
        assert_eq!(bundle.in_progress_tasks.len(), 1);
        assert_eq!(bundle.active_claims.len(), 1);
    }
}
