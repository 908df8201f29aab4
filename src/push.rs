use crate::coordinator::models::{AgentRecord, ChatMessage, Handoff, Task};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// An event pushed to connected subscribers.
///
/// Events are emitted after the owning state change commits, in commit
/// order. `state-sync` is only used by per-agent channels, once on open.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PushEvent {
    Welcome {
        #[serde(rename = "activeAgents")]
        active_agents: Vec<AgentRecord>,
    },
    Pong,
    Chat {
        message: ChatMessage,
    },
    AgentUpdate {
        agent: AgentRecord,
    },
    TaskUpdate {
        action: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        task: Option<Task>,
        #[serde(skip_serializing_if = "Option::is_none")]
        handoff: Option<Handoff>,
    },
    StateSync {
        state: serde_json::Value,
    },
}

impl PushEvent {
    pub fn task_update(action: &str, task: Task) -> Self {
        PushEvent::TaskUpdate {
            action: action.to_string(),
            task: Some(task),
            handoff: None,
        }
    }

    pub fn handoff_update(action: &str, handoff: Handoff) -> Self {
        PushEvent::TaskUpdate {
            action: action.to_string(),
            task: None,
            handoff: Some(handoff),
        }
    }
}

/// A live subscription. Dropping the receiver (or the socket behind it)
/// causes the next broadcast to reap the entry.
pub struct Subscription {
    pub token: u64,
    pub receiver: UnboundedReceiver<PushEvent>,
}

struct Subscriber {
    token: u64,
    sender: UnboundedSender<PushEvent>,
}

/// Publish/subscribe fan-out for one singleton's push channel.
///
/// At most one subscription per tag (`agentId`): a new subscribe replaces
/// the previous subscriber, orphaning the old connection, which is reaped
/// on its next failed send. Broadcast is best-effort and never fails the
/// owning mutation.
#[derive(Clone, Default)]
pub struct Broadcaster {
    subscribers: Arc<Mutex<HashMap<String, Subscriber>>>,
    next_token: Arc<AtomicU64>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, tag: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.subscribers.lock().expect("subscriber map poisoned");
        if subs.insert(tag.to_string(), Subscriber { token, sender: tx }).is_some() {
            debug!("replaced existing push subscription for {tag}");
        }
        Subscription {
            token,
            receiver: rx,
        }
    }

    /// Removes the subscription only if `token` still identifies it, so a
    /// stale connection cannot evict its replacement. Returns whether this
    /// token was the current subscriber.
    pub fn unsubscribe(&self, tag: &str, token: u64) -> bool {
        let mut subs = self.subscribers.lock().expect("subscriber map poisoned");
        if subs.get(tag).map(|s| s.token) == Some(token) {
            subs.remove(tag);
            true
        } else {
            false
        }
    }

    pub fn broadcast(&self, event: PushEvent) {
        let mut subs = self.subscribers.lock().expect("subscriber map poisoned");
        subs.retain(|tag, sub| {
            let delivered = sub.sender.send(event.clone()).is_ok();
            if !delivered {
                warn!("dropping push subscriber {tag}: send failed");
            }
            delivered
        });
    }

    pub fn send_to(&self, tag: &str, event: PushEvent) {
        let mut subs = self.subscribers.lock().expect("subscriber map poisoned");
        if let Some(sub) = subs.get(tag) {
            if sub.sender.send(event).is_err() {
                warn!("dropping push subscriber {tag}: send failed");
                subs.remove(tag);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("subscriber map poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers() {
        let broadcaster = Broadcaster::new();
        let mut a = broadcaster.subscribe("alice");
        let mut b = broadcaster.subscribe("bob");

        broadcaster.broadcast(PushEvent::Pong);

        assert!(matches!(a.receiver.recv().await, Some(PushEvent::Pong)));
        assert!(matches!(b.receiver.recv().await, Some(PushEvent::Pong)));
    }

    #[tokio::test]
    async fn dropped_receiver_is_reaped_on_broadcast() {
        let broadcaster = Broadcaster::new();
        let sub = broadcaster.subscribe("alice");
        drop(sub);

        broadcaster.broadcast(PushEvent::Pong);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_tag_replaces_previous_subscription() {
        let broadcaster = Broadcaster::new();
        let mut first = broadcaster.subscribe("alice");
        let mut second = broadcaster.subscribe("alice");

        assert_eq!(broadcaster.subscriber_count(), 1);
        broadcaster.broadcast(PushEvent::Pong);

        assert!(matches!(second.receiver.recv().await, Some(PushEvent::Pong)));
        assert!(first.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_unsubscribe_does_not_evict_replacement() {
        let broadcaster = Broadcaster::new();
        let first = broadcaster.subscribe("alice");
        let _second = broadcaster.subscribe("alice");

        broadcaster.unsubscribe("alice", first.token);
        assert_eq!(broadcaster.subscriber_count(), 1);
    }
}
