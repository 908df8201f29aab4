//! The bidirectional push channel.
//!
//! Framed JSON over a long-lived WebSocket. The coordinator channel greets
//! with `welcome`, then streams `chat`, `agent-update` and `task-update`
//! events; inbound frames are `ping`, `chat` and `agent-update`. The
//! per-agent channel sends `state-sync` once on open. Send errors drop the
//! subscriber and never abort the owning mutation.

use super::Hub;
use crate::{
    coordinator::models::{AgentStatus, AgentUpsert, AuthorType},
    push::{PushEvent, Subscription},
    HubError,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    agent_id: String,
}

/// Frames a connected participant may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
enum InboundFrame {
    Ping,
    Chat {
        message: String,
        author_type: Option<AuthorType>,
    },
    AgentUpdate {
        status: Option<AgentStatus>,
        current_task: Option<String>,
        working_on: Option<String>,
    },
}

pub async fn coordinator_ws(
    State(hub): State<Hub>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if query.agent_id.trim().is_empty() {
        return HubError::Validation("agentId is required".to_string()).into_response();
    }
    ws.on_upgrade(move |socket| coordinator_socket(hub, query.agent_id, socket))
}

async fn coordinator_socket(hub: Hub, agent_id: String, socket: WebSocket) {
    let subscription = match hub.coordinator.subscribe(&agent_id).await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!("coordinator subscription for {agent_id} failed: {e}");
            return;
        }
    };
    let token = subscription.token;

    let (sender, mut receiver) = socket.split();
    let forward = tokio::spawn(forward_events(subscription, sender));

    while let Some(frame) = receiver.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let frame: InboundFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("ignoring malformed frame from {agent_id}: {e}");
                continue;
            }
        };
        match frame {
            InboundFrame::Ping => {
                let _ = hub.coordinator.touch_agent(&agent_id).await;
                hub.coordinator.push_channel().send_to(&agent_id, PushEvent::Pong);
            }
            InboundFrame::Chat {
                message,
                author_type,
            } => {
                if let Err(e) = hub
                    .coordinator
                    .post_chat(
                        &agent_id,
                        author_type.unwrap_or(AuthorType::Agent),
                        &message,
                    )
                    .await
                {
                    debug!("chat frame from {agent_id} rejected: {e}");
                }
            }
            InboundFrame::AgentUpdate {
                status,
                current_task,
                working_on,
            } => {
                let _ = hub
                    .coordinator
                    .upsert_agent(AgentUpsert {
                        agent_id: agent_id.clone(),
                        status,
                        current_task,
                        working_on,
                        ..Default::default()
                    })
                    .await;
            }
        }
    }

    hub.coordinator.disconnect(&agent_id, token).await;
    forward.abort();
    debug!("coordinator channel closed for {agent_id}");
}

pub async fn agent_ws(
    State(hub): State<Hub>,
    Path(agent_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| agent_socket(hub, agent_id, socket))
}

async fn agent_socket(hub: Hub, agent_id: String, socket: WebSocket) {
    let state = match hub.agents.get_or_create(&agent_id).await {
        Ok(state) => state,
        Err(e) => {
            warn!("agent channel for {agent_id} failed: {e}");
            return;
        }
    };
    // subscribe() pushes the initial state-sync frame
    let subscription = match state.subscribe().await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!("agent subscription for {agent_id} failed: {e}");
            return;
        }
    };
    let token = subscription.token;

    let (sender, mut receiver) = socket.split();
    let forward = tokio::spawn(forward_events(subscription, sender));

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if matches!(serde_json::from_str(&text), Ok(InboundFrame::Ping)) {
                    state.push_to_self(PushEvent::Pong);
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    state.unsubscribe(token);
    forward.abort();
    debug!("agent channel closed for {agent_id}");
}

/// Drain the subscription into the socket; exits when either side goes
/// away, which lets the broadcaster reap the subscriber on its next send.
async fn forward_events(
    mut subscription: Subscription,
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
) {
    while let Some(event) = subscription.receiver.recv().await {
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("push event serialization failed: {e}");
                continue;
            }
        };
        if sender.send(Message::Text(payload.into())).await.is_err() {
            break;
        }
    }
}
