use super::{parse_payload, ws, Hub};
use crate::{
    agent::{
        models::{CheckpointUpdate, ResolvedBy, StepInput},
        HeartbeatInput, ResolveEscalation,
    },
    constants, Result,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

pub fn router() -> Router<Hub> {
    Router::new()
        .route("/checkpoint", get(get_checkpoint).post(save_checkpoint))
        .route(
            "/messages",
            get(get_messages).post(post_message).patch(mark_read),
        )
        .route("/memory", get(search_memory).post(post_memory))
        .route("/state", get(get_state))
        .route("/trace", get(list_traces).post(start_trace))
        .route("/trace/{sid}", get(get_trace))
        .route("/trace/{sid}/step", post(post_step))
        .route("/trace/{sid}/complete", post(complete_trace))
        .route("/trace/{sid}/resolve-escalation", post(resolve_escalation))
        .route("/trace/{sid}/escalations", get(get_escalations))
        .route("/soul", get(get_soul).post(post_soul).patch(patch_soul))
        .route("/dashboard", get(get_dashboard))
        .route("/heartbeat", get(get_heartbeats).post(post_heartbeat))
        .route("/shadow", get(get_shadow).post(post_shadow))
        .route("/ws", get(ws::agent_ws))
}

// ----- checkpoint -----

async fn get_checkpoint(
    State(hub): State<Hub>,
    Path(agent_id): Path<String>,
) -> Result<Json<Value>> {
    let state = hub.agents.get_or_create(&agent_id).await?;
    Ok(Json(serde_json::to_value(state.checkpoint().await?)?))
}

async fn save_checkpoint(
    State(hub): State<Hub>,
    Path(agent_id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>> {
    let update: CheckpointUpdate = parse_payload(payload)?;
    let state = hub.agents.get_or_create(&agent_id).await?;
    Ok(Json(serde_json::to_value(
        state.save_checkpoint(update).await?,
    )?))
}

// ----- messages -----

#[derive(Deserialize)]
struct MessagesQuery {
    unread: Option<bool>,
}

async fn get_messages(
    State(hub): State<Hub>,
    Path(agent_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Value>> {
    let state = hub.agents.get_or_create(&agent_id).await?;
    let messages = state.messages(query.unread.unwrap_or(false)).await?;
    Ok(Json(serde_json::to_value(messages)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostMessage {
    from: String,
    #[serde(rename = "type", default = "default_message_type")]
    message_type: String,
    message: String,
}

fn default_message_type() -> String {
    "note".to_string()
}

async fn post_message(
    State(hub): State<Hub>,
    Path(agent_id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Response> {
    let post: PostMessage = parse_payload(payload)?;
    let state = hub.agents.get_or_create(&agent_id).await?;
    let message = state
        .send_message(&post.from, &post.message_type, &post.message)
        .await?;
    Ok((StatusCode::CREATED, Json(serde_json::to_value(message)?)).into_response())
}

#[derive(Deserialize)]
struct MarkRead {
    ids: Vec<String>,
}

async fn mark_read(
    State(hub): State<Hub>,
    Path(agent_id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>> {
    let mark: MarkRead = parse_payload(payload)?;
    let state = hub.agents.get_or_create(&agent_id).await?;
    let marked = state.mark_messages_read(&mark.ids).await?;
    Ok(Json(serde_json::json!({ "marked": marked })))
}

// ----- memory -----

#[derive(Deserialize)]
struct MemoryQuery {
    category: Option<String>,
    q: Option<String>,
}

async fn search_memory(
    State(hub): State<Hub>,
    Path(agent_id): Path<String>,
    Query(query): Query<MemoryQuery>,
) -> Result<Json<Value>> {
    let state = hub.agents.get_or_create(&agent_id).await?;
    let entries = state
        .search_memory(query.category.as_deref(), query.q.as_deref())
        .await?;
    Ok(Json(serde_json::to_value(entries)?))
}

#[derive(Deserialize)]
struct PostMemory {
    category: String,
    content: String,
    #[serde(default)]
    tags: Vec<String>,
}

async fn post_memory(
    State(hub): State<Hub>,
    Path(agent_id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Response> {
    let post: PostMemory = parse_payload(payload)?;
    let state = hub.agents.get_or_create(&agent_id).await?;
    let entry = state
        .remember(&post.category, &post.content, post.tags)
        .await?;
    Ok((StatusCode::CREATED, Json(serde_json::to_value(entry)?)).into_response())
}

// ----- state -----

async fn get_state(State(hub): State<Hub>, Path(agent_id): Path<String>) -> Result<Json<Value>> {
    let state = hub.agents.get_or_create(&agent_id).await?;
    Ok(Json(serde_json::to_value(state.state_snapshot().await?)?))
}

// ----- traces -----

#[derive(Deserialize)]
struct TraceListQuery {
    limit: Option<usize>,
}

async fn list_traces(
    State(hub): State<Hub>,
    Path(agent_id): Path<String>,
    Query(query): Query<TraceListQuery>,
) -> Result<Json<Value>> {
    let state = hub.agents.get_or_create(&agent_id).await?;
    let traces = state.list_traces(query.limit.unwrap_or(20)).await?;
    Ok(Json(serde_json::to_value(traces)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartTrace {
    task: String,
    session_id: Option<String>,
}

async fn start_trace(
    State(hub): State<Hub>,
    Path(agent_id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Response> {
    let start: StartTrace = parse_payload(payload)?;
    let state = hub.agents.get_or_create(&agent_id).await?;
    let trace = state.start_trace(&start.task, start.session_id).await?;
    Ok((StatusCode::CREATED, Json(serde_json::to_value(trace)?)).into_response())
}

async fn get_trace(
    State(hub): State<Hub>,
    Path((agent_id, sid)): Path<(String, String)>,
) -> Result<Json<Value>> {
    let state = hub.agents.get_or_create(&agent_id).await?;
    Ok(Json(serde_json::to_value(state.get_trace(&sid).await?)?))
}

async fn post_step(
    State(hub): State<Hub>,
    Path((agent_id, sid)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>> {
    let input: StepInput = parse_payload(payload)?;
    let state = hub.agents.get_or_create(&agent_id).await?;
    let recorded = state.record_step(&sid, input).await?;
    Ok(Json(serde_json::to_value(recorded)?))
}

async fn complete_trace(
    State(hub): State<Hub>,
    Path((agent_id, sid)): Path<(String, String)>,
) -> Result<Json<Value>> {
    let state = hub.agents.get_or_create(&agent_id).await?;
    Ok(Json(serde_json::to_value(
        state.complete_trace(&sid).await?,
    )?))
}

async fn resolve_escalation(
    State(hub): State<Hub>,
    Path((agent_id, sid)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>> {
    let req: ResolveEscalation = parse_payload(payload)?;
    let resolver = req.resolver_agent.clone();
    let resolved_by = req.resolved_by;
    let state = hub.agents.get_or_create(&agent_id).await?;
    let escalation = state.resolve_escalation(&sid, req).await?;

    // Credit the helping peer on their own soul; never fail the resolution
    if resolved_by == ResolvedBy::Peer {
        if let Some(resolver) = resolver.filter(|r| r != &agent_id) {
            match hub.agents.get_or_create(&resolver).await {
                Ok(peer) => {
                    if let Err(e) = peer.record_peer_assist().await {
                        warn!("peer assist credit for {resolver} failed: {e}");
                    }
                }
                Err(e) => warn!("peer assist credit for {resolver} failed: {e}"),
            }
        }
    }

    Ok(Json(serde_json::to_value(escalation)?))
}

async fn get_escalations(
    State(hub): State<Hub>,
    Path((agent_id, sid)): Path<(String, String)>,
) -> Result<Json<Value>> {
    let state = hub.agents.get_or_create(&agent_id).await?;
    Ok(Json(serde_json::to_value(state.escalations(&sid).await?)?))
}

// ----- soul -----

async fn get_soul(State(hub): State<Hub>, Path(agent_id): Path<String>) -> Result<Json<Value>> {
    let state = hub.agents.get_or_create(&agent_id).await?;
    Ok(Json(serde_json::to_value(state.soul().await?)?))
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
enum SoulAction {
    UpdateFromTrace {
        trace_id: String,
        domain: Option<String>,
    },
    AddXp { amount: i64, reason: Option<String> },
    UnlockAchievement { name: String },
}

async fn post_soul(
    State(hub): State<Hub>,
    Path(agent_id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>> {
    let action: SoulAction = parse_payload(payload)?;
    let state = hub.agents.get_or_create(&agent_id).await?;
    match action {
        SoulAction::UpdateFromTrace { trace_id, domain } => {
            let (soul, outcome) = state
                .update_soul_from_trace(&trace_id, domain.as_deref())
                .await?;
            Ok(Json(serde_json::json!({
                "soul": soul,
                "progression": outcome,
            })))
        }
        SoulAction::AddXp { amount, reason } => {
            let soul = state.add_xp(amount, reason.as_deref()).await?;
            Ok(Json(serde_json::to_value(soul)?))
        }
        SoulAction::UnlockAchievement { name } => {
            let soul = state.unlock_achievement(&name).await?;
            Ok(Json(serde_json::to_value(soul)?))
        }
    }
}

#[derive(Deserialize)]
struct SoulPatch {
    name: Option<String>,
    personality: Option<String>,
}

async fn patch_soul(
    State(hub): State<Hub>,
    Path(agent_id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>> {
    let patch: SoulPatch = parse_payload(payload)?;
    let state = hub.agents.get_or_create(&agent_id).await?;
    let soul = state.patch_soul(patch.name, patch.personality).await?;
    Ok(Json(serde_json::to_value(soul)?))
}

// ----- dashboard -----

async fn get_dashboard(
    State(hub): State<Hub>,
    Path(agent_id): Path<String>,
) -> Result<Json<Value>> {
    let state = hub.agents.get_or_create(&agent_id).await?;
    Ok(Json(serde_json::to_value(state.dashboard().await?)?))
}

// ----- heartbeat -----

#[derive(Deserialize)]
struct HeartbeatQuery {
    limit: Option<usize>,
}

async fn get_heartbeats(
    State(hub): State<Hub>,
    Path(agent_id): Path<String>,
    Query(query): Query<HeartbeatQuery>,
) -> Result<Json<Value>> {
    let state = hub.agents.get_or_create(&agent_id).await?;
    let beats = state
        .heartbeats(query.limit.unwrap_or(constants::HEARTBEAT_RING_SIZE))
        .await?;
    Ok(Json(serde_json::to_value(beats)?))
}

async fn post_heartbeat(
    State(hub): State<Hub>,
    Path(agent_id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>> {
    let input: HeartbeatInput = parse_payload(payload)?;
    let state = hub.agents.get_or_create(&agent_id).await?;
    Ok(Json(serde_json::to_value(state.heartbeat(input).await?)?))
}

// ----- shadow -----

async fn get_shadow(State(hub): State<Hub>, Path(agent_id): Path<String>) -> Result<Json<Value>> {
    let state = hub.agents.get_or_create(&agent_id).await?;
    let monitor = state.shadow().await?;
    let is_healthy = monitor.is_healthy(chrono::Utc::now());
    let mut value = serde_json::to_value(monitor)?;
    if let Some(map) = value.as_object_mut() {
        map.insert("isHealthy".to_string(), serde_json::json!(is_healthy));
    }
    Ok(Json(value))
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
enum ShadowAction {
    RegisterShadow {
        shadow_id: String,
        stall_threshold_ms: Option<i64>,
        heartbeat_interval_ms: Option<i64>,
    },
    BecomeShadow { primary_agent: String },
    Takeover,
}

async fn post_shadow(
    State(hub): State<Hub>,
    Path(agent_id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>> {
    let action: ShadowAction = parse_payload(payload)?;
    let state = hub.agents.get_or_create(&agent_id).await?;
    let monitor = match action {
        ShadowAction::RegisterShadow {
            shadow_id,
            stall_threshold_ms,
            heartbeat_interval_ms,
        } => {
            state
                .register_shadow(&shadow_id, stall_threshold_ms, heartbeat_interval_ms)
                .await?
        }
        ShadowAction::BecomeShadow { primary_agent } => {
            state.become_shadow(&primary_agent).await?
        }
        ShadowAction::Takeover => state.takeover().await?,
    };
    Ok(Json(serde_json::to_value(monitor)?))
}
