use super::{parse_payload, ws, Hub};
use crate::{
    constants,
    coordinator::models::{
        AgentUpsert, AuthorType, CreateHandoff, CreateTask, HandoffStatus, TaskPatch, TaskStatus,
    },
    HubError, Result,
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

pub fn router() -> Router<Hub> {
    Router::new()
        .route("/agents", get(list_agents).post(upsert_agent))
        .route("/chat", get(get_chat).post(post_chat))
        .route(
            "/tasks",
            get(list_tasks).post(post_tasks).patch(patch_task),
        )
        .route("/zones", get(get_zones).post(post_zones))
        .route("/claims", get(get_claims).post(post_claims))
        .route("/handoffs", get(get_handoffs).post(post_handoffs))
        .route("/work", get(work_bundle))
        .route("/onboard", get(onboard))
        .route("/session-resume", get(session_resume))
        .route("/ws", get(ws::coordinator_ws))
}

// ----- agents -----

async fn list_agents(State(hub): State<Hub>) -> Result<Json<Value>> {
    let agents = hub.coordinator.list_agents().await?;
    Ok(Json(serde_json::to_value(agents)?))
}

async fn upsert_agent(
    State(hub): State<Hub>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>> {
    let upsert: AgentUpsert = parse_payload(payload)?;
    let record = hub.coordinator.upsert_agent(upsert).await?;
    Ok(Json(serde_json::to_value(record)?))
}

// ----- chat -----

#[derive(Deserialize)]
struct ChatQuery {
    limit: Option<usize>,
}

async fn get_chat(
    State(hub): State<Hub>,
    Query(query): Query<ChatQuery>,
) -> Result<Json<Value>> {
    let messages = hub
        .coordinator
        .recent_chat(query.limit.unwrap_or(constants::CHAT_DEFAULT_LIMIT))
        .await?;
    Ok(Json(serde_json::to_value(messages)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostChat {
    author: String,
    author_type: Option<AuthorType>,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReactPayload {
    message_id: String,
    emoji: String,
    by: String,
}

async fn post_chat(State(hub): State<Hub>, Json(payload): Json<Value>) -> Result<Response> {
    match payload.get("action").and_then(Value::as_str) {
        Some("react") => {
            let react: ReactPayload = parse_payload(payload)?;
            let message = hub
                .coordinator
                .react_to_chat(&react.message_id, &react.emoji, &react.by)
                .await?;
            Ok(Json(serde_json::to_value(message)?).into_response())
        }
        Some(other) => Err(HubError::Validation(format!("unknown action: {other}"))),
        None => {
            let post: PostChat = parse_payload(payload)?;
            let message = hub
                .coordinator
                .post_chat(
                    &post.author,
                    post.author_type.unwrap_or(AuthorType::Agent),
                    &post.message,
                )
                .await?;
            Ok((StatusCode::CREATED, Json(serde_json::to_value(message)?)).into_response())
        }
    }
}

// ----- tasks -----

#[derive(Deserialize)]
struct TaskQuery {
    status: Option<String>,
    assignee: Option<String>,
}

async fn list_tasks(
    State(hub): State<Hub>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<Value>> {
    let status = query
        .status
        .as_deref()
        .map(TaskStatus::from_str)
        .transpose()
        .map_err(HubError::Validation)?;
    let tasks = hub
        .coordinator
        .list_tasks(status, query.assignee.as_deref())
        .await?;
    Ok(Json(serde_json::to_value(tasks)?))
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
enum TaskAction {
    Pickup { task_id: String, agent_id: String },
    Complete { task_id: String, agent_id: String },
    Block {
        task_id: String,
        agent_id: String,
        reason: String,
    },
    Release { task_id: String, agent_id: String },
}

async fn post_tasks(State(hub): State<Hub>, Json(payload): Json<Value>) -> Result<Response> {
    if payload.get("action").is_some() {
        let action: TaskAction = parse_payload(payload)?;
        let task = match action {
            TaskAction::Pickup { task_id, agent_id } => {
                hub.coordinator.pickup_task(&task_id, &agent_id).await?
            }
            TaskAction::Complete { task_id, agent_id } => {
                hub.coordinator.complete_task(&task_id, &agent_id).await?
            }
            TaskAction::Block {
                task_id,
                agent_id,
                reason,
            } => hub.coordinator.block_task(&task_id, &agent_id, &reason).await?,
            TaskAction::Release { task_id, agent_id } => {
                hub.coordinator.release_task(&task_id, &agent_id).await?
            }
        };
        return Ok(Json(serde_json::to_value(task)?).into_response());
    }

    let create: CreateTask = parse_payload(payload)?;
    let task = hub.coordinator.create_task(create).await?;
    Ok((StatusCode::CREATED, Json(serde_json::to_value(task)?)).into_response())
}

async fn patch_task(State(hub): State<Hub>, Json(payload): Json<Value>) -> Result<Json<Value>> {
    let patch: TaskPatch = parse_payload(payload)?;
    let task = hub.coordinator.patch_task(patch).await?;
    Ok(Json(serde_json::to_value(task)?))
}

// ----- zones -----

#[derive(Deserialize)]
struct ZoneQuery {
    path: Option<String>,
}

async fn get_zones(
    State(hub): State<Hub>,
    Query(query): Query<ZoneQuery>,
) -> Result<Json<Value>> {
    match query.path {
        Some(path) => {
            let zone = hub.coordinator.resolve_zone(&path).await?;
            Ok(Json(serde_json::json!({ "zone": zone })))
        }
        None => {
            let zones = hub.coordinator.list_zones().await?;
            Ok(Json(serde_json::to_value(zones)?))
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
enum ZoneAction {
    Claim {
        zone_id: String,
        path: String,
        owner: String,
        description: Option<String>,
    },
    Release { zone_id: String, owner: String },
}

async fn post_zones(State(hub): State<Hub>, Json(payload): Json<Value>) -> Result<Response> {
    let action: ZoneAction = parse_payload(payload)?;
    match action {
        ZoneAction::Claim {
            zone_id,
            path,
            owner,
            description,
        } => {
            let zone = hub
                .coordinator
                .claim_zone(&zone_id, &path, &owner, description)
                .await?;
            Ok((StatusCode::CREATED, Json(serde_json::to_value(zone)?)).into_response())
        }
        ZoneAction::Release { zone_id, owner } => {
            hub.coordinator.release_zone(&zone_id, &owner).await?;
            Ok(Json(serde_json::json!({ "released": true })).into_response())
        }
    }
}

// ----- claims -----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimQuery {
    include_stale: Option<bool>,
}

async fn get_claims(
    State(hub): State<Hub>,
    Query(query): Query<ClaimQuery>,
) -> Result<Json<Value>> {
    let claims = hub
        .coordinator
        .list_claims(query.include_stale.unwrap_or(false))
        .await?;
    Ok(Json(serde_json::to_value(claims)?))
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
enum ClaimAction {
    Claim {
        what: String,
        by: String,
        description: Option<String>,
    },
    Release { what: String, by: String },
}

async fn post_claims(State(hub): State<Hub>, Json(payload): Json<Value>) -> Result<Response> {
    let action: ClaimAction = parse_payload(payload)?;
    match action {
        ClaimAction::Claim {
            what,
            by,
            description,
        } => {
            let claim = hub.coordinator.claim(&what, &by, description).await?;
            Ok((StatusCode::CREATED, Json(serde_json::to_value(claim)?)).into_response())
        }
        ClaimAction::Release { what, by } => {
            hub.coordinator.release_claim(&what, &by).await?;
            Ok(Json(serde_json::json!({ "released": true })).into_response())
        }
    }
}

// ----- handoffs -----

#[derive(Deserialize)]
struct HandoffQuery {
    status: Option<String>,
}

async fn get_handoffs(
    State(hub): State<Hub>,
    Query(query): Query<HandoffQuery>,
) -> Result<Json<Value>> {
    let status = query
        .status
        .as_deref()
        .map(HandoffStatus::from_str)
        .transpose()
        .map_err(HubError::Validation)?;
    let handoffs = hub.coordinator.list_handoffs(status).await?;
    Ok(Json(serde_json::to_value(handoffs)?))
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
enum HandoffAction {
    Claim { id: String, agent_id: String },
    Complete { id: String, agent_id: String },
}

async fn post_handoffs(State(hub): State<Hub>, Json(payload): Json<Value>) -> Result<Response> {
    match payload.get("action").and_then(Value::as_str) {
        None | Some("create") => {
            let mut payload = payload;
            if let Some(map) = payload.as_object_mut() {
                map.remove("action");
            }
            let create: CreateHandoff = parse_payload(payload)?;
            let handoff = hub.coordinator.create_handoff(create).await?;
            Ok((StatusCode::CREATED, Json(serde_json::to_value(handoff)?)).into_response())
        }
        Some(_) => {
            let action: HandoffAction = parse_payload(payload)?;
            let handoff = match action {
                HandoffAction::Claim { id, agent_id } => {
                    hub.coordinator.claim_handoff(&id, &agent_id).await?
                }
                HandoffAction::Complete { id, agent_id } => {
                    hub.coordinator.complete_handoff(&id, &agent_id).await?
                }
            };
            Ok(Json(serde_json::to_value(handoff)?).into_response())
        }
    }
}

// ----- aggregators -----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentIdQuery {
    agent_id: String,
}

async fn work_bundle(
    State(hub): State<Hub>,
    Query(query): Query<AgentIdQuery>,
) -> Result<Json<Value>> {
    let bundle = hub.coordinator.work_bundle(&query.agent_id).await?;
    Ok(Json(serde_json::to_value(bundle)?))
}

async fn onboard(
    State(hub): State<Hub>,
    Query(query): Query<AgentIdQuery>,
) -> Result<Json<Value>> {
    let bundle = hub.coordinator.onboard(&query.agent_id).await?;
    Ok(Json(serde_json::to_value(bundle)?))
}

async fn session_resume(State(hub): State<Hub>) -> Result<Json<Value>> {
    let bundle = hub.coordinator.session_resume().await?;
    Ok(Json(serde_json::to_value(bundle)?))
}
