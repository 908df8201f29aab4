use super::{parse_payload, Hub};
use crate::{constants, HubError, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::Value;

/// `/lock/{resourcePath}/{op}` — the resource path itself contains slashes,
/// so the whole tail is captured and the final segment is the operation.
fn split_tail(tail: &str) -> Result<(String, &str)> {
    let tail = tail.trim_matches('/');
    match tail.rsplit_once('/') {
        Some((path, op)) if !path.is_empty() => Ok((format!("/{path}"), op)),
        _ => Err(HubError::NotFound(format!(
            "no lock operation in /lock/{tail}"
        ))),
    }
}

#[derive(Deserialize)]
pub(crate) struct HistoryQuery {
    limit: Option<usize>,
}

pub async fn lock_get(
    State(hub): State<Hub>,
    Path(tail): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>> {
    let (resource_path, op) = split_tail(&tail)?;
    let lock = hub.locks.get_or_create(&resource_path).await?;
    match op {
        "check" => Ok(Json(serde_json::to_value(lock.check().await?)?)),
        "history" => {
            let events = lock
                .history(query.limit.unwrap_or(constants::LOCK_HISTORY_DEFAULT_LIMIT))
                .await?;
            Ok(Json(serde_json::to_value(events)?))
        }
        other => Err(HubError::NotFound(format!("unknown lock operation: {other}"))),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockPayload {
    agent_id: String,
    reason: Option<String>,
    ttl_ms: Option<i64>,
    resource_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnlockPayload {
    agent_id: String,
    #[serde(default)]
    force: bool,
}

pub async fn lock_post(
    State(hub): State<Hub>,
    Path(tail): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Response> {
    let (resource_path, op) = split_tail(&tail)?;
    let lock = hub.locks.get_or_create(&resource_path).await?;
    match op {
        "lock" => {
            let req: LockPayload = parse_payload(payload)?;
            let record = lock
                .acquire(&req.agent_id, req.reason, req.ttl_ms, req.resource_type)
                .await?;
            Ok((StatusCode::CREATED, Json(serde_json::to_value(record)?)).into_response())
        }
        "unlock" => {
            let req: UnlockPayload = parse_payload(payload)?;
            lock.unlock(&req.agent_id, req.force).await?;
            Ok(Json(serde_json::json!({ "released": true })).into_response())
        }
        other => Err(HubError::NotFound(format!("unknown lock operation: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_splits_path_and_operation() {
        let (path, op) = split_tail("src/foo/check").unwrap();
        assert_eq!(path, "/src/foo");
        assert_eq!(op, "check");

        let (path, op) = split_tail("deep/nested/resource/lock").unwrap();
        assert_eq!(path, "/deep/nested/resource");
        assert_eq!(op, "lock");
    }

    #[test]
    fn bare_tail_is_rejected() {
        assert!(split_tail("check").is_err());
        assert!(split_tail("").is_err());
    }
}
