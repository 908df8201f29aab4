use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

/// Convenience type alias for Results with HubError
pub type Result<T> = std::result::Result<T, HubError>;

/// Main error type for the coordination hub
///
/// Every operation on a singleton resolves to one of these kinds; the HTTP
/// layer maps each kind to a status code and a JSON body of the shape
/// `{error, details?}`. Contention errors carry the current owner so the
/// loser of a race learns who won.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation illegal in the entity's current state.
    #[error("{0}")]
    InvalidState(String),

    /// Concurrent ownership: someone else holds the task, claim, or lock.
    /// `context` is flattened into the error body (e.g. `assignedTo`).
    #[error("{message}")]
    Conflict { message: String, context: Value },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl HubError {
    pub fn conflict(message: impl Into<String>) -> Self {
        HubError::Conflict {
            message: message.into(),
            context: Value::Null,
        }
    }

    pub fn conflict_with(message: impl Into<String>, context: Value) -> Self {
        HubError::Conflict {
            message: message.into(),
            context,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            HubError::Validation(_) => StatusCode::BAD_REQUEST,
            HubError::Forbidden(_) => StatusCode::FORBIDDEN,
            HubError::NotFound(_) => StatusCode::NOT_FOUND,
            HubError::InvalidState(_) | HubError::Conflict { .. } => StatusCode::CONFLICT,
            HubError::Configuration(_)
            | HubError::Storage(_)
            | HubError::Serialization(_)
            | HubError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let mut body = match &self {
            // Storage failures keep the original message in `details`
            HubError::Storage(e) => json!({
                "error": "Storage error",
                "details": e.to_string(),
            }),
            HubError::Internal(e) => json!({
                "error": "Internal error",
                "details": e.to_string(),
            }),
            other => json!({ "error": other.to_string() }),
        };

        if let HubError::Conflict { context, .. } = &self {
            if let (Some(map), Some(extra)) = (body.as_object_mut(), context.as_object()) {
                for (k, v) in extra {
                    map.insert(k.clone(), v.clone());
                }
            }
        }

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {}", self);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_maps_to_409() {
        let err = HubError::conflict("task already assigned");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn conflict_context_is_flattened_into_body() {
        let err = HubError::conflict_with(
            "task already assigned",
            json!({ "assignedTo": "alice" }),
        );
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn ownership_maps_to_403() {
        let err = HubError::Forbidden("claimed by bob".to_string());
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn validation_maps_to_400() {
        let err = HubError::Validation("agentId is required".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
