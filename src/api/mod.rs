//! HTTP surface of the hub.
//!
//! `/coordinator/…` routes to the Coordinator singleton, `/agent/{id}/…` to
//! that agent's state singleton, `/lock/{path}/…` to that resource's lock.
//! Every response is JSON; CORS is permissive; the `agentId` parameter is
//! the trust boundary (authentication is an external collaborator).

mod agent_routes;
mod coordinator_routes;
mod lock_routes;
mod ws;

use crate::{
    agent::AgentStateRegistry,
    config::{ApiConfig, Config},
    constants::{SERVICE_NAME, SERVICE_VERSION},
    coordinator::Coordinator,
    lock::LockRegistry,
    HubError, Result,
};
use axum::{response::Json, routing::get, Router};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

const ROUTE_HEALTH: &str = "/health";
const ROUTE_COORDINATOR: &str = "/coordinator";
const ROUTE_AGENT: &str = "/agent/{agent_id}";
const ROUTE_LOCK: &str = "/lock/{*rest}";

/// The three singleton registries behind the HTTP surface.
#[derive(Clone)]
pub struct Hub {
    pub coordinator: Arc<Coordinator>,
    pub agents: Arc<AgentStateRegistry>,
    pub locks: Arc<LockRegistry>,
}

impl Hub {
    pub fn new(config: &Config) -> Result<Self> {
        let agents = Arc::new(AgentStateRegistry::new(config.hub.data_dir.clone()));
        let coordinator = Arc::new(Coordinator::new(config.hub.clone(), agents.clone())?);
        let locks = Arc::new(LockRegistry::new(
            config.hub.data_dir.clone(),
            config.hub.default_lock_ttl_ms,
        ));
        Ok(Self {
            coordinator,
            agents,
            locks,
        })
    }
}

#[derive(Clone)]
pub struct ApiServer {
    config: ApiConfig,
    hub: Hub,
}

impl ApiServer {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            config: config.api.clone(),
            hub: Hub::new(config)?,
        })
    }

    pub async fn run(&self) -> Result<()> {
        let app = self.build_router();

        let listener =
            tokio::net::TcpListener::bind(format!("{}:{}", self.config.host, self.config.port))
                .await
                .map_err(|e| HubError::Internal(e.into()))?;

        info!(
            "coordination hub listening on {}:{}",
            self.config.host, self.config.port
        );

        axum::serve(listener, app)
            .await
            .map_err(|e| HubError::Internal(e.into()))?;

        Ok(())
    }

    pub fn build_router(&self) -> Router {
        Router::new()
            .route(ROUTE_HEALTH, get(health_check))
            .nest(ROUTE_COORDINATOR, coordinator_routes::router())
            .nest(ROUTE_AGENT, agent_routes::router())
            .route(
                ROUTE_LOCK,
                get(lock_routes::lock_get).post(lock_routes::lock_post),
            )
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CorsLayer::permissive()),
            )
            .with_state(self.hub.clone())
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION
    }))
}

/// Decode an action payload; malformed or mistyped fields are validation
/// errors, not 500s.
pub(crate) fn parse_payload<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| HubError::Validation(format!("invalid payload: {e}")))
}
