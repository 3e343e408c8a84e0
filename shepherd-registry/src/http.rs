//! HTTP surface of the registry.
//!
//! - POST /heartbeat       : ingest a node report, answer with desired agents
//! - GET  /hostnames       : snapshot of tracked hosts
//! - GET  /status/{agent}  : fan-out of one agent across the fleet
//! - GET  /health          : liveness probe
//!
//! Malformed heartbeat payloads are rejected by the axum Json extractor
//! before any registry mutation happens.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::config::RegistryConfig;
use crate::heartbeat::merge_heartbeat;
use crate::models::{HeartbeatRequest, HeartbeatResponse, RealAgentState};
use crate::registry::FleetRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<FleetRegistry>,
    pub cfg: Arc<RegistryConfig>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/heartbeat", post(post_heartbeat))
        .route("/hostnames", get(get_hostnames))
        .route("/status/{agent}", get(get_agent_status))
        .with_state(app_state)
}

async fn post_heartbeat(
    State(app): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> Json<HeartbeatResponse> {
    let desired_agents = app.cfg.desired_for(&req.hostname);
    merge_heartbeat(&app.registry, req);
    Json(HeartbeatResponse { desired_agents })
}

async fn get_hostnames(State(app): State<AppState>) -> Json<Vec<String>> {
    let mut hostnames = app.registry.hostnames();
    hostnames.sort();
    Json(hostnames)
}

async fn get_agent_status(
    State(app): State<AppState>,
    Path(agent): Path<String>,
) -> Json<HashMap<String, Option<RealAgentState>>> {
    Json(app.registry.status_of(&agent))
}
