//! HTTP status endpoint.
//!
//! Serves read-only JSON on localhost from the latest [`NodeStatus`]
//! published by the node loop.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::watch;

use canopy_core::clock::Clock;
use canopy_core::config::MeshRole;
use canopy_core::wire::Address;
use canopy_services::NodeEntry;

use crate::node::NodeStatus;

#[derive(Clone)]
pub struct StatusState {
    pub role: MeshRole,
    pub address: Address,
    pub status: watch::Receiver<NodeStatus>,
    pub clock: Arc<dyn Clock>,
}

// ── /status ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub role: MeshRole,
    pub address: Address,
    pub running: bool,
    pub root: Option<Address>,
    pub members: usize,
}

pub async fn handle_status(State(state): State<StatusState>) -> Json<StatusResponse> {
    let status = state.status.borrow();
    Json(StatusResponse {
        role: state.role,
        address: state.address,
        running: status.running,
        root: status.topology.root.map(|r| r.address),
        members: status.topology.members.len(),
    })
}

// ── /topology ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct NodeInfoJson {
    pub address: Address,
    pub age_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct TopologyResponse {
    pub root: Option<NodeInfoJson>,
    pub members: Vec<NodeInfoJson>,
}

pub async fn handle_topology(State(state): State<StatusState>) -> Json<TopologyResponse> {
    let now = state.clock.now();
    let to_json = |entry: &NodeEntry| NodeInfoJson {
        address: entry.address,
        age_ms: now.saturating_duration_since(entry.last_seen).as_millis() as u64,
    };

    let status = state.status.borrow();
    Json(TopologyResponse {
        root: status.topology.root.as_ref().map(to_json),
        members: status.topology.members.iter().map(to_json).collect(),
    })
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/topology", get(handle_topology))
        .with_state(state)
}

pub async fn serve(state: StatusState, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "status endpoint listening on 127.0.0.1");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
