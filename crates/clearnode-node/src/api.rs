//! HTTP API server for the clearing node.
//!
//! `POST /api/v1/rpc` takes a signed RPC envelope and returns a signed one.
//! `POST /api/v1/custody/events` is fed by the chain watcher with decoded
//! custody-contract events.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use clearnode_settlement::CustodyEvent;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::commands::{EventResponse, NodeCommand};
use crate::rpc::{RpcRequest, RpcResponse};
use crate::state::NodeState;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub broker_address: String,
    pub uptime_secs: u64,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
    })
}

async fn handle_status(State(state): State<Arc<NodeState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        broker_address: state.broker.to_hex(),
        uptime_secs: state.uptime_secs(),
    })
}

async fn handle_rpc(
    State(state): State<Arc<NodeState>>,
    Json(request): Json<RpcRequest>,
) -> Result<Json<RpcResponse>, ApiError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    let cmd = NodeCommand::Rpc {
        request,
        reply: reply_tx,
    };
    send_command(&state, cmd).await?;
    reply_rx
        .await
        .map(Json)
        .map_err(|_| api_error(StatusCode::INTERNAL_SERVER_ERROR, "event loop dropped the reply channel"))
}

async fn handle_custody_event(
    State(state): State<Arc<NodeState>>,
    Json(event): Json<CustodyEvent>,
) -> Result<Json<EventResponse>, ApiError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    let cmd = NodeCommand::Custody {
        event,
        reply: reply_tx,
    };
    send_command(&state, cmd).await?;
    match reply_rx.await {
        Ok(Ok(resp)) => Ok(Json(resp)),
        Ok(Err(e)) => Err(api_error(StatusCode::BAD_REQUEST, &e)),
        Err(_) => Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "event loop dropped the reply channel",
        )),
    }
}

async fn send_command(state: &Arc<NodeState>, cmd: NodeCommand) -> Result<(), ApiError> {
    state
        .command_tx
        .send(cmd)
        .await
        .map_err(|_| api_error(StatusCode::INTERNAL_SERVER_ERROR, "node event loop not running"))
}

pub fn build_router(state: Arc<NodeState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(handle_health))
        .route("/api/v1/status", get(handle_status))
        .route("/api/v1/rpc", post(handle_rpc))
        .route("/api/v1/custody/events", post(handle_custody_event))
        .with_state(state)
}

pub async fn start_api_server(
    listen_addr: SocketAddr,
    state: Arc<NodeState>,
) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(%listen_addr, "HTTP API server started");
    axum::serve(listener, app).await?;
    Ok(())
}
