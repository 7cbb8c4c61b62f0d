//! WebSocket upgrade handlers.

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::info;

use crate::app::AppState;
use crate::branch::{BranchId, PublishTarget};
use crate::ws::connection;

/// Query string of a branch relay connection: `/ws?branch_id=..&token=..`.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Branch to stream.
    pub branch_id: String,
    /// Token checked by the connection gate.
    pub token: Option<String>,
}

/// Query string of a shared channel connection: `/ws/shared?token=..`.
#[derive(Debug, Deserialize)]
pub struct SharedParams {
    /// Token checked by the connection gate.
    pub token: Option<String>,
}

/// Upgrades to a WebSocket and runs a relay for the requested branch.
///
/// The gate runs after the upgrade so rejected clients get a `4001` close
/// frame rather than an HTTP error.
pub async fn handle_ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    let branch = match BranchId::new(params.branch_id) {
        Ok(branch) => branch,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    upgrade(ws, state, PublishTarget::Branch(branch), params.token)
}

/// Upgrades to a WebSocket and runs a relay for the shared channel.
pub async fn handle_shared_ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<SharedParams>,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, state, PublishTarget::Shared, params.token)
}

fn upgrade(
    ws: WebSocketUpgrade,
    state: AppState,
    target: PublishTarget,
    token: Option<String>,
) -> Response {
    info!(channel = %target, "WebSocket upgrade requested");
    ws.on_upgrade(move |socket| async move {
        let relay = state.relay_for(target);
        connection::serve(socket, relay, token).await;
    })
}

/// Creates a router serving branch relays on `/ws` and the shared channel on `/ws/shared`.
pub fn ws_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(handle_ws_upgrade))
        .route("/ws/shared", get(handle_shared_ws_upgrade))
        .with_state(state)
}
