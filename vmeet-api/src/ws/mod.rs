//! WebSocket signaling endpoint

pub mod session;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};

use crate::http::AppState;

/// GET /ws: upgrade and hand the socket to a signaling session.
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run(state, socket))
}
