//! Thin HTTP/WebSocket adapter over the core engine.
//!
//! This module only calls the programmatic surface the core exposes
//! (`Publisher::find_*_now`, `Publisher::subscribe_*`) and never touches the
//! cache, commission table, or finders directly.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde_json::json;

use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .route("/api/opportunities/spatial", get(get_spatial))
        .route("/api/opportunities/cyclic", get(get_cyclic))
        .route("/ws/opportunities/spatial", get(ws_spatial))
        .route("/ws/opportunities/cyclic", get(ws_cyclic))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "service": "arb-scanner", "status": "ok" }))
}

async fn metrics_text(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics_handle.render()
}

async fn get_spatial(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.publisher.find_spatial_now())
}

async fn get_cyclic(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.publisher.find_cyclic_now())
}

async fn ws_spatial(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_spatial(socket, state))
}

async fn ws_cyclic(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_cyclic(socket, state))
}

/// Forwards each publisher tick as a JSON-encoded array until the client
/// disconnects.
async fn stream_spatial(mut socket: WebSocket, state: AppState) {
    let mut rx = state.publisher.subscribe_spatial();
    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Ok(opportunities) = msg else { break };
                let Ok(text) = serde_json::to_string(&opportunities) else { continue };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                if incoming.is_none() {
                    break;
                }
            }
        }
    }
}

async fn stream_cyclic(mut socket: WebSocket, state: AppState) {
    let mut rx = state.publisher.subscribe_cyclic();
    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Ok(opportunities) = msg else { break };
                let Ok(text) = serde_json::to_string(&opportunities) else { continue };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                if incoming.is_none() {
                    break;
                }
            }
        }
    }
}
