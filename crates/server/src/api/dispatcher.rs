//! Dispatcher API handlers.

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use cadenza_core::DispatcherStatus;

use crate::state::AppState;

/// Simple message response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<DispatcherStatus> {
    Json(state.dispatcher().status().await)
}

/// Start admitting queued requests.
pub async fn start(State(state): State<Arc<AppState>>) -> Json<MessageResponse> {
    state.dispatcher().start().await;
    state.ws_broadcaster().dispatcher_status(true);
    Json(MessageResponse {
        message: "Dispatcher started".to_string(),
    })
}

/// Stop admitting. Pipelines already running finish on their own.
pub async fn stop(State(state): State<Arc<AppState>>) -> Json<MessageResponse> {
    state.dispatcher().stop().await;
    state.ws_broadcaster().dispatcher_status(false);
    Json(MessageResponse {
        message: "Dispatcher stopped".to_string(),
    })
}
