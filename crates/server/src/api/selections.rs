//! Track selection API handlers.
//!
//! A selection starts by showing the user the collection's track listing and
//! ends when the user replies with the tracks they want, abandons it, or lets
//! it expire.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use cadenza_core::{PendingSelection, Request};

use super::{api_error, submission_error, ApiError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BeginSelectionBody {
    pub user_id: i64,
    pub chat_id: i64,
    pub url: String,
}

/// The user's reply, e.g. `"1, 3, 5"` or `"all"`.
#[derive(Debug, Deserialize)]
pub struct SelectionReplyBody {
    pub text: String,
}

/// Fetch the track listing and open a selection for the user.
pub async fn begin_selection(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BeginSelectionBody>,
) -> Result<(StatusCode, Json<PendingSelection>), ApiError> {
    state
        .submission()
        .begin_selection(body.user_id, body.chat_id, &body.url)
        .await
        .map(|selection| (StatusCode::CREATED, Json(selection)))
        .map_err(submission_error)
}

/// Turn the reply into a partial download request.
pub async fn reply_to_selection(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Json(body): Json<SelectionReplyBody>,
) -> Result<(StatusCode, Json<Request>), ApiError> {
    state
        .submission()
        .complete_selection(user_id, &body.text)
        .await
        .map(|request| (StatusCode::CREATED, Json(request)))
        .map_err(submission_error)
}

pub async fn abandon_selection(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    match state.submission().abandon_selection(user_id).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("No pending selection for user {}", user_id),
        )),
        Err(e) => Err(submission_error(e)),
    }
}
