//! Download request API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use cadenza_core::{AuditFilter, Request, RequestFilter, RequestStatus};

use super::audit::{run_audit_query, AuditQueryResponse, DEFAULT_LIMIT, MAX_LIMIT};
use super::{api_error, submission_error, ApiError};
use crate::state::AppState;

/// Maximum allowed limit for request listings
const MAX_LIST_LIMIT: i64 = 500;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Body of a full download submission.
#[derive(Debug, Deserialize)]
pub struct SubmitRequestBody {
    pub user_id: i64,
    pub chat_id: i64,
    pub url: String,
}

/// Query parameters for listing requests
#[derive(Debug, Deserialize)]
pub struct ListRequestsQuery {
    pub user_id: Option<i64>,
    /// One of queued, processing, completed, failed, cancelled.
    pub status: Option<String>,
    /// Only queued or processing records.
    #[serde(default)]
    pub active: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RequestListResponse {
    pub requests: Vec<Request>,
    /// Total matching requests, ignoring pagination.
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Caller identity for owner-only operations.
#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ActiveRequestsResponse {
    pub user_id: i64,
    pub requests: Vec<Request>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Queue a download of a whole collection.
pub async fn submit_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitRequestBody>,
) -> Result<(StatusCode, Json<Request>), ApiError> {
    state
        .submission()
        .submit_full(body.user_id, body.chat_id, &body.url)
        .await
        .map(|request| (StatusCode::CREATED, Json(request)))
        .map_err(submission_error)
}

/// List requests with optional filters.
pub async fn list_requests(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListRequestsQuery>,
) -> Result<Json<RequestListResponse>, ApiError> {
    let limit = query.limit.unwrap_or(100).clamp(1, MAX_LIST_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);

    let mut filter = RequestFilter::new();
    if let Some(user_id) = query.user_id {
        filter = filter.with_user(user_id);
    }
    if let Some(ref status) = query.status {
        let status: RequestStatus = status
            .parse()
            .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, e))?;
        filter = filter.with_status(status);
    }
    if query.active {
        filter = filter.active();
    }

    let total = state.request_store().count(&filter).map_err(storage_error)?;
    let requests = state
        .request_store()
        .list(&filter.with_limit(limit).with_offset(offset))
        .map_err(storage_error)?;

    Ok(Json(RequestListResponse {
        requests,
        total,
        limit,
        offset,
    }))
}

/// Get a single request by ID.
pub async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Request>, ApiError> {
    match state.request_store().get(id) {
        Ok(Some(request)) => Ok(Json(request)),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Request not found: {}", id),
        )),
        Err(e) => Err(storage_error(e)),
    }
}

/// Audit trail of one request, oldest event first.
pub async fn request_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<AuditQueryResponse>, ApiError> {
    match state.request_store().get(id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Err(api_error(
                StatusCode::NOT_FOUND,
                format!("Request not found: {}", id),
            ))
        }
        Err(e) => return Err(storage_error(e)),
    }

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);
    let filter = AuditFilter::new().with_request_id(id).oldest_first();

    run_audit_query(&state, filter, limit, offset).map(Json)
}

/// Cancel a queued or processing request on behalf of its owner.
pub async fn cancel_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(owner): Query<OwnerQuery>,
) -> Result<Json<Request>, ApiError> {
    state
        .submission()
        .cancel(owner.user_id, id)
        .await
        .map(Json)
        .map_err(submission_error)
}

/// Requests of one user that are still queued or processing.
pub async fn active_requests(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<ActiveRequestsResponse>, ApiError> {
    state
        .submission()
        .status(user_id)
        .map(|requests| Json(ActiveRequestsResponse { user_id, requests }))
        .map_err(submission_error)
}

fn storage_error(err: cadenza_core::RequestStoreError) -> ApiError {
    error!("Request store failure: {}", err);
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Failed to read requests: {}", err),
    )
}
