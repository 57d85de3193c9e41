use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use cadenza_core::{AuditFilter, AuditRecord};

use super::{api_error, ApiError};
use crate::state::AppState;

/// Maximum allowed limit for audit queries
pub const MAX_LIMIT: i64 = 1000;

/// Default limit for audit queries
pub const DEFAULT_LIMIT: i64 = 100;

/// Query parameters for audit endpoint
#[derive(Debug, Deserialize)]
pub struct AuditQueryParams {
    /// Filter by request ID
    pub request_id: Option<i64>,
    /// Filter by event type
    pub event_type: Option<String>,
    /// Filter by user ID
    pub user_id: Option<i64>,
    /// Filter events after this timestamp (ISO 8601)
    pub from: Option<DateTime<Utc>>,
    /// Filter events before this timestamp (ISO 8601)
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of events to return (default 100, max 1000)
    pub limit: Option<i64>,
    /// Pagination offset (default 0)
    pub offset: Option<i64>,
}

/// Response for audit query endpoint
#[derive(Debug, Serialize)]
pub struct AuditQueryResponse {
    pub events: Vec<AuditRecord>,
    /// Total number of matching events
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Run a filtered audit query and count the unpaginated total.
pub(crate) fn run_audit_query(
    state: &AppState,
    base_filter: AuditFilter,
    limit: i64,
    offset: i64,
) -> Result<AuditQueryResponse, ApiError> {
    let query_filter = AuditFilter {
        limit,
        offset,
        ..base_filter.clone()
    };

    let events = state.audit_store().query(&query_filter).map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to query audit events: {}", e),
        )
    })?;

    let total = state.audit_store().count(&base_filter).map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to count audit events: {}", e),
        )
    })?;

    Ok(AuditQueryResponse {
        events,
        total,
        limit,
        offset,
    })
}

/// Query audit events
pub async fn query_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditQueryResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut base_filter = AuditFilter::new();

    if let Some(request_id) = params.request_id {
        base_filter = base_filter.with_request_id(request_id);
    }

    if let Some(ref event_type) = params.event_type {
        base_filter = base_filter.with_event_type(event_type);
    }

    if let Some(user_id) = params.user_id {
        base_filter = base_filter.with_user_id(user_id);
    }

    if params.from.is_some() || params.to.is_some() {
        base_filter = base_filter.with_time_range(params.from, params.to);
    }

    run_audit_query(&state, base_filter, limit, offset).map(Json)
}
