use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{audit, dispatcher, handlers, middleware::metrics_middleware, requests, selections, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Audit
        .route("/audit", get(audit::query_audit))
        // Requests
        .route("/requests", post(requests::submit_request))
        .route("/requests", get(requests::list_requests))
        .route("/requests/{id}", get(requests::get_request))
        .route("/requests/{id}", delete(requests::cancel_request))
        .route("/requests/{id}/history", get(requests::request_history))
        .route("/users/{user_id}/requests", get(requests::active_requests))
        // Track selection
        .route("/selections", post(selections::begin_selection))
        .route("/selections/{user_id}/reply", post(selections::reply_to_selection))
        .route("/selections/{user_id}", delete(selections::abandon_selection))
        // Dispatcher
        .route("/dispatcher/status", get(dispatcher::get_status))
        .route("/dispatcher/start", post(dispatcher::start))
        .route("/dispatcher/stop", post(dispatcher::stop))
        .with_state(Arc::clone(&state));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
