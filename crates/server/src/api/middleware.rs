//! HTTP metrics middleware.

use axum::{body::Body, extract::MatchedPath, http::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::metrics::{
    normalize_path, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION,
};

/// In-flight gauge entry, released even if the request future is dropped.
struct InFlight;

impl InFlight {
    fn enter() -> Self {
        HTTP_REQUESTS_IN_FLIGHT.inc();
        Self
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        HTTP_REQUESTS_IN_FLIGHT.dec();
    }
}

/// Label for a request: the route template it matched, such as
/// `/api/v1/requests/{id}` or `/api/v1/users/{user_id}/requests`. Unrouted
/// paths fall back to the raw path with numeric segments folded.
fn route_label(request: &Request<Body>) -> String {
    match request.extensions().get::<MatchedPath>() {
        Some(matched) => matched.as_str().to_string(),
        None => normalize_path(request.uri().path()),
    }
}

/// Records duration, count and in-flight requests per method, route and
/// status.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = route_label(&request);

    let response = {
        let _in_flight = InFlight::enter();
        next.run(request).await
    };

    let status = response.status().as_u16().to_string();
    let labels = [method.as_str(), route.as_str(), status.as_str()];
    HTTP_REQUEST_DURATION
        .with_label_values(&labels)
        .observe(start.elapsed().as_secs_f64());
    HTTP_REQUESTS_TOTAL.with_label_values(&labels).inc();

    response
}
