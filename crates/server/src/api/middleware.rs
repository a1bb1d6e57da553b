//! Request instrumentation for the relister API.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::metrics::{
    normalize_path, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION,
};

/// Times each API request and counts it by method, normalized path and
/// status. The in-flight gauge is held up for the duration of the call.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let route = normalize_path(request.uri().path());

    HTTP_REQUESTS_IN_FLIGHT.inc();
    let started = Instant::now();
    let response = next.run(request).await;
    let elapsed = started.elapsed();
    HTTP_REQUESTS_IN_FLIGHT.dec();

    let status = response.status().as_u16().to_string();
    let labels = [method.as_str(), route.as_str(), status.as_str()];
    HTTP_REQUEST_DURATION
        .with_label_values(&labels)
        .observe(elapsed.as_secs_f64());
    HTTP_REQUESTS_TOTAL.with_label_values(&labels).inc();

    response
}
