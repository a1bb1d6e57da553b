use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{batches, handlers, jobs, middleware::metrics_middleware, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Batch control
        .route("/batches", post(batches::start_batch))
        .route("/batches/current", get(batches::current_batch))
        .route("/batches/pause", post(batches::pause_batch))
        .route("/batches/resume", post(batches::resume_batch))
        .route("/batches/terminate", post(batches::terminate_batch))
        // Jobs
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/{id}", get(jobs::get_job))
        // Events
        .route("/ws", get(ws::ws_handler))
        .with_state(Arc::clone(&state));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::get_metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
