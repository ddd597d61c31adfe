use std::sync::Arc;

use axum::{routing::get, Router};

use availability_cell::router::availability_routes;
use scheduling_cell::router::appointment_routes;
use scheduling_cell::SchedulingState;
use shared_config::AppConfig;

pub fn create_router(state: Arc<SchedulingState>, config: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "Scheduling API is running!" }))
        .nest("/appointments", appointment_routes(state))
        .nest("/availability", availability_routes(config))
}
