// libs/scheduling-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::state::SchedulingState;

pub fn appointment_routes(state: Arc<SchedulingState>) -> Router {
    // All appointment operations require authentication
    let protected_routes = Router::new()
        .route(
            "/",
            post(handlers::create_appointment).get(handlers::get_appointments_for_date_range),
        )
        .route("/today", get(handlers::get_today_schedule))
        .route("/conflicts/check", get(handlers::check_appointment_conflicts))
        .route(
            "/{appointment_id}",
            get(handlers::get_appointment).put(handlers::update_appointment),
        )
        .route(
            "/{appointment_id}/status",
            patch(handlers::change_appointment_status),
        )
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    Router::new().merge(protected_routes).with_state(state)
}
