use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{AvailabilityError, CreateAvailabilityRequest, UpdateAvailabilityRequest};
use crate::services::availability::AvailabilityService;

fn map_error(e: AvailabilityError) -> AppError {
    match e {
        AvailabilityError::NotFound => AppError::NotFound("Availability window not found".to_string()),
        AvailabilityError::Validation(msg) => AppError::Validation(msg),
        AvailabilityError::Database(msg) => AppError::Unavailable(msg),
    }
}

#[axum::debug_handler]
pub async fn create_availability(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    // Only the practitioner themselves or an admin may edit working hours.
    let is_owner = request.practitioner_id.to_string() == user.id;
    let is_admin = user.role.as_deref() == Some("admin");
    if !is_owner && !is_admin {
        return Err(AppError::Auth(
            "Not authorized to manage this practitioner's availability".to_string(),
        ));
    }

    let service = AvailabilityService::new(&state);
    let window = service
        .create_availability(request, token)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "data": window
    })))
}

#[axum::debug_handler]
pub async fn get_practitioner_availability(
    State(state): State<Arc<AppConfig>>,
    Path(practitioner_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let service = AvailabilityService::new(&state);
    let windows = service
        .get_practitioner_windows(practitioner_id, token)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "data": windows
    })))
}

#[axum::debug_handler]
pub async fn update_availability(
    State(state): State<Arc<AppConfig>>,
    Path(availability_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(_user): Extension<User>,
    Json(request): Json<UpdateAvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let service = AvailabilityService::new(&state);
    let window = service
        .update_availability(availability_id, request, token)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "data": window
    })))
}
