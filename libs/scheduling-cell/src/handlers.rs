// libs/scheduling-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::{DateTime, Utc};
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    AppointmentStatus, ChangeStatusRequest, ConflictCheckRequest, CreateAppointmentRequest,
    SchedulingError, UpdateAppointmentRequest,
};
use crate::state::SchedulingState;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct DateRangeQuery {
    pub practitioner_id: Uuid,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub status: Option<AppointmentStatus>,
}

#[derive(Debug, Deserialize)]
pub struct TodayScheduleQuery {
    pub practitioner_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ConflictCheckQuery {
    pub practitioner_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub exclude_appointment_id: Option<Uuid>,
}

fn map_scheduling_error(e: SchedulingError) -> AppError {
    match e {
        SchedulingError::Validation(msg) => AppError::Validation(msg),
        SchedulingError::Conflict { conflicting_ids } => AppError::Conflict {
            message: "Appointment conflicts with an existing booking".to_string(),
            conflicting_ids,
        },
        SchedulingError::InvalidTransition { from, to } => AppError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        },
        SchedulingError::AppointmentNotFound => {
            AppError::NotFound("Appointment not found".to_string())
        }
        SchedulingError::PatientNotFound => AppError::NotFound("Patient not found".to_string()),
        SchedulingError::PractitionerNotFound => {
            AppError::NotFound("Practitioner not found".to_string())
        }
        SchedulingError::StoreUnavailable(msg) => AppError::Unavailable(msg),
        // Cache problems degrade inside the service; reaching here is a bug.
        SchedulingError::CacheUnavailable(msg) => AppError::Internal(msg),
    }
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<Arc<SchedulingState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    // Patients book for themselves; practitioners and admins may book on a
    // patient's behalf.
    let is_patient = request.patient_id.to_string() == user.id;
    let is_practitioner = user.role.as_deref() == Some("practitioner");
    let is_admin = user.role.as_deref() == Some("admin");

    if !is_patient && !is_practitioner && !is_admin {
        return Err(AppError::Auth(
            "Not authorized to book appointment for this patient".to_string(),
        ));
    }

    let appointment = state
        .scheduling
        .create_appointment(request, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "data": appointment
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<SchedulingState>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let appointment = state
        .scheduling
        .get_appointment(appointment_id, token)
        .await
        .map_err(map_scheduling_error)?;

    // Only the involved parties or an admin may view.
    let is_patient = appointment.patient_id.to_string() == user.id;
    let is_practitioner = appointment.practitioner_id.to_string() == user.id;
    let is_admin = user.role.as_deref() == Some("admin");

    if !is_patient && !is_practitioner && !is_admin {
        return Err(AppError::Auth(
            "Not authorized to view this appointment".to_string(),
        ));
    }

    Ok(Json(json!({
        "success": true,
        "data": appointment
    })))
}

#[axum::debug_handler]
pub async fn update_appointment(
    State(state): State<Arc<SchedulingState>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(_user): Extension<User>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let appointment = state
        .scheduling
        .update_appointment(appointment_id, request, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "data": appointment
    })))
}

#[axum::debug_handler]
pub async fn change_appointment_status(
    State(state): State<Arc<SchedulingState>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(_user): Extension<User>,
    Json(request): Json<ChangeStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let appointment = state
        .scheduling
        .change_status(appointment_id, request.status, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "data": appointment
    })))
}

#[axum::debug_handler]
pub async fn get_appointments_for_date_range(
    State(state): State<Arc<SchedulingState>>,
    Query(query): Query<DateRangeQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let appointments = state
        .scheduling
        .get_appointments_for_date_range(
            query.practitioner_id,
            query.from,
            query.to,
            query.status,
            token,
        )
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "data": appointments
    })))
}

#[axum::debug_handler]
pub async fn get_today_schedule(
    State(state): State<Arc<SchedulingState>>,
    Query(query): Query<TodayScheduleQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let appointments = state
        .scheduling
        .get_today_schedule(query.practitioner_id, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "data": appointments
    })))
}

#[axum::debug_handler]
pub async fn check_appointment_conflicts(
    State(state): State<Arc<SchedulingState>>,
    Query(query): Query<ConflictCheckQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let response = state
        .scheduling
        .check_conflicts(
            ConflictCheckRequest {
                practitioner_id: query.practitioner_id,
                start_time: query.start_time,
                end_time: query.end_time,
                exclude_appointment_id: query.exclude_appointment_id,
            },
            token,
        )
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "data": response
    })))
}
