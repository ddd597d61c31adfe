// libs/scheduling-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub practitioner_id: Uuid,
    pub patient_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub appointment_type: AppointmentType,
    pub check_in_time: Option<DateTime<Utc>>,
    pub check_out_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    CheckedIn,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Terminal statuses permit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    /// Whether an appointment in this status still holds its time slot.
    /// Cancelled, no-show and completed appointments never conflict.
    pub fn blocks_slot(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::CheckedIn => write!(f, "checked_in"),
            AppointmentStatus::InProgress => write!(f, "in_progress"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    InPerson,
    Telemedicine,
    FollowUp,
    Urgent,
    Routine,
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentType::InPerson => write!(f, "in_person"),
            AppointmentType::Telemedicine => write!(f, "telemedicine"),
            AppointmentType::FollowUp => write!(f, "follow_up"),
            AppointmentType::Urgent => write!(f, "urgent"),
            AppointmentType::Routine => write!(f, "routine"),
        }
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub practitioner_id: Uuid,
    pub patient_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub appointment_type: AppointmentType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub appointment_type: Option<AppointmentType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: AppointmentStatus,
}

// ==============================================================================
// CONFLICT DETECTION MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckRequest {
    pub practitioner_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub exclude_appointment_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckResponse {
    pub has_conflict: bool,
    pub conflicting_appointments: Vec<Appointment>,
}

impl ConflictCheckResponse {
    pub fn conflicting_ids(&self) -> Vec<Uuid> {
        self.conflicting_appointments.iter().map(|a| a.id).collect()
    }
}

// ==============================================================================
// VALIDATION MODELS
// ==============================================================================

#[derive(Debug, Clone)]
pub struct SchedulingValidationRules {
    pub min_appointment_duration_minutes: i64,
    pub max_appointment_duration_minutes: i64,
}

impl Default for SchedulingValidationRules {
    fn default() -> Self {
        Self {
            min_appointment_duration_minutes: 5,
            max_appointment_duration_minutes: 240,
        }
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Appointment conflicts with {} existing booking(s)", conflicting_ids.len())]
    Conflict { conflicting_ids: Vec<Uuid> },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Appointment not found")]
    AppointmentNotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Practitioner not found")]
    PractitionerNotFound,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    // Never surfaced to callers; reads degrade to the store instead.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),
}
