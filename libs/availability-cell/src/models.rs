use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One working-hours window for a practitioner. Recurring windows repeat on
/// `day_of_week`; ad-hoc windows pin a `specific_date`. A window with
/// `is_available = false` blocks the matching dates (vacation, meetings),
/// overriding the recurring pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: Uuid,
    pub practitioner_id: Uuid,
    pub day_of_week: i32,
    pub specific_date: Option<NaiveDate>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_available: bool,
    pub recurrence: RecurrenceType,
    pub effective_from: NaiveDate,
    pub recurrence_end_date: Option<NaiveDate>,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceType {
    Weekly,
    Biweekly,
    Monthly,
    Custom,
}

impl fmt::Display for RecurrenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecurrenceType::Weekly => write!(f, "weekly"),
            RecurrenceType::Biweekly => write!(f, "biweekly"),
            RecurrenceType::Monthly => write!(f, "monthly"),
            RecurrenceType::Custom => write!(f, "custom"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAvailabilityRequest {
    pub practitioner_id: Uuid,
    pub day_of_week: Option<i32>,
    pub specific_date: Option<NaiveDate>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_available: Option<bool>,
    pub recurrence: Option<RecurrenceType>,
    pub effective_from: Option<NaiveDate>,
    pub recurrence_end_date: Option<NaiveDate>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub is_available: Option<bool>,
    pub recurrence_end_date: Option<NaiveDate>,
}

#[derive(Debug, thiserror::Error)]
pub enum AvailabilityError {
    #[error("Availability window not found")]
    NotFound,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),
}
