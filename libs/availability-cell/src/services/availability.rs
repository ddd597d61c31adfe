use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::store::{return_representation, StoreClient};

use crate::models::{
    AvailabilityError, AvailabilityWindow, CreateAvailabilityRequest, RecurrenceType,
    UpdateAvailabilityRequest,
};

pub struct AvailabilityService {
    store: Arc<StoreClient>,
}

impl AvailabilityService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            store: Arc::new(StoreClient::new(config)),
        }
    }

    pub fn with_store(store: Arc<StoreClient>) -> Self {
        Self { store }
    }

    /// Create an availability window for a practitioner.
    pub async fn create_availability(
        &self,
        request: CreateAvailabilityRequest,
        auth_token: &str,
    ) -> Result<AvailabilityWindow, AvailabilityError> {
        debug!("Creating availability for practitioner: {}", request.practitioner_id);

        if request.start_time >= request.end_time {
            return Err(AvailabilityError::Validation(
                "Start time must be before end time".to_string(),
            ));
        }

        let day_of_week = match (request.day_of_week, request.specific_date) {
            (Some(dow), _) => {
                if !(0..=6).contains(&dow) {
                    return Err(AvailabilityError::Validation(
                        "Day of week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
                    ));
                }
                dow
            }
            (None, Some(date)) => date.weekday().num_days_from_sunday() as i32,
            (None, None) => {
                return Err(AvailabilityError::Validation(
                    "Either day_of_week or specific_date is required".to_string(),
                ));
            }
        };

        let recurrence = request.recurrence.unwrap_or(RecurrenceType::Weekly);
        if recurrence == RecurrenceType::Custom && request.specific_date.is_none() {
            return Err(AvailabilityError::Validation(
                "Custom recurrence requires a specific date".to_string(),
            ));
        }

        let effective_from = request
            .effective_from
            .or(request.specific_date)
            .unwrap_or_else(|| Utc::now().date_naive());

        self.check_window_overlap(
            request.practitioner_id,
            day_of_week,
            &request,
            None,
            auth_token,
        )
        .await?;

        let window_data = json!({
            "practitioner_id": request.practitioner_id,
            "day_of_week": day_of_week,
            "specific_date": request.specific_date,
            "start_time": request.start_time.format("%H:%M:%S").to_string(),
            "end_time": request.end_time.format("%H:%M:%S").to_string(),
            "is_available": request.is_available.unwrap_or(true),
            "recurrence": recurrence.to_string(),
            "effective_from": effective_from,
            "recurrence_end_date": request.recurrence_end_date,
            "timezone": request.timezone.unwrap_or_else(|| "UTC".to_string()),
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let result: Vec<Value> = self
            .store
            .request_with_headers(
                Method::POST,
                "/rest/v1/availability_windows",
                Some(auth_token),
                Some(window_data),
                Some(return_representation()),
            )
            .await
            .map_err(|e| AvailabilityError::Database(e.to_string()))?;

        let window = result
            .into_iter()
            .next()
            .ok_or_else(|| AvailabilityError::Database("Failed to create availability".to_string()))?;

        let window: AvailabilityWindow = serde_json::from_value(window)
            .map_err(|e| AvailabilityError::Database(format!("Failed to parse window: {}", e)))?;

        debug!("Availability window created with ID: {}", window.id);
        Ok(window)
    }

    /// Update an existing availability window.
    pub async fn update_availability(
        &self,
        availability_id: Uuid,
        request: UpdateAvailabilityRequest,
        auth_token: &str,
    ) -> Result<AvailabilityWindow, AvailabilityError> {
        debug!("Updating availability window: {}", availability_id);

        let current = self.get_window_by_id(availability_id, auth_token).await?;

        let start = request.start_time.unwrap_or(current.start_time);
        let end = request.end_time.unwrap_or(current.end_time);
        if start >= end {
            return Err(AvailabilityError::Validation(
                "Start time must be before end time".to_string(),
            ));
        }

        let mut update_data = serde_json::Map::new();
        if let Some(start_time) = request.start_time {
            update_data.insert(
                "start_time".to_string(),
                json!(start_time.format("%H:%M:%S").to_string()),
            );
        }
        if let Some(end_time) = request.end_time {
            update_data.insert(
                "end_time".to_string(),
                json!(end_time.format("%H:%M:%S").to_string()),
            );
        }
        if let Some(is_available) = request.is_available {
            update_data.insert("is_available".to_string(), json!(is_available));
        }
        if let Some(end_date) = request.recurrence_end_date {
            update_data.insert("recurrence_end_date".to_string(), json!(end_date));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!("/rest/v1/availability_windows?id=eq.{}", availability_id);
        let result: Vec<Value> = self
            .store
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(Value::Object(update_data)),
                Some(return_representation()),
            )
            .await
            .map_err(|e| AvailabilityError::Database(e.to_string()))?;

        let window = result
            .into_iter()
            .next()
            .ok_or(AvailabilityError::NotFound)?;

        serde_json::from_value(window)
            .map_err(|e| AvailabilityError::Database(format!("Failed to parse window: {}", e)))
    }

    /// All windows for a practitioner, ordered for display.
    pub async fn get_practitioner_windows(
        &self,
        practitioner_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<AvailabilityWindow>, AvailabilityError> {
        debug!("Fetching availability for practitioner: {}", practitioner_id);

        let path = format!(
            "/rest/v1/availability_windows?practitioner_id=eq.{}&order=day_of_week.asc,start_time.asc",
            practitioner_id
        );
        let result: Vec<Value> = self
            .store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AvailabilityError::Database(e.to_string()))?;

        result
            .into_iter()
            .map(|w| serde_json::from_value(w))
            .collect::<Result<Vec<AvailabilityWindow>, _>>()
            .map_err(|e| AvailabilityError::Database(format!("Failed to parse windows: {}", e)))
    }

    /// Secondary booking check: does the proposed UTC range fall inside the
    /// practitioner's working hours? A practitioner with no windows at all
    /// is treated as unconstrained.
    pub async fn covers_range(
        &self,
        practitioner_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<bool, AvailabilityError> {
        let windows = self
            .get_practitioner_windows(practitioner_id, auth_token)
            .await?;
        Ok(range_is_covered(&windows, start, end))
    }

    async fn get_window_by_id(
        &self,
        availability_id: Uuid,
        auth_token: &str,
    ) -> Result<AvailabilityWindow, AvailabilityError> {
        let path = format!("/rest/v1/availability_windows?id=eq.{}", availability_id);
        let result: Vec<Value> = self
            .store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AvailabilityError::Database(e.to_string()))?;

        let window = result
            .into_iter()
            .next()
            .ok_or(AvailabilityError::NotFound)?;

        serde_json::from_value(window)
            .map_err(|e| AvailabilityError::Database(format!("Failed to parse window: {}", e)))
    }

    async fn check_window_overlap(
        &self,
        practitioner_id: Uuid,
        day_of_week: i32,
        request: &CreateAvailabilityRequest,
        exclude_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<(), AvailabilityError> {
        let mut path = format!(
            "/rest/v1/availability_windows?practitioner_id=eq.{}&day_of_week=eq.{}",
            practitioner_id, day_of_week
        );
        if let Some(exclude) = exclude_id {
            path.push_str(&format!("&id=neq.{}", exclude));
        }

        let result: Vec<Value> = self
            .store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| AvailabilityError::Database(e.to_string()))?;

        let existing: Vec<AvailabilityWindow> = result
            .into_iter()
            .map(|w| serde_json::from_value(w))
            .collect::<Result<Vec<AvailabilityWindow>, _>>()
            .map_err(|e| AvailabilityError::Database(format!("Failed to parse windows: {}", e)))?;

        for window in existing {
            // Ad-hoc windows on different dates never collide.
            if window.specific_date.is_some()
                && request.specific_date.is_some()
                && window.specific_date != request.specific_date
            {
                continue;
            }
            if window.is_available == request.is_available.unwrap_or(true)
                && request.start_time < window.end_time
                && window.start_time < request.end_time
            {
                return Err(AvailabilityError::Validation(format!(
                    "Window overlaps existing availability {}",
                    window.id
                )));
            }
        }

        Ok(())
    }
}

/// Whether any available window contains the proposed range, with no
/// blocking window overlapping it. Pure so recurrence rules are testable
/// without a store.
pub fn range_is_covered(
    windows: &[AvailabilityWindow],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> bool {
    if windows.is_empty() {
        return true;
    }

    let mut contained = false;

    for window in windows {
        let tz = match Tz::from_str(&window.timezone) {
            Ok(tz) => tz,
            Err(_) => {
                warn!("Unknown timezone {} on window {}", window.timezone, window.id);
                chrono_tz::UTC
            }
        };

        let local_start = start.with_timezone(&tz);
        // The end bound is exclusive, so pull it back one second for the
        // containment comparison; a 17:00 end fits a window ending 17:00.
        let local_end = (end - Duration::seconds(1)).with_timezone(&tz);

        let date = local_start.date_naive();
        if !window_applies_on(window, date) {
            continue;
        }

        // Ranges crossing local midnight never fit a single window.
        if local_end.date_naive() != date {
            continue;
        }

        let fits =
            window.start_time <= local_start.time() && local_end.time() < window.end_time;
        let overlaps =
            local_start.time() < window.end_time && window.start_time <= local_end.time();

        if window.is_available {
            if fits {
                contained = true;
            }
        } else if overlaps {
            // Explicit block wins over any matching available window.
            return false;
        }
    }

    contained
}

/// Recurrence resolution: does this window apply on `date` (a date in the
/// window's own time zone)?
pub fn window_applies_on(window: &AvailabilityWindow, date: NaiveDate) -> bool {
    if let Some(specific) = window.specific_date {
        return specific == date;
    }
    if window.recurrence == RecurrenceType::Custom {
        return false;
    }

    if date < window.effective_from {
        return false;
    }
    if let Some(end_date) = window.recurrence_end_date {
        if date > end_date {
            return false;
        }
    }
    if date.weekday().num_days_from_sunday() as i32 != window.day_of_week {
        return false;
    }

    match window.recurrence {
        RecurrenceType::Weekly => true,
        RecurrenceType::Biweekly => {
            let anchor = first_occurrence(window.effective_from, window.day_of_week);
            ((date - anchor).num_days() / 7) % 2 == 0
        }
        RecurrenceType::Monthly => {
            let anchor = first_occurrence(window.effective_from, window.day_of_week);
            weekday_ordinal(date) == weekday_ordinal(anchor)
        }
        RecurrenceType::Custom => false,
    }
}

/// First date on/after `from` falling on `day_of_week` (0 = Sunday).
fn first_occurrence(from: NaiveDate, day_of_week: i32) -> NaiveDate {
    let from_dow = from.weekday().num_days_from_sunday() as i32;
    let delta = (day_of_week - from_dow).rem_euclid(7);
    from + Duration::days(delta as i64)
}

/// Which occurrence of its weekday within the month this date is (0-based:
/// the 1st Tuesday is 0, the 2nd is 1, ...).
fn weekday_ordinal(date: NaiveDate) -> u32 {
    date.day0() / 7
}
