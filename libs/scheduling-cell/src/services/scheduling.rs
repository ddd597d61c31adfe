// libs/scheduling-cell/src/services/scheduling.rs
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use availability_cell::services::availability::AvailabilityService;
use availability_cell::AvailabilityError;
use cache_cell::{keys, CacheClient};
use directory_cell::{DirectoryError, DirectoryService};
use shared_config::AppConfig;
use shared_database::store::{return_representation, StoreClient};

use crate::models::{
    Appointment, AppointmentStatus, ConflictCheckRequest, ConflictCheckResponse,
    CreateAppointmentRequest, SchedulingError, SchedulingValidationRules,
    UpdateAppointmentRequest,
};
use crate::services::conflict::ConflictDetectionService;
use crate::services::consistency::SchedulingConsistencyService;
use crate::services::events::{self, EventPublisher, SchedulingEvent};
use crate::services::lifecycle::AppointmentLifecycleService;

/// Orchestrates the scheduling engine: the only component exposed to
/// external callers. Reads go cache-first; writes run through the atomic
/// conflict-check-and-persist section and invalidate the cache afterwards.
///
/// The cache and event clients are injected and owned by the startup
/// sequence; the service holds no process-wide state of its own.
pub struct SchedulingService {
    config: Arc<AppConfig>,
    store: Arc<StoreClient>,
    cache: Arc<dyn CacheClient>,
    events: Arc<dyn EventPublisher>,
    conflict_service: Arc<ConflictDetectionService>,
    lifecycle_service: AppointmentLifecycleService,
    consistency_service: SchedulingConsistencyService,
    directory_service: DirectoryService,
    availability_service: AvailabilityService,
    validation_rules: SchedulingValidationRules,
}

impl SchedulingService {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<StoreClient>,
        cache: Arc<dyn CacheClient>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        let conflict_service = Arc::new(ConflictDetectionService::new(Arc::clone(&store)));
        let consistency_service =
            SchedulingConsistencyService::new(Arc::clone(&store), Arc::clone(&conflict_service));
        let directory_service = DirectoryService::new(Arc::clone(&store));
        let availability_service = AvailabilityService::with_store(Arc::clone(&store));

        Self {
            config,
            store,
            cache,
            events,
            conflict_service,
            lifecycle_service: AppointmentLifecycleService::new(),
            consistency_service,
            directory_service,
            availability_service,
            validation_rules: SchedulingValidationRules::default(),
        }
    }

    // ==============================================================================
    // WRITE OPERATIONS
    // ==============================================================================

    /// Book a new appointment. Persists in `scheduled` status only when the
    /// conflict set is empty; on success the touched cache days are
    /// invalidated and an `AppointmentCreated` event goes out.
    pub async fn create_appointment(
        &self,
        request: CreateAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        info!(
            "Creating appointment for patient {} with practitioner {}",
            request.patient_id, request.practitioner_id
        );

        self.validate_range(request.start_time, request.end_time)?;

        if !self
            .directory_service
            .practitioner_exists(request.practitioner_id, auth_token)
            .await
            .map_err(map_directory_error)?
        {
            return Err(SchedulingError::PractitionerNotFound);
        }

        if !self
            .directory_service
            .patient_exists(request.patient_id, auth_token)
            .await
            .map_err(map_directory_error)?
        {
            return Err(SchedulingError::PatientNotFound);
        }

        // Secondary check: double-booking is prevented by the conflict
        // detector regardless; this only rejects slots outside working hours.
        let covered = self
            .availability_service
            .covers_range(
                request.practitioner_id,
                request.start_time,
                request.end_time,
                auth_token,
            )
            .await
            .map_err(map_availability_error)?;

        if !covered {
            return Err(SchedulingError::Validation(
                "Appointment falls outside practitioner working hours".to_string(),
            ));
        }

        let appointment = self
            .consistency_service
            .atomic_create_appointment(&request, auth_token)
            .await?;

        self.invalidate_schedule_cache(
            appointment.practitioner_id,
            appointment.start_time,
            appointment.end_time,
        )
        .await;

        events::emit(
            Arc::clone(&self.events),
            SchedulingEvent::AppointmentCreated {
                appointment_id: appointment.id,
                practitioner_id: appointment.practitioner_id,
                patient_id: appointment.patient_id,
                start_time: appointment.start_time,
                end_time: appointment.end_time,
            },
        );

        info!(
            "Appointment {} booked for practitioner {}",
            appointment.id, appointment.practitioner_id
        );
        Ok(appointment)
    }

    /// Update an appointment's time range and/or type. The conflict check
    /// re-runs (excluding the appointment itself) only when the time range
    /// actually changed.
    pub async fn update_appointment(
        &self,
        appointment_id: Uuid,
        request: UpdateAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        debug!("Updating appointment: {}", appointment_id);

        let current = self.get_appointment(appointment_id, auth_token).await?;

        if current.status.is_terminal() {
            return Err(SchedulingError::Validation(format!(
                "Appointment in terminal status {} cannot be updated",
                current.status
            )));
        }

        let new_start = request.start_time.unwrap_or(current.start_time);
        let new_end = request.end_time.unwrap_or(current.end_time);
        self.validate_range(new_start, new_end)?;

        let time_changed = new_start != current.start_time || new_end != current.end_time;

        let mut update_body = serde_json::Map::new();
        if time_changed {
            update_body.insert("start_time".to_string(), json!(new_start.to_rfc3339()));
            update_body.insert("end_time".to_string(), json!(new_end.to_rfc3339()));
        }
        if let Some(appointment_type) = request.appointment_type {
            update_body.insert(
                "appointment_type".to_string(),
                json!(appointment_type.to_string()),
            );
        }
        if update_body.is_empty() {
            return Ok(current);
        }
        update_body.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let updated = if time_changed {
            let covered = self
                .availability_service
                .covers_range(current.practitioner_id, new_start, new_end, auth_token)
                .await
                .map_err(map_availability_error)?;
            if !covered {
                return Err(SchedulingError::Validation(
                    "Appointment falls outside practitioner working hours".to_string(),
                ));
            }

            self.consistency_service
                .atomic_update_time(&current, Value::Object(update_body), auth_token)
                .await?
        } else {
            self.patch_appointment(appointment_id, Value::Object(update_body), auth_token)
                .await?
        };

        // Both the vacated and the newly occupied days go stale.
        self.invalidate_schedule_cache(
            current.practitioner_id,
            current.start_time,
            current.end_time,
        )
        .await;
        if time_changed {
            self.invalidate_schedule_cache(
                updated.practitioner_id,
                updated.start_time,
                updated.end_time,
            )
            .await;
        }

        info!("Appointment {} updated successfully", appointment_id);
        Ok(updated)
    }

    /// Transition an appointment through the status state machine.
    pub async fn change_status(
        &self,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        debug!(
            "Changing status of appointment {} to {}",
            appointment_id, new_status
        );

        let current = self.get_appointment(appointment_id, auth_token).await?;
        let old_status = current.status;

        let mut pending = current.clone();
        self.lifecycle_service
            .apply_transition(&mut pending, new_status, Utc::now())?;

        let mut update_body = serde_json::Map::new();
        update_body.insert("status".to_string(), json!(pending.status.to_string()));
        if pending.check_in_time != current.check_in_time {
            if let Some(check_in) = pending.check_in_time {
                update_body.insert("check_in_time".to_string(), json!(check_in.to_rfc3339()));
            }
        }
        if pending.check_out_time != current.check_out_time {
            if let Some(check_out) = pending.check_out_time {
                update_body.insert("check_out_time".to_string(), json!(check_out.to_rfc3339()));
            }
        }
        update_body.insert(
            "updated_at".to_string(),
            json!(pending.updated_at.to_rfc3339()),
        );

        let updated = self
            .patch_appointment(appointment_id, Value::Object(update_body), auth_token)
            .await?;

        self.invalidate_schedule_cache(
            updated.practitioner_id,
            updated.start_time,
            updated.end_time,
        )
        .await;

        events::emit(
            Arc::clone(&self.events),
            SchedulingEvent::AppointmentStatusChanged {
                appointment_id: updated.id,
                practitioner_id: updated.practitioner_id,
                patient_id: updated.patient_id,
                old_status,
                new_status,
                changed_at: pending.updated_at,
            },
        );

        info!(
            "Appointment {} status changed from {} to {}",
            appointment_id, old_status, new_status
        );
        Ok(updated)
    }

    // ==============================================================================
    // READ OPERATIONS
    // ==============================================================================

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        debug!("Fetching appointment: {}", appointment_id);

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::StoreUnavailable(e.to_string()))?;

        let row = result
            .into_iter()
            .next()
            .ok_or(SchedulingError::AppointmentNotFound)?;

        serde_json::from_value(row).map_err(|e| {
            SchedulingError::StoreUnavailable(format!("Failed to parse appointment: {}", e))
        })
    }

    /// Cache-first date-range read, sorted by start time ascending.
    pub async fn get_appointments_for_date_range(
        &self,
        practitioner_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        status: Option<AppointmentStatus>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        if to <= from {
            return Err(SchedulingError::Validation(
                "Query range end must be after start".to_string(),
            ));
        }

        let status_str = status.map(|s| s.to_string());
        let key = keys::date_range(practitioner_id, from, to, status_str.as_deref());
        let ttl = std::time::Duration::from_secs(self.config.cache_ttl_date_range_secs);
        let tags: Vec<String> = keys::days_in_range(from, to)
            .into_iter()
            .map(|day| keys::day_tag(practitioner_id, day))
            .collect();

        cache_cell::get_or_compute(self.cache.as_ref(), &key, ttl, &tags, || async move {
            self.query_range_from_store(practitioner_id, from, to, status, auth_token)
                .await
        })
        .await
    }

    /// Today's schedule, scoped to the current calendar day in the
    /// practitioner's configured time zone. Served under the short TTL tier.
    pub async fn get_today_schedule(
        &self,
        practitioner_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let tz = self.practitioner_timezone(practitioner_id, auth_token).await;
        let today = Utc::now().with_timezone(&tz).date_naive();
        let start = local_midnight(&tz, today);
        let end = local_midnight(&tz, today + chrono::Duration::days(1));

        debug!(
            "Today's schedule for practitioner {} is {} ({} to {})",
            practitioner_id, today, start, end
        );

        let key = keys::day_schedule(practitioner_id, today);
        let ttl = std::time::Duration::from_secs(self.config.cache_ttl_day_schedule_secs);
        let tags: Vec<String> = keys::days_in_range(start, end)
            .into_iter()
            .map(|day| keys::day_tag(practitioner_id, day))
            .collect();

        cache_cell::get_or_compute(self.cache.as_ref(), &key, ttl, &tags, || async move {
            self.query_range_from_store(practitioner_id, start, end, None, auth_token)
                .await
        })
        .await
    }

    /// Read-only conflict probe, exposed for booking UIs.
    pub async fn check_conflicts(
        &self,
        request: ConflictCheckRequest,
        auth_token: &str,
    ) -> Result<ConflictCheckResponse, SchedulingError> {
        self.conflict_service
            .check_conflicts(
                request.practitioner_id,
                request.start_time,
                request.end_time,
                request.exclude_appointment_id,
                auth_token,
            )
            .await
    }

    // ==============================================================================
    // PRIVATE HELPERS
    // ==============================================================================

    fn validate_range(
        &self,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<(), SchedulingError> {
        if end_time <= start_time {
            return Err(SchedulingError::Validation(
                "End time must be after start time".to_string(),
            ));
        }

        let duration = (end_time - start_time).num_minutes();
        if duration < self.validation_rules.min_appointment_duration_minutes {
            return Err(SchedulingError::Validation(format!(
                "Appointment must be at least {} minutes",
                self.validation_rules.min_appointment_duration_minutes
            )));
        }
        if duration > self.validation_rules.max_appointment_duration_minutes {
            return Err(SchedulingError::Validation(format!(
                "Appointment cannot exceed {} minutes",
                self.validation_rules.max_appointment_duration_minutes
            )));
        }

        Ok(())
    }

    async fn query_range_from_store(
        &self,
        practitioner_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        status: Option<AppointmentStatus>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let mut query_parts = vec![
            format!("practitioner_id=eq.{}", practitioner_id),
            format!("start_time=gte.{}", urlencoding::encode(&from.to_rfc3339())),
            format!("start_time=lt.{}", urlencoding::encode(&to.to_rfc3339())),
        ];
        if let Some(status) = status {
            query_parts.push(format!("status=eq.{}", status));
        }

        let path = format!(
            "/rest/v1/appointments?{}&order=start_time.asc",
            query_parts.join("&")
        );

        let result: Vec<Value> = self
            .store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::StoreUnavailable(e.to_string()))?;

        let mut appointments = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| {
                SchedulingError::StoreUnavailable(format!("Failed to parse appointments: {}", e))
            })?;

        // The store orders rows already; sorting again keeps repeated reads
        // identical across mixed cache hits and recomputes.
        appointments.sort_by_key(|apt| apt.start_time);
        Ok(appointments)
    }

    async fn patch_appointment(
        &self,
        appointment_id: Uuid,
        update_body: Value,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);

        let result: Vec<Value> = self
            .store
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(update_body),
                Some(return_representation()),
            )
            .await
            .map_err(|e| SchedulingError::StoreUnavailable(e.to_string()))?;

        let row = result
            .into_iter()
            .next()
            .ok_or(SchedulingError::AppointmentNotFound)?;

        serde_json::from_value(row).map_err(|e| {
            SchedulingError::StoreUnavailable(format!("Failed to parse appointment: {}", e))
        })
    }

    async fn invalidate_schedule_cache(
        &self,
        practitioner_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) {
        let days = keys::days_in_range(start, end);
        cache_cell::invalidate_practitioner_days(self.cache.as_ref(), practitioner_id, &days)
            .await;
    }

    async fn practitioner_timezone(&self, practitioner_id: Uuid, auth_token: &str) -> Tz {
        let stored = self
            .directory_service
            .get_practitioner_timezone(practitioner_id, auth_token)
            .await
            .ok()
            .flatten();

        let name = stored.unwrap_or_else(|| self.config.default_timezone.clone());
        match Tz::from_str(&name) {
            Ok(tz) => tz,
            Err(_) => {
                debug!("Unknown timezone {} for practitioner, using UTC", name);
                chrono_tz::UTC
            }
        }
    }
}

/// UTC instant of local midnight on `date` in `tz`. Handles DST folds
/// (earliest wins) and the rare zone where midnight does not exist.
fn local_midnight(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_hms_opt(0, 0, 0).unwrap();
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => t.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let fallback = date.and_hms_opt(1, 0, 0).unwrap();
            match tz.from_local_datetime(&fallback) {
                LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t.with_timezone(&Utc),
                LocalResult::None => Utc.from_utc_datetime(&naive),
            }
        }
    }
}

fn map_directory_error(e: DirectoryError) -> SchedulingError {
    SchedulingError::StoreUnavailable(e.to_string())
}

fn map_availability_error(e: AvailabilityError) -> SchedulingError {
    match e {
        AvailabilityError::Validation(msg) => SchedulingError::Validation(msg),
        AvailabilityError::NotFound => SchedulingError::Validation(
            "Referenced availability window not found".to_string(),
        ),
        AvailabilityError::Database(msg) => SchedulingError::StoreUnavailable(msg),
    }
}
