// libs/scheduling-cell/src/services/consistency.rs
//
// Serializes conflict-check + write per practitioner so two concurrent
// bookings for overlapping times cannot both succeed. The store exposes no
// interactive transactions, so mutual exclusion comes from a lock table with
// a unique key per (practitioner, day), followed by a write-and-verify pass
// that compensates away an insert that lost a race anyway.

use chrono::{Duration, NaiveDate, Utc};
use rand::Rng;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cache_cell::keys::days_in_range;
use shared_database::store::{return_representation, StoreClient};

use crate::models::{
    Appointment, AppointmentStatus, CreateAppointmentRequest, SchedulingError,
};
use crate::services::conflict::ConflictDetectionService;

/// Lock contention is transient and retried; everything else surfaces
/// immediately.
enum AttemptError {
    Contended,
    Failed(SchedulingError),
}

pub struct SchedulingConsistencyService {
    store: Arc<StoreClient>,
    conflict_service: Arc<ConflictDetectionService>,
    lock_timeout_seconds: i64,
    max_retry_attempts: u32,
}

impl SchedulingConsistencyService {
    pub fn new(store: Arc<StoreClient>, conflict_service: Arc<ConflictDetectionService>) -> Self {
        Self {
            store,
            conflict_service,
            lock_timeout_seconds: 30,
            max_retry_attempts: 3,
        }
    }

    /// Create an appointment atomically: lock the practitioner-days, run the
    /// final conflict check under the lock, insert, then verify. Retries
    /// lock contention a bounded number of times with jitter before
    /// surfacing the store as unavailable.
    pub async fn atomic_create_appointment(
        &self,
        request: &CreateAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let lock_days = days_in_range(request.start_time, request.end_time);

        for attempt in 1..=self.max_retry_attempts {
            debug!(
                "Atomic booking attempt {} for practitioner {} at {}",
                attempt, request.practitioner_id, request.start_time
            );

            match self.try_atomic_create(request, &lock_days, auth_token).await {
                Ok(appointment) => {
                    info!(
                        "Atomic booking successful for practitioner {} - appointment {}",
                        request.practitioner_id, appointment.id
                    );
                    return Ok(appointment);
                }
                Err(AttemptError::Failed(e)) => return Err(e),
                Err(AttemptError::Contended) => {
                    if attempt < self.max_retry_attempts {
                        self.backoff(attempt).await;
                    }
                }
            }
        }

        Err(SchedulingError::StoreUnavailable(
            "Scheduling lock contention: retry attempts exhausted".to_string(),
        ))
    }

    /// Move an existing appointment to a new time range atomically. Locks
    /// cover the union of the old and new days so both schedules stay
    /// serialized; a verify failure reverts the patch.
    pub async fn atomic_update_time(
        &self,
        current: &Appointment,
        update_body: Value,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let (new_start, new_end) = updated_range(current, &update_body);

        let mut lock_days = days_in_range(current.start_time, current.end_time);
        lock_days.extend(days_in_range(new_start, new_end));
        lock_days.sort();
        lock_days.dedup();

        for attempt in 1..=self.max_retry_attempts {
            debug!(
                "Atomic reschedule attempt {} for appointment {}",
                attempt, current.id
            );

            match self
                .try_atomic_update(current, new_start, new_end, &update_body, &lock_days, auth_token)
                .await
            {
                Ok(appointment) => return Ok(appointment),
                Err(AttemptError::Failed(e)) => return Err(e),
                Err(AttemptError::Contended) => {
                    if attempt < self.max_retry_attempts {
                        self.backoff(attempt).await;
                    }
                }
            }
        }

        Err(SchedulingError::StoreUnavailable(
            "Scheduling lock contention: retry attempts exhausted".to_string(),
        ))
    }

    async fn try_atomic_create(
        &self,
        request: &CreateAppointmentRequest,
        lock_days: &[NaiveDate],
        auth_token: &str,
    ) -> Result<Appointment, AttemptError> {
        let process_id = Uuid::new_v4();
        let held = self
            .acquire_locks(request.practitioner_id, lock_days, process_id, auth_token)
            .await?;

        // Final conflict check under the lock.
        let conflict_check = match self
            .conflict_service
            .check_conflicts(
                request.practitioner_id,
                request.start_time,
                request.end_time,
                None,
                auth_token,
            )
            .await
        {
            Ok(check) => check,
            Err(e) => {
                self.release_locks(&held, process_id, auth_token).await;
                return Err(AttemptError::Failed(e));
            }
        };

        if conflict_check.has_conflict {
            self.release_locks(&held, process_id, auth_token).await;
            return Err(AttemptError::Failed(SchedulingError::Conflict {
                conflicting_ids: conflict_check.conflicting_ids(),
            }));
        }

        let appointment = match self.insert_appointment(request, auth_token).await {
            Ok(apt) => apt,
            Err(e) => {
                self.release_locks(&held, process_id, auth_token).await;
                return Err(AttemptError::Failed(e));
            }
        };

        // Write-and-verify: if a concurrent writer slipped past the lock
        // (e.g. through a reaped-but-live holder), the later insert loses
        // and is compensated away before anyone can observe it.
        match self
            .conflict_service
            .check_conflicts(
                request.practitioner_id,
                request.start_time,
                request.end_time,
                Some(appointment.id),
                auth_token,
            )
            .await
        {
            Ok(verify) if verify.has_conflict => {
                warn!(
                    "Post-insert verification found conflicts for appointment {}, compensating",
                    appointment.id
                );
                self.delete_appointment_record(appointment.id, auth_token).await;
                self.release_locks(&held, process_id, auth_token).await;
                return Err(AttemptError::Failed(SchedulingError::Conflict {
                    conflicting_ids: verify.conflicting_ids(),
                }));
            }
            Ok(_) => {}
            Err(e) => {
                // Cannot prove the row is conflict-free; remove it rather
                // than leave a possibly double-booked slot behind.
                self.delete_appointment_record(appointment.id, auth_token).await;
                self.release_locks(&held, process_id, auth_token).await;
                return Err(AttemptError::Failed(e));
            }
        }

        self.release_locks(&held, process_id, auth_token).await;
        Ok(appointment)
    }

    async fn try_atomic_update(
        &self,
        current: &Appointment,
        new_start: chrono::DateTime<Utc>,
        new_end: chrono::DateTime<Utc>,
        update_body: &Value,
        lock_days: &[NaiveDate],
        auth_token: &str,
    ) -> Result<Appointment, AttemptError> {
        let process_id = Uuid::new_v4();
        let held = self
            .acquire_locks(current.practitioner_id, lock_days, process_id, auth_token)
            .await?;

        let conflict_check = match self
            .conflict_service
            .check_conflicts(
                current.practitioner_id,
                new_start,
                new_end,
                Some(current.id),
                auth_token,
            )
            .await
        {
            Ok(check) => check,
            Err(e) => {
                self.release_locks(&held, process_id, auth_token).await;
                return Err(AttemptError::Failed(e));
            }
        };

        if conflict_check.has_conflict {
            self.release_locks(&held, process_id, auth_token).await;
            return Err(AttemptError::Failed(SchedulingError::Conflict {
                conflicting_ids: conflict_check.conflicting_ids(),
            }));
        }

        let updated = match self
            .patch_appointment(current.id, update_body.clone(), auth_token)
            .await
        {
            Ok(apt) => apt,
            Err(e) => {
                self.release_locks(&held, process_id, auth_token).await;
                return Err(AttemptError::Failed(e));
            }
        };

        match self
            .conflict_service
            .check_conflicts(current.practitioner_id, new_start, new_end, Some(current.id), auth_token)
            .await
        {
            Ok(verify) if verify.has_conflict => {
                warn!(
                    "Post-update verification found conflicts for appointment {}, reverting",
                    current.id
                );
                self.revert_time_change(current, auth_token).await;
                self.release_locks(&held, process_id, auth_token).await;
                return Err(AttemptError::Failed(SchedulingError::Conflict {
                    conflicting_ids: verify.conflicting_ids(),
                }));
            }
            Ok(_) => {}
            Err(e) => {
                self.revert_time_change(current, auth_token).await;
                self.release_locks(&held, process_id, auth_token).await;
                return Err(AttemptError::Failed(e));
            }
        }

        self.release_locks(&held, process_id, auth_token).await;
        Ok(updated)
    }

    // ==============================================================================
    // LOCK MANAGEMENT
    // ==============================================================================

    async fn acquire_locks(
        &self,
        practitioner_id: Uuid,
        days: &[NaiveDate],
        process_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<String>, AttemptError> {
        // Sorted acquisition order keeps cross-midnight writers from
        // deadlocking each other.
        let mut sorted: Vec<NaiveDate> = days.to_vec();
        sorted.sort();

        let mut held = Vec::new();
        for day in sorted {
            let lock_key = format!("sched:{}:{}", practitioner_id, day);

            self.reap_expired_lock(&lock_key, auth_token).await;

            match self
                .insert_lock(&lock_key, practitioner_id, process_id, auth_token)
                .await
            {
                Ok(()) => held.push(lock_key),
                Err(e) => {
                    debug!("Scheduling lock {} contended: {}", lock_key, e);
                    self.release_locks(&held, process_id, auth_token).await;
                    return Err(AttemptError::Contended);
                }
            }
        }

        Ok(held)
    }

    async fn insert_lock(
        &self,
        lock_key: &str,
        practitioner_id: Uuid,
        process_id: Uuid,
        auth_token: &str,
    ) -> anyhow::Result<()> {
        let now = Utc::now();
        let lock_data = json!({
            "id": Uuid::new_v4(),
            "lock_key": lock_key,
            "practitioner_id": practitioner_id,
            "acquired_at": now.to_rfc3339(),
            "expires_at": (now + Duration::seconds(self.lock_timeout_seconds)).to_rfc3339(),
            "process_id": process_id,
        });

        // The unique constraint on lock_key is the mutual exclusion point;
        // a second writer's insert is rejected by the store.
        let _: Vec<Value> = self
            .store
            .request_with_headers(
                Method::POST,
                "/rest/v1/scheduling_locks",
                Some(auth_token),
                Some(lock_data),
                Some(return_representation()),
            )
            .await?;

        Ok(())
    }

    /// Drop an expired holder so a crashed writer cannot wedge the day.
    async fn reap_expired_lock(&self, lock_key: &str, auth_token: &str) {
        let path = format!(
            "/rest/v1/scheduling_locks?lock_key=eq.{}&expires_at=lt.{}",
            lock_key,
            urlencoding::encode(&Utc::now().to_rfc3339())
        );

        if let Err(e) = self
            .store
            .request_with_headers::<Vec<Value>>(
                Method::DELETE,
                &path,
                Some(auth_token),
                None,
                Some(return_representation()),
            )
            .await
        {
            debug!("Expired lock reap failed for {}: {}", lock_key, e);
        }
    }

    async fn release_locks(&self, lock_keys: &[String], process_id: Uuid, auth_token: &str) {
        for lock_key in lock_keys {
            let path = format!(
                "/rest/v1/scheduling_locks?lock_key=eq.{}&process_id=eq.{}",
                lock_key, process_id
            );

            if let Err(e) = self
                .store
                .request_with_headers::<Vec<Value>>(
                    Method::DELETE,
                    &path,
                    Some(auth_token),
                    None,
                    Some(return_representation()),
                )
                .await
            {
                warn!(
                    "Failed to release scheduling lock {}: {} (it will expire)",
                    lock_key, e
                );
            }
        }
    }

    // ==============================================================================
    // RECORD WRITES
    // ==============================================================================

    async fn insert_appointment(
        &self,
        request: &CreateAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let now = Utc::now();
        let appointment_data = json!({
            "id": Uuid::new_v4(),
            "practitioner_id": request.practitioner_id,
            "patient_id": request.patient_id,
            "start_time": request.start_time.to_rfc3339(),
            "end_time": request.end_time.to_rfc3339(),
            "status": AppointmentStatus::Scheduled.to_string(),
            "appointment_type": request.appointment_type.to_string(),
            "check_in_time": null,
            "check_out_time": null,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339(),
        });

        let result: Vec<Value> = self
            .store
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(auth_token),
                Some(appointment_data),
                Some(return_representation()),
            )
            .await
            .map_err(|e| SchedulingError::StoreUnavailable(e.to_string()))?;

        let row = result.into_iter().next().ok_or_else(|| {
            SchedulingError::StoreUnavailable("Insert returned no row".to_string())
        })?;

        serde_json::from_value(row).map_err(|e| {
            SchedulingError::StoreUnavailable(format!("Failed to parse appointment: {}", e))
        })
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

    /// Compensating cleanup of an insert that failed verification. The row
    /// never became an observable appointment, so a physical delete here
    /// does not violate the soft-cancel rule.
    async fn delete_appointment_record(&self, appointment_id: Uuid, auth_token: &str) {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);

        if let Err(e) = self
            .store
            .request_with_headers::<Vec<Value>>(
                Method::DELETE,
                &path,
                Some(auth_token),
                None,
                Some(return_representation()),
            )
            .await
        {
            warn!(
                "Compensating delete failed for appointment {}: {}",
                appointment_id, e
            );
        }
    }

    async fn revert_time_change(&self, original: &Appointment, auth_token: &str) {
        let revert_body = json!({
            "start_time": original.start_time.to_rfc3339(),
            "end_time": original.end_time.to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339(),
        });

        if let Err(e) = self
            .patch_appointment(original.id, revert_body, auth_token)
            .await
        {
            warn!(
                "Failed to revert time change for appointment {}: {}",
                original.id, e
            );
        }
    }

    async fn backoff(&self, attempt: u32) {
        let jitter = rand::thread_rng().gen_range(0..100u64);
        let delay = 100 * attempt as u64 + jitter;
        warn!(
            "Scheduling lock contended, retrying after {}ms (attempt {}/{})",
            delay, attempt, self.max_retry_attempts
        );
        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
    }
}

/// The time range an update body would leave the appointment with.
fn updated_range(
    current: &Appointment,
    update_body: &Value,
) -> (chrono::DateTime<Utc>, chrono::DateTime<Utc>) {
    let parse = |field: &str| {
        update_body
            .get(field)
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    };

    (
        parse("start_time").unwrap_or(current.start_time),
        parse("end_time").unwrap_or(current.end_time),
    )
}
