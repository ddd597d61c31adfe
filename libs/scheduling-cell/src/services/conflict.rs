use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::store::StoreClient;

use crate::models::{Appointment, ConflictCheckResponse, SchedulingError};

/// Two half-open ranges `[start, end)` overlap iff this single inequality
/// holds. Back-to-back appointments (one's end equals the other's start) are
/// not an overlap.
pub fn ranges_overlap(
    start1: DateTime<Utc>,
    end1: DateTime<Utc>,
    start2: DateTime<Utc>,
    end2: DateTime<Utc>,
) -> bool {
    start1 < end2 && start2 < end1
}

pub struct ConflictDetectionService {
    store: Arc<StoreClient>,
}

impl ConflictDetectionService {
    pub fn new(store: Arc<StoreClient>) -> Self {
        Self { store }
    }

    /// Find every appointment for the practitioner that overlaps the
    /// proposed range and still holds its slot. An empty result means the
    /// caller may proceed.
    ///
    /// The check that gates a write must run inside the atomic booking
    /// section; it always consults the store directly, never the cache.
    pub async fn check_conflicts(
        &self,
        practitioner_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<ConflictCheckResponse, SchedulingError> {
        debug!(
            "Checking conflicts for practitioner {} from {} to {}",
            practitioner_id, start_time, end_time
        );

        let existing = self
            .get_practitioner_appointments_in_range(
                practitioner_id,
                start_time,
                end_time,
                exclude_appointment_id,
                auth_token,
            )
            .await?;

        let conflicting_appointments: Vec<Appointment> = existing
            .into_iter()
            .filter(|apt| {
                ranges_overlap(start_time, end_time, apt.start_time, apt.end_time)
                    && apt.status.blocks_slot()
            })
            .collect();

        let has_conflict = !conflicting_appointments.is_empty();
        if has_conflict {
            warn!(
                "Conflict detected for practitioner {} - {} conflicting appointments",
                practitioner_id,
                conflicting_appointments.len()
            );
        }

        Ok(ConflictCheckResponse {
            has_conflict,
            conflicting_appointments,
        })
    }

    async fn get_practitioner_appointments_in_range(
        &self,
        practitioner_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        // Strict lt/gt bounds mirror the half-open overlap predicate, so a
        // back-to-back appointment is not even fetched as a candidate.
        let mut query_parts = vec![
            format!("practitioner_id=eq.{}", practitioner_id),
            format!(
                "start_time=lt.{}",
                urlencoding::encode(&end_time.to_rfc3339())
            ),
            format!(
                "end_time=gt.{}",
                urlencoding::encode(&start_time.to_rfc3339())
            ),
        ];

        if let Some(exclude_id) = exclude_appointment_id {
            query_parts.push(format!("id=neq.{}", exclude_id));
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

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| {
                SchedulingError::StoreUnavailable(format!("Failed to parse appointments: {}", e))
            })
    }
}
