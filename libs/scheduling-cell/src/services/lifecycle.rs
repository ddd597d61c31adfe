// libs/scheduling-cell/src/services/lifecycle.rs
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::models::{Appointment, AppointmentStatus, SchedulingError};

/// Enforces the appointment state machine. The transition table below is the
/// single source of allowed moves; nothing else in the engine compares
/// statuses to decide what may change.
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed. Requesting the current
    /// status again is rejected, not treated as a no-op, so callers cannot
    /// silently retry into ambiguous states.
    pub fn validate_status_transition(
        &self,
        current_status: &AppointmentStatus,
        new_status: &AppointmentStatus,
    ) -> Result<(), SchedulingError> {
        debug!(
            "Validating status transition from {} to {}",
            current_status, new_status
        );

        let valid_transitions = self.valid_transitions(current_status);

        if !valid_transitions.contains(new_status) {
            warn!(
                "Invalid status transition attempted: {} -> {}",
                current_status, new_status
            );
            return Err(SchedulingError::InvalidTransition {
                from: *current_status,
                to: *new_status,
            });
        }

        Ok(())
    }

    /// All valid next statuses for a given current status.
    pub fn valid_transitions(&self, current_status: &AppointmentStatus) -> &'static [AppointmentStatus] {
        match current_status {
            AppointmentStatus::Scheduled => &[
                AppointmentStatus::Confirmed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::Confirmed => &[
                AppointmentStatus::CheckedIn,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::CheckedIn => &[
                AppointmentStatus::InProgress,
                AppointmentStatus::Cancelled,
            ],
            AppointmentStatus::InProgress => &[
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
            ],
            // Terminal states - no transitions allowed
            AppointmentStatus::Completed => &[],
            AppointmentStatus::Cancelled => &[],
            AppointmentStatus::NoShow => &[],
        }
    }

    /// Apply a transition in memory, stamping the check-in time on
    /// `CheckedIn` and the check-out time on `Completed` (if not already
    /// set). The caller persists the mutated record.
    pub fn apply_transition(
        &self,
        appointment: &mut Appointment,
        new_status: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulingError> {
        self.validate_status_transition(&appointment.status, &new_status)?;

        match new_status {
            AppointmentStatus::CheckedIn => {
                appointment.check_in_time = Some(now);
            }
            AppointmentStatus::Completed => {
                if appointment.check_out_time.is_none() {
                    appointment.check_out_time = Some(now);
                }
            }
            _ => {}
        }

        appointment.status = new_status;
        appointment.updated_at = now;
        Ok(())
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}
