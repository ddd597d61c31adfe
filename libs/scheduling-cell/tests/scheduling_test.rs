// libs/scheduling-cell/tests/scheduling_test.rs
//
// Service-level tests against a mock store: booking, conflict rejection,
// status transitions, cache coherence and the degraded paths.

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{
    body_partial_json, method, path, query_param, query_param_is_missing,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cache_cell::{CacheClient, MemoryCacheClient};
use scheduling_cell::models::{
    AppointmentStatus, AppointmentType, CreateAppointmentRequest, SchedulingError,
    UpdateAppointmentRequest,
};
use scheduling_cell::services::events::NoopEventPublisher;
use scheduling_cell::services::scheduling::SchedulingService;
use shared_database::store::StoreClient;
use shared_utils::test_utils::{MockStoreResponses, TestConfig};

const TOKEN: &str = "test_token";

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, hour, minute, 0).unwrap()
}

struct TestSetup {
    scheduling: SchedulingService,
    mock_server: MockServer,
    practitioner_id: Uuid,
    patient_id: Uuid,
}

impl TestSetup {
    async fn new() -> Self {
        let mock_server = MockServer::start().await;
        let config = Arc::new(TestConfig::with_store_url(&mock_server.uri()).to_app_config());
        let store = Arc::new(StoreClient::new(&config));
        let cache = Arc::new(MemoryCacheClient::new());

        let scheduling = SchedulingService::new(
            config,
            store,
            cache as Arc<dyn CacheClient>,
            Arc::new(NoopEventPublisher),
        );

        Self {
            scheduling,
            mock_server,
            practitioner_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
        }
    }

    /// Directory, availability and lock mocks for a clean booking path.
    async fn mount_booking_mocks(&self) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/practitioners"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockStoreResponses::practitioner_response(
                    &self.practitioner_id.to_string(),
                    "UTC"
                )
            ])))
            .mount(&self.mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/patients"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockStoreResponses::patient_response(&self.patient_id.to_string())
            ])))
            .mount(&self.mock_server)
            .await;

        // No windows configured: working hours are unconstrained.
        Mock::given(method("GET"))
            .and(path("/rest/v1/availability_windows"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&self.mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/scheduling_locks"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "lock_key": "held" }])))
            .mount(&self.mock_server)
            .await;

        Mock::given(method("DELETE"))
            .and(path("/rest/v1/scheduling_locks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&self.mock_server)
            .await;
    }

    fn create_request(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> CreateAppointmentRequest {
        CreateAppointmentRequest {
            practitioner_id: self.practitioner_id,
            patient_id: self.patient_id,
            start_time: start,
            end_time: end,
            appointment_type: AppointmentType::Routine,
        }
    }

    fn appointment_row(
        &self,
        id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        status: &str,
    ) -> serde_json::Value {
        MockStoreResponses::appointment_response(
            &id.to_string(),
            &self.practitioner_id.to_string(),
            &self.patient_id.to_string(),
            &start.to_rfc3339(),
            &end.to_rfc3339(),
            status,
        )
    }
}

// ==============================================================================
// CREATE
// ==============================================================================

#[tokio::test]
async fn create_appointment_persists_in_scheduled_status() {
    let setup = TestSetup::new().await;
    setup.mount_booking_mocks().await;

    // Conflict candidate fetches (initial and verify) both come back empty.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&setup.mock_server)
        .await;

    let new_id = Uuid::new_v4();
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            setup.appointment_row(new_id, at(9, 0), at(9, 30), "scheduled")
        ])))
        .expect(1)
        .mount(&setup.mock_server)
        .await;

    let appointment = setup
        .scheduling
        .create_appointment(setup.create_request(at(9, 0), at(9, 30)), TOKEN)
        .await
        .unwrap();

    assert_eq!(appointment.id, new_id);
    assert_eq!(appointment.status, AppointmentStatus::Scheduled);
    assert_eq!(appointment.practitioner_id, setup.practitioner_id);
}

#[tokio::test]
async fn create_appointment_rejects_overlap_with_conflicting_ids() {
    let setup = TestSetup::new().await;
    setup.mount_booking_mocks().await;

    let existing_id = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            setup.appointment_row(existing_id, at(9, 0), at(9, 30), "scheduled")
        ])))
        .mount(&setup.mock_server)
        .await;

    // A rejected booking must never reach the insert.
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&setup.mock_server)
        .await;

    let result = setup
        .scheduling
        .create_appointment(setup.create_request(at(9, 15), at(9, 45)), TOKEN)
        .await;

    assert_matches!(
        result,
        Err(SchedulingError::Conflict { conflicting_ids }) if conflicting_ids == vec![existing_id]
    );
}

#[tokio::test]
async fn create_appointment_back_to_back_succeeds() {
    let setup = TestSetup::new().await;
    setup.mount_booking_mocks().await;

    // The store hands the 09:00-09:30 appointment back as a candidate; the
    // half-open predicate must still let 09:30-10:00 through.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            setup.appointment_row(Uuid::new_v4(), at(9, 0), at(9, 30), "scheduled")
        ])))
        .mount(&setup.mock_server)
        .await;

    let new_id = Uuid::new_v4();
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            setup.appointment_row(new_id, at(9, 30), at(10, 0), "scheduled")
        ])))
        .mount(&setup.mock_server)
        .await;

    let appointment = setup
        .scheduling
        .create_appointment(setup.create_request(at(9, 30), at(10, 0)), TOKEN)
        .await
        .unwrap();

    assert_eq!(appointment.id, new_id);
}

#[tokio::test]
async fn create_appointment_unknown_patient_fails() {
    let setup = TestSetup::new().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/practitioners"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::practitioner_response(&setup.practitioner_id.to_string(), "UTC")
        ])))
        .mount(&setup.mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&setup.mock_server)
        .await;

    let result = setup
        .scheduling
        .create_appointment(setup.create_request(at(9, 0), at(9, 30)), TOKEN)
        .await;

    assert_matches!(result, Err(SchedulingError::PatientNotFound));
}

#[tokio::test]
async fn create_appointment_rejects_inverted_range() {
    let setup = TestSetup::new().await;

    let result = setup
        .scheduling
        .create_appointment(setup.create_request(at(10, 0), at(9, 0)), TOKEN)
        .await;

    assert_matches!(result, Err(SchedulingError::Validation(_)));
}

#[tokio::test]
async fn lock_contention_exhausts_retries_into_store_unavailable() {
    let setup = TestSetup::new().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/practitioners"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::practitioner_response(&setup.practitioner_id.to_string(), "UTC")
        ])))
        .mount(&setup.mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::patient_response(&setup.patient_id.to_string())
        ])))
        .mount(&setup.mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_windows"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&setup.mock_server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&setup.mock_server)
        .await;

    // Another writer holds the day lock: every acquisition attempt is
    // rejected by the unique constraint.
    Mock::given(method("POST"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(409).set_body_string("duplicate key"))
        .mount(&setup.mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&setup.mock_server)
        .await;

    let result = setup
        .scheduling
        .create_appointment(setup.create_request(at(9, 0), at(9, 30)), TOKEN)
        .await;

    assert_matches!(result, Err(SchedulingError::StoreUnavailable(_)));
}

#[tokio::test]
async fn losing_a_post_insert_race_compensates_the_new_row() {
    let setup = TestSetup::new().await;
    setup.mount_booking_mocks().await;

    let new_id = Uuid::new_v4();
    let racing_id = Uuid::new_v4();

    // The verification pass (which excludes the fresh row) discovers that a
    // concurrent writer got there first.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(wiremock::matchers::query_param_contains("id", "neq."))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            setup.appointment_row(racing_id, at(9, 0), at(9, 30), "scheduled")
        ])))
        .mount(&setup.mock_server)
        .await;

    // The pre-insert check saw a clear schedule.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&setup.mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            setup.appointment_row(new_id, at(9, 0), at(9, 30), "scheduled")
        ])))
        .mount(&setup.mock_server)
        .await;

    // The losing row must be compensated away.
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", new_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&setup.mock_server)
        .await;

    let result = setup
        .scheduling
        .create_appointment(setup.create_request(at(9, 0), at(9, 30)), TOKEN)
        .await;

    assert_matches!(
        result,
        Err(SchedulingError::Conflict { conflicting_ids }) if conflicting_ids == vec![racing_id]
    );
}

// ==============================================================================
// STATUS TRANSITIONS
// ==============================================================================

#[tokio::test]
async fn change_status_rejects_illegal_jump_without_writing() {
    let setup = TestSetup::new().await;
    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            setup.appointment_row(appointment_id, at(9, 0), at(9, 30), "scheduled")
        ])))
        .mount(&setup.mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&setup.mock_server)
        .await;

    let result = setup
        .scheduling
        .change_status(appointment_id, AppointmentStatus::InProgress, TOKEN)
        .await;

    assert_matches!(
        result,
        Err(SchedulingError::InvalidTransition {
            from: AppointmentStatus::Scheduled,
            to: AppointmentStatus::InProgress
        })
    );
}

#[tokio::test]
async fn check_in_transition_writes_status_and_timestamp() {
    let setup = TestSetup::new().await;
    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            setup.appointment_row(appointment_id, at(9, 0), at(9, 30), "confirmed")
        ])))
        .mount(&setup.mock_server)
        .await;

    let mut updated_row = setup.appointment_row(appointment_id, at(9, 0), at(9, 30), "checked_in");
    updated_row["check_in_time"] = json!(at(8, 55).to_rfc3339());

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({ "status": "checked_in" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([updated_row])))
        .expect(1)
        .mount(&setup.mock_server)
        .await;

    let appointment = setup
        .scheduling
        .change_status(appointment_id, AppointmentStatus::CheckedIn, TOKEN)
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::CheckedIn);
    assert!(appointment.check_in_time.is_some());
}

// ==============================================================================
// UPDATE
// ==============================================================================

#[tokio::test]
async fn update_without_time_change_skips_conflict_check() {
    let setup = TestSetup::new().await;
    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            setup.appointment_row(appointment_id, at(9, 0), at(9, 30), "scheduled")
        ])))
        .mount(&setup.mock_server)
        .await;

    // The conflict candidate fetch would carry an end_time filter; assert it
    // never happens for a type-only update.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(wiremock::matchers::query_param_contains("end_time", "gt."))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&setup.mock_server)
        .await;

    let mut updated_row = setup.appointment_row(appointment_id, at(9, 0), at(9, 30), "scheduled");
    updated_row["appointment_type"] = json!("telemedicine");

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([updated_row])))
        .expect(1)
        .mount(&setup.mock_server)
        .await;

    let request = UpdateAppointmentRequest {
        start_time: None,
        end_time: None,
        appointment_type: Some(AppointmentType::Telemedicine),
    };

    let appointment = setup
        .scheduling
        .update_appointment(appointment_id, request, TOKEN)
        .await
        .unwrap();

    assert_eq!(appointment.appointment_type, AppointmentType::Telemedicine);
}

#[tokio::test]
async fn update_with_time_change_reruns_conflict_check_excluding_self() {
    let setup = TestSetup::new().await;
    setup.mount_booking_mocks().await;
    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            setup.appointment_row(appointment_id, at(9, 0), at(9, 30), "scheduled")
        ])))
        .mount(&setup.mock_server)
        .await;

    // Conflict candidates for the new range, excluding the appointment
    // being moved.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("neq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2) // initial check + post-write verify
        .mount(&setup.mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({ "end_time": at(10, 30).to_rfc3339() })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            setup.appointment_row(appointment_id, at(10, 0), at(10, 30), "scheduled")
        ])))
        .expect(1)
        .mount(&setup.mock_server)
        .await;

    let request = UpdateAppointmentRequest {
        start_time: Some(at(10, 0)),
        end_time: Some(at(10, 30)),
        appointment_type: None,
    };

    let appointment = setup
        .scheduling
        .update_appointment(appointment_id, request, TOKEN)
        .await
        .unwrap();

    assert_eq!(appointment.start_time, at(10, 0));
}

#[tokio::test]
async fn update_terminal_appointment_is_rejected() {
    let setup = TestSetup::new().await;
    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            setup.appointment_row(appointment_id, at(9, 0), at(9, 30), "cancelled")
        ])))
        .mount(&setup.mock_server)
        .await;

    let request = UpdateAppointmentRequest {
        start_time: Some(at(10, 0)),
        end_time: Some(at(10, 30)),
        appointment_type: None,
    };

    let result = setup
        .scheduling
        .update_appointment(appointment_id, request, TOKEN)
        .await;

    assert_matches!(result, Err(SchedulingError::Validation(_)));
}

// ==============================================================================
// READS & CACHE COHERENCE
// ==============================================================================

#[tokio::test]
async fn date_range_reads_are_cached_and_invalidated_by_writes() {
    let setup = TestSetup::new().await;
    let appointment_id = Uuid::new_v4();
    let from = at(0, 0);
    let to = Utc.with_ymd_and_hms(2025, 6, 3, 0, 0, 0).unwrap();

    let scheduled_row = setup.appointment_row(appointment_id, at(9, 0), at(9, 30), "scheduled");
    let cancelled_row = setup.appointment_row(appointment_id, at(9, 0), at(9, 30), "cancelled");

    // First range fetch serves the scheduled row once, then falls through
    // to the post-write view of the store.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param_is_missing("end_time"))
        .and(query_param_is_missing("id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([scheduled_row])))
        .up_to_n_times(1)
        .mount(&setup.mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param_is_missing("end_time"))
        .and(query_param_is_missing("id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([cancelled_row.clone()])))
        .mount(&setup.mock_server)
        .await;

    let first = setup
        .scheduling
        .get_appointments_for_date_range(setup.practitioner_id, from, to, None, TOKEN)
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].status, AppointmentStatus::Scheduled);

    // Identical parameters, no intervening write: served from cache, so the
    // result is identical even though the store's answer has moved on.
    let second = setup
        .scheduling
        .get_appointments_for_date_range(setup.practitioner_id, from, to, None, TOKEN)
        .await
        .unwrap();
    assert_eq!(second[0].status, AppointmentStatus::Scheduled);

    // A status write for the same practitioner-day evicts the entry.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            setup.appointment_row(appointment_id, at(9, 0), at(9, 30), "scheduled")
        ])))
        .mount(&setup.mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([cancelled_row])))
        .mount(&setup.mock_server)
        .await;

    setup
        .scheduling
        .change_status(appointment_id, AppointmentStatus::Cancelled, TOKEN)
        .await
        .unwrap();

    // The read immediately after the write must reflect it.
    let third = setup
        .scheduling
        .get_appointments_for_date_range(setup.practitioner_id, from, to, None, TOKEN)
        .await
        .unwrap();
    assert_eq!(third[0].status, AppointmentStatus::Cancelled);
}

#[tokio::test]
async fn date_range_results_are_sorted_ascending() {
    let setup = TestSetup::new().await;
    let from = at(0, 0);
    let to = Utc.with_ymd_and_hms(2025, 6, 3, 0, 0, 0).unwrap();

    // Store returns rows out of order; the service must still sort.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            setup.appointment_row(Uuid::new_v4(), at(14, 0), at(14, 30), "scheduled"),
            setup.appointment_row(Uuid::new_v4(), at(9, 0), at(9, 30), "scheduled"),
            setup.appointment_row(Uuid::new_v4(), at(11, 0), at(11, 30), "confirmed"),
        ])))
        .mount(&setup.mock_server)
        .await;

    let appointments = setup
        .scheduling
        .get_appointments_for_date_range(setup.practitioner_id, from, to, None, TOKEN)
        .await
        .unwrap();

    assert_eq!(appointments.len(), 3);
    assert!(appointments.windows(2).all(|w| w[0].start_time <= w[1].start_time));
}

#[tokio::test]
async fn today_schedule_resolves_practitioner_timezone() {
    let setup = TestSetup::new().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/practitioners"))
        .and(query_param("select", "id,timezone"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::practitioner_response(
                &setup.practitioner_id.to_string(),
                "America/New_York"
            )
        ])))
        .expect(1)
        .mount(&setup.mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&setup.mock_server)
        .await;

    let appointments = setup
        .scheduling
        .get_today_schedule(setup.practitioner_id, TOKEN)
        .await
        .unwrap();

    assert!(appointments.is_empty());
}
