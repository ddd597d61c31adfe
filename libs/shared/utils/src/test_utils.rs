use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub store_url: String,
    pub store_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            store_url: "http://localhost:54321".to_string(),
            store_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_store_url(store_url: &str) -> Self {
        Self {
            store_url: store_url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            store_url: self.store_url.clone(),
            store_anon_key: self.store_anon_key.clone(),
            jwt_secret: self.jwt_secret.clone(),
            redis_url: None,
            event_channel: "scheduling:events".to_string(),
            default_timezone: "UTC".to_string(),
            store_timeout_secs: 5,
            request_timeout_secs: 10,
            cache_ttl_day_schedule_secs: 120,
            cache_ttl_date_range_secs: 600,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "patient".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn practitioner(email: &str) -> Self {
        Self::new(email, "practitioner")
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

pub struct MockStoreResponses;

impl MockStoreResponses {
    pub fn patient_response(patient_id: &str) -> serde_json::Value {
        json!({
            "id": patient_id,
            "email": "patient@example.com",
            "first_name": "Test",
            "last_name": "Patient",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn practitioner_response(practitioner_id: &str, timezone: &str) -> serde_json::Value {
        json!({
            "id": practitioner_id,
            "email": "practitioner@example.com",
            "first_name": "Test",
            "last_name": "Practitioner",
            "timezone": timezone,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn appointment_response(
        appointment_id: &str,
        practitioner_id: &str,
        patient_id: &str,
        start_time: &str,
        end_time: &str,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": appointment_id,
            "practitioner_id": practitioner_id,
            "patient_id": patient_id,
            "start_time": start_time,
            "end_time": end_time,
            "status": status,
            "appointment_type": "routine",
            "check_in_time": null,
            "check_out_time": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn availability_window_response(
        window_id: &str,
        practitioner_id: &str,
        day_of_week: i32,
    ) -> serde_json::Value {
        json!({
            "id": window_id,
            "practitioner_id": practitioner_id,
            "day_of_week": day_of_week,
            "specific_date": null,
            "start_time": "09:00:00",
            "end_time": "17:00:00",
            "is_available": true,
            "recurrence": "weekly",
            "effective_from": "2024-01-01",
            "recurrence_end_date": null,
            "timezone": "UTC",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn error_response(message: &str, code: &str) -> serde_json::Value {
        json!({
            "error": {
                "message": message,
                "code": code
            }
        })
    }
}
