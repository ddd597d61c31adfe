use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use shared_database::store::StoreClient;

use crate::models::{DirectoryError, PractitionerRecord};

/// Narrow interface onto the patient/practitioner directory. The scheduling
/// engine only needs existence checks and the practitioner's configured
/// time zone; profile management lives elsewhere.
pub struct DirectoryService {
    store: Arc<StoreClient>,
}

impl DirectoryService {
    pub fn new(store: Arc<StoreClient>) -> Self {
        Self { store }
    }

    pub async fn patient_exists(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<bool, DirectoryError> {
        debug!("Checking patient exists: {}", patient_id);

        let path = format!("/rest/v1/patients?id=eq.{}&select=id", patient_id);
        let result: Vec<Value> = self
            .store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| DirectoryError::Lookup(e.to_string()))?;

        Ok(!result.is_empty())
    }

    pub async fn practitioner_exists(
        &self,
        practitioner_id: Uuid,
        auth_token: &str,
    ) -> Result<bool, DirectoryError> {
        debug!("Checking practitioner exists: {}", practitioner_id);

        let path = format!("/rest/v1/practitioners?id=eq.{}&select=id", practitioner_id);
        let result: Vec<Value> = self
            .store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| DirectoryError::Lookup(e.to_string()))?;

        Ok(!result.is_empty())
    }

    /// The practitioner's configured IANA time zone, if any. Callers decide
    /// the fallback; the directory reports only what is stored.
    pub async fn get_practitioner_timezone(
        &self,
        practitioner_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<String>, DirectoryError> {
        debug!("Fetching timezone for practitioner: {}", practitioner_id);

        let path = format!(
            "/rest/v1/practitioners?id=eq.{}&select=id,timezone",
            practitioner_id
        );
        let result: Vec<Value> = self
            .store
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| DirectoryError::Lookup(e.to_string()))?;

        let record = match result.into_iter().next() {
            Some(raw) => serde_json::from_value::<PractitionerRecord>(raw)
                .map_err(|e| DirectoryError::Lookup(format!("Failed to parse practitioner: {}", e)))?,
            None => return Ok(None),
        };

        Ok(record.timezone)
    }
}
