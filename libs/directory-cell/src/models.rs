use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PractitionerRecord {
    pub id: Uuid,
    pub timezone: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory lookup failed: {0}")]
    Lookup(String),
}
