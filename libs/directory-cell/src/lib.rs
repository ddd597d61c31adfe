pub mod models;
pub mod services;

pub use models::{DirectoryError, PractitionerRecord};
pub use services::directory::DirectoryService;
