use std::sync::Arc;

use cache_cell::CacheClient;
use shared_config::AppConfig;
use shared_database::store::StoreClient;

use crate::services::events::EventPublisher;
use crate::services::scheduling::SchedulingService;

/// Shared application state for the scheduling routes. The cache and event
/// clients are injected here once at startup; their connect/disconnect
/// lifecycle belongs to the binary, not to any handler.
pub struct SchedulingState {
    pub config: Arc<AppConfig>,
    pub scheduling: Arc<SchedulingService>,
}

impl SchedulingState {
    pub fn new(
        config: Arc<AppConfig>,
        cache: Arc<dyn CacheClient>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        let store = Arc::new(StoreClient::new(&config));
        let scheduling = Arc::new(SchedulingService::new(
            Arc::clone(&config),
            store,
            cache,
            events,
        ));

        Self { config, scheduling }
    }
}
