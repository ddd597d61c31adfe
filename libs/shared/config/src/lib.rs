use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store_url: String,
    pub store_anon_key: String,
    pub jwt_secret: String,
    pub redis_url: Option<String>,
    pub event_channel: String,
    pub default_timezone: String,
    pub store_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub cache_ttl_day_schedule_secs: u64,
    pub cache_ttl_date_range_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            store_url: env::var("STORE_URL")
                .unwrap_or_else(|_| {
                    warn!("STORE_URL not set, using empty value");
                    String::new()
                }),
            store_anon_key: env::var("STORE_ANON_KEY")
                .unwrap_or_else(|_| {
                    warn!("STORE_ANON_KEY not set, using empty value");
                    String::new()
                }),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("JWT_SECRET not set, using empty value");
                    String::new()
                }),
            redis_url: env::var("REDIS_URL").ok(),
            event_channel: env::var("SCHEDULING_EVENT_CHANNEL")
                .unwrap_or_else(|_| "scheduling:events".to_string()),
            default_timezone: env::var("DEFAULT_TIMEZONE")
                .unwrap_or_else(|_| "UTC".to_string()),
            store_timeout_secs: parse_env_u64("STORE_TIMEOUT_SECS", 10),
            request_timeout_secs: parse_env_u64("REQUEST_TIMEOUT_SECS", 30),
            cache_ttl_day_schedule_secs: parse_env_u64("CACHE_TTL_DAY_SCHEDULE_SECS", 120),
            cache_ttl_date_range_secs: parse_env_u64("CACHE_TTL_DATE_RANGE_SECS", 600),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.store_url.is_empty()
            && !self.store_anon_key.is_empty()
            && !self.jwt_secret.is_empty()
    }

    pub fn is_cache_configured(&self) -> bool {
        self.redis_url.is_some()
    }
}

fn parse_env_u64(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} is not a valid integer, using default {}", name, default);
            default
        }),
        Err(_) => default,
    }
}
