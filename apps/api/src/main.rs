use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use cache_cell::{CacheClient, MemoryCacheClient, RedisCacheClient};
use scheduling_cell::services::events::{EventPublisher, NoopEventPublisher, RedisEventPublisher};
use scheduling_cell::SchedulingState;
use shared_config::AppConfig;

#[tokio::main]
async fn main() {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting appointment scheduling API server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());

    // Cache and event clients are owned here; the scheduling service only
    // sees the injected trait objects. Without Redis the engine still runs,
    // with an in-process cache and no outbound events.
    let cache: Arc<dyn CacheClient> = match &config.redis_url {
        Some(redis_url) => match RedisCacheClient::connect(redis_url).await {
            Ok(client) => Arc::new(client),
            Err(e) => {
                warn!("Redis cache unavailable ({}), using in-process cache", e);
                Arc::new(MemoryCacheClient::new())
            }
        },
        None => {
            warn!("REDIS_URL not set, using in-process cache");
            Arc::new(MemoryCacheClient::new())
        }
    };

    let events: Arc<dyn EventPublisher> = match &config.redis_url {
        Some(redis_url) => {
            match RedisEventPublisher::connect(redis_url, &config.event_channel).await {
                Ok(publisher) => Arc::new(publisher),
                Err(e) => {
                    warn!("Redis event publisher unavailable ({}), events disabled", e);
                    Arc::new(NoopEventPublisher)
                }
            }
        }
        None => Arc::new(NoopEventPublisher),
    };

    let state = Arc::new(SchedulingState::new(Arc::clone(&config), cache, events));

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(state, Arc::clone(&config))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
