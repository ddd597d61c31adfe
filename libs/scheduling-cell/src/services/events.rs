use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::AppointmentStatus;

/// Events emitted for the notification collaborator. Delivery is
/// fire-and-forget; a failed publish never rolls back the scheduling write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulingEvent {
    AppointmentCreated {
        appointment_id: Uuid,
        practitioner_id: Uuid,
        patient_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    },
    AppointmentStatusChanged {
        appointment_id: Uuid,
        practitioner_id: Uuid,
        patient_id: Uuid,
        old_status: AppointmentStatus,
        new_status: AppointmentStatus,
        changed_at: DateTime<Utc>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("event backend unavailable: {0}")]
    Backend(String),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &SchedulingEvent) -> Result<(), EventError>;
}

/// Publishes events as JSON on a Redis channel.
pub struct RedisEventPublisher {
    pool: Pool,
    channel: String,
}

impl RedisEventPublisher {
    pub async fn connect(redis_url: &str, channel: &str) -> Result<Self, EventError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| EventError::Backend(format!("pool creation failed: {}", e)))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| EventError::Backend(format!("connection failed: {}", e)))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| EventError::Backend(format!("ping failed: {}", e)))?;

        info!("Redis event publisher initialized on channel {}", channel);
        Ok(Self {
            pool,
            channel: channel.to_string(),
        })
    }
}

#[async_trait]
impl EventPublisher for RedisEventPublisher {
    async fn publish(&self, event: &SchedulingEvent) -> Result<(), EventError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| EventError::Backend(format!("serialization failed: {}", e)))?;

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| EventError::Backend(e.to_string()))?;

        let _: () = conn
            .publish(&self.channel, payload)
            .await
            .map_err(|e| EventError::Backend(e.to_string()))?;

        debug!("Published scheduling event to {}", self.channel);
        Ok(())
    }
}

/// Publisher for deployments without an event backend configured.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _event: &SchedulingEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// Emit an event without awaiting delivery. Runs after the store write has
/// committed; failures are logged and dropped.
pub fn emit(publisher: Arc<dyn EventPublisher>, event: SchedulingEvent) {
    tokio::spawn(async move {
        if let Err(e) = publisher.publish(&event).await {
            warn!("Failed to publish scheduling event: {}", e);
        }
    });
}
