use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use tracing::info;

use crate::client::{CacheClient, CacheError};

/// Redis-backed cache client. Entries expire via SETEX; per-(practitioner,
/// day) registry sets make eager day invalidation possible.
pub struct RedisCacheClient {
    pool: Pool,
}

impl RedisCacheClient {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::Backend(format!("pool creation failed: {}", e)))?;

        // Probe the connection up front so a misconfigured URL fails at
        // startup rather than on the first degraded read.
        let mut conn = pool
            .get()
            .await
            .map_err(|e| CacheError::Backend(format!("connection failed: {}", e)))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("ping failed: {}", e)))?;

        info!("Redis cache client initialized successfully");
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }
}

#[async_trait]
impl CacheClient for RedisCacheClient {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let seconds = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(key, value, seconds)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn register_key(&self, tag: &str, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .sadd(tag, key)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        let _: () = conn
            .expire(tag, ttl.as_secs().max(1) as i64)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let keys: Vec<String> = conn
            .smembers(tag)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        if !keys.is_empty() {
            let _: () = conn
                .del(keys)
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?;
        }

        let _: () = conn
            .del(tag)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }
}
