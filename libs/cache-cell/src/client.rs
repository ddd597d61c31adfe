use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::keys;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Backend(String),

    #[error("cache entry could not be decoded: {0}")]
    Decode(String),
}

/// Key-value cache in front of read-heavy schedule queries. Entries are
/// derived, expendable copies — losing them costs a recompute, never data.
///
/// Implementations must tolerate concurrent population and invalidation;
/// the worst a race can produce is an extra miss.
#[async_trait]
pub trait CacheClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Record `key` under an invalidation tag so a later write to the tag's
    /// (practitioner, day) can evict every entry that touched it.
    async fn register_key(&self, tag: &str, key: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Drop every key registered under `tag`, and the tag itself.
    async fn invalidate_tag(&self, tag: &str) -> Result<(), CacheError>;
}

/// Cache-first read. Returns the cached value when present and unexpired,
/// otherwise runs `compute`, stores the result under `key` for `ttl`, and
/// registers the key under each invalidation tag.
///
/// Cache failures never block the read: any transport or decode problem is
/// logged and the call degrades to computing directly.
pub async fn get_or_compute<T, E, F, Fut>(
    cache: &dyn CacheClient,
    key: &str,
    ttl: Duration,
    tags: &[String],
    compute: F,
) -> Result<T, E>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match cache.get(key).await {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!("cache hit for {}", key);
                return Ok(value);
            }
            Err(e) => warn!("corrupt cache entry for {}: {}", key, e),
        },
        Ok(None) => debug!("cache miss for {}", key),
        Err(e) => warn!("cache read failed for {}: {}", key, e),
    }

    let value = compute().await?;

    match serde_json::to_string(&value) {
        Ok(raw) => {
            if let Err(e) = cache.set(key, &raw, ttl).await {
                warn!("cache write failed for {}: {}", key, e);
            } else {
                // The tag set outlives its entries a little so invalidation
                // can still find keys right at their TTL edge.
                let tag_ttl = ttl + Duration::from_secs(60);
                for tag in tags {
                    if let Err(e) = cache.register_key(tag, key, tag_ttl).await {
                        warn!("cache tag registration failed for {}: {}", key, e);
                    }
                }
            }
        }
        Err(e) => warn!("cache serialization failed for {}: {}", key, e),
    }

    Ok(value)
}

/// Eagerly evict everything cached for the given practitioner-days. Called
/// after every committed appointment write; failures only cost extra misses,
/// so they are logged and swallowed.
pub async fn invalidate_practitioner_days(
    cache: &dyn CacheClient,
    practitioner_id: Uuid,
    days: &[NaiveDate],
) {
    for day in days {
        let tag = keys::day_tag(practitioner_id, *day);
        if let Err(e) = cache.invalidate_tag(&tag).await {
            warn!("cache invalidation failed for {}: {}", tag, e);
        } else {
            debug!("invalidated cache tag {}", tag);
        }
    }
}
