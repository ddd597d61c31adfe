use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::client::{CacheClient, CacheError};

/// In-process cache client. Used in tests and as the fallback when no Redis
/// URL is configured; the scheduling service cannot tell the difference.
#[derive(Default)]
pub struct MemoryCacheClient {
    entries: RwLock<HashMap<String, (Instant, String)>>,
    tags: RwLock<HashMap<String, HashSet<String>>>,
}

impl MemoryCacheClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheClient for MemoryCacheClient {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let expired = {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((expires_at, value)) if *expires_at > Instant::now() => {
                    return Ok(Some(value.clone()));
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            self.entries.write().await.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .write()
            .await
            .insert(key.to_string(), (expires_at, value.to_string()));
        Ok(())
    }

    async fn register_key(&self, tag: &str, key: &str, _ttl: Duration) -> Result<(), CacheError> {
        self.tags
            .write()
            .await
            .entry(tag.to_string())
            .or_default()
            .insert(key.to_string());
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<(), CacheError> {
        let keys = self.tags.write().await.remove(tag);
        if let Some(keys) = keys {
            let mut entries = self.entries.write().await;
            for key in keys {
                entries.remove(&key);
            }
        }
        Ok(())
    }
}
