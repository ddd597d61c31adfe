pub mod client;
pub mod keys;
pub mod memory;
pub mod redis_cache;

pub use client::{get_or_compute, invalidate_practitioner_days, CacheClient, CacheError};
pub use memory::MemoryCacheClient;
pub use redis_cache::RedisCacheClient;
