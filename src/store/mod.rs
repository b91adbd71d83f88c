//! Backing-store abstraction for the queue engine.
//!
//! The engine persists all task state through `Store`, a thin trait over the
//! ordered key-value primitives it needs:
//!
//! - score-ordered sets for the priority indexes (insert, ranged scan, remove)
//! - hashes for task records, worker heartbeats and counters
//! - lists for the dead-letter queue
//! - plain sets for per-worker in-flight membership
//!
//! Two implementations ship with the crate: `RedisStore` for production and
//! `MemoryStore` for tests and local development. The engine depends on the
//! atomicity of individual store operations (a member can be removed from a
//! sorted set by exactly one caller); both implementations provide it.

pub mod memory;
pub mod redis;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Errors raised by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to establish a connection to the backing store.
    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    /// A store operation failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Ordered key-value primitives backing the queue engine.
///
/// Scores are unix timestamps with fractional seconds. Ranged scans return
/// members in ascending score order; equal scores order lexicographically by
/// member, matching Redis sorted-set semantics.
#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts or updates a member in a sorted set.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;

    /// Returns members with `min <= score <= max`, ascending by score.
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64)
        -> Result<Vec<String>, StoreError>;

    /// Removes a member from a sorted set.
    ///
    /// Returns `true` if the member was present. Under concurrent callers
    /// exactly one sees `true`; this is the claim primitive.
    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Returns the number of members in a sorted set.
    async fn zcard(&self, key: &str) -> Result<u64, StoreError>;

    /// Sets multiple hash fields at once.
    async fn hset_fields(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError>;

    /// Reads a single hash field.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// Reads all fields of a hash. Missing keys yield an empty map.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Atomically increments an integer hash field, creating it at zero.
    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;

    /// Pushes a value onto the head of a list.
    async fn lpush(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removes the first occurrence of a value from a list.
    ///
    /// Returns `true` if a value was removed.
    async fn lrem(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    /// Returns the list slice between `start` and `stop` inclusive.
    ///
    /// Negative indexes count from the tail, as in Redis `LRANGE`.
    async fn lrange(&self, key: &str, start: isize, stop: isize)
        -> Result<Vec<String>, StoreError>;

    /// Returns the length of a list.
    async fn llen(&self, key: &str) -> Result<u64, StoreError>;

    /// Adds a member to a set.
    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Removes a member from a set. Returns `true` if it was present.
    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Returns all members of a set.
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Returns the number of members in a set.
    async fn scard(&self, key: &str) -> Result<u64, StoreError>;

    /// Sets a time-to-live on a key, after which it disappears.
    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<(), StoreError>;

    /// Deletes a key of any type.
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Returns keys matching a glob-style pattern (e.g. `app:processing:*`).
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;
}
